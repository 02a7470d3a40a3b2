//! File header stored at the start of page 0.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       6   signature "PGSTOR"
//!   6       4   format version
//!  10       4   page_size
//!  14       8   page_count (header page included)
//!  22       8   free_list_head (0 = empty)
//!  30       4   CRC32 of bytes 0..30
//! ```
//!
//! The remainder of page 0 is zero.

use std::ops::Range;

use super::error::{FileError, FileResult};
use super::{FILE_SIGNATURE, FORMAT_VERSION, MAX_PAGE_SIZE, MIN_PAGE_SIZE, PageId};

const SIGNATURE_RANGE: Range<usize> = 0..6;
const VERSION_RANGE: Range<usize> = 6..10;
const PAGE_SIZE_RANGE: Range<usize> = 10..14;
const PAGE_COUNT_RANGE: Range<usize> = 14..22;
const FREE_HEAD_RANGE: Range<usize> = 22..30;
const CRC_RANGE: Range<usize> = 30..34;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub signature: [u8; 6],
    pub version: u32,
    pub page_size: u32,
    pub page_count: u64,
    pub free_list_head: Option<PageId>,
}

impl FileHeader {
    pub const SIZE: usize = 34;

    /// Header of a freshly created file: just page 0, empty free list
    pub fn new(page_size: u32) -> Self {
        Self {
            signature: FILE_SIGNATURE,
            version: FORMAT_VERSION,
            page_size,
            page_count: 1,
            free_list_head: None,
        }
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut result = [0u8; Self::SIZE];
        result[SIGNATURE_RANGE].copy_from_slice(&self.signature);
        result[VERSION_RANGE].copy_from_slice(&self.version.to_le_bytes());
        result[PAGE_SIZE_RANGE].copy_from_slice(&self.page_size.to_le_bytes());
        result[PAGE_COUNT_RANGE].copy_from_slice(&self.page_count.to_le_bytes());
        let head = self.free_list_head.map_or(0, PageId::as_u64);
        result[FREE_HEAD_RANGE].copy_from_slice(&head.to_le_bytes());
        let crc = crc32fast::hash(&result[..CRC_RANGE.start]);
        result[CRC_RANGE].copy_from_slice(&crc.to_le_bytes());
        result
    }

    pub fn deserialize(data: &[u8]) -> FileResult<Self> {
        if data.len() < Self::SIZE {
            return Err(FileError::InvalidFormat(format!(
                "file too short for header: {} bytes",
                data.len()
            )));
        }

        let mut signature = [0u8; 6];
        signature.copy_from_slice(&data[SIGNATURE_RANGE]);
        if signature != FILE_SIGNATURE {
            return Err(FileError::InvalidFormat(format!(
                "bad signature {:?}",
                String::from_utf8_lossy(&signature)
            )));
        }

        let version = read_u32(&data[VERSION_RANGE]);
        if version != FORMAT_VERSION {
            return Err(FileError::UnsupportedVersion {
                found: version,
                supported: FORMAT_VERSION,
            });
        }

        let stored = read_u32(&data[CRC_RANGE]);
        let computed = crc32fast::hash(&data[..CRC_RANGE.start]);
        if stored != computed {
            return Err(FileError::Corruption(format!(
                "file header checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }

        let page_size = read_u32(&data[PAGE_SIZE_RANGE]);
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(FileError::InvalidFormat(format!(
                "page size {page_size} out of range"
            )));
        }

        let free_list_head = match read_u64(&data[FREE_HEAD_RANGE]) {
            0 => None,
            raw => Some(PageId::new(raw)),
        };

        Ok(Self {
            signature,
            version,
            page_size,
            page_count: read_u64(&data[PAGE_COUNT_RANGE]),
            free_list_head,
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileHeader {
        FileHeader {
            page_count: 12,
            free_list_head: Some(PageId::new(7)),
            ..FileHeader::new(4096)
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample();
        let bytes = header.serialize();
        assert_eq!(&bytes[0..6], b"PGSTOR");
        assert_eq!(&bytes[6..10], &1u32.to_le_bytes());
        assert_eq!(&bytes[10..14], &4096u32.to_le_bytes());
        assert_eq!(FileHeader::deserialize(&bytes).unwrap(), header);
    }

    #[test]
    fn test_empty_free_list_is_zero() {
        let bytes = FileHeader::new(512).serialize();
        assert_eq!(&bytes[22..30], &[0u8; 8]);
        assert_eq!(FileHeader::deserialize(&bytes).unwrap().free_list_head, None);
    }

    #[test]
    fn test_rejects_short_buffer() {
        let result = FileHeader::deserialize(&[0u8; 20]);
        assert!(matches!(result, Err(FileError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_bad_signature() {
        let mut bytes = sample().serialize();
        bytes[0] = b'X';
        let result = FileHeader::deserialize(&bytes);
        assert!(matches!(result, Err(FileError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut header = sample();
        header.version = 2;
        let result = FileHeader::deserialize(&header.serialize());
        assert!(matches!(
            result,
            Err(FileError::UnsupportedVersion {
                found: 2,
                supported: 1
            })
        ));
    }

    #[test]
    fn test_detects_damaged_field() {
        let mut bytes = sample().serialize();
        bytes[15] ^= 0x01;
        let result = FileHeader::deserialize(&bytes);
        assert!(matches!(result, Err(FileError::Corruption(_))));
    }

    #[test]
    fn test_rejects_page_size_out_of_range() {
        let header = FileHeader::new(100);
        let result = FileHeader::deserialize(&header.serialize());
        assert!(matches!(result, Err(FileError::InvalidFormat(_))));
    }
}
