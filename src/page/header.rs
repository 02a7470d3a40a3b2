//! Fixed 24-byte header at the start of every data page.
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       1   page_type tag
//!   1       3   reserved (zero)
//!   4       4   checksum (CRC32 of the page, excluding this field)
//!   8       8   next_free (free pages only, 0 = end of chain)
//!  16       4   free_space_offset (bump pointer into the payload)
//!  20       4   reserved (zero)
//! ```

use std::ops::Range;

use super::error::{PageError, PageResult};
use super::page_type::PageType;
use crate::file::PageId;

pub const PAGE_HEADER_SIZE: usize = 24;

pub(crate) const CHECKSUM_RANGE: Range<usize> = 4..8;
const NEXT_FREE_RANGE: Range<usize> = 8..16;
const FREE_OFFSET_RANGE: Range<usize> = 16..20;
const RESERVED_RANGES: [Range<usize>; 2] = [1..4, 20..24];

/// Page header stored at the beginning of each page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_type: PageType,
    pub checksum: u32,
    /// Next link of the free list; always `None` for live pages
    pub next_free: Option<PageId>,
    pub free_space_offset: u32,
}

impl PageHeader {
    pub const SIZE: usize = PAGE_HEADER_SIZE;

    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type,
            checksum: 0,
            next_free: None,
            free_space_offset: 0,
        }
    }

    /// Header of a page that has been put on the free list
    pub fn free(next_free: Option<PageId>) -> Self {
        Self {
            next_free,
            ..Self::new(PageType::Free)
        }
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut result = [0u8; Self::SIZE];
        result[0] = self.page_type.as_u8();
        result[CHECKSUM_RANGE].copy_from_slice(&self.checksum.to_le_bytes());
        let next_free = match self.next_free {
            Some(page_id) if self.page_type.is_free() => page_id.as_u64(),
            _ => 0,
        };
        result[NEXT_FREE_RANGE].copy_from_slice(&next_free.to_le_bytes());
        result[FREE_OFFSET_RANGE].copy_from_slice(&self.free_space_offset.to_le_bytes());
        result
    }

    pub fn deserialize(data: &[u8]) -> PageResult<Self> {
        if data.len() < Self::SIZE {
            return Err(PageError::Malformed(format!(
                "Not enough data for page header: {} bytes",
                data.len()
            )));
        }

        // Every byte is covered by the checksum, so nothing may be dropped
        if RESERVED_RANGES
            .iter()
            .any(|range| data[range.clone()].iter().any(|&b| b != 0))
        {
            return Err(PageError::Malformed(
                "reserved header bytes are not zero".to_string(),
            ));
        }

        let page_type = PageType::from_u8(data[0]);
        let checksum = read_u32(&data[CHECKSUM_RANGE]);
        let next_free = match read_u64(&data[NEXT_FREE_RANGE]) {
            0 => None,
            raw if !page_type.is_free() => {
                return Err(PageError::Malformed(format!(
                    "{page_type} page carries free list link {raw}"
                )));
            }
            raw => Some(PageId::new(raw)),
        };
        let free_space_offset = read_u32(&data[FREE_OFFSET_RANGE]);

        Ok(Self {
            page_type,
            checksum,
            next_free,
            free_space_offset,
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

/// Checksum stored in a raw page image
pub fn stored_checksum(image: &[u8]) -> u32 {
    read_u32(&image[CHECKSUM_RANGE])
}

/// CRC32 over a raw page image, skipping the checksum field itself.
///
/// Produces the same value as [`crate::page::Page::calculate_checksum`] for a
/// page serialized into `image`.
pub fn image_checksum(image: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&image[..CHECKSUM_RANGE.start]);
    hasher.update(&image[CHECKSUM_RANGE.end..]);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_layout() {
        let header = PageHeader {
            page_type: PageType::Index,
            checksum: 0xDEAD_BEEF,
            next_free: None,
            free_space_offset: 300,
        };
        let bytes = header.serialize();

        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..4], &[0, 0, 0]);
        assert_eq!(&bytes[4..8], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(&bytes[8..16], &[0; 8]);
        assert_eq!(&bytes[16..20], &300u32.to_le_bytes());
        assert_eq!(PageHeader::deserialize(&bytes).unwrap(), header);
    }

    #[test]
    fn test_free_header_keeps_link() {
        let header = PageHeader::free(Some(PageId::new(7)));
        let decoded = PageHeader::deserialize(&header.serialize()).unwrap();
        assert!(decoded.page_type.is_free());
        assert_eq!(decoded.next_free, Some(PageId::new(7)));
    }

    #[test]
    fn test_live_header_drops_link() {
        let mut header = PageHeader::new(PageType::Data);
        header.next_free = Some(PageId::new(3));
        let decoded = PageHeader::deserialize(&header.serialize()).unwrap();
        assert_eq!(decoded.next_free, None);
    }

    #[test]
    fn test_deserialize_rejects_reserved_bytes() {
        let header = PageHeader::new(PageType::Data);
        for offset in [1, 3, 20, 23] {
            let mut bytes = header.serialize();
            bytes[offset] = 0x01;
            assert!(matches!(
                PageHeader::deserialize(&bytes),
                Err(PageError::Malformed(_))
            ));
        }
    }

    #[test]
    fn test_deserialize_rejects_link_on_live_page() {
        let mut bytes = PageHeader::free(Some(PageId::new(5))).serialize();
        bytes[0] = PageType::Overflow.as_u8();
        assert!(matches!(
            PageHeader::deserialize(&bytes),
            Err(PageError::Malformed(_))
        ));
    }

    #[test]
    fn test_deserialize_short_buffer() {
        let result = PageHeader::deserialize(&[0u8; 10]);
        assert!(matches!(result, Err(PageError::Malformed(_))));
    }

    #[test]
    fn test_image_checksum_ignores_checksum_field() {
        let mut image = vec![0u8; 512];
        image[0] = 1;
        image[100..104].copy_from_slice(b"data");
        let before = image_checksum(&image);

        image[CHECKSUM_RANGE].copy_from_slice(&[0xFF; 4]);
        assert_eq!(image_checksum(&image), before);
        assert_eq!(stored_checksum(&image), u32::MAX);

        image[101] ^= 0x01;
        assert_ne!(image_checksum(&image), before);
    }
}
