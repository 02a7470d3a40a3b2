mod error;
mod file_manager;
mod header;
mod page_manager;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::{FileError, FileResult};
pub use file_manager::{CorruptPage, FileManager, ScanReport};
pub use header::FileHeader;
pub use page_manager::{CacheStats, PageManager, PageRef};

/// Page size used when none is given (4KB)
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Smallest page size a file may be created with
pub const MIN_PAGE_SIZE: u32 = 512;

/// Largest page size a file may be created with
pub const MAX_PAGE_SIZE: u32 = 65536;

/// Default number of pages the buffer pool tries to keep resident.
/// With 1000 pages × 4KB that is about 4MB of cached page data.
pub const BUFFER_POOL_SIZE: usize = 1000;

/// Magic bytes at offset 0 of every store file
pub const FILE_SIGNATURE: [u8; 6] = *b"PGSTOR";

/// On-disk format revision written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// Logical page number inside a store file. Page 0 holds the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl PageId {
    pub const HEADER: PageId = PageId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_header(self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this page in a file with the given page size
    pub fn offset(self, page_size: u32) -> Option<u64> {
        self.0.checked_mul(page_size as u64)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Tunables for opening a store through [`PageManager`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Page size for newly created files; ignored when opening
    pub page_size: u32,
    /// Soft limit on resident pages in the buffer pool
    pub cache_capacity: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: BUFFER_POOL_SIZE,
        }
    }
}
