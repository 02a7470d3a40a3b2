pub mod file;
pub mod page;

pub use file::{
    BUFFER_POOL_SIZE, CacheStats, CorruptPage, DEFAULT_PAGE_SIZE, FileError, FileHeader,
    FileManager, FileResult, MAX_PAGE_SIZE, MIN_PAGE_SIZE, PageId, PageManager, PageRef,
    ScanReport, StorageOptions,
};
pub use page::{PAGE_HEADER_SIZE, Page, PageError, PageHeader, PageResult, PageType};
