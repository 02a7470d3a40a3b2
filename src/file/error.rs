use std::io;
use thiserror::Error;

use super::PageId;
use crate::page::{PageError, PageType};

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("No file is open")]
    NotOpen,

    #[error("A file is already open")]
    AlreadyOpen,

    #[error("Invalid page size {actual}: must be between {min} and {max}")]
    InvalidPageSize { actual: u32, min: u32, max: u32 },

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported format version {found}, expected {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Page not found: page_id={0}")]
    PageNotFound(PageId),

    #[error("Page {page_id} out of range: file has {page_count} pages")]
    PageOutOfRange { page_id: PageId, page_count: u64 },

    #[error("Page {0} is already free")]
    DoubleFree(PageId),

    #[error("Page {0} has been freed")]
    PageIsFree(PageId),

    #[error("Cannot allocate a page of type {0}")]
    InvalidPageType(PageType),

    #[error("Checksum mismatch on page {page_id}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        page_id: PageId,
        stored: u32,
        computed: u32,
    },

    #[error("Corrupted file: {0}")]
    Corruption(String),

    #[error("Storage full: {0}")]
    StorageFull(io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Handle for page {0} is not the cached one")]
    StaleHandle(PageId),

    #[error("Page error: {0}")]
    Page(#[from] PageError),
}

impl FileError {
    /// Whether the error means on-disk data failed validation
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. } | Self::Corruption(_))
    }
}

pub type FileResult<T> = Result<T, FileError>;
