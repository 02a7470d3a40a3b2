use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("Not enough free space in page: requested {requested} bytes, {available} available")]
    InsufficientSpace { requested: usize, available: usize },

    #[error("Invalid page buffer size: expected {expected}, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Malformed page: {0}")]
    Malformed(String),
}

pub type PageResult<T> = Result<T, PageError>;
