//! In-memory page representation and its on-disk header codec.

mod error;
mod header;
mod page;
mod page_type;

pub use error::{PageError, PageResult};
pub use header::{PAGE_HEADER_SIZE, PageHeader, image_checksum, stored_checksum};
pub use page::Page;
pub use page_type::PageType;
