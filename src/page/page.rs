use super::error::{PageError, PageResult};
use super::header::{CHECKSUM_RANGE, PAGE_HEADER_SIZE, PageHeader};
use super::page_type::PageType;
use crate::file::PageId;

/// In-memory copy of one fixed-size page: header plus payload.
///
/// The payload is handed out front to back by a bump allocator
/// ([`Page::allocate`]). Carved slices are never reclaimed at this layer;
/// record layouts built on top of a page own that bookkeeping.
///
/// The checksum is only restamped when asked to ([`Page::update_checksum`])
/// or when the page is persisted through the file manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    page_id: PageId,
    header: PageHeader,
    payload: Box<[u8]>,
}

impl Page {
    /// Create a zeroed page of the given type with a valid checksum.
    /// `page_size` must be at least [`PAGE_HEADER_SIZE`].
    pub fn new(page_id: PageId, page_type: PageType, page_size: u32) -> Self {
        debug_assert!(
            page_size as usize >= PAGE_HEADER_SIZE,
            "page size {page_size} is smaller than the page header"
        );
        let payload_len = (page_size as usize).saturating_sub(PAGE_HEADER_SIZE);
        let mut page = Self {
            page_id,
            header: PageHeader::new(page_type),
            payload: vec![0u8; payload_len].into_boxed_slice(),
        };
        page.update_checksum();
        page
    }

    /// Create the image of a page sitting on the free list
    pub(crate) fn new_free(page_id: PageId, next_free: Option<PageId>, page_size: u32) -> Self {
        let mut page = Self::new(page_id, PageType::Free, page_size);
        page.header = PageHeader::free(next_free);
        page.update_checksum();
        page
    }

    /// Decode a raw page image. The checksum is carried over, not verified.
    pub fn from_bytes(page_id: PageId, data: &[u8]) -> PageResult<Self> {
        let header = PageHeader::deserialize(data)?;
        let payload = &data[PAGE_HEADER_SIZE..];

        if header.free_space_offset as usize > payload.len() {
            return Err(PageError::Malformed(format!(
                "free space offset {} beyond payload of {} bytes",
                header.free_space_offset,
                payload.len()
            )));
        }

        Ok(Self {
            page_id,
            header,
            payload: payload.into(),
        })
    }

    /// Serialize header and payload into `buf`, which must be exactly one page
    pub fn write_to(&self, buf: &mut [u8]) -> PageResult<()> {
        if buf.len() != self.page_size() as usize {
            return Err(PageError::BufferSize {
                expected: self.page_size() as usize,
                actual: buf.len(),
            });
        }

        buf[..PAGE_HEADER_SIZE].copy_from_slice(&self.header.serialize());
        buf[PAGE_HEADER_SIZE..].copy_from_slice(&self.payload);
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.page_size() as usize);
        buf.extend_from_slice(&self.header.serialize());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }

    pub fn header(&self) -> &PageHeader {
        &self.header
    }

    /// Full on-disk size of the page, header included
    pub fn page_size(&self) -> u32 {
        (PAGE_HEADER_SIZE + self.payload.len()) as u32
    }

    pub fn checksum(&self) -> u32 {
        self.header.checksum
    }

    pub(crate) fn next_free(&self) -> Option<PageId> {
        self.header.next_free
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Direct write access to the whole payload, bypassing the bump allocator
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Offset of the first payload byte not yet handed out by `allocate`
    pub fn free_space_offset(&self) -> usize {
        self.header.free_space_offset as usize
    }

    /// Remaining unallocated payload bytes
    pub fn free_space(&self) -> usize {
        self.payload.len() - self.free_space_offset()
    }

    pub fn has_space(&self, size: usize) -> bool {
        size <= self.free_space()
    }

    /// Carve `size` bytes out of the payload, starting at the current
    /// free space offset
    pub fn allocate(&mut self, size: usize) -> PageResult<&mut [u8]> {
        let available = self.free_space();
        if size > available {
            return Err(PageError::InsufficientSpace {
                requested: size,
                available,
            });
        }

        let start = self.free_space_offset();
        let end = start + size;
        self.header.free_space_offset = end as u32;
        Ok(&mut self.payload[start..end])
    }

    /// CRC32 over the serialized header (minus the checksum field) and payload
    pub fn calculate_checksum(&self) -> u32 {
        let header = self.header.serialize();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[..CHECKSUM_RANGE.start]);
        hasher.update(&header[CHECKSUM_RANGE.end..]);
        hasher.update(&self.payload);
        hasher.finalize()
    }

    pub fn update_checksum(&mut self) {
        self.header.checksum = self.calculate_checksum();
    }

    pub fn verify_checksum(&self) -> bool {
        self.header.checksum == self.calculate_checksum()
    }
}
