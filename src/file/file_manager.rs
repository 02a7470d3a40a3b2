use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::AHashSet;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::{FileError, FileResult};
use super::header::FileHeader;
use super::{MAX_PAGE_SIZE, MIN_PAGE_SIZE, PageId};
use crate::page::{Page, PageError, PageType, image_checksum, stored_checksum};

/// Outcome of a full-file scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub live_pages: u64,
    pub free_pages: u64,
    pub corrupted: Vec<CorruptPage>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptPage {
    pub page_id: PageId,
    pub reason: String,
}

/// Owns one store file and its page layout.
///
/// Every call performs real file I/O; there is no caching at this level.
/// All operations are serialized behind one mutex, so a `FileManager` can be
/// shared between threads as `Arc<FileManager>`.
pub struct FileManager {
    inner: Mutex<Option<OpenFile>>,
}

struct OpenFile {
    file: File,
    path: PathBuf,
    header: FileHeader,
    /// Every page currently on the free list
    free_pages: AHashSet<PageId>,
    /// Set once a write or sync fails; the handle refuses further I/O
    failed: Option<String>,
}

enum Scanned {
    Free,
    Live(Page),
    Corrupt(String),
}

impl FileManager {
    /// Create a file manager with no file open
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Create a new store file and return a manager with it open
    pub fn create<P: AsRef<Path>>(path: P, page_size: u32) -> FileResult<Self> {
        let manager = Self::new();
        manager.create_file(path, page_size)?;
        Ok(manager)
    }

    /// Open an existing store file
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let manager = Self::new();
        manager.open_file(path)?;
        Ok(manager)
    }

    /// Create a new store file. An existing empty file is taken over.
    pub fn create_file<P: AsRef<Path>>(&self, path: P, page_size: u32) -> FileResult<()> {
        let path = path.as_ref();
        let mut guard = self.inner.lock();
        if guard.is_some() {
            return Err(FileError::AlreadyOpen);
        }

        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(FileError::InvalidPageSize {
                actual: page_size,
                min: MIN_PAGE_SIZE,
                max: MAX_PAGE_SIZE,
            });
        }

        if path.exists() && path.metadata()?.len() > 0 {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let header = FileHeader::new(page_size);
        let mut first_page = vec![0u8; page_size as usize];
        first_page[..FileHeader::SIZE].copy_from_slice(&header.serialize());
        file.write_all(&first_page)?;
        file.sync_data()?;

        info!(path = %path.display(), page_size, "created store file");

        *guard = Some(OpenFile {
            file,
            path: path.to_path_buf(),
            header,
            free_pages: AHashSet::new(),
            failed: None,
        });
        Ok(())
    }

    /// Open an existing store file, validating its header and free list
    pub fn open_file<P: AsRef<Path>>(&self, path: P) -> FileResult<()> {
        let path = path.as_ref();
        let mut guard = self.inner.lock();
        if guard.is_some() {
            return Err(FileError::AlreadyOpen);
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => FileError::FileNotFound(path.display().to_string()),
                _ => FileError::Io(err),
            })?;

        let file_len = file.metadata()?.len();
        if file_len < FileHeader::SIZE as u64 {
            return Err(FileError::InvalidFormat(format!(
                "file too short for header: {file_len} bytes"
            )));
        }

        let mut raw = [0u8; FileHeader::SIZE];
        file.read_exact(&mut raw)?;
        let header = FileHeader::deserialize(&raw)?;

        if header.page_count == 0 {
            return Err(FileError::Corruption("page count is zero".to_string()));
        }
        let expected_len = header
            .page_count
            .checked_mul(header.page_size as u64)
            .ok_or_else(|| {
                FileError::Corruption(format!("page count {} overflows", header.page_count))
            })?;
        if file_len < expected_len {
            return Err(FileError::Corruption(format!(
                "file is {file_len} bytes, header claims {} pages of {} bytes",
                header.page_count, header.page_size
            )));
        }

        let mut open = OpenFile {
            file,
            path: path.to_path_buf(),
            header,
            free_pages: AHashSet::new(),
            failed: None,
        };
        let chain = open.walk_free_list()?;
        open.free_pages = chain.into_iter().collect();

        info!(
            path = %path.display(),
            page_size = header.page_size,
            page_count = header.page_count,
            free_pages = open.free_pages.len(),
            "opened store file"
        );

        *guard = Some(open);
        Ok(())
    }

    /// Sync and close the current file
    pub fn close_file(&self) -> FileResult<()> {
        let mut guard = self.inner.lock();
        let open = guard.take().ok_or(FileError::NotOpen)?;
        if open.failed.is_none() {
            open.file.sync_data()?;
        }
        info!(path = %open.path.display(), "closed store file");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().is_some()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.lock().as_ref().map(|open| open.path.clone())
    }

    /// Copy of the in-memory file header
    pub fn header(&self) -> FileResult<FileHeader> {
        self.inner
            .lock()
            .as_ref()
            .map(|open| open.header)
            .ok_or(FileError::NotOpen)
    }

    pub fn page_size(&self) -> FileResult<u32> {
        Ok(self.header()?.page_size)
    }

    /// Total pages in the file, header page included
    pub fn page_count(&self) -> FileResult<u64> {
        Ok(self.header()?.page_count)
    }

    pub fn free_page_count(&self) -> FileResult<usize> {
        self.inner
            .lock()
            .as_ref()
            .map(|open| open.free_pages.len())
            .ok_or(FileError::NotOpen)
    }

    pub fn is_page_free(&self, page_id: PageId) -> FileResult<bool> {
        self.inner
            .lock()
            .as_ref()
            .map(|open| open.free_pages.contains(&page_id))
            .ok_or(FileError::NotOpen)
    }

    /// Hand out a zeroed page of `page_type`, reusing the most recently
    /// freed page when there is one and growing the file otherwise.
    /// The initialized page is persisted before it is returned.
    pub fn allocate_page(&self, page_type: PageType) -> FileResult<Page> {
        if page_type.is_free() {
            return Err(FileError::InvalidPageType(page_type));
        }

        self.with_open(|open| {
            let page_size = open.header.page_size;
            match open.header.free_list_head {
                Some(page_id) => {
                    let head = open.read_verified(page_id)?;
                    if !head.page_type().is_free() {
                        return Err(FileError::Corruption(format!(
                            "free list head {page_id} has type {}",
                            head.page_type()
                        )));
                    }
                    if let Some(next) = head.next_free()
                        && !open.free_pages.contains(&next)
                    {
                        return Err(FileError::Corruption(format!(
                            "free page {page_id} links to non-free page {next}"
                        )));
                    }

                    // Unlink first: a crash after this leaves an orphan, never
                    // a live page still reachable from the free list.
                    open.header.free_list_head = head.next_free();
                    if let Err(err) = open.write_header() {
                        open.header.free_list_head = Some(page_id);
                        return Err(err);
                    }
                    open.free_pages.remove(&page_id);

                    let page = Page::new(page_id, page_type, page_size);
                    open.write_image(page_id, &page.to_bytes())?;
                    debug!(page_id = %page_id, page_type = %page_type, "reused free page");
                    Ok(page)
                }
                None => {
                    let page_id = PageId::new(open.header.page_count);
                    let page = Page::new(page_id, page_type, page_size);
                    open.write_image(page_id, &page.to_bytes())?;

                    open.header.page_count += 1;
                    if let Err(err) = open.write_header() {
                        open.header.page_count -= 1;
                        return Err(err);
                    }
                    debug!(page_id = %page_id, page_type = %page_type, "appended page");
                    Ok(page)
                }
            }
        })
    }

    /// Put a live page on the head of the free list
    pub fn free_page(&self, page_id: PageId) -> FileResult<()> {
        self.with_open(|open| {
            if page_id.is_header() || page_id.as_u64() >= open.header.page_count {
                return Err(FileError::PageOutOfRange {
                    page_id,
                    page_count: open.header.page_count,
                });
            }
            if open.free_pages.contains(&page_id) {
                return Err(FileError::DoubleFree(page_id));
            }

            let previous_head = open.header.free_list_head;
            let image = Page::new_free(page_id, previous_head, open.header.page_size);
            open.write_image(page_id, &image.to_bytes())?;

            open.header.free_list_head = Some(page_id);
            if let Err(err) = open.write_header() {
                open.header.free_list_head = previous_head;
                return Err(err);
            }
            open.free_pages.insert(page_id);

            debug!(page_id = %page_id, "freed page");
            Ok(())
        })
    }

    /// Restamp the page checksum and write the page at its offset
    pub fn write_page(&self, page: &mut Page) -> FileResult<()> {
        let page_id = page.page_id();
        self.with_open(|open| {
            if page_id.is_header() || page_id.as_u64() >= open.header.page_count {
                return Err(FileError::PageOutOfRange {
                    page_id,
                    page_count: open.header.page_count,
                });
            }
            if open.free_pages.contains(&page_id) {
                return Err(FileError::PageIsFree(page_id));
            }
            if page.page_size() != open.header.page_size {
                return Err(PageError::BufferSize {
                    expected: open.header.page_size as usize,
                    actual: page.page_size() as usize,
                }
                .into());
            }
            if page.page_type().is_free() {
                return Err(FileError::InvalidPageType(page.page_type()));
            }

            page.update_checksum();
            open.write_image(page_id, &page.to_bytes())
        })
    }

    /// Read a live page and verify its checksum
    pub fn read_page(&self, page_id: PageId) -> FileResult<Page> {
        self.with_open(|open| {
            if page_id.is_header()
                || page_id.as_u64() >= open.header.page_count
                || open.free_pages.contains(&page_id)
            {
                return Err(FileError::PageNotFound(page_id));
            }

            let page = open.read_verified(page_id)?;
            if page.page_type().is_free() {
                // Left behind by an interrupted allocation or free
                return Err(FileError::PageNotFound(page_id));
            }
            Ok(page)
        })
    }

    /// Visit every live page in ID order.
    ///
    /// Pages that fail verification are logged, recorded in the report and
    /// skipped. An I/O error ends the scan. The lock is released while the
    /// visitor runs, so it may call back into this manager.
    pub fn for_each_page<F>(&self, mut visitor: F) -> FileResult<ScanReport>
    where
        F: FnMut(PageId, &Page, PageType),
    {
        let page_count = self.page_count()?;
        let mut report = ScanReport::default();

        for raw_id in 1..page_count {
            let page_id = PageId::new(raw_id);
            match self.with_open(|open| open.scan_page(page_id))? {
                Scanned::Free => report.free_pages += 1,
                Scanned::Live(page) => {
                    report.live_pages += 1;
                    visitor(page_id, &page, page.page_type());
                }
                Scanned::Corrupt(reason) => {
                    warn!(page_id = %page_id, reason = %reason, "corrupted page found during scan");
                    report.corrupted.push(CorruptPage { page_id, reason });
                }
            }
        }

        debug!(
            live = report.live_pages,
            free = report.free_pages,
            corrupted = report.corrupted.len(),
            "page scan finished"
        );
        Ok(report)
    }

    /// Checksum the file manager stamps on `page` when writing it
    pub fn calculate_checksum(page: &Page) -> u32 {
        page.calculate_checksum()
    }

    /// Force buffered writes to durable storage
    pub fn flush(&self) -> FileResult<()> {
        self.with_open(|open| {
            let result = open.file.sync_data();
            result.map_err(|err| open.write_failure(err))
        })
    }

    /// Grow the file by `num_pages` pages, all placed on the free list so
    /// that the lowest new ID is handed out first
    pub fn extend(&self, num_pages: u64) -> FileResult<()> {
        if num_pages == 0 {
            return Ok(());
        }

        self.with_open(|open| {
            let first = open.header.page_count;
            let new_count = first.checked_add(num_pages).ok_or_else(|| {
                FileError::InvalidFormat(format!("cannot extend by {num_pages} pages"))
            })?;

            let mut next = open.header.free_list_head;
            for raw_id in (first..new_count).rev() {
                let page_id = PageId::new(raw_id);
                let image = Page::new_free(page_id, next, open.header.page_size);
                open.write_image(page_id, &image.to_bytes())?;
                next = Some(page_id);
            }

            let previous = open.header;
            open.header.page_count = new_count;
            open.header.free_list_head = next;
            if let Err(err) = open.write_header() {
                open.header = previous;
                return Err(err);
            }
            open.free_pages.extend((first..new_count).map(PageId::new));

            debug!(from = first, to = new_count, "extended store file");
            Ok(())
        })
    }

    /// Free page IDs in the order they will be handed out
    pub fn free_list(&self) -> FileResult<Vec<PageId>> {
        self.with_open(OpenFile::walk_free_list)
    }

    fn with_open<T>(&self, op: impl FnOnce(&mut OpenFile) -> FileResult<T>) -> FileResult<T> {
        let mut guard = self.inner.lock();
        let open = guard.as_mut().ok_or(FileError::NotOpen)?;
        open.ensure_usable()?;
        op(open)
    }
}

impl OpenFile {
    fn ensure_usable(&self) -> FileResult<()> {
        match &self.failed {
            Some(reason) => Err(FileError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    /// Map a write-side I/O error, poisoning the handle unless the device
    /// is merely full
    fn write_failure(&mut self, err: io::Error) -> FileError {
        if err.kind() == ErrorKind::StorageFull {
            warn!(path = %self.path.display(), "storage full");
            return FileError::StorageFull(err);
        }

        warn!(path = %self.path.display(), error = %err, "write failed, store is now unavailable");
        let reason = err.to_string();
        self.failed = Some(reason.clone());
        FileError::Unavailable(reason)
    }

    fn offset_of(&self, page_id: PageId) -> FileResult<u64> {
        page_id
            .offset(self.header.page_size)
            .ok_or(FileError::PageOutOfRange {
                page_id,
                page_count: self.header.page_count,
            })
    }

    fn read_image(&mut self, page_id: PageId) -> FileResult<Vec<u8>> {
        let offset = self.offset_of(page_id)?;
        let mut image = vec![0u8; self.header.page_size as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut image)?;
        Ok(image)
    }

    fn write_image(&mut self, page_id: PageId, image: &[u8]) -> FileResult<()> {
        let offset = self.offset_of(page_id)?;
        let result = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(image));
        result.map_err(|err| self.write_failure(err))
    }

    fn write_header(&mut self) -> FileResult<()> {
        let bytes = self.header.serialize();
        let result = self
            .file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&bytes));
        result.map_err(|err| self.write_failure(err))
    }

    /// Read a page image and check it against its stored checksum
    fn read_verified(&mut self, page_id: PageId) -> FileResult<Page> {
        let image = self.read_image(page_id)?;
        let stored = stored_checksum(&image);
        let computed = image_checksum(&image);
        if stored != computed {
            return Err(FileError::ChecksumMismatch {
                page_id,
                stored,
                computed,
            });
        }
        Ok(Page::from_bytes(page_id, &image)?)
    }

    fn scan_page(&mut self, page_id: PageId) -> FileResult<Scanned> {
        if self.free_pages.contains(&page_id) {
            return Ok(Scanned::Free);
        }

        match self.read_verified(page_id) {
            Ok(page) if page.page_type().is_free() => Ok(Scanned::Free),
            Ok(page) => Ok(Scanned::Live(page)),
            Err(err @ (FileError::ChecksumMismatch { .. } | FileError::Page(_))) => {
                Ok(Scanned::Corrupt(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// Follow the on-disk chain from the header, rejecting cycles, links
    /// outside the file and links to pages that are not free
    fn walk_free_list(&mut self) -> FileResult<Vec<PageId>> {
        let mut chain = Vec::new();
        let mut seen = AHashSet::new();
        let mut cursor = self.header.free_list_head;

        while let Some(page_id) = cursor {
            if page_id.is_header() || page_id.as_u64() >= self.header.page_count {
                return Err(FileError::Corruption(format!(
                    "free list links to page {page_id} outside a file of {} pages",
                    self.header.page_count
                )));
            }
            if !seen.insert(page_id) {
                return Err(FileError::Corruption(format!(
                    "free list cycles back to page {page_id}"
                )));
            }

            let page = self.read_verified(page_id)?;
            if !page.page_type().is_free() {
                return Err(FileError::Corruption(format!(
                    "page {page_id} on the free list has type {}",
                    page.page_type()
                )));
            }
            chain.push(page_id);
            cursor = page.next_free();
        }

        Ok(chain)
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FileManager {
    fn drop(&mut self) {
        if let Some(open) = self.inner.get_mut().as_ref()
            && open.failed.is_none()
            && let Err(err) = open.file.sync_data()
        {
            warn!(path = %open.path.display(), error = %err, "sync on drop failed");
        }
    }
}
