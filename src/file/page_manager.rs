use std::path::Path;
use std::sync::Arc;

use ahash::{AHashSet, RandomState};
use lru::LruCache;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use super::error::{FileError, FileResult};
use super::file_manager::FileManager;
use super::{BUFFER_POOL_SIZE, PageId, StorageOptions};
use crate::page::{Page, PageType};

/// Shared handle to a cached page.
///
/// A page stays pinned in the pool for as long as any handle besides the
/// pool's own is alive.
pub type PageRef = Arc<RwLock<Page>>;

/// Counters describing buffer pool activity since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub write_backs: u64,
}

struct CacheEntry {
    page: PageRef,
    dirty: bool,
}

impl CacheEntry {
    fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.page) > 1
    }
}

struct CacheState {
    /// Buffer pool and LRU order in one map
    pages: LruCache<PageId, CacheEntry, RandomState>,
    /// Pages being read, written back or freed without the lock held
    in_flight: AHashSet<PageId>,
    stats: CacheStats,
}

/// Buffer pool with LRU eviction over a [`FileManager`].
///
/// `capacity` is a soft limit: pinned pages are never evicted, so the pool
/// grows past it when every resident page is in use. Dirty pages are written
/// back when they are evicted.
///
/// Methods taking a [`PageRef`] lock the page internally. Release any guard
/// on that page before calling them.
pub struct PageManager {
    file_manager: Arc<FileManager>,
    state: Mutex<CacheState>,
    io_done: Condvar,
    capacity: usize,
}

impl PageManager {
    /// Create a page manager with the default pool size
    pub fn new(file_manager: Arc<FileManager>) -> Self {
        Self::with_capacity(file_manager, BUFFER_POOL_SIZE)
    }

    /// Create a page manager with specified capacity
    pub fn with_capacity(file_manager: Arc<FileManager>, capacity: usize) -> Self {
        Self {
            file_manager,
            state: Mutex::new(CacheState {
                pages: LruCache::unbounded_with_hasher(RandomState::new()),
                in_flight: AHashSet::new(),
                stats: CacheStats::default(),
            }),
            io_done: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Create a new store file and a pool over it
    pub fn create<P: AsRef<Path>>(path: P, options: &StorageOptions) -> FileResult<Self> {
        let file_manager = FileManager::create(path, options.page_size)?;
        Ok(Self::with_capacity(
            Arc::new(file_manager),
            options.cache_capacity,
        ))
    }

    /// Open an existing store file and a pool over it
    pub fn open<P: AsRef<Path>>(path: P, options: &StorageOptions) -> FileResult<Self> {
        let file_manager = FileManager::open(path)?;
        Ok(Self::with_capacity(
            Arc::new(file_manager),
            options.cache_capacity,
        ))
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    /// Allocate a page through the file manager and cache it
    pub fn new_page(&self, page_type: PageType) -> FileResult<PageRef> {
        let page = self.file_manager.allocate_page(page_type)?;
        let page_id = page.page_id();
        let page = Arc::new(RwLock::new(page));

        let mut state = self.state.lock();
        self.wait_idle(&mut state, page_id);
        self.insert(
            state,
            page_id,
            CacheEntry {
                page: Arc::clone(&page),
                dirty: false,
            },
        );
        Ok(page)
    }

    /// Get a page from the pool, loading it from disk if necessary.
    ///
    /// Concurrent misses on the same page issue a single read. A failed read
    /// leaves the pool untouched.
    pub fn fetch_page(&self, page_id: PageId) -> FileResult<PageRef> {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.pages.get(&page_id) {
                let page = Arc::clone(&entry.page);
                state.stats.hits += 1;
                return Ok(page);
            }
            if !state.in_flight.contains(&page_id) {
                break;
            }
            self.io_done.wait(&mut state);
        }
        state.stats.misses += 1;
        state.in_flight.insert(page_id);
        drop(state);

        let result = self.file_manager.read_page(page_id);

        let mut state = self.state.lock();
        state.in_flight.remove(&page_id);
        self.io_done.notify_all();
        let page = Arc::new(RwLock::new(result?));
        self.insert(
            state,
            page_id,
            CacheEntry {
                page: Arc::clone(&page),
                dirty: false,
            },
        );
        Ok(page)
    }

    /// Mark a page as modified since it was last written.
    ///
    /// A handle the pool does not hold (one that outlived [`free_page`] or
    /// was built by the caller) is adopted as dirty, unless its page is free.
    ///
    /// [`free_page`]: PageManager::free_page
    pub fn mark_dirty(&self, page: &PageRef) -> FileResult<()> {
        let page_id = page.read().page_id();

        let mut state = self.state.lock();
        self.wait_idle(&mut state, page_id);
        if let Some(entry) = state.pages.get_mut(&page_id) {
            if !Arc::ptr_eq(&entry.page, page) {
                return Err(FileError::StaleHandle(page_id));
            }
            entry.dirty = true;
            return Ok(());
        }

        if self.file_manager.is_page_free(page_id)? {
            return Err(FileError::PageIsFree(page_id));
        }
        debug!(page_id = %page_id, "adopted uncached page as dirty");
        self.insert(
            state,
            page_id,
            CacheEntry {
                page: Arc::clone(page),
                dirty: true,
            },
        );
        Ok(())
    }

    /// Write one page to disk now, dirty or not
    pub fn write_page(&self, page: &PageRef) -> FileResult<()> {
        let mut guard = page.write();
        let page_id = guard.page_id();

        // Already in flight means evicted, freed or not yet loaded: the
        // owner of the marker clears it
        let marked = self.state.lock().in_flight.insert(page_id);
        let result = self.file_manager.write_page(&mut guard);
        self.finish_write(page_id, page, marked, result.is_ok());
        result
    }

    /// Drop a page from the pool and return it to the free list.
    ///
    /// Outstanding handles to the page are stale afterwards.
    pub fn free_page(&self, page_id: PageId) -> FileResult<()> {
        let mut state = self.state.lock();
        self.wait_idle(&mut state, page_id);
        let removed = state.pages.pop(&page_id);
        state.in_flight.insert(page_id);
        drop(state);

        let result = self.file_manager.free_page(page_id);

        let mut state = self.state.lock();
        state.in_flight.remove(&page_id);
        if result.is_err()
            && let Some(entry) = removed
        {
            state.pages.put(page_id, entry);
        }
        self.io_done.notify_all();
        result
    }

    /// Write every dirty page, then sync the file
    pub fn flush_all(&self) -> FileResult<()> {
        let dirty: Vec<(PageId, PageRef)> = {
            let state = self.state.lock();
            state
                .pages
                .iter()
                .filter(|(_, entry)| entry.dirty)
                .map(|(page_id, entry)| (*page_id, Arc::clone(&entry.page)))
                .collect()
        };

        for (page_id, page) in dirty {
            let mut guard = page.write();
            {
                let mut state = self.state.lock();
                let still_dirty = state.pages.peek(&page_id).is_some_and(|entry| {
                    entry.dirty && Arc::ptr_eq(&entry.page, &page)
                });
                // Evicted, freed or reused since it was collected
                if !still_dirty || state.in_flight.contains(&page_id) {
                    continue;
                }
                state.in_flight.insert(page_id);
            }

            let result = self.file_manager.write_page(&mut guard);
            self.finish_write(page_id, &page, true, result.is_ok());
            result?;
        }

        self.file_manager.flush()
    }

    /// Remove one unpinned page from the pool, writing it back if dirty.
    /// Returns whether the page was evicted.
    pub fn evict_page(&self, page_id: PageId) -> FileResult<bool> {
        let mut state = self.state.lock();
        match state.pages.peek(&page_id) {
            Some(entry) if !entry.is_pinned() => {}
            _ => return Ok(false),
        }
        let Some(entry) = state.pages.pop(&page_id) else {
            return Ok(false);
        };
        state.stats.evictions += 1;
        debug!(page_id = %page_id, dirty = entry.dirty, "evicted page");

        if !entry.dirty {
            return Ok(true);
        }
        state.in_flight.insert(page_id);
        drop(state);

        self.write_back_one(page_id, entry).map(|_| true)
    }

    /// Check if a page is in the buffer pool
    pub fn is_page_cached(&self, page_id: PageId) -> bool {
        self.state.lock().pages.contains(&page_id)
    }

    /// Get the number of pages currently in the buffer pool
    pub fn cached_page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Get the number of dirty pages in the buffer pool
    pub fn dirty_page_count(&self) -> usize {
        self.state
            .lock()
            .pages
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn page_size(&self) -> FileResult<u32> {
        self.file_manager.page_size()
    }

    pub fn page_count(&self) -> FileResult<u64> {
        self.file_manager.page_count()
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Bookkeeping after writing a page whose write guard the caller still
    /// holds, so a `mark_dirty` racing the write is not lost
    fn finish_write(&self, page_id: PageId, page: &PageRef, marked: bool, written: bool) {
        let mut state = self.state.lock();
        if written
            && let Some(entry) = state.pages.peek_mut(&page_id)
            && Arc::ptr_eq(&entry.page, page)
        {
            entry.dirty = false;
        }
        if marked {
            state.in_flight.remove(&page_id);
            self.io_done.notify_all();
        }
    }

    fn wait_idle(&self, state: &mut MutexGuard<'_, CacheState>, page_id: PageId) {
        while state.in_flight.contains(&page_id) {
            self.io_done.wait(state);
        }
    }

    /// Insert an entry, trim the pool back towards capacity and write back
    /// dirty victims once the lock is released
    fn insert(&self, mut state: MutexGuard<'_, CacheState>, page_id: PageId, entry: CacheEntry) {
        state.pages.put(page_id, entry);
        let victims = self.select_victims(&mut state);
        drop(state);

        for (page_id, entry) in victims {
            if let Err(err) = self.write_back_one(page_id, entry) {
                warn!(page_id = %page_id, error = %err, "write-back of evicted page failed");
            }
        }
    }

    /// Pop least recently used unpinned pages until the pool fits its
    /// capacity. Dirty victims are returned marked in flight.
    fn select_victims(&self, state: &mut CacheState) -> Vec<(PageId, CacheEntry)> {
        let excess = state.pages.len().saturating_sub(self.capacity);
        if excess == 0 {
            return Vec::new();
        }

        let candidates: Vec<PageId> = state
            .pages
            .iter()
            .rev()
            .filter(|(_, entry)| !entry.is_pinned())
            .map(|(page_id, _)| *page_id)
            .take(excess)
            .collect();

        let mut dirty = Vec::new();
        for page_id in candidates {
            let Some(entry) = state.pages.pop(&page_id) else {
                continue;
            };
            state.stats.evictions += 1;
            debug!(page_id = %page_id, dirty = entry.dirty, "evicted page");
            if entry.dirty {
                state.in_flight.insert(page_id);
                dirty.push((page_id, entry));
            }
        }
        dirty
    }

    /// Persist an evicted dirty page. On failure the page goes back into the
    /// pool still dirty, unless it no longer exists on disk.
    fn write_back_one(&self, page_id: PageId, entry: CacheEntry) -> FileResult<()> {
        let result = self.file_manager.write_page(&mut entry.page.write());

        let mut state = self.state.lock();
        state.in_flight.remove(&page_id);
        match &result {
            Ok(()) => {
                state.stats.write_backs += 1;
                debug!(page_id = %page_id, "wrote back evicted page");
            }
            Err(FileError::PageIsFree(_) | FileError::PageOutOfRange { .. }) => {}
            Err(_) => {
                state.pages.put(page_id, entry);
            }
        }
        self.io_done.notify_all();
        result
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        // Flush all dirty pages when the page manager is dropped
        if self.file_manager.is_open()
            && let Err(err) = self.flush_all()
        {
            warn!(error = %err, "flush on drop failed");
        }
    }
}
