//! Buffer pool manager for EmberDB.
//!
//! Provides in-memory caching of fixed-size pages with:
//! - Exact page-table / free-list / pin-count bookkeeping
//! - LRU-K eviction via the two-queue replacer
//! - Dirty page tracking with write-back before replacement
//! - Scoped page guards combining pinning with per-frame latching
//!
//! Lock order is pool latch -> replacer mutex; the per-frame latch is never
//! taken while the pool latch is held, except on frames with a zero pin
//! count (eviction write-back, buffer zeroing), where no guard can hold it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ember_common::prelude::*;
use tracing::{debug, trace};

use crate::disk::DiskManager;
use crate::replacer::{AccessType, LruKReplacer};
use crate::PAGE_SIZE;

/// Buffer frame holding a page and its metadata.
///
/// Metadata lives in atomics so guards and tests can inspect it without the
/// pool latch; the data buffer sits behind the per-frame reader-writer
/// latch, which callers only ever take through page guards.
pub struct PageFrame {
    /// Position of this frame in the pool's frame array
    frame_id: FrameId,
    /// Page currently held, `INVALID_PAGE_ID` when free
    page_id: AtomicI64,
    /// Number of active references preventing eviction
    pin_count: AtomicU32,
    /// Dirty flag; set means the buffer is newer than disk
    is_dirty: AtomicBool,
    /// The page bytes, behind the frame latch
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl PageFrame {
    fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicI64::new(PageId::INVALID.0),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Page held by this frame, `PageId::INVALID` when the frame is free.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId(self.page_id.load(Ordering::Acquire))
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Acquires the frame's read latch and returns the page bytes.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Acquires the frame's write latch and returns the page bytes.
    ///
    /// Writers are responsible for reporting dirtiness on unpin; the guard
    /// types do this automatically.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Installs fresh metadata for `page_id` with a single pin.
    fn reset_for(&self, page_id: PageId) {
        self.page_id.store(page_id.0, Ordering::Release);
        self.pin_count.store(1, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
    }
}

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

/// Internal statistics with atomic counters
struct BufferPoolStatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    flushes: AtomicU64,
}

impl BufferPoolStatsInner {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }
}

/// Snapshot of buffer pool occupancy and counters.
#[derive(Debug, Clone, Default)]
pub struct BufferPoolStats {
    pub pool_size: usize,
    pub resident_pages: usize,
    pub dirty_pages: usize,
    pub pinned_frames: usize,
    pub free_frames: usize,
    pub evictable_frames: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub flushes: u64,
}

/// State guarded by the pool latch.
struct PoolInner {
    /// Page ID to frame index mapping
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page
    free_list: VecDeque<FrameId>,
    /// Next page id to hand out; monotonic, never reused
    next_page_id: i64,
}

/// Buffer pool manager with LRU-K eviction.
pub struct BufferPoolManager {
    /// Buffer frames, allocated once and reused forever
    frames: Vec<PageFrame>,
    /// Page table, free list, and id allocator behind the pool latch
    inner: Mutex<PoolInner>,
    /// Eviction policy; locked only while the pool latch is held
    replacer: LruKReplacer,
    /// Disk manager for page I/O
    disk: Arc<DiskManager>,
    /// Fsync the database file after flush_all_pages
    sync_on_flush: bool,
    /// Statistics
    stats: BufferPoolStatsInner,
}

impl BufferPoolManager {
    /// Create a new buffer pool.
    ///
    /// # Arguments
    /// * `pool_size` - Number of buffer frames (pages that can be cached)
    /// * `replacer_k` - K value for the LRU-K replacer
    /// * `disk` - Disk manager for I/O
    pub fn new(pool_size: usize, replacer_k: usize, disk: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        // Initially, every frame is in the free list.
        for i in 0..pool_size {
            frames.push(PageFrame::new(i));
            free_list.push_back(i);
        }

        Self {
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                next_page_id: 0,
            }),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            disk,
            sync_on_flush: false,
            stats: BufferPoolStatsInner::new(),
        }
    }

    /// Create a buffer pool from a validated [`StorageConfig`].
    pub fn from_config(config: &StorageConfig, disk: Arc<DiskManager>) -> Self {
        let mut pool = Self::new(config.buffer_pool_pages, config.replacer_k, disk);
        pool.sync_on_flush = config.sync_on_flush;
        pool
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Get the disk manager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Allocate a fresh page id without bringing a page into memory.
    ///
    /// Ids are monotonically increasing and never reused within a process
    /// lifetime.
    pub fn allocate_page(&self) -> PageId {
        let mut inner = self.inner.lock();
        let page_id = PageId(inner.next_page_id);
        inner.next_page_id += 1;
        page_id
    }

    /// Allocate a new page, pin it in a frame, and return it zeroed.
    ///
    /// Fails with `BufferPoolFull` when every frame is pinned; no page id is
    /// consumed in that case.
    pub fn new_page(&self) -> Result<(PageId, &PageFrame)> {
        let mut inner = self.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = PageId(inner.next_page_id);
        inner.next_page_id += 1;

        // The frame is unpinned, so no guard can hold its latch.
        self.frames[frame_id].data_mut().fill(0);

        self.install_page(&mut inner, frame_id, page_id);
        debug!("allocated {} in frame {}", page_id, frame_id);
        Ok((page_id, &self.frames[frame_id]))
    }

    /// Fetch a page, loading it from disk if not resident. The returned
    /// frame carries one additional pin; callers pair it with `unpin_page`
    /// (page guards do this automatically).
    pub fn fetch_page(&self, page_id: PageId) -> Result<&PageFrame> {
        if !page_id.is_valid() {
            return Err(Error::Storage(StorageError::InvalidPage(format!(
                "cannot fetch {}",
                page_id
            ))));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            self.replacer.record_access(frame_id, AccessType::Unknown);
            self.withdraw_from_replacer(frame_id);
            frame.pin_count.fetch_add(1, Ordering::AcqRel);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!("buffer pool hit for {}", page_id);
            return Ok(frame);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        debug!("buffer pool miss for {}, loading from disk", page_id);

        let frame_id = self.acquire_frame(&mut inner)?;
        {
            // Unpinned frame: the latch is free (see module doc).
            let mut data = self.frames[frame_id].data_mut();
            self.disk.read_page(page_id, &mut data[..])?;
        }

        self.install_page(&mut inner, frame_id, page_id);
        Ok(&self.frames[frame_id])
    }

    /// Drop one pin on a resident page, folding `is_dirty` into the frame's
    /// flag. Once any caller reports a write the frame stays dirty until
    /// written back, regardless of later clean unpins.
    ///
    /// Returns `false` when the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            frame.is_dirty.store(true, Ordering::Release);
        }
        let remaining = frame.pin_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            self.replacer
                .set_evictable(frame_id, true)
                .expect("resident frame is tracked by the replacer");
        }
        true
    }

    /// Write a resident page back to disk, regardless of its dirty flag,
    /// then mark it clean.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let frame_id = {
            let inner = self.inner.lock();
            let frame_id = match inner.page_table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => return Err(Error::Storage(StorageError::PageNotResident(page_id))),
            };
            // Hold a flush pin so the frame cannot be evicted while we
            // latch and write outside the pool latch.
            let frame = &self.frames[frame_id];
            if frame.pin_count.fetch_add(1, Ordering::AcqRel) == 0 {
                self.withdraw_from_replacer(frame_id);
            }
            frame_id
        };

        let frame = &self.frames[frame_id];
        let result: Result<()> = (|| {
            let data = frame.data();
            self.disk.write_page(page_id, &data[..])?;
            drop(data);
            frame.is_dirty.store(false, Ordering::Release);
            self.stats.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })();

        self.unpin_page(page_id, false);
        result
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids: Vec<PageId> = {
            let inner = self.inner.lock();
            inner.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Deleted since we snapshotted the page table.
                Err(Error::Storage(StorageError::PageNotResident(_))) => {}
                Err(e) => return Err(e),
            }
        }

        if self.sync_on_flush {
            self.disk.sync()?;
        }
        debug!("flushed all resident pages");
        Ok(())
    }

    /// Evict a page from the pool and return its frame to the free list.
    ///
    /// Returns `true` when the page is absent or was removed, `false` while
    /// it is pinned (live guards must be dropped first). The buffer is
    /// zeroed and nothing is written back; deletion discards in-memory
    /// changes.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return true,
        };
        let frame = &self.frames[frame_id];
        if frame.pin_count() > 0 {
            return false;
        }

        inner.page_table.remove(&page_id);
        inner.free_list.push_back(frame_id);
        self.replacer
            .remove(frame_id)
            .expect("unpinned frame is removable from the replacer");

        frame.page_id.store(PageId::INVALID.0, Ordering::Release);
        frame.is_dirty.store(false, Ordering::Release);
        // Unpinned frame: the latch is free.
        frame.data_mut().fill(0);

        debug!("deleted {} from frame {}", page_id, frame_id);
        true
    }

    /// Pin count of a resident page, `None` when the page is not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frames[frame_id].pin_count())
    }

    /// Get buffer pool statistics.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();

        let mut dirty = 0;
        let mut pinned = 0;
        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id];
            if frame.is_dirty() {
                dirty += 1;
            }
            if frame.pin_count() > 0 {
                pinned += 1;
            }
        }

        BufferPoolStats {
            pool_size: self.frames.len(),
            resident_pages: inner.page_table.len(),
            dirty_pages: dirty,
            pinned_frames: pinned,
            free_frames: inner.free_list.len(),
            evictable_frames: self.replacer.size(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            flushes: self.stats.flushes.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Guarded variants
    // ------------------------------------------------------------------

    /// Allocate a new page and wrap it in a basic guard owning the pin.
    pub fn new_page_guarded(&self) -> Result<PageGuard<'_>> {
        let (_, frame) = self.new_page()?;
        Ok(PageGuard::new(self, frame))
    }

    /// Fetch a page into a basic guard owning the pin.
    pub fn fetch_page_basic(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Ok(PageGuard::new(self, frame))
    }

    /// Fetch a page and additionally hold its read latch for the guard's
    /// lifetime. The latch is taken after pinning, outside the pool latch.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        let guard = PageGuard::new(self, frame);
        let latch = frame.data.read();
        Ok(ReadPageGuard {
            guard,
            latch: Some(latch),
        })
    }

    /// Fetch a page and additionally hold its write latch for the guard's
    /// lifetime. The latch is taken after pinning, outside the pool latch.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        let guard = PageGuard::new(self, frame);
        let latch = frame.data.write();
        Ok(WritePageGuard {
            guard,
            latch: Some(latch),
        })
    }

    // ------------------------------------------------------------------
    // Internals (pool latch held)
    // ------------------------------------------------------------------

    /// Secure a frame for a new resident page: free list first, then the
    /// replacer. An evicted victim is written back if dirty and unmapped.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.replacer.evict() {
            Some(frame_id) => frame_id,
            None => return Err(Error::Storage(StorageError::BufferPoolFull)),
        };
        let frame = &self.frames[frame_id];
        debug_assert_eq!(frame.pin_count(), 0, "replacer evicted a pinned frame");

        let old_page_id = frame.page_id();
        if frame.is_dirty() {
            // The victim is unpinned, so no guard holds its latch.
            let data = frame.data();
            self.disk.write_page(old_page_id, &data[..])?;
            self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        }

        inner.page_table.remove(&old_page_id);
        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        trace!("evicted {} from frame {}", old_page_id, frame_id);
        Ok(frame_id)
    }

    /// Make `frame_id` resident for `page_id` with a single pin, record the
    /// access, and withdraw the frame from eviction.
    fn install_page(&self, inner: &mut PoolInner, frame_id: FrameId, page_id: PageId) {
        self.frames[frame_id].reset_for(page_id);
        inner.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id, AccessType::Unknown);
        self.withdraw_from_replacer(frame_id);
    }

    fn withdraw_from_replacer(&self, frame_id: FrameId) {
        self.replacer
            .set_evictable(frame_id, false)
            .expect("withdrawing a frame from eviction cannot fail");
    }
}

// ----------------------------------------------------------------------
// Page guards
// ----------------------------------------------------------------------

/// Scoped pin on a resident page.
///
/// Holds one pin on the underlying frame and releases it, reporting the
/// staged dirty bit, when dropped. `release` may be called early and is
/// idempotent.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a PageFrame,
    page_id: PageId,
    dirty: bool,
    released: bool,
}

impl<'a> PageGuard<'a> {
    fn new(bpm: &'a BufferPoolManager, frame: &'a PageFrame) -> Self {
        Self {
            bpm,
            frame,
            page_id: frame.page_id(),
            dirty: false,
            released: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Stages the dirty bit reported by the unpin on release.
    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    /// Briefly latches the frame for reading.
    pub fn data(&self) -> RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>> {
        debug_assert!(!self.released, "page guard already released");
        self.frame.data()
    }

    /// Briefly latches the frame for writing; stages the dirty bit.
    pub fn data_mut(&mut self) -> RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>> {
        debug_assert!(!self.released, "page guard already released");
        self.dirty = true;
        self.frame.data_mut()
    }

    /// Releases the pin. Later calls, including the destructor, are no-ops.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.bpm.unpin_page(self.page_id, self.dirty);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Scoped pin plus a held read latch.
///
/// Dereferences to the page bytes. Release order is unpin, then unlatch.
pub struct ReadPageGuard<'a> {
    guard: PageGuard<'a>,
    latch: Option<RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    /// Releases the pin, then the read latch. Idempotent.
    pub fn release(&mut self) {
        self.guard.release();
        self.latch.take();
    }
}

impl Deref for ReadPageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let latch = self
            .latch
            .as_ref()
            .expect("read guard accessed after release");
        &latch[..]
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ReadPageGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadPageGuard")
            .field("page_id", &self.guard.page_id)
            .field("latched", &self.latch.is_some())
            .finish_non_exhaustive()
    }
}

/// Scoped pin plus a held write latch.
///
/// Dereferencing mutably stages the dirty bit. Release order is unpin, then
/// unlatch.
pub struct WritePageGuard<'a> {
    guard: PageGuard<'a>,
    latch: Option<RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    /// Stages the dirty bit reported by the unpin on release.
    pub fn set_dirty(&mut self) {
        self.guard.set_dirty();
    }

    /// Releases the pin, then the write latch. Idempotent.
    pub fn release(&mut self) {
        self.guard.release();
        self.latch.take();
    }
}

impl Deref for WritePageGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let latch = self
            .latch
            .as_ref()
            .expect("write guard accessed after release");
        &latch[..]
    }
}

impl DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.guard.dirty = true;
        let latch = self
            .latch
            .as_mut()
            .expect("write guard accessed after release");
        &mut latch[..]
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for WritePageGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritePageGuard")
            .field("page_id", &self.guard.page_id)
            .field("latched", &self.latch.is_some())
            .finish_non_exhaustive()
    }
}
