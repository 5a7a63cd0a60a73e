//! Buffer pool manager.
//!
//! The buffer pool sits between the disk manager and the access methods,
//! caching pages in a fixed set of frames:
//!
//! ```text
//! +-------------------+
//! |   Access Method   |  (heap file, future indexes)
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! |    BufferPool     |  <- you are here
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! | DiskManager trait |
//! +-------------------+
//! ```
//!
//! # Locking
//!
//! Bookkeeping (page table, frame metadata, free list, replacer) lives in
//! one `parking_lot::Mutex` so that guard drops, which are synchronous,
//! can release pins without an executor. Page bytes live behind per-frame
//! `tokio::sync::RwLock`s. The state mutex is never held across an await;
//! frame data locks are only acquired while no state lock is held.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::error::BufferError;
use super::frame::{Frame, FrameId, FrameMeta};
use super::guard::{PageReadGuard, PageWriteGuard};
use super::replacer::{ClockReplacer, Replacer};
use crate::storage::io::DiskManager;
use crate::storage::{PageData, PageId};

/// How a fetch miss fills the chosen frame.
///
/// On a hit the resident bytes are used regardless of mode, except that
/// `MemCopy` against a pinned resident page is an error (`new_page` uses
/// this to catch page id leaks).
#[derive(Clone, Copy)]
pub enum FetchMode<'a> {
    /// Read the page from disk.
    DiskIo,
    /// Install the caller's staged image without touching disk. The frame
    /// is marked dirty since its contents now diverge from disk.
    MemCopy(&'a PageData),
    /// Leave the frame contents undefined; the caller overwrites them.
    NoOp,
}

/// Buffer pool manager with pluggable replacement.
///
/// The pool holds `pool_size` frames and maps disk pages onto them on
/// demand. When no frame is free, the [`Replacer`] picks a victim among
/// the unpinned frames; dirty victims are written back before reuse. A
/// pinned frame is never victimized.
///
/// All successful fetches return a guard which holds one pin; see
/// [`PageReadGuard`] and [`PageWriteGuard`].
pub struct BufferPool<D: DiskManager, R: Replacer> {
    inner: BufferPoolInner<D, R>,
}

/// Internal state, shared with the guards for unpinning.
pub(super) struct BufferPoolInner<D: DiskManager, R: Replacer> {
    disk: D,
    frames: Vec<Frame>,
    state: Mutex<PoolState<R>>,
    pool_size: usize,
}

/// Mutable bookkeeping protected by the state mutex.
struct PoolState<R> {
    /// Maps resident pages to their frames. Contains exactly the pages of
    /// occupied frames.
    page_table: HashMap<PageId, FrameId>,

    /// Metadata for each frame, indexed by `FrameId`.
    frame_meta: Vec<FrameMeta>,

    /// Frames not currently holding any page.
    free_list: Vec<FrameId>,

    /// Replacement policy over the occupied, unpinned frames.
    replacer: R,
}

impl<D: DiskManager> BufferPool<D, ClockReplacer> {
    /// Creates a buffer pool with the clock replacement policy.
    pub fn with_clock(disk: D, pool_size: usize) -> Self {
        Self::new(disk, ClockReplacer::new(pool_size), pool_size)
    }
}

impl<D: DiskManager, R: Replacer> BufferPool<D, R> {
    /// Creates a new buffer pool over `disk` with `pool_size` frames.
    ///
    /// The replacer must cover frame ids `0..pool_size`.
    ///
    /// # Panics
    ///
    /// Panics if `pool_size` is 0.
    pub fn new(disk: D, replacer: R, pool_size: usize) -> Self {
        assert!(pool_size > 0, "pool_size must be > 0");

        let frames: Vec<_> = (0..pool_size).map(|_| Frame::new()).collect();
        let frame_meta: Vec<_> = (0..pool_size).map(|_| FrameMeta::new()).collect();
        let free_list: Vec<_> = (0..pool_size).rev().map(FrameId::new).collect();

        Self {
            inner: BufferPoolInner {
                disk,
                frames,
                state: Mutex::new(PoolState {
                    page_table: HashMap::with_capacity(pool_size),
                    frame_meta,
                    free_list,
                    replacer,
                }),
                pool_size,
            },
        }
    }

    /// Returns the underlying disk manager.
    pub fn disk(&self) -> &D {
        &self.inner.disk
    }

    /// Pins a page for reading.
    ///
    /// On a hit the resident frame's pin count is incremented; on a miss
    /// the page is read from disk into a free or victimized frame.
    ///
    /// # Errors
    ///
    /// - `BufferError::Exhausted` if every frame is pinned
    /// - `BufferError::Disk` if the page does not exist or I/O fails
    pub async fn fetch_page(
        &self,
        page_id: PageId,
    ) -> Result<PageReadGuard<'_, D, R>, BufferError> {
        let frame_id = self
            .inner
            .get_or_allocate_frame(page_id, FetchMode::DiskIo)
            .await?;

        let data = self.inner.frames[frame_id.as_usize()].data.read().await;
        Ok(PageReadGuard::new(&self.inner, frame_id, page_id, data))
    }

    /// Pins a page for writing, reading it from disk on a miss.
    ///
    /// Equivalent to `fetch_page_with(page_id, FetchMode::DiskIo)`.
    pub async fn fetch_page_mut(
        &self,
        page_id: PageId,
    ) -> Result<PageWriteGuard<'_, D, R>, BufferError> {
        self.fetch_page_with(page_id, FetchMode::DiskIo).await
    }

    /// Pins a page for writing with an explicit miss-fill mode.
    ///
    /// # Errors
    ///
    /// - `BufferError::Exhausted` if every frame is pinned
    /// - `BufferError::PagePinned` for `MemCopy` against a resident
    ///   pinned page
    /// - `BufferError::Disk` for `DiskIo` misses on unallocated pages
    pub async fn fetch_page_with(
        &self,
        page_id: PageId,
        mode: FetchMode<'_>,
    ) -> Result<PageWriteGuard<'_, D, R>, BufferError> {
        let frame_id = self.inner.get_or_allocate_frame(page_id, mode).await?;

        let data = self.inner.frames[frame_id.as_usize()].data.write().await;
        Ok(PageWriteGuard::new(&self.inner, frame_id, page_id, data))
    }

    /// Allocates a run of `run_size` contiguous disk pages and pins the
    /// first one, seeded from the caller's staged `image`.
    ///
    /// If pinning fails, the freshly allocated run is deallocated again
    /// so the disk pages do not leak.
    ///
    /// # Errors
    ///
    /// - `BufferError::Exhausted` if every frame is pinned
    /// - `BufferError::Disk` if allocation fails
    pub async fn new_page(
        &self,
        image: &PageData,
        run_size: usize,
    ) -> Result<PageWriteGuard<'_, D, R>, BufferError> {
        let first = self.inner.disk.allocate_page(run_size).await?;

        match self.fetch_page_with(first, FetchMode::MemCopy(image)).await {
            Ok(guard) => Ok(guard),
            Err(err) => {
                // Roll the allocation back so the run does not leak.
                for offset in 0..run_size {
                    let page_id = PageId::new(first.page_num() + offset as i32);
                    if let Err(e) = self.inner.disk.deallocate_page(page_id).await {
                        log::debug!("rollback deallocation of page {} failed: {}", page_id, e);
                    }
                }
                Err(err)
            }
        }
    }

    /// Deallocates a disk page, dropping it from the pool if resident.
    ///
    /// A resident unpinned frame is invalidated before the disk-level
    /// deallocation, so no later eviction can write back a freed page.
    ///
    /// # Errors
    ///
    /// - `BufferError::PagePinned` if the page is resident and pinned
    /// - `BufferError::Disk` if the page is not allocated
    pub async fn free_page(&self, page_id: PageId) -> Result<(), BufferError> {
        {
            let mut state = self.inner.state.lock();
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                if state.frame_meta[frame_id.as_usize()].pin_count > 0 {
                    return Err(BufferError::PagePinned(page_id));
                }
                state.page_table.remove(&page_id);
                state.frame_meta[frame_id.as_usize()].reset();
                state.replacer.pin(frame_id);
                state.free_list.push(frame_id);
            }
        }

        self.inner.disk.deallocate_page(page_id).await?;
        log::trace!("freed page {}", page_id);
        Ok(())
    }

    /// Writes a resident page to disk if it is dirty, clearing the dirty
    /// bit. Flushing neither unpins nor invalidates.
    ///
    /// # Errors
    ///
    /// Returns `BufferError::NotResident` if the page is not in the pool.
    pub async fn flush_page(&self, page_id: PageId) -> Result<(), BufferError> {
        let dirty_frame = {
            let state = self.inner.state.lock();
            match state.page_table.get(&page_id) {
                None => return Err(BufferError::NotResident(page_id)),
                Some(&frame_id) => {
                    state.frame_meta[frame_id.as_usize()].is_dirty.then_some(frame_id)
                }
            }
        };

        if let Some(frame_id) = dirty_frame {
            let data = self.inner.frames[frame_id.as_usize()].data.read().await;
            self.inner.disk.write_page(page_id, data.as_slice()).await?;

            let mut state = self.inner.state.lock();
            if state.frame_meta[frame_id.as_usize()].page_id == Some(page_id) {
                state.frame_meta[frame_id.as_usize()].is_dirty = false;
            }
        }

        Ok(())
    }

    /// Writes every dirty resident page to disk and syncs the backend.
    ///
    /// Idempotent: a second call with no intervening mutation performs no
    /// page writes.
    pub async fn flush_all(&self) -> Result<(), BufferError> {
        let dirty_pages: Vec<(FrameId, PageId)> = {
            let state = self.inner.state.lock();
            state
                .frame_meta
                .iter()
                .enumerate()
                .filter_map(|(index, meta)| {
                    if meta.is_dirty {
                        meta.page_id.map(|page_id| (FrameId::new(index), page_id))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (frame_id, page_id) in dirty_pages {
            let data = self.inner.frames[frame_id.as_usize()].data.read().await;
            self.inner.disk.write_page(page_id, data.as_slice()).await?;

            let mut state = self.inner.state.lock();
            if state.frame_meta[frame_id.as_usize()].page_id == Some(page_id) {
                state.frame_meta[frame_id.as_usize()].is_dirty = false;
            }
        }

        self.inner.disk.sync_all().await?;
        Ok(())
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.inner.pool_size
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.inner.state.lock().page_table.len()
    }

    /// Returns the number of frames with a pin count of zero, free frames
    /// included.
    pub fn num_unpinned(&self) -> usize {
        self.inner
            .state
            .lock()
            .frame_meta
            .iter()
            .filter(|meta| meta.pin_count == 0)
            .count()
    }
}

impl<D: DiskManager, R: Replacer> BufferPoolInner<D, R> {
    /// Resolves a page to a pinned frame, filling on a miss per `mode`.
    async fn get_or_allocate_frame(
        &self,
        page_id: PageId,
        mode: FetchMode<'_>,
    ) -> Result<FrameId, BufferError> {
        // Fast path: the page is resident.
        let hit = {
            let mut state = self.state.lock();
            match state.page_table.get(&page_id).copied() {
                Some(frame_id) => {
                    if matches!(mode, FetchMode::MemCopy(_))
                        && state.frame_meta[frame_id.as_usize()].pin_count > 0
                    {
                        return Err(BufferError::PagePinned(page_id));
                    }
                    state.frame_meta[frame_id.as_usize()].pin_count += 1;
                    state.replacer.pin(frame_id);
                    Some(frame_id)
                }
                None => None,
            }
        };

        if let Some(frame_id) = hit {
            if let FetchMode::MemCopy(image) = mode {
                let mut data = self.frames[frame_id.as_usize()].data.write().await;
                data.as_mut_slice().copy_from_slice(image.as_slice());
                self.state.lock().frame_meta[frame_id.as_usize()].is_dirty = true;
            }
            return Ok(frame_id);
        }

        // Miss: take a free frame or evict a victim.
        let frame_id = self.allocate_frame().await?;

        match mode {
            FetchMode::DiskIo => {
                let read_result = {
                    let mut data = self.frames[frame_id.as_usize()].data.write().await;
                    self.disk.read_page(page_id, data.as_mut_slice()).await
                };
                if let Err(e) = read_result {
                    // Return the frame so it is not lost to the pool.
                    self.state.lock().free_list.push(frame_id);
                    return Err(e.into());
                }
            }
            FetchMode::MemCopy(image) => {
                let mut data = self.frames[frame_id.as_usize()].data.write().await;
                data.as_mut_slice().copy_from_slice(image.as_slice());
            }
            FetchMode::NoOp => {}
        }

        let mut state = self.state.lock();
        state.page_table.insert(page_id, frame_id);
        let meta = &mut state.frame_meta[frame_id.as_usize()];
        meta.page_id = Some(page_id);
        meta.pin_count = 1;
        meta.is_dirty = matches!(mode, FetchMode::MemCopy(_));
        Ok(frame_id)
    }

    /// Obtains an empty frame, evicting (with write-back) if needed.
    async fn allocate_frame(&self) -> Result<FrameId, BufferError> {
        loop {
            // Claim a frame under a single lock. A free frame is ready as
            // is; otherwise the replacer names a victim, whose metadata is
            // snapshotted here so the write-back decision below does not
            // depend on state the lock no longer protects.
            let (frame_id, victim_meta) = {
                let mut state = self.state.lock();
                match state.free_list.pop() {
                    Some(frame_id) => (frame_id, None),
                    None => {
                        let Some(frame_id) = state.replacer.victim() else {
                            return Err(BufferError::Exhausted);
                        };
                        (frame_id, Some(state.frame_meta[frame_id.as_usize()]))
                    }
                }
            };

            let Some(snapshot) = victim_meta else {
                // Free frame: nothing cached, nothing to write back.
                return Ok(frame_id);
            };

            if snapshot.is_dirty
                && let Some(page_id) = snapshot.page_id
            {
                let data = self.frames[frame_id.as_usize()].data.read().await;
                self.disk.write_page(page_id, data.as_slice()).await?;
                log::trace!("eviction wrote back dirty page {}", page_id);
            }

            // Complete the eviction. A pin taken during the write-back
            // makes the claim stale, in which case the loop claims afresh.
            let mut state = self.state.lock();
            let meta = &mut state.frame_meta[frame_id.as_usize()];
            if meta.pin_count > 0 {
                continue;
            }
            meta.reset();
            if let Some(page_id) = snapshot.page_id {
                state.page_table.remove(&page_id);
            }
            return Ok(frame_id);
        }
    }

    /// Releases one pin (called from guard drops).
    ///
    /// Synchronous because `Drop` is synchronous. The dirty flag is ORed
    /// in; once a frame is dirty only a flush or eviction write-back
    /// clears it. When the pin count reaches zero the frame becomes
    /// evictable.
    pub(super) fn unpin(&self, frame_id: FrameId, dirty: bool) {
        let mut state = self.state.lock();
        let meta = &mut state.frame_meta[frame_id.as_usize()];

        debug_assert!(meta.pin_count > 0, "unpin with pin_count == 0");
        if meta.pin_count == 0 {
            return;
        }

        meta.pin_count -= 1;
        if dirty {
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
    }
}
