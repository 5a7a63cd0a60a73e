//! RAII pin guards for buffer pool page access.
//!
//! A guard is one pin: it is taken when a fetch succeeds and released in
//! `Drop`, so a pinned page is unpinned on every exit path, including
//! early returns and error propagation.

use std::ops::{Deref, DerefMut};

use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};

use super::frame::FrameId;
use super::pool::BufferPoolInner;
use super::replacer::Replacer;
use crate::storage::io::DiskManager;
use crate::storage::{PageData, PageId};

/// RAII guard for read-only page access.
///
/// Dereferences to the frame's page bytes. Dropping the guard releases
/// the pin; read access never dirties the frame.
pub struct PageReadGuard<'a, D: DiskManager, R: Replacer> {
    inner: &'a BufferPoolInner<D, R>,
    frame_id: FrameId,
    page_id: PageId,
    data: RwLockReadGuard<'a, PageData>,
}

impl<'a, D: DiskManager, R: Replacer> PageReadGuard<'a, D, R> {
    pub(super) fn new(
        inner: &'a BufferPoolInner<D, R>,
        frame_id: FrameId,
        page_id: PageId,
        data: RwLockReadGuard<'a, PageData>,
    ) -> Self {
        Self {
            inner,
            frame_id,
            page_id,
            data,
        }
    }

    /// Returns the id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl<D: DiskManager, R: Replacer> Deref for PageReadGuard<'_, D, R> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.as_slice()
    }
}

impl<D: DiskManager, R: Replacer> AsRef<[u8]> for PageReadGuard<'_, D, R> {
    fn as_ref(&self) -> &[u8] {
        self.data.as_slice()
    }
}

impl<D: DiskManager, R: Replacer> Drop for PageReadGuard<'_, D, R> {
    fn drop(&mut self) {
        self.inner.unpin(self.frame_id, false);
    }
}

/// RAII guard for mutable page access.
///
/// Dereferences mutably to the frame's page bytes. The guard tracks a
/// local dirty flag: call [`mark_dirty`](Self::mark_dirty) once the
/// mutation is known good, and the drop releases the pin dirty. Dropping
/// without marking releases the pin clean, which is the contract for
/// error paths where no state was committed.
pub struct PageWriteGuard<'a, D: DiskManager, R: Replacer> {
    inner: &'a BufferPoolInner<D, R>,
    frame_id: FrameId,
    page_id: PageId,
    dirty: bool,
    data: RwLockWriteGuard<'a, PageData>,
}

impl<'a, D: DiskManager, R: Replacer> PageWriteGuard<'a, D, R> {
    pub(super) fn new(
        inner: &'a BufferPoolInner<D, R>,
        frame_id: FrameId,
        page_id: PageId,
        data: RwLockWriteGuard<'a, PageData>,
    ) -> Self {
        Self {
            inner,
            frame_id,
            page_id,
            dirty: false,
            data,
        }
    }

    /// Returns the id of the pinned page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Records that the page was modified; the pin is released dirty.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl<D: DiskManager, R: Replacer> Deref for PageWriteGuard<'_, D, R> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.as_slice()
    }
}

impl<D: DiskManager, R: Replacer> DerefMut for PageWriteGuard<'_, D, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data.as_mut_slice()
    }
}

impl<D: DiskManager, R: Replacer> AsRef<[u8]> for PageWriteGuard<'_, D, R> {
    fn as_ref(&self) -> &[u8] {
        self.data.as_slice()
    }
}

impl<D: DiskManager, R: Replacer> AsMut<[u8]> for PageWriteGuard<'_, D, R> {
    fn as_mut(&mut self) -> &mut [u8] {
        self.data.as_mut_slice()
    }
}

impl<D: DiskManager, R: Replacer> Drop for PageWriteGuard<'_, D, R> {
    fn drop(&mut self) {
        self.inner.unpin(self.frame_id, self.dirty);
    }
}
