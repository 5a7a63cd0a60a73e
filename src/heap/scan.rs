//! Sequential heap file scan.
//!
//! [`HeapScan`] walks the directory chain of a heap file and yields every
//! record as a `(RecordId, bytes)` pair, in page order. Records of one
//! data page are buffered under a short-lived pin and handed out one at a
//! time, so no pin is held between `next()` calls.

use std::collections::VecDeque;

use super::directory::DirectoryPage;
use super::error::HeapError;
use super::page::{DataPage, RecordId};
use crate::storage::io::DiskManager;
use crate::storage::{BufferPool, PageId, Replacer};

/// Cursor over all records of a heap file.
///
/// Obtained from [`HeapFile::scan`](super::HeapFile::scan). Mutations of
/// the file while a scan is open are not coordinated; run scans to
/// completion before inserting or deleting.
pub struct HeapScan<'a, D: DiskManager, R: Replacer> {
    pool: &'a BufferPool<D, R>,
    /// Next directory page to visit, if any.
    next_dir: Option<PageId>,
    /// Data pages of the current directory page, not yet visited.
    data_pages: VecDeque<PageId>,
    /// Records of the current data page, not yet yielded.
    buffered: VecDeque<(RecordId, Vec<u8>)>,
}

impl<'a, D: DiskManager, R: Replacer> HeapScan<'a, D, R> {
    pub(super) fn new(pool: &'a BufferPool<D, R>, head: PageId) -> Self {
        Self {
            pool,
            next_dir: Some(head),
            data_pages: VecDeque::new(),
            buffered: VecDeque::new(),
        }
    }

    /// Returns the next record, or `None` when the scan is exhausted.
    ///
    /// Calling `next()` again after exhaustion keeps returning `None`.
    pub async fn next(&mut self) -> Result<Option<(RecordId, Vec<u8>)>, HeapError> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Ok(Some(item));
            }

            if let Some(page_id) = self.data_pages.pop_front() {
                let guard = self.pool.fetch_page(page_id).await?;
                let page = DataPage::new(guard);
                self.buffered = page
                    .iter()
                    .map(|(slot_id, bytes)| (RecordId::new(page_id, slot_id), bytes.to_vec()))
                    .collect();
                continue;
            }

            let Some(dir_id) = self.next_dir.take() else {
                return Ok(None);
            };
            let guard = self.pool.fetch_page(dir_id).await?;
            let dir = DirectoryPage::new(guard);
            self.data_pages = dir.iter_entries().map(|(_, entry)| entry.page_id).collect();
            self.next_dir = dir.next_page();
        }
    }

    /// Drains the scan into a vector.
    pub async fn collect_all(&mut self) -> Result<Vec<(RecordId, Vec<u8>)>, HeapError> {
        let mut all = Vec::new();
        while let Some(item) = self.next().await? {
            all.push(item);
        }
        Ok(all)
    }
}
