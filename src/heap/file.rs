//! Heap file: a multi-page unordered record collection.
//!
//! A heap file is identified by its head directory page. Directory pages
//! form a doubly-linked chain; each entry tracks one data page together
//! with its record count and free space, so inserts can find a page with
//! room without touching the data pages themselves.
//!
//! Named files register their head page in the disk manager's file entry
//! table and can be reopened later. Temporary files have no entry; their
//! pages are reclaimed by an explicit [`HeapFile::delete_file`] call.
//!
//! Pin discipline: every operation pins at most two pages at a time, and
//! every pin is released before the operation returns, on success and
//! error paths alike. Data page mutations are committed by unpinning
//! dirty and then updating the owning directory entry.

use std::sync::Arc;

use super::directory::{DirEntry, DirectoryPage, MAX_ENTRIES};
use super::error::HeapError;
use super::page::{DataPage, MAX_RECORD_SIZE, RecordId, SLOT_SIZE};
use super::scan::HeapScan;
use crate::storage::io::DiskManager;
use crate::storage::{BufferError, BufferPool, DiskError, PageData, PageId, PageType, Replacer};

/// An unordered collection of variable-length records.
///
/// All heap files share one buffer pool; the pool mediates every page
/// access. Records are addressed by [`RecordId`], stable for the lifetime
/// of the record.
pub struct HeapFile<D: DiskManager, R: Replacer> {
    pool: Arc<BufferPool<D, R>>,
    head: PageId,
    name: Option<String>,
    deleted: bool,
}

impl<D: DiskManager, R: Replacer> HeapFile<D, R> {
    /// Opens the named heap file, creating it if it does not exist.
    ///
    /// An existing name resolves to its head directory page via the disk
    /// manager's file entry table. Otherwise a head directory page is
    /// allocated and the name is registered.
    pub async fn open(pool: Arc<BufferPool<D, R>>, name: &str) -> Result<Self, HeapError> {
        if let Some(head) = pool.disk().get_file_entry(name).await.map_err(BufferError::Disk)? {
            return Ok(Self {
                pool,
                head,
                name: Some(name.to_owned()),
                deleted: false,
            });
        }

        let head = Self::create_directory_head(&pool).await?;
        pool.disk()
            .add_file_entry(name, head)
            .await
            .map_err(BufferError::Disk)?;
        log::debug!("created heap file {:?} with head page {}", name, head);

        Ok(Self {
            pool,
            head,
            name: Some(name.to_owned()),
            deleted: false,
        })
    }

    /// Creates an anonymous heap file with no file entry.
    ///
    /// The caller owns the cleanup: call [`delete_file`](Self::delete_file)
    /// before dropping the handle, or the file's pages stay allocated.
    pub async fn temporary(pool: Arc<BufferPool<D, R>>) -> Result<Self, HeapError> {
        let head = Self::create_directory_head(&pool).await?;
        Ok(Self {
            pool,
            head,
            name: None,
            deleted: false,
        })
    }

    /// Allocates and initializes an empty head directory page.
    async fn create_directory_head(pool: &BufferPool<D, R>) -> Result<PageId, HeapError> {
        let mut image = PageData::new();
        DirectoryPage::new(&mut image).init();

        let mut guard = pool.new_page(&image, 1).await?;
        let head = guard.page_id();
        let mut dir = DirectoryPage::new(&mut guard);
        dir.set_current_page(Some(head));
        drop(dir);
        guard.mark_dirty();
        Ok(head)
    }

    /// Returns the head directory page id.
    pub fn head_page(&self) -> PageId {
        self.head
    }

    /// Returns the file's registered name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Inserts a record and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `HeapError::RecordTooLarge` if the record cannot fit on a
    /// data page (header plus one slot leave `PAGE_SIZE - 24` bytes).
    pub async fn insert(&self, record: &[u8]) -> Result<RecordId, HeapError> {
        if record.len() > MAX_RECORD_SIZE {
            return Err(HeapError::RecordTooLarge {
                size: record.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        let page_id = self.available_page(record.len()).await?;

        let slot_id;
        let free_count;
        {
            let mut guard = self.pool.fetch_page_mut(page_id).await?;
            let mut page = DataPage::new(&mut guard);
            slot_id = page.insert(record)?;
            free_count = page.free_space();
            drop(page);
            guard.mark_dirty();
        }

        self.update_entry(page_id, 1, free_count).await?;
        Ok(RecordId::new(page_id, slot_id))
    }

    /// Reads the record addressed by `rid`.
    ///
    /// # Errors
    ///
    /// Returns `HeapError::InvalidRid` if the id does not address a live
    /// record.
    pub async fn read(&self, rid: RecordId) -> Result<Vec<u8>, HeapError> {
        let guard = match self.pool.fetch_page(rid.page_id).await {
            Ok(guard) => guard,
            Err(BufferError::Disk(DiskError::PageNotFound(_))) => {
                return Err(HeapError::InvalidRid(rid));
            }
            Err(e) => return Err(e.into()),
        };

        let page = DataPage::new(guard);
        if page.page_type() != PageType::Data {
            return Err(HeapError::InvalidRid(rid));
        }
        Ok(page.read(rid.slot_id)?.to_vec())
    }

    /// Overwrites the record addressed by `rid` in place.
    ///
    /// The replacement must have the same length; length-changing updates
    /// are not supported at this layer. Delete and reinsert instead,
    /// which yields a new record id.
    pub async fn update(&self, rid: RecordId, record: &[u8]) -> Result<(), HeapError> {
        let mut guard = match self.pool.fetch_page_mut(rid.page_id).await {
            Ok(guard) => guard,
            Err(BufferError::Disk(DiskError::PageNotFound(_))) => {
                return Err(HeapError::InvalidRid(rid));
            }
            Err(e) => return Err(e.into()),
        };

        let mut page = DataPage::new(&mut guard);
        if page.page_type() != PageType::Data {
            return Err(HeapError::InvalidRid(rid));
        }
        // Failure drops the guard clean; nothing was committed.
        page.update(rid.slot_id, record)?;
        drop(page);
        guard.mark_dirty();
        Ok(())
    }

    /// Deletes the record addressed by `rid`.
    ///
    /// When this was the data page's last record, the page is freed and
    /// its directory entry removed; an emptied non-head directory page is
    /// unlinked from the chain and freed as well.
    pub async fn delete(&self, rid: RecordId) -> Result<(), HeapError> {
        let free_count;
        {
            let mut guard = match self.pool.fetch_page_mut(rid.page_id).await {
                Ok(guard) => guard,
                Err(BufferError::Disk(DiskError::PageNotFound(_))) => {
                    return Err(HeapError::InvalidRid(rid));
                }
                Err(e) => return Err(e.into()),
            };

            let mut page = DataPage::new(&mut guard);
            if page.page_type() != PageType::Data {
                return Err(HeapError::InvalidRid(rid));
            }
            page.delete(rid.slot_id)?;
            free_count = page.free_space();
            drop(page);
            guard.mark_dirty();
        }

        self.update_entry(rid.page_id, -1, free_count).await
    }

    /// Returns the number of records in the file, summed over the
    /// directory entries.
    pub async fn record_count(&self) -> Result<usize, HeapError> {
        let mut total = 0;
        let mut next = Some(self.head);

        while let Some(dir_id) = next {
            let guard = self.pool.fetch_page(dir_id).await?;
            let dir = DirectoryPage::new(guard);
            total += dir
                .iter_entries()
                .map(|(_, entry)| entry.record_count as usize)
                .sum::<usize>();
            next = dir.next_page();
        }

        Ok(total)
    }

    /// Opens a sequential scan over all records in the file.
    pub fn scan(&self) -> HeapScan<'_, D, R> {
        HeapScan::new(&self.pool, self.head)
    }

    /// Deletes the file, freeing every data and directory page.
    ///
    /// For a named file the file entry is removed as well, so the name
    /// can be reused.
    pub async fn delete_file(mut self) -> Result<(), HeapError> {
        let mut next = Some(self.head);
        while let Some(dir_id) = next {
            let data_pages: Vec<PageId>;
            {
                let guard = self.pool.fetch_page(dir_id).await?;
                let dir = DirectoryPage::new(guard);
                data_pages = dir.iter_entries().map(|(_, entry)| entry.page_id).collect();
                next = dir.next_page();
            }

            for page_id in data_pages {
                self.pool.free_page(page_id).await?;
            }
            self.pool.free_page(dir_id).await?;
        }

        if let Some(name) = self.name.take() {
            self.pool
                .disk()
                .delete_file_entry(&name)
                .await
                .map_err(BufferError::Disk)?;
            log::debug!("deleted heap file {:?}", name);
        }

        self.deleted = true;
        Ok(())
    }

    /// Finds a data page whose directory entry has room for a record of
    /// `record_len` bytes plus its slot, allocating a new data page when
    /// the walk comes up empty.
    async fn available_page(&self, record_len: usize) -> Result<PageId, HeapError> {
        let mut next = Some(self.head);

        while let Some(dir_id) = next {
            let guard = self.pool.fetch_page(dir_id).await?;
            let dir = DirectoryPage::new(guard);
            for (_, entry) in dir.iter_entries() {
                if entry.free_count as usize >= record_len + SLOT_SIZE {
                    return Ok(entry.page_id);
                }
            }
            next = dir.next_page();
        }

        self.allocate_data_page().await
    }

    /// Allocates a new data page and appends its directory entry,
    /// appending a new directory page first if the chain is full.
    async fn allocate_data_page(&self) -> Result<PageId, HeapError> {
        // Find a directory page with room for one more entry.
        let mut dir_id = self.head;
        loop {
            let guard = self.pool.fetch_page(dir_id).await?;
            let dir = DirectoryPage::new(guard);
            if dir.entry_count() < MAX_ENTRIES {
                break;
            }
            match dir.next_page() {
                Some(next) => dir_id = next,
                None => {
                    drop(dir);
                    dir_id = self.append_directory_page(dir_id).await?;
                    break;
                }
            }
        }

        // Create the data page from a staged image.
        let mut image = PageData::new();
        DataPage::new(&mut image).init();

        let data_id;
        let free_count;
        {
            let mut guard = self.pool.new_page(&image, 1).await?;
            data_id = guard.page_id();
            let mut page = DataPage::new(&mut guard);
            page.set_current_page(Some(data_id));
            free_count = page.free_space();
            drop(page);
            guard.mark_dirty();
        }

        // Fill the next entry slot on the directory page.
        {
            let mut guard = self.pool.fetch_page_mut(dir_id).await?;
            let mut dir = DirectoryPage::new(&mut guard);
            let index = dir.entry_count();
            dir.set_entry(
                index,
                &DirEntry {
                    page_id: data_id,
                    record_count: 0,
                    free_count: free_count as u16,
                },
            );
            dir.set_entry_count(index + 1);
            drop(dir);
            guard.mark_dirty();
        }

        log::trace!("allocated data page {} under directory page {}", data_id, dir_id);
        Ok(data_id)
    }

    /// Appends a fresh directory page after the chain's tail.
    async fn append_directory_page(&self, tail_id: PageId) -> Result<PageId, HeapError> {
        let mut image = PageData::new();
        let mut staged = DirectoryPage::new(&mut image);
        staged.init();
        staged.set_prev_page(Some(tail_id));
        drop(staged);

        let new_id;
        {
            let mut guard = self.pool.new_page(&image, 1).await?;
            new_id = guard.page_id();
            let mut dir = DirectoryPage::new(&mut guard);
            dir.set_current_page(Some(new_id));
            drop(dir);
            guard.mark_dirty();
        }

        {
            let mut guard = self.pool.fetch_page_mut(tail_id).await?;
            let mut dir = DirectoryPage::new(&mut guard);
            dir.set_next_page(Some(new_id));
            drop(dir);
            guard.mark_dirty();
        }

        log::trace!("appended directory page {} after {}", new_id, tail_id);
        Ok(new_id)
    }

    /// Locates the directory entry referencing `page_id`.
    async fn find_entry(&self, page_id: PageId) -> Result<(PageId, usize), HeapError> {
        let mut next = Some(self.head);

        while let Some(dir_id) = next {
            let guard = self.pool.fetch_page(dir_id).await?;
            let dir = DirectoryPage::new(guard);
            for (index, entry) in dir.iter_entries() {
                if entry.page_id == page_id {
                    return Ok((dir_id, index));
                }
            }
            next = dir.next_page();
        }

        Err(HeapError::MissingDirectoryEntry(page_id))
    }

    /// Applies a record-count delta and the new free count to the entry
    /// for `page_id`. A count dropping below one removes the entry and
    /// frees the data page.
    async fn update_entry(
        &self,
        page_id: PageId,
        delta_records: i32,
        free_count: usize,
    ) -> Result<(), HeapError> {
        let (dir_id, index) = self.find_entry(page_id).await?;

        let record_count = {
            let mut guard = self.pool.fetch_page_mut(dir_id).await?;
            let mut dir = DirectoryPage::new(&mut guard);
            let entry = dir.entry(index);
            let record_count = entry.record_count as i64 + delta_records as i64;
            if record_count >= 1 {
                dir.set_entry(
                    index,
                    &DirEntry {
                        page_id,
                        record_count: record_count as u16,
                        free_count: free_count as u16,
                    },
                );
                drop(dir);
                guard.mark_dirty();
                return Ok(());
            }
            record_count
        };

        debug_assert!(record_count < 1);
        self.remove_entry(dir_id, index, page_id).await
    }

    /// Removes the directory entry at `(dir_id, index)` and frees its
    /// data page. A directory page left with no entries is unlinked from
    /// the chain and freed, unless it is the head: the head is retained
    /// for the lifetime of the file, even when empty.
    async fn remove_entry(
        &self,
        dir_id: PageId,
        index: usize,
        data_id: PageId,
    ) -> Result<(), HeapError> {
        self.pool.free_page(data_id).await?;

        let (prev, next) = {
            let mut guard = self.pool.fetch_page_mut(dir_id).await?;
            let mut dir = DirectoryPage::new(&mut guard);
            dir.compact(index);
            let remaining = dir.entry_count() - 1;

            if remaining > 0 || dir_id == self.head {
                dir.set_entry_count(remaining);
                drop(dir);
                guard.mark_dirty();
                return Ok(());
            }

            // The page empties out and is not the head: capture its
            // neighbors and let the guard drop clean, since the page is
            // about to be freed anyway.
            (dir.prev_page(), dir.next_page())
        };

        if let Some(prev_id) = prev {
            let mut guard = self.pool.fetch_page_mut(prev_id).await?;
            let mut dir = DirectoryPage::new(&mut guard);
            dir.set_next_page(next);
            drop(dir);
            guard.mark_dirty();
        }
        if let Some(next_id) = next {
            let mut guard = self.pool.fetch_page_mut(next_id).await?;
            let mut dir = DirectoryPage::new(&mut guard);
            dir.set_prev_page(prev);
            drop(dir);
            guard.mark_dirty();
        }

        self.pool.free_page(dir_id).await?;
        log::trace!("unlinked and freed empty directory page {}", dir_id);
        Ok(())
    }
}

impl<D: DiskManager, R: Replacer> Drop for HeapFile<D, R> {
    fn drop(&mut self) {
        if self.name.is_none() && !self.deleted {
            log::warn!(
                "temporary heap file (head page {}) dropped without delete_file; \
                 its pages remain allocated",
                self.head
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ClockReplacer, MemoryDisk};

    fn pool(frames: usize) -> Arc<BufferPool<MemoryDisk, ClockReplacer>> {
        Arc::new(BufferPool::with_clock(MemoryDisk::new(), frames))
    }

    #[tokio::test]
    async fn test_open_registers_name() {
        let pool = pool(8);
        let file = HeapFile::open(Arc::clone(&pool), "orders").await.unwrap();

        assert_eq!(file.name(), Some("orders"));
        assert_eq!(
            pool.disk().get_file_entry("orders").await.unwrap(),
            Some(file.head_page())
        );
    }

    #[tokio::test]
    async fn test_open_existing_resolves_head() {
        let pool = pool(8);
        let head = {
            let file = HeapFile::open(Arc::clone(&pool), "orders").await.unwrap();
            file.head_page()
        };

        let reopened = HeapFile::open(Arc::clone(&pool), "orders").await.unwrap();
        assert_eq!(reopened.head_page(), head);
    }

    #[tokio::test]
    async fn test_insert_read_roundtrip() {
        let pool = pool(8);
        let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

        let rid = file.insert(b"\x41\x42\x43").await.unwrap();
        assert_eq!(rid.slot_id, 0);
        assert_eq!(file.read(rid).await.unwrap(), b"\x41\x42\x43");
        assert_eq!(file.record_count().await.unwrap(), 1);

        file.delete_file().await.unwrap();
    }

    #[tokio::test]
    async fn test_record_too_large() {
        let pool = pool(8);
        let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

        let record = vec![0u8; MAX_RECORD_SIZE + 1];
        let result = file.insert(&record).await;
        assert!(matches!(result, Err(HeapError::RecordTooLarge { .. })));

        // A record of exactly the maximum size fits.
        let record = vec![0u8; MAX_RECORD_SIZE];
        let rid = file.insert(&record).await.unwrap();
        assert_eq!(file.read(rid).await.unwrap().len(), MAX_RECORD_SIZE);

        file.delete_file().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_on_directory_page_is_invalid_rid() {
        let pool = pool(8);
        let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

        // The head page is a directory page, not a data page.
        let bogus = RecordId::new(file.head_page(), 0);
        assert!(matches!(
            file.read(bogus).await,
            Err(HeapError::InvalidRid(_))
        ));

        file.delete_file().await.unwrap();
    }

    #[tokio::test]
    async fn test_read_unallocated_page_is_invalid_rid() {
        let pool = pool(8);
        let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

        let bogus = RecordId::new(PageId::new(999), 0);
        assert!(matches!(
            file.read(bogus).await,
            Err(HeapError::InvalidRid(_))
        ));

        file.delete_file().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_last_record_frees_data_page() {
        let pool = pool(8);
        let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

        let rid = file.insert(b"only").await.unwrap();
        let pages_before = pool.disk().page_count().await;

        file.delete(rid).await.unwrap();
        assert_eq!(file.record_count().await.unwrap(), 0);

        // The data page was deallocated; a new insert reuses it.
        let rid = file.insert(b"back").await.unwrap();
        assert_eq!(pool.disk().page_count().await, pages_before);
        assert_eq!(file.read(rid).await.unwrap(), b"back");

        file.delete_file().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_preserves_rid() {
        let pool = pool(8);
        let file = HeapFile::temporary(Arc::clone(&pool)).await.unwrap();

        let rid = file.insert(b"before").await.unwrap();
        file.update(rid, b"after!").await.unwrap();
        assert_eq!(file.read(rid).await.unwrap(), b"after!");

        let result = file.update(rid, b"wrong length").await;
        assert!(matches!(result, Err(HeapError::RecordSizeMismatch { .. })));

        file.delete_file().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_file_releases_everything() {
        let pool = pool(8);
        let file = HeapFile::open(Arc::clone(&pool), "doomed").await.unwrap();
        file.insert(b"data").await.unwrap();

        file.delete_file().await.unwrap();

        // The name is gone and can be reused for a fresh file.
        assert_eq!(pool.disk().get_file_entry("doomed").await.unwrap(), None);
        let file = HeapFile::open(Arc::clone(&pool), "doomed").await.unwrap();
        assert_eq!(file.record_count().await.unwrap(), 0);
    }
}
