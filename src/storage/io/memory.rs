//! In-memory disk manager implementation.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::DiskManager;
use crate::storage::error::DiskError;
use crate::storage::page::{PAGE_SIZE, PageData, PageId};

/// In-memory disk manager for testing and development.
///
/// Pages live in a `Vec` indexed by page number; a deallocated page leaves
/// a `None` hole behind so that later reads and writes of the stale id
/// fail with `PageNotFound` instead of silently touching reused storage.
/// Single-page allocations reuse holes; multi-page runs are appended at
/// the end so they stay contiguous.
///
/// The file entry table is an ordinary map with no capacity limit.
pub struct MemoryDisk {
    inner: Mutex<MemoryDiskInner>,
}

struct MemoryDiskInner {
    pages: Vec<Option<PageData>>,
    entries: HashMap<String, PageId>,
    writes: u64,
}

impl MemoryDisk {
    /// Creates a new empty in-memory disk.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryDiskInner {
                pages: Vec::new(),
                entries: HashMap::new(),
                writes: 0,
            }),
        }
    }

    /// Number of `write_page` calls served so far.
    ///
    /// Lets tests observe write traffic, e.g. that a second `flush_all`
    /// with no intervening mutation writes nothing.
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }
}

impl Default for MemoryDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskManager for MemoryDisk {
    async fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let inner = self.inner.lock();
        let page = page_id
            .valid()
            .and_then(|id| inner.pages.get(id.page_num() as usize))
            .and_then(|slot| slot.as_ref())
            .ok_or(DiskError::PageNotFound(page_id))?;

        buf.copy_from_slice(page.as_slice());
        Ok(())
    }

    async fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskError> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let mut inner = self.inner.lock();
        let page = page_id
            .valid()
            .and_then(|id| inner.pages.get_mut(id.page_num() as usize))
            .and_then(|slot| slot.as_mut())
            .ok_or(DiskError::PageNotFound(page_id))?;

        page.as_mut_slice().copy_from_slice(buf);
        inner.writes += 1;
        Ok(())
    }

    async fn allocate_page(&self, run_size: usize) -> Result<PageId, DiskError> {
        assert!(run_size > 0, "run_size must be > 0");

        let mut inner = self.inner.lock();

        // Reuse a hole for single-page allocations; runs always extend the
        // end so the pages stay contiguous.
        if run_size == 1 {
            if let Some(index) = inner.pages.iter().position(|slot| slot.is_none()) {
                inner.pages[index] = Some(PageData::new());
                return Ok(PageId::new(index as i32));
            }
        }

        let first = inner.pages.len();
        for _ in 0..run_size {
            inner.pages.push(Some(PageData::new()));
        }
        Ok(PageId::new(first as i32))
    }

    async fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskError> {
        let mut inner = self.inner.lock();
        let slot = page_id
            .valid()
            .and_then(|id| inner.pages.get_mut(id.page_num() as usize))
            .ok_or(DiskError::PageNotFound(page_id))?;

        if slot.is_none() {
            return Err(DiskError::PageNotFound(page_id));
        }
        *slot = None;
        Ok(())
    }

    async fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }

    async fn sync_all(&self) -> Result<(), DiskError> {
        Ok(())
    }

    async fn add_file_entry(&self, name: &str, head: PageId) -> Result<(), DiskError> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(name) {
            return Err(DiskError::DuplicateFileEntry(name.to_owned()));
        }
        inner.entries.insert(name.to_owned(), head);
        Ok(())
    }

    async fn get_file_entry(&self, name: &str) -> Result<Option<PageId>, DiskError> {
        Ok(self.inner.lock().entries.get(name).copied())
    }

    async fn delete_file_entry(&self, name: &str) -> Result<(), DiskError> {
        let mut inner = self.inner.lock();
        if inner.entries.remove(name).is_none() {
            return Err(DiskError::FileEntryNotFound(name.to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocate_and_read() {
        let disk = MemoryDisk::new();
        let page_id = disk.allocate_page(1).await.unwrap();
        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut buf).await.unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let disk = MemoryDisk::new();
        let page_id = disk.allocate_page(1).await.unwrap();

        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0] = 42;
        write_buf[1023] = 99;
        disk.write_page(page_id, &write_buf).await.unwrap();

        let mut read_buf = vec![0u8; PAGE_SIZE];
        disk.read_page(page_id, &mut read_buf).await.unwrap();
        assert_eq!(read_buf[0], 42);
        assert_eq!(read_buf[1023], 99);
    }

    #[tokio::test]
    async fn test_run_allocation_is_contiguous() {
        let disk = MemoryDisk::new();
        let first = disk.allocate_page(3).await.unwrap();
        assert_eq!(first, PageId::new(0));
        assert_eq!(disk.page_count().await, 3);

        for i in 0..3 {
            let mut buf = vec![0u8; PAGE_SIZE];
            disk.read_page(PageId::new(i), &mut buf).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_deallocate_then_access_fails() {
        let disk = MemoryDisk::new();
        let page_id = disk.allocate_page(1).await.unwrap();
        disk.deallocate_page(page_id).await.unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        let result = disk.read_page(page_id, &mut buf).await;
        assert!(matches!(result, Err(DiskError::PageNotFound(_))));

        let result = disk.deallocate_page(page_id).await;
        assert!(matches!(result, Err(DiskError::PageNotFound(_))));
    }

    #[tokio::test]
    async fn test_single_page_allocation_reuses_holes() {
        let disk = MemoryDisk::new();
        let a = disk.allocate_page(1).await.unwrap();
        let _b = disk.allocate_page(1).await.unwrap();

        disk.deallocate_page(a).await.unwrap();
        let c = disk.allocate_page(1).await.unwrap();
        assert_eq!(c, a);

        // A reused page reads back zeroed.
        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(c, &mut buf).await.unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_invalid_buffer_size() {
        let disk = MemoryDisk::new();
        let page_id = disk.allocate_page(1).await.unwrap();
        let mut buf = vec![0u8; 100];
        let result = disk.read_page(page_id, &mut buf).await;
        assert!(matches!(result, Err(DiskError::InvalidBufferSize { .. })));
    }

    #[tokio::test]
    async fn test_file_entries() {
        let disk = MemoryDisk::new();
        assert_eq!(disk.get_file_entry("orders").await.unwrap(), None);

        disk.add_file_entry("orders", PageId::new(4)).await.unwrap();
        assert_eq!(
            disk.get_file_entry("orders").await.unwrap(),
            Some(PageId::new(4))
        );

        let dup = disk.add_file_entry("orders", PageId::new(9)).await;
        assert!(matches!(dup, Err(DiskError::DuplicateFileEntry(_))));

        disk.delete_file_entry("orders").await.unwrap();
        assert_eq!(disk.get_file_entry("orders").await.unwrap(), None);

        let missing = disk.delete_file_entry("orders").await;
        assert!(matches!(missing, Err(DiskError::FileEntryNotFound(_))));
    }

    #[tokio::test]
    async fn test_write_count() {
        let disk = MemoryDisk::new();
        let page_id = disk.allocate_page(1).await.unwrap();
        assert_eq!(disk.write_count(), 0);

        let buf = vec![0u8; PAGE_SIZE];
        disk.write_page(page_id, &buf).await.unwrap();
        disk.write_page(page_id, &buf).await.unwrap();
        assert_eq!(disk.write_count(), 2);
    }
}
