//! Disk manager backends.
//!
//! This module provides the [`DiskManager`] trait for raw page I/O, page
//! allocation, and the named-file entry table, along with the
//! [`MemoryDisk`] and [`FileDisk`] implementations.

mod file;
mod memory;

pub use file::{FILE_NAME_MAX, FILE_TABLE_CAPACITY, FileDisk};
pub use memory::MemoryDisk;

use super::error::DiskError;
use super::page::PageId;

/// Raw page I/O and allocation backend.
///
/// The disk manager is the collaborator below the buffer pool. It owns
/// page allocation (including contiguous runs), deallocation, raw
/// page-sized reads and writes, and a small table mapping file names to
/// head page ids so that named heap files can be reopened.
///
/// # Design decisions
///
/// 1. **Async trait**: file I/O is inherently blocking, so `FileDisk`
///    routes it through `tokio::fs`. All methods return `Send` futures so
///    they stay usable from spawned tasks.
/// 2. **Caller-owned buffers**: the disk manager reads and writes raw
///    bytes only. Buffer lifetime and caching are the buffer pool's
///    responsibility; this layer does not cache pages.
/// 3. **Run allocation**: `allocate_page` hands out `run_size` contiguous
///    pages at once and returns the first id, so callers that lay out
///    multi-page structures get adjacency for free.
pub trait DiskManager: Send + Sync {
    /// Reads a page into a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::PageNotFound` if the page is not allocated.
    /// Returns `DiskError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    fn read_page(
        &self,
        page_id: PageId,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = Result<(), DiskError>> + Send;

    /// Writes a page from a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::PageNotFound` if the page is not allocated.
    /// Returns `DiskError::InvalidBufferSize` if `buf.len() != PAGE_SIZE`.
    fn write_page(
        &self,
        page_id: PageId,
        buf: &[u8],
    ) -> impl std::future::Future<Output = Result<(), DiskError>> + Send;

    /// Allocates a contiguous run of `run_size` new pages and returns the
    /// id of the first one. Newly allocated pages read back as zeros.
    ///
    /// # Panics
    ///
    /// Panics if `run_size` is 0.
    fn allocate_page(
        &self,
        run_size: usize,
    ) -> impl std::future::Future<Output = Result<PageId, DiskError>> + Send;

    /// Deallocates a single page.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::PageNotFound` if the page is not allocated.
    fn deallocate_page(
        &self,
        page_id: PageId,
    ) -> impl std::future::Future<Output = Result<(), DiskError>> + Send;

    /// Returns the total number of pages the backend has ever allocated,
    /// including deallocated slots still occupying their position.
    fn page_count(&self) -> impl std::future::Future<Output = usize> + Send;

    /// Syncs all pending writes to durable storage.
    ///
    /// A no-op for `MemoryDisk`; an fsync for `FileDisk`.
    fn sync_all(&self) -> impl std::future::Future<Output = Result<(), DiskError>> + Send;

    /// Registers a named file with its head page id.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::DuplicateFileEntry` if the name is taken and
    /// `DiskError::FileTableFull` if the table has no room.
    fn add_file_entry(
        &self,
        name: &str,
        head: PageId,
    ) -> impl std::future::Future<Output = Result<(), DiskError>> + Send;

    /// Looks up the head page id registered under `name`.
    fn get_file_entry(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<PageId>, DiskError>> + Send;

    /// Removes the file entry registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::FileEntryNotFound` if no such entry exists.
    fn delete_file_entry(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<(), DiskError>> + Send;
}
