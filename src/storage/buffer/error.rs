//! Buffer pool errors.

use crate::storage::{DiskError, PageId};

/// Errors that can occur during buffer pool operations.
#[derive(Debug)]
pub enum BufferError {
    /// All frames are pinned; no victim could be found.
    ///
    /// Raised when a fetch misses and every frame has `pin_count > 0`.
    /// This signals a pin leak or an undersized pool on the client's side
    /// and is not recovered locally.
    Exhausted,

    /// The operation requires the page to be unpinned, but it is pinned.
    ///
    /// Raised by `free_page` and by `FetchMode::MemCopy` against a
    /// resident pinned page.
    PagePinned(PageId),

    /// The page is not resident in the pool.
    ///
    /// Raised by `flush_page`.
    NotResident(PageId),

    /// Underlying disk manager error.
    Disk(DiskError),
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Exhausted => {
                write!(f, "buffer pool exhausted: all frames are pinned")
            }
            BufferError::PagePinned(page_id) => {
                write!(f, "page {} is pinned", page_id)
            }
            BufferError::NotResident(page_id) => {
                write!(f, "page {} is not resident in the buffer pool", page_id)
            }
            BufferError::Disk(e) => write!(f, "disk error: {}", e),
        }
    }
}

impl std::error::Error for BufferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BufferError::Disk(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DiskError> for BufferError {
    fn from(e: DiskError) -> Self {
        BufferError::Disk(e)
    }
}
