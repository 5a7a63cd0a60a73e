//! Storage layer errors.

use crate::storage::PageId;

/// Errors from disk manager operations.
#[derive(Debug)]
pub enum DiskError {
    /// Page not allocated (or already deallocated).
    ///
    /// Raised when reading, writing, or deallocating a page id that does
    /// not denote a currently allocated page.
    PageNotFound(PageId),

    /// Invalid buffer size provided to `read_page` or `write_page`.
    ///
    /// Buffers must be exactly `PAGE_SIZE` bytes.
    InvalidBufferSize {
        /// Expected buffer size (PAGE_SIZE)
        expected: usize,
        /// Actual buffer size provided
        actual: usize,
    },

    /// I/O error from the underlying file system.
    Io(std::io::Error),

    /// The disk image has an invalid format or size.
    Corrupted(String),

    /// A file entry with this name already exists.
    DuplicateFileEntry(String),

    /// No file entry with this name exists.
    FileEntryNotFound(String),

    /// The file entry table has no room for another entry.
    FileTableFull,
}

impl std::fmt::Display for DiskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskError::PageNotFound(id) => write!(f, "page not found: {}", id),
            DiskError::InvalidBufferSize { expected, actual } => {
                write!(f, "invalid buffer size: expected {}, got {}", expected, actual)
            }
            DiskError::Io(e) => write!(f, "I/O error: {}", e),
            DiskError::Corrupted(msg) => write!(f, "data corruption: {}", msg),
            DiskError::DuplicateFileEntry(name) => {
                write!(f, "file entry already exists: {:?}", name)
            }
            DiskError::FileEntryNotFound(name) => {
                write!(f, "file entry not found: {:?}", name)
            }
            DiskError::FileTableFull => write!(f, "file entry table is full"),
        }
    }
}

impl std::error::Error for DiskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiskError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DiskError {
    fn from(e: std::io::Error) -> Self {
        DiskError::Io(e)
    }
}
