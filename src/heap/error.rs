//! Error types for the heap module.

use std::fmt;

use super::page::RecordId;
use crate::storage::{BufferError, PageId};

/// Errors from heap operations.
#[derive(Debug)]
pub enum HeapError {
    /// The record cannot fit on any data page.
    RecordTooLarge {
        /// Size of the rejected record.
        size: usize,
        /// Largest insertable record size.
        max: usize,
    },
    /// The record id does not address a live record (slot out of range,
    /// slot empty, or the page is not a data page).
    InvalidRid(RecordId),
    /// In-place updates must keep the record length unchanged.
    RecordSizeMismatch {
        /// Existing record length.
        expected: usize,
        /// Length of the replacement bytes.
        actual: usize,
    },
    /// The page has no room for the record and its slot.
    PageFull {
        /// Bytes required for the record and slot.
        required: usize,
        /// Bytes available in the free region.
        available: usize,
    },
    /// No directory entry references this data page.
    ///
    /// Indicates a corrupted directory chain.
    MissingDirectoryEntry(PageId),
    /// Underlying buffer pool error.
    Buffer(BufferError),
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::RecordTooLarge { size, max } => {
                write!(f, "record of {} bytes exceeds the maximum of {}", size, max)
            }
            HeapError::InvalidRid(rid) => write!(f, "invalid record id {}", rid),
            HeapError::RecordSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "record size mismatch: expected {} bytes, got {}",
                    expected, actual
                )
            }
            HeapError::PageFull {
                required,
                available,
            } => {
                write!(
                    f,
                    "page full: need {} bytes, have {} available",
                    required, available
                )
            }
            HeapError::MissingDirectoryEntry(page_id) => {
                write!(f, "no directory entry references data page {}", page_id)
            }
            HeapError::Buffer(e) => write!(f, "buffer pool error: {}", e),
        }
    }
}

impl std::error::Error for HeapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HeapError::Buffer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BufferError> for HeapError {
    fn from(e: BufferError) -> Self {
        HeapError::Buffer(e)
    }
}
