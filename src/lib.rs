//! bedrock is a minimal relational-database storage substrate.
//!
//! It provides the two bottom layers of a database storage engine:
//!
//! - [`storage`]: fixed-size page I/O ([`storage::DiskManager`]) and an
//!   in-memory page cache ([`storage::BufferPool`]) with pluggable page
//!   replacement (clock by default).
//! - [`heap`]: an unordered record collection ([`heap::HeapFile`]) built on
//!   top of the buffer pool, storing variable-length records in slotted
//!   data pages tracked by a doubly-linked chain of directory pages.
//!
//! Higher access methods (indexes, sort operators, executors) are expected
//! to be layered on top of these two modules.

pub mod heap;
pub mod storage;
