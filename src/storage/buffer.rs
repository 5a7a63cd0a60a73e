//! Buffer pool for page caching.
//!
//! The buffer pool maps disk pages into a fixed set of in-memory frames,
//! with clock replacement and RAII-based pin guards.
//!
//! # Example
//!
//! ```no_run
//! use bedrock::storage::{BufferPool, MemoryDisk, PageData};
//!
//! # async fn example() {
//! let pool = BufferPool::with_clock(MemoryDisk::new(), 16);
//!
//! // Allocate a new page seeded from a staged image
//! let image = PageData::new();
//! let guard = pool.new_page(&image, 1).await.unwrap();
//! let page_id = guard.page_id();
//! drop(guard); // releases the pin
//!
//! // Read the page back
//! let guard = pool.fetch_page(page_id).await.unwrap();
//! assert_eq!(&guard[..], image.as_slice());
//! # }
//! ```

mod error;
mod frame;
mod guard;
mod pool;
mod replacer;

pub use error::BufferError;
pub use frame::FrameId;
pub use guard::{PageReadGuard, PageWriteGuard};
pub use pool::{BufferPool, FetchMode};
pub use replacer::{ClockReplacer, Replacer};
