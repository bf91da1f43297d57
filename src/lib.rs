//! A user-space heap allocator over a single OS-backed virtual memory pool.
//!
//! The allocator reserves one contiguous region from the operating system
//! and carves it into a doubly linked, address-ordered list of blocks, each
//! with an in-band header. Allocation uses first-fit with splitting;
//! freeing eagerly coalesces with both neighbors. See [`Heap`] for the
//! public entry points.
//!
//! This crate is single-threaded and non-reentrant by design: there is no
//! internal locking, no size-class free lists, and no compaction. Callers
//! that need a heap shared across threads must serialize access themselves.

mod align;
mod backing_store;
mod block;
mod error;
mod heap;
mod render;

pub use align::{ALIGNMENT, HEAP_SIZE, MIN_BLOCK_SIZE, NON_CONTIGUOUS_FREE_BLOCK_COUNT};
pub use block::HEADER_SIZE;
pub use error::HeapError;
pub use heap::Heap;
pub use render::render;
