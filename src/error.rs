//! Error surface for the parts of the allocator that can fail loudly.
//!
//! Only the backing store (reserving/releasing the pool from the OS) ever
//! returns a `Result`. Everything downstream of a successfully acquired pool
//! follows the allocator's own null-pointer failure convention: `allocate`
//! and `reallocate` return a null pointer on out-of-memory or on misuse
//! (reallocating a pointer to a free block), matching the source this crate
//! is grounded on rather than layering a second error type on top of it.

use thiserror::Error;

/// Failures surfaced by the backing-store adapter.
#[derive(Debug, Error)]
pub enum HeapError {
    /// The OS refused to reserve or release the pool.
    ///
    /// `code` is the opaque platform error code (`errno` on Unix,
    /// `GetLastError()` on Windows) kept only for diagnostics.
    #[error("backing store operation failed (platform code {code})")]
    BackingStore { code: i32 },
}
