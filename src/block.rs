// =============================================================================
// firstfit-heap — Block Header
// =============================================================================
//
// The in-band block header and the raw-pointer plumbing around it. Headers
// live inside the pool itself (boundary-tag style): the header at address
// `A` describes the payload that immediately follows it, and the next
// header lives at `A + HEADER_SIZE + size`.
//
// # Memory layout
// ```text
// ┌──────────────────────────────────────┐
// │ size: usize (8B)                     │ ← payload length, header excluded
// │ allocated: bool (padded to 8B)       │
// │ prev: *mut BlockHeader (8B)          │ ← null iff at pool base
// │ next: *mut BlockHeader (8B)          │ ← null iff payload is pool's last byte
// ├──────────────────────────────────────┤
// │ ... payload, `size` bytes ...        │ ← the client pointer points here
// └──────────────────────────────────────┘
// ```
//
// All arithmetic here is byte-granular (`*mut u8` casts) so that pointer
// math never silently scales by `size_of::<BlockHeader>()`.
// =============================================================================

use std::mem::size_of;
use std::ptr;

/// Per-block metadata, stored at the start of every block in the pool.
///
/// `size` is the payload capacity in bytes — it excludes this header.
/// `prev`/`next` are address-ordered neighbor links; either may be null.
#[repr(C)]
pub(crate) struct BlockHeader {
    pub size: usize,
    pub allocated: bool,
    pub prev: *mut BlockHeader,
    pub next: *mut BlockHeader,
}

/// Size of one block header in bytes.
///
/// On a 64-bit target this is 32 bytes: an 8-byte size, a bool padded out to
/// the next 8-byte boundary, and two 8-byte neighbor pointers. The const
/// assertion below is the invariant (I5) in the specification actually
/// depends on: client pointers are aligned only because this header is.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

const _: () = assert!(
    HEADER_SIZE % crate::align::ALIGNMENT == 0,
    "block header size must be a multiple of the payload alignment"
);

/// Reinterprets a byte address as a block header pointer.
#[inline]
pub(crate) unsafe fn header_at(addr: *mut u8) -> *mut BlockHeader {
    addr as *mut BlockHeader
}

/// The client pointer for a block: the first payload byte, immediately
/// past its header.
#[inline]
pub(crate) unsafe fn client_ptr(block: *mut BlockHeader) -> *mut u8 {
    (block as *mut u8).add(HEADER_SIZE)
}

/// Recovers the owning block header from a client pointer.
#[inline]
pub(crate) unsafe fn block_from_client(ptr: *mut u8) -> *mut BlockHeader {
    header_at(ptr.sub(HEADER_SIZE))
}

/// The address of the byte immediately past this block's payload — where
/// the next header would start if this block were not the tail.
#[inline]
pub(crate) unsafe fn block_end(block: *mut BlockHeader) -> *mut u8 {
    (block as *mut u8).add(HEADER_SIZE + (*block).size)
}

/// Splices `new_block` in between `block` and `block.next`.
///
/// # Safety
/// `block` must be a valid, live header. `new_block` must not already be
/// linked into the list.
pub(crate) unsafe fn splice_after(block: *mut BlockHeader, new_block: *mut BlockHeader) {
    let next = (*block).next;
    (*new_block).prev = block;
    (*new_block).next = next;
    if !next.is_null() {
        (*next).prev = new_block;
    }
    (*block).next = new_block;
}

/// Removes `block` from the list, relinking its neighbors around it.
///
/// # Safety
/// `block` must be a valid, live header currently linked into the list.
pub(crate) unsafe fn unlink(block: *mut BlockHeader) {
    let prev = (*block).prev;
    let next = (*block).next;
    if !prev.is_null() {
        (*prev).next = next;
    }
    if !next.is_null() {
        (*next).prev = prev;
    }
}

/// `true` if `addr` is a multiple of the payload alignment.
#[inline]
pub(crate) fn is_aligned(addr: *mut u8) -> bool {
    (addr as usize) % crate::align::ALIGNMENT == 0
}

#[inline]
pub(crate) fn null_header() -> *mut BlockHeader {
    ptr::null_mut()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_32_bytes_on_64_bit() {
        if size_of::<usize>() == 8 {
            assert_eq!(HEADER_SIZE, 32);
        }
    }

    #[test]
    fn client_ptr_roundtrips_through_block_from_client() {
        // `Vec<u64>` (rather than `Vec<u8>`) guarantees 8-byte alignment for
        // the backing storage, matching what a real pool provides.
        let mut storage: Vec<u64> = vec![0u64; (HEADER_SIZE + 64) / 8];
        let block = storage.as_mut_ptr() as *mut BlockHeader;
        unsafe {
            (*block).size = 64;
            (*block).allocated = true;
            (*block).prev = null_header();
            (*block).next = null_header();

            let ptr = client_ptr(block);
            assert!(is_aligned(ptr));
            assert_eq!(block_from_client(ptr), block);
        }
    }
}
