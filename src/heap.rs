// =============================================================================
// firstfit-heap — Core Allocator State Machine
// =============================================================================
//
// This module owns the address-ordered, doubly linked list of blocks that
// spans the pool, and every operation that keeps it consistent.
//
// DESIGN: boundary-tag block list
// ================================
//
// Unlike a free-list-only allocator, every block — allocated or free —
// stays linked into the list for the lifetime of the heap. The header
// lives in-band, at the start of the block it describes:
//
//   ┌───────────┐     ┌───────────┐     ┌───────────┐
//   │ Block     │ ──→ │ Block     │ ──→ │ Block     │ ──→ null
//   │ size: 64  │     │ size: 128 │     │ size: 4096│
//   │ ALLOCATED │     │ FREE      │     │ ALLOCATED │
//   └───────────┘     └───────────┘     └───────────┘
//
// The list is kept in address order (it is built that way at `init` and
// never reordered), so adjacent free blocks are always list neighbors and
// can be coalesced in O(1) once one of them is freed.
//
// ALLOCATION ALGORITHM (first-fit + split):
//   1. Walk the list looking for the first free block big enough.
//   2. If the remainder left over is worth keeping as its own block
//      (>= HEADER_SIZE + MIN_BLOCK_SIZE), split it off and splice it in
//      right after the allocated block. Otherwise hand over the whole
//      block and accept the internal fragmentation.
//
// FREE ALGORITHM (eager coalesce):
//   1. Mark the block free in place — no list movement needed, since it
//      never left the list.
//   2. If the predecessor is free, absorb this block into it.
//   3. If the (possibly new) successor is free, absorb it in turn.
//
//   Before:  ... [A: free] [B: just freed] [C: free] ...
//   After:   ... [A+B+C: one free block, B's and C's headers gone] ...
//
// REALLOCATION ALGORITHM:
//   Shrink in place (split off the freed tail), expand into a free
//   successor (absorb it, splitting again if its tail is spare), or
//   relocate (allocate + copy + free) when neither is possible.
//
// WHY NOT A FREE-LIST-ONLY DESIGN?
//   Keeping allocated blocks in the list too is what makes `enumerate`
//   and the fragmentation probe possible: both need to see the whole
//   pool, not just the parts currently free.
//
// =============================================================================

use std::cell::Cell;
use std::ptr;

use crate::align::{align_up, ALIGNMENT, HEAP_SIZE, MIN_BLOCK_SIZE, NON_CONTIGUOUS_FREE_BLOCK_COUNT};
use crate::backing_store::Pool;
use crate::block::{self, BlockHeader, HEADER_SIZE};
use crate::error::HeapError;

/// A heap backed by exactly one OS-reserved pool.
///
/// `Heap` is intentionally `!Sync` (its block list is mutated through raw
/// pointers with no internal locking) — concurrent use from multiple
/// threads is undefined behavior the type system does not need to allow.
/// Dropping a `Heap` without calling [`Heap::destroy`] still releases the
/// pool, on a best-effort basis, via `Pool`'s own `Drop` impl.
pub struct Heap {
    pool: Option<Pool>,
    head: *mut BlockHeader,
    frag_warned: Cell<bool>,
}

impl Heap {
    /// Reserves [`HEAP_SIZE`] bytes from the OS and initializes a single
    /// free block spanning the pool.
    pub fn init() -> Result<Heap, HeapError> {
        Self::init_with_size(HEAP_SIZE)
    }

    /// Like [`Heap::init`], but lets the caller choose the pool length.
    ///
    /// Mainly useful for tests and the demonstration driver, which would
    /// otherwise need a full mebibyte to exercise small-pool edge cases.
    /// `len` is rounded up to [`ALIGNMENT`] before the backing store is
    /// asked for it.
    pub fn init_with_size(len: usize) -> Result<Heap, HeapError> {
        let len = align_up(len, ALIGNMENT);
        assert!(
            len >= HEADER_SIZE + MIN_BLOCK_SIZE,
            "pool of {len} bytes is too small to hold a single block header and its minimum payload"
        );

        let pool = Pool::acquire(len)?;
        debug_assert_eq!(pool.len(), len, "backing store returned a pool of the wrong length");
        let head = unsafe { block::header_at(pool.base()) };
        unsafe {
            (*head).size = pool.len() - HEADER_SIZE;
            (*head).allocated = false;
            (*head).prev = block::null_header();
            (*head).next = block::null_header();
        }

        log::debug!("heap: initialized pool of {len} bytes, head block size {}", unsafe {
            (*head).size
        });

        Ok(Heap {
            pool: Some(pool),
            head,
            frag_warned: Cell::new(false),
        })
    }

    /// Allocates `requested` bytes and returns a client pointer, or null if
    /// no free block is large enough.
    pub fn allocate(&mut self, requested: usize) -> *mut u8 {
        let need = if requested == 0 {
            ALIGNMENT
        } else {
            align_up(requested, ALIGNMENT)
        };

        let block = self.find_free_block(need);
        if block.is_null() {
            log::debug!("heap: allocate({requested}) failed, no block >= {need} bytes free");
            return ptr::null_mut();
        }

        // SAFETY: `block` was just found by `find_free_block`, which only
        // returns live, unallocated headers reachable from `self.head`.
        unsafe {
            self.allocate_from(block, need);
            let ptr = block::client_ptr(block);
            log::debug!(
                "heap: allocate({requested}) -> {:p} (block size {need})",
                ptr
            );
            ptr
        }
    }

    /// Walks the list from the head and returns the first free block whose
    /// size is at least `need`, or null if none exists.
    fn find_free_block(&self, need: usize) -> *mut BlockHeader {
        let mut current = self.head;
        // SAFETY: every block reachable from `self.head` is a live header;
        // the list is null-terminated at the tail.
        unsafe {
            while !current.is_null() {
                if !(*current).allocated && (*current).size >= need {
                    return current;
                }
                current = (*current).next;
            }
        }
        block::null_header()
    }

    /// Marks `block` allocated for `need` bytes, splitting off a new free
    /// block from the remainder when that remainder is worth keeping.
    ///
    /// # Safety
    /// `block` must be a live, currently-free header with `size >= need`.
    unsafe fn allocate_from(&mut self, block: *mut BlockHeader, need: usize) {
        let orig_size = (*block).size;

        if orig_size >= need + HEADER_SIZE + MIN_BLOCK_SIZE {
            (*block).allocated = true;
            (*block).size = need;

            let new_block = block::header_at((block as *mut u8).add(HEADER_SIZE + need));
            (*new_block).size = orig_size - need - HEADER_SIZE;
            (*new_block).allocated = false;
            block::splice_after(block, new_block);
        } else {
            // Remainder too small to be its own block: accept the internal
            // fragmentation and hand over the whole block.
            (*block).allocated = true;
        }
    }

    /// Frees a previously allocated client pointer. `null` is a no-op.
    ///
    /// Passing a pointer not produced by this heap, or freeing a pointer
    /// twice, is undefined behavior — the allocator does not validate
    /// provenance.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        // SAFETY: caller contract (see doc comment above) requires `ptr` to
        // be a live client pointer returned by this heap's `allocate` or
        // `reallocate`.
        unsafe {
            let block = block::block_from_client(ptr);
            (*block).allocated = false;
            log::debug!("heap: free({:p}), block size {}", ptr, (*block).size);
            self.coalesce(block);
        }
    }

    /// Merges `c` with a free predecessor and/or a free successor.
    ///
    /// Both merges reuse [`block::unlink`]: merging with the predecessor
    /// unlinks `c` itself (its neighbors splice together around it, which
    /// is exactly "the predecessor absorbs `c`"); merging with the
    /// successor unlinks the successor the same way.
    ///
    /// # Safety
    /// `c` must be a live header, already marked free, currently linked
    /// into the list.
    unsafe fn coalesce(&mut self, mut c: *mut BlockHeader) -> *mut BlockHeader {
        let prev = (*c).prev;
        if !prev.is_null() && !(*prev).allocated {
            (*prev).size += (*c).size + HEADER_SIZE;
            block::unlink(c);
            c = prev;
        }

        let next = (*c).next;
        if !next.is_null() && !(*next).allocated {
            (*c).size += (*next).size + HEADER_SIZE;
            block::unlink(next);
        }

        c
    }

    /// Shrinks, expands in place, or relocates an allocated block.
    ///
    /// See the module-level contract in the crate's design notes for the
    /// full decision order; this mirrors it exactly.
    pub fn reallocate(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            if new_size == 0 {
                return ptr::null_mut();
            }
            return self.allocate(new_size);
        }

        if new_size == 0 {
            self.free(ptr);
            return ptr::null_mut();
        }

        // SAFETY: caller contract requires `ptr` to be a live client pointer
        // from this heap.
        let block = unsafe { block::block_from_client(ptr) };
        if unsafe { !(*block).allocated } {
            log::warn!("heap: reallocate({:p}, {new_size}) called on a free block", ptr);
            return ptr::null_mut();
        }

        let need = align_up(new_size, ALIGNMENT);
        let size = unsafe { (*block).size };

        if need <= size {
            unsafe { self.shrink_in_place(block, need) };
            log::debug!("heap: reallocate({:p}, {new_size}) shrunk in place", ptr);
            return ptr;
        }

        let next = unsafe { (*block).next };
        if !next.is_null() && unsafe { !(*next).allocated } {
            let avail = size + HEADER_SIZE + unsafe { (*next).size };
            if avail >= need {
                unsafe { self.expand_into_next(block, next, need, avail) };
                log::debug!(
                    "heap: reallocate({:p}, {new_size}) expanded into next block",
                    ptr
                );
                return ptr;
            }
        }

        if size >= need {
            // Defensive: `need <= size` above should already have caught
            // this, since `need` only grows by alignment rounding.
            return ptr;
        }

        let new_ptr = self.allocate(new_size);
        if new_ptr.is_null() {
            log::debug!(
                "heap: reallocate({:p}, {new_size}) could not relocate, out of memory",
                ptr
            );
            return ptr::null_mut();
        }

        // SAFETY: `new_ptr` was just allocated for at least `need` bytes;
        // `ptr`'s block still holds `size` valid payload bytes, and we copy
        // no more than the smaller of the two.
        unsafe {
            ptr::copy_nonoverlapping(ptr, new_ptr, size.min(need));
        }
        self.free(ptr);
        log::debug!("heap: reallocate({:p}, {new_size}) relocated to {:p}", ptr, new_ptr);
        new_ptr
    }

    /// Carves a free remainder off `block` when shrinking leaves at least
    /// `HEADER_SIZE + MIN_BLOCK_SIZE` bytes spare, then coalesces the new
    /// block forward if its successor is also free.
    ///
    /// # Safety
    /// `block` must be a live, allocated header with `(*block).size >= need`.
    unsafe fn shrink_in_place(&mut self, block: *mut BlockHeader, need: usize) {
        let size = (*block).size;
        let remainder = size - need;
        if remainder < HEADER_SIZE + MIN_BLOCK_SIZE {
            return;
        }

        let new_block = block::header_at((block as *mut u8).add(HEADER_SIZE + need));
        (*new_block).size = remainder - HEADER_SIZE;
        (*new_block).allocated = false;
        block::splice_after(block, new_block);
        (*block).size = need;

        self.coalesce(new_block);
    }

    /// Absorbs `next` (known free, known to provide enough capacity) into
    /// `block`, splitting off a new free tail when the absorbed capacity
    /// leaves enough remainder to be worth keeping as its own block.
    ///
    /// # Safety
    /// `block` and `next` must be live headers with `next == (*block).next`
    /// and `!(*next).allocated`; `avail` must equal
    /// `(*block).size + HEADER_SIZE + (*next).size`.
    unsafe fn expand_into_next(
        &mut self,
        block: *mut BlockHeader,
        next: *mut BlockHeader,
        need: usize,
        avail: usize,
    ) {
        block::unlink(next);

        if avail - need >= HEADER_SIZE + MIN_BLOCK_SIZE {
            (*block).size = need;
            let new_block = block::header_at((block as *mut u8).add(HEADER_SIZE + need));
            (*new_block).size = avail - need - HEADER_SIZE;
            (*new_block).allocated = false;
            block::splice_after(block, new_block);
        } else {
            (*block).size = avail;
        }
    }

    /// Counts allocated-to-free transitions across the block list and
    /// reports whether that count has reached [`NON_CONTIGUOUS_FREE_BLOCK_COUNT`].
    ///
    /// This is advisory only — no compaction runs here. A crossing is
    /// logged at `warn` once per edge (not once per call), so polling this
    /// method in a loop does not spam the log.
    pub fn fragmentation_threshold_reached(&self) -> bool {
        let mut transitions = 0usize;
        let mut prev_allocated = false;
        let mut current = self.head;
        let mut is_first = true;

        // SAFETY: every block reachable from `self.head` is a live header.
        unsafe {
            while !current.is_null() {
                let allocated = (*current).allocated;
                if !is_first && prev_allocated && !allocated {
                    transitions += 1;
                }
                prev_allocated = allocated;
                current = (*current).next;
                is_first = false;
            }
        }

        let reached = transitions >= NON_CONTIGUOUS_FREE_BLOCK_COUNT;
        if reached {
            if !self.frag_warned.replace(true) {
                log::warn!(
                    "heap: fragmentation threshold reached ({transitions} allocated->free transitions)"
                );
            }
        } else {
            self.frag_warned.set(false);
        }
        reached
    }

    /// Invokes `visitor(index, addr, size, allocated)` for each block in
    /// list order. Does not mutate heap state.
    pub fn enumerate(&self, mut visitor: impl FnMut(usize, usize, usize, bool)) {
        let mut index = 0;
        let mut current = self.head;
        // SAFETY: every block reachable from `self.head` is a live header.
        unsafe {
            while !current.is_null() {
                visitor(index, current as usize, (*current).size, (*current).allocated);
                current = (*current).next;
                index += 1;
            }
        }
    }

    /// Releases the pool back to the OS. All outstanding client pointers
    /// are invalidated the moment this returns; using them afterward is
    /// undefined behavior.
    pub fn destroy(mut self) -> Result<(), HeapError> {
        match self.pool.take() {
            Some(pool) => pool.release(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> Heap {
        Heap::init_with_size(4096).expect("pool acquisition should succeed in tests")
    }

    fn block_layout(h: &Heap) -> Vec<(usize, bool)> {
        let mut out = Vec::new();
        h.enumerate(|_, _, size, allocated| out.push((size, allocated)));
        out
    }

    #[test]
    fn init_produces_a_single_free_block() {
        let h = small_heap();
        assert_eq!(block_layout(&h), vec![(4096 - HEADER_SIZE, false)]);
    }

    #[test]
    fn allocate_zero_rounds_up_to_alignment() {
        let mut h = small_heap();
        let p = h.allocate(0);
        assert!(!p.is_null());
        assert_eq!((p as usize) % ALIGNMENT, 0);
        h.free(p);
    }

    #[test]
    fn allocate_and_free_restores_single_free_block() {
        let mut h = small_heap();
        let p = h.allocate(2001);
        assert!(!p.is_null());
        assert_eq!((p as usize) % ALIGNMENT, 0);
        h.free(p);
        assert_eq!(block_layout(&h), vec![(4096 - HEADER_SIZE, false)]);
    }

    #[test]
    fn free_middle_block_does_not_coalesce_allocated_neighbors() {
        let mut h = Heap::init_with_size(1 << 16).unwrap();
        let a = h.allocate(2001);
        let b = h.allocate(4320);
        let c = h.allocate(12312);
        assert!(!a.is_null() && !b.is_null() && !c.is_null());

        h.free(b);
        let layout = block_layout(&h);
        assert_eq!(layout[0], (align_up(2001, ALIGNMENT), true));
        assert_eq!(layout[1], (align_up(4320, ALIGNMENT), false));
        assert_eq!(layout[2], (align_up(12312, ALIGNMENT), true));
    }

    #[test]
    fn free_coalesces_with_both_free_neighbors() {
        let mut h = Heap::init_with_size(1 << 16).unwrap();
        let a = h.allocate(128);
        let b = h.allocate(128);
        let c = h.allocate(128);
        h.free(a);
        h.free(c);
        h.free(b);
        assert_eq!(block_layout(&h), vec![((1 << 16) - HEADER_SIZE, false)]);
    }

    #[test]
    fn out_of_memory_returns_null_without_corrupting_heap() {
        let mut h = small_heap();
        let p = h.allocate(1 << 20);
        assert!(p.is_null());

        let q = h.allocate(64);
        assert!(!q.is_null());
        h.free(q);
    }

    #[test]
    fn free_of_null_is_a_no_op() {
        let mut h = small_heap();
        h.free(ptr::null_mut());
        assert_eq!(block_layout(&h), vec![(4096 - HEADER_SIZE, false)]);
    }

    #[test]
    fn reallocate_shrink_splits_remainder() {
        let mut h = small_heap();
        let p = h.allocate(1024);
        let q = h.reallocate(p, 64);
        assert_eq!(q, p);

        let layout = block_layout(&h);
        assert_eq!(layout[0], (64, true));
        assert_eq!(layout[1].1, false);
        h.free(q);
    }

    #[test]
    fn reallocate_to_same_aligned_size_is_a_no_op() {
        let mut h = small_heap();
        let p = h.allocate(100);
        let q = h.reallocate(p, 100);
        assert_eq!(q, p);
        h.free(q);
    }

    #[test]
    fn reallocate_null_behaves_like_allocate() {
        let mut h = small_heap();
        let p = h.reallocate(ptr::null_mut(), 64);
        assert!(!p.is_null());
        h.free(p);
    }

    #[test]
    fn reallocate_to_zero_frees_and_returns_null() {
        let mut h = small_heap();
        let p = h.allocate(64);
        let q = h.reallocate(p, 0);
        assert!(q.is_null());
        assert_eq!(block_layout(&h), vec![(4096 - HEADER_SIZE, false)]);
    }

    #[test]
    fn reallocate_expands_into_free_next_block() {
        let mut h = Heap::init_with_size(1 << 16).unwrap();
        let a = h.allocate(128);
        let b = h.allocate(128);
        h.free(b);

        let grown = h.reallocate(a, 256);
        assert_eq!(grown, a);
        let layout = block_layout(&h);
        assert_eq!(layout[0], (align_up(256, ALIGNMENT), true));
    }

    #[test]
    fn reallocate_relocates_when_neighbor_cannot_cover_it() {
        let mut h = Heap::init_with_size(1 << 16).unwrap();
        let a = h.allocate(64);
        let b = h.allocate(64); // still allocated, so `a` cannot expand into it

        unsafe {
            ptr::write_bytes(a, 0xAB, 64);
        }
        let moved = h.reallocate(a, 4000);
        assert_ne!(moved, a, "a's neighbor is allocated, so growing to 4000 bytes must relocate");
        assert!(!moved.is_null());

        unsafe {
            for i in 0..64 {
                assert_eq!(*moved.add(i), 0xAB, "payload must survive relocation");
            }
        }
        h.free(moved);
        h.free(b);
    }

    #[test]
    fn reallocate_of_free_block_returns_null() {
        let mut h = small_heap();
        let p = h.allocate(64);
        h.free(p);
        let q = h.reallocate(p, 128);
        assert!(q.is_null());
    }

    #[test]
    fn fragmentation_probe_counts_allocated_to_free_transitions() {
        let mut h = Heap::init_with_size(1 << 16).unwrap();
        let mut ptrs = Vec::new();
        for _ in 0..12 {
            ptrs.push(h.allocate(64));
        }
        // Free every other block so each one is its own isolated free run,
        // bounded by still-allocated neighbors: 6 allocated->free edges.
        for (i, p) in ptrs.iter().enumerate() {
            if i % 2 == 1 {
                h.free(*p);
            }
        }
        assert!(h.fragmentation_threshold_reached());
    }

    #[test]
    fn destroy_releases_the_pool() {
        let h = small_heap();
        h.destroy().expect("releasing a freshly initialized pool should succeed");
    }
}
