//! A human-readable dump of a heap's block list, built entirely on top of
//! [`Heap::enumerate`] — it has no access to block internals of its own.

use std::fmt::Write as _;

use crate::heap::Heap;

/// Renders the heap's block list as a multi-line string: one line per
/// block, in address order, showing its index, address, payload size, and
/// allocation state.
///
/// Intended for logging and the demonstration driver, not for parsing.
pub fn render(heap: &Heap) -> String {
    let mut out = String::new();
    heap.enumerate(|index, addr, size, allocated| {
        let state = if allocated { "allocated" } else { "free" };
        let _ = writeln!(out, "#{index:<3} 0x{addr:012x}  {size:>8} bytes  {state}");
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_one_line_per_block() {
        let mut h = Heap::init_with_size(4096).unwrap();
        let p = h.allocate(64);
        let text = render(&h);
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().contains("allocated"));
        h.free(p);
    }
}
