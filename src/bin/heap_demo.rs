//! Exercises the allocator end to end: init, a run of allocations and
//! frees that leaves the pool fragmented, a reallocation in every
//! direction (shrink, expand, relocate), and a final teardown.
//!
//! Run with `RUST_LOG=debug` to see every allocator operation logged.

use firstfit_heap::Heap;

fn main() {
    env_logger::init();

    let mut heap = Heap::init_with_size(64 * 1024).expect("failed to reserve heap pool");
    println!("-- after init --\n{}", firstfit_heap::render(&heap));

    let mut blocks = Vec::new();
    for size in [128usize, 256, 64, 512, 96, 320, 48, 700, 80, 160, 240, 400] {
        let ptr = heap.allocate(size);
        assert!(!ptr.is_null(), "unexpected out-of-memory allocating {size} bytes");
        blocks.push(ptr);
    }

    for ptr in blocks.iter().step_by(2) {
        heap.free(*ptr);
    }
    println!("-- after freeing every other block --\n{}", firstfit_heap::render(&heap));
    println!(
        "fragmentation threshold reached: {}",
        heap.fragmentation_threshold_reached()
    );

    let survivor = blocks[1];
    let grown = heap.reallocate(survivor, 900);
    println!("-- after growing one survivor to 900 bytes --\n{}", firstfit_heap::render(&heap));

    let shrunk = heap.reallocate(grown, 32);
    println!("-- after shrinking it back to 32 bytes --\n{}", firstfit_heap::render(&heap));

    for (i, ptr) in blocks.iter().enumerate() {
        if i % 2 == 1 && *ptr != survivor {
            heap.free(*ptr);
        }
    }
    heap.free(shrunk);
    println!("-- after freeing the rest --\n{}", firstfit_heap::render(&heap));

    heap.destroy().expect("failed to release heap pool");
}
