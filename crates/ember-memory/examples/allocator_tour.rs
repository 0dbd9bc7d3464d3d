//! A quick tour of the allocator family through the common contract.

use ember_memory::prelude::*;

fn main() -> AllocResult<()> {
    // General-purpose: a stateless front over the platform heap.
    let system = SystemAllocator::new();
    let block = system.allocate(256, 16);
    println!("system block at {block:p}");
    unsafe { system.free(block) };

    // Linear: monotonic bump, released all at once.
    let linear = LinearAllocator::with_capacity(4096)?;
    for _ in 0..8 {
        linear.allocate(100, 8);
    }
    println!(
        "linear used {} of {} bytes (peak {})",
        linear.count(),
        linear.capacity(),
        linear.peak_count()
    );
    unsafe { linear.clear() };

    // Stack: LIFO, the top allocation can be returned.
    let stack = StackAllocator::with_capacity(4096)?;
    let a = stack.allocate(128, 8);
    let b = stack.allocate(128, 8);
    unsafe {
        stack.free(b);
        stack.free(a);
    }
    println!("stack drained back to {} bytes", stack.count());

    // Free list: individual frees, coalesced back into runs.
    let list = FreeListAllocator::with_capacity(2048)?;
    let x = list.allocate(200, 8);
    let y = list.allocate(200, 8);
    unsafe {
        list.free(x);
        list.free(y);
    }
    println!(
        "free list back to {} free bytes across {} run(s)",
        list.free_bytes(),
        list.free_run_count()
    );

    // Arena: region list, typed helpers, released en masse.
    let arena = ArenaAllocator::new();
    let greeting = arena.alloc_str("from the arena");
    let numbers = arena.alloc_slice(&[1u32, 2, 3, 4]);
    println!("arena says '{greeting}' with {numbers:?}");

    Ok(())
}
