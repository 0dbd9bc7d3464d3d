//! Containers over a relocating allocator: the free list's buffer moves
//! several times while the containers keep working through handles.

use ember_memory::prelude::*;

fn main() -> AllocResult<()> {
    // Deliberately tiny so growth relocates the buffer repeatedly.
    let alloc = FreeListAllocator::with_capacity(256)?;

    let mut ids: DynVec<u64, _> = DynVec::new(&alloc);
    let mut names: HashTable<u64, &str, _> = HashTable::new(&alloc);

    let catalog = [
        "amber", "basalt", "cinder", "dune", "ember", "flint", "granite",
        "hollow", "iris", "jasper",
    ];

    let mut base_moves = 0u32;
    let mut last_base = alloc.base_ptr();

    for (index, name) in catalog.iter().copied().cycle().take(200).enumerate() {
        let id = index as u64;
        ids.append(id);
        names.put(id, name);

        if alloc.base_ptr() != last_base {
            base_moves += 1;
            last_base = alloc.base_ptr();
        }
    }

    println!(
        "buffer relocated {base_moves} time(s); capacity is now {} bytes",
        alloc.capacity()
    );

    // Every element is still reachable after all the moves.
    assert_eq!(ids.len(), 200);
    for id in &ids {
        assert!(names.get(id).is_some());
    }

    let sample = ids[137];
    println!("entry {sample} is '{}'", names.get(&sample).expect("entry exists"));

    Ok(())
}
