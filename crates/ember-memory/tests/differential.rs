//! Differential tests: the containers over a relocating allocator must
//! agree with the standard library's containers on random operation
//! sequences.

use std::collections::HashMap as StdHashMap;

use ember_memory::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn sequence_matches_std_vec_on_random_ops() {
    let alloc = FreeListAllocator::with_capacity(512).expect("valid capacity");
    let mut seq: DynVec<u64, _> = DynVec::new(&alloc);
    let mut model: Vec<u64> = Vec::new();
    let mut rng = StdRng::seed_from_u64(0xD1FF);

    for step in 0..2000u64 {
        match rng.gen_range(0..10) {
            // Append dominates so the sequence keeps crossing growth
            // boundaries.
            0..=5 => {
                seq.append(step);
                model.push(step);
            }
            6 => {
                if !model.is_empty() {
                    seq.pop();
                    model.pop();
                }
            }
            7 => {
                if !model.is_empty() {
                    let index = rng.gen_range(0..model.len());
                    seq.remove_at(index);
                    model.remove(index);
                }
            }
            8 => {
                if !model.is_empty() {
                    let index = rng.gen_range(0..model.len());
                    seq.remove_unordered_at(index);
                    model.swap_remove(index);
                }
            }
            _ => {
                if !model.is_empty() {
                    let index = rng.gen_range(0..model.len());
                    assert_eq!(seq[index], model[index]);
                }
            }
        }

        assert_eq!(seq.len(), model.len());
    }

    assert_eq!(seq.as_slice(), model.as_slice());
}

#[test]
fn table_matches_std_hash_map_on_random_ops() {
    let alloc = FreeListAllocator::with_capacity(1024).expect("valid capacity");
    let mut table: HashTable<u32, u64, _> = HashTable::new(&alloc);
    let mut model: StdHashMap<u32, u64> = StdHashMap::new();
    let mut rng = StdRng::seed_from_u64(0xFACE);

    for step in 0..3000u64 {
        let key = rng.gen_range(0..500u32);
        match rng.gen_range(0..10) {
            0..=5 => {
                table.put(key, step);
                model.insert(key, step);
            }
            6..=7 => {
                assert_eq!(table.remove(&key), model.remove(&key).is_some());
            }
            _ => {
                assert_eq!(table.get(&key), model.get(&key));
            }
        }

        assert_eq!(table.len(), model.len());
    }

    // Full sweep at the end, both directions.
    for (key, value) in &model {
        assert_eq!(table.get(key), Some(value));
    }
    for (key, value) in table.iter() {
        assert_eq!(model.get(key), Some(value));
    }
}
