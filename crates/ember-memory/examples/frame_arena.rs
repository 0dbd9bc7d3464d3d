//! Per-frame scratch memory: persistent allocations below a snapshot,
//! frame-local allocations rewound every iteration.

use ember_memory::prelude::*;

struct Particle {
    position: [f32; 2],
    velocity: [f32; 2],
}

fn main() {
    let arena = ArenaAllocator::new();

    // Long-lived level data goes in first.
    let level_name = arena.alloc_str("canyon-07");
    let spawn_points = arena.alloc_slice(&[[0.0f32, 0.0], [10.0, 4.0], [-3.0, 9.0]]);

    // Everything after this point is scratch.
    let frame_start = arena.make_snapshot();

    for frame in 0..3u32 {
        let mut live = 0usize;
        for i in 0..256u32 {
            let particle = arena.alloc_value(Particle {
                position: [i as f32, frame as f32],
                velocity: [0.0, -9.8],
            });
            if particle.position[1] + particle.velocity[1] > -20.0 {
                live += 1;
            }
        }
        println!(
            "frame {frame}: {live} live particles, region offset {:?}",
            arena.region_offset(frame_start.region_index)
        );

        // Scratch vanishes; level data stays where it was.
        arena.rewind(frame_start).expect("snapshot belongs to this arena");
    }

    println!("level '{level_name}' keeps {} spawn points", spawn_points.len());
}
