//! Containers that obtain their storage through the allocator contract.
//!
//! Both containers address their element array either by raw pointer or by
//! handle, depending on the allocator they were built over: allocators whose
//! backing buffer can relocate advertise `USES_HANDLES`, and the containers
//! then re-resolve the array through the allocator on every operation rather
//! than trusting a cached address.

mod map;
mod vec;

pub use map::{DefaultHash, HashTable, MapConfig};
pub use vec::DynVec;

use crate::allocator::Handle;

/// Container storage: a raw pointer for allocators whose buffer never
/// moves, a handle for those that relocate. The variant is fixed for the
/// container's whole life by `A::USES_HANDLES`.
#[derive(Clone, Copy)]
pub(crate) enum Storage {
    Ptr(*mut u8),
    Handle(Handle),
}
