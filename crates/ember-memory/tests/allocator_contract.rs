//! Contract properties shared by the whole allocator family: alignment,
//! range, handle round-trips, and clear.

use ember_memory::prelude::*;
use ember_memory::utils::is_in_range;

fn check_alignment<A: RawAllocator>(alloc: &A) {
    for align in [8usize, 16, 32, 64] {
        for size in [1usize, 13, 100] {
            let ptr = alloc.allocate(size, align);
            assert!(!ptr.is_null(), "allocation of {size}B/{align} failed");
            assert_eq!(ptr as usize % align, 0, "misaligned {size}B/{align} block");
        }
    }
}

#[test]
fn alignment_holds_across_the_family() {
    check_alignment(&LinearAllocator::with_capacity(8192).expect("valid capacity"));
    check_alignment(&StackAllocator::with_capacity(8192).expect("valid capacity"));
    check_alignment(&FreeListAllocator::with_capacity(8192).expect("valid capacity"));
    check_alignment(&ArenaAllocator::new());
    check_alignment(&SystemAllocator::new());
}

#[test]
fn returned_blocks_stay_in_range() {
    let linear = LinearAllocator::with_capacity(4096).expect("valid capacity");
    let ptr = linear.allocate(128, 8);
    assert!(is_in_range(linear.base_ptr(), linear.capacity(), ptr));

    let stack = StackAllocator::with_capacity(4096).expect("valid capacity");
    let ptr = stack.allocate(128, 8);
    assert!(is_in_range(stack.base_ptr(), stack.capacity(), ptr));

    let list = FreeListAllocator::with_capacity(4096).expect("valid capacity");
    let ptr = list.allocate(128, 8);
    assert!(is_in_range(list.base_ptr(), list.capacity(), ptr));
}

fn check_handle_round_trip<A: RawAllocator>(alloc: &A) {
    let ptr = alloc.allocate(64, 8);
    let handle = alloc.ptr_to_handle(ptr);
    assert_ne!(handle, INVALID_HANDLE);
    assert_eq!(alloc.handle_to_ptr(handle), ptr);

    let handle = alloc.allocate_handle(64, 8);
    assert_ne!(handle, INVALID_HANDLE);
    assert_eq!(alloc.ptr_to_handle(alloc.handle_to_ptr(handle)), handle);
}

#[test]
fn handle_round_trips() {
    check_handle_round_trip(&LinearAllocator::with_capacity(4096).expect("valid capacity"));
    check_handle_round_trip(&StackAllocator::with_capacity(4096).expect("valid capacity"));
    check_handle_round_trip(&FreeListAllocator::with_capacity(4096).expect("valid capacity"));
}

#[test]
fn sentinel_handles_resolve_to_null() {
    let linear = LinearAllocator::with_capacity(4096).expect("valid capacity");
    assert!(linear.handle_to_ptr(INVALID_HANDLE).is_null());
    assert_eq!(linear.ptr_to_handle(core::ptr::null_mut()), INVALID_HANDLE);
}

#[test]
fn clear_returns_to_the_initial_state() {
    let linear = LinearAllocator::with_capacity(4096).expect("valid capacity");
    let first = linear.allocate(100, 8);
    let base = linear.base_ptr();
    unsafe { linear.clear() };
    assert_eq!(linear.count(), 0);
    let again = linear.allocate(100, 8);
    assert_eq!(first, again);
    assert!(is_in_range(base, linear.capacity(), again));

    let stack = StackAllocator::with_capacity(4096).expect("valid capacity");
    let first = stack.allocate(100, 8);
    unsafe { stack.clear() };
    assert_eq!(stack.count(), 0);
    assert_eq!(stack.prev_count(), 0);
    assert_eq!(stack.allocate(100, 8), first);

    let list = FreeListAllocator::with_capacity(4096).expect("valid capacity");
    let first = list.allocate(100, 8);
    unsafe { list.clear() };
    assert_eq!(list.free_bytes(), list.capacity());
    assert_eq!(list.free_run_count(), 1);
    assert_eq!(list.allocate(100, 8), first);
}

#[test]
fn foreign_pointers_are_ignored_by_free() {
    let list = FreeListAllocator::with_capacity(1024).expect("valid capacity");
    let stack = StackAllocator::with_capacity(1024).expect("valid capacity");

    let foreign = stack.allocate(64, 8);
    let before = list.free_bytes();
    unsafe { list.free(foreign) };
    assert_eq!(list.free_bytes(), before);

    unsafe { list.free(core::ptr::null_mut()) };
    unsafe { list.free_handle(INVALID_HANDLE) };
    assert_eq!(list.free_bytes(), before);
}

#[test]
fn system_allocator_serves_and_reclaims() {
    let system = SystemAllocator::new();
    let ptr = system.allocate(256, 16);
    assert!(!ptr.is_null());

    unsafe {
        ptr.write_bytes(0x5A, 256);
        assert_eq!(*ptr.add(255), 0x5A);
    }

    let realloc = unsafe { system.reallocate(ptr, 512, 16) };
    assert!(!realloc.ptr.is_null());
    // The platform realloc preserves the payload itself.
    assert!(!realloc.must_memcpy);
    unsafe { assert_eq!(*realloc.ptr, 0x5A) };

    unsafe { system.free(realloc.ptr) };
}

#[test]
fn constructors_validate_their_capacity() {
    assert!(matches!(
        LinearAllocator::with_capacity(0),
        Err(AllocError::ZeroCapacity)
    ));
    assert!(matches!(
        StackAllocator::with_capacity(0),
        Err(AllocError::ZeroCapacity)
    ));
    assert!(matches!(
        FreeListAllocator::with_capacity(4),
        Err(AllocError::CapacityTooSmall { .. })
    ));

    // Handles are 32-bit offsets; larger buffers are rejected up front.
    let oversized = u32::MAX as usize + 1;
    assert!(matches!(
        LinearAllocator::with_capacity(oversized),
        Err(AllocError::CapacityTooLarge { .. })
    ));
    assert!(matches!(
        StackAllocator::with_capacity(oversized),
        Err(AllocError::CapacityTooLarge { .. })
    ));
    assert!(matches!(
        FreeListAllocator::with_capacity(oversized),
        Err(AllocError::CapacityTooLarge { .. })
    ));
}

#[test]
fn global_accessor_returns_the_same_allocator() {
    let a = global() as *const SystemAllocator;
    let b = global() as *const SystemAllocator;
    assert_eq!(a, b);
}
