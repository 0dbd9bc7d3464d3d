//! General-purpose allocator: a stateless front over the platform heap.

use crate::allocator::{Handle, RawAllocator, Realloc, ReallocHandle, INVALID_HANDLE};
use crate::platform;

/// Thin wrapper over the platform heap.
///
/// Pointer mode only: there is no backing buffer to offset against, so every
/// handle operation is a programmer error: it traps under
/// `debug_assertions` and degrades to the sentinel in release builds.
///
/// `reallocate` always reports `must_memcpy = false` because the platform
/// `realloc` preserves the payload itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAllocator;

impl SystemAllocator {
    /// Creates a new system allocator. Zero-cost; the type carries no state.
    #[inline]
    pub const fn new() -> Self {
        SystemAllocator
    }
}

/// Process-wide default general-purpose allocator.
///
/// Containers that want the default heap take this explicitly; nothing in
/// the crate dispatches to it behind the caller's back.
#[inline]
pub fn global() -> &'static SystemAllocator {
    static GLOBAL: SystemAllocator = SystemAllocator::new();
    &GLOBAL
}

// SAFETY: delegates to the platform heap, which returns valid, aligned,
// disjoint blocks; handle operations are rejected with sentinels.
unsafe impl RawAllocator for SystemAllocator {
    const USES_HANDLES: bool = false;

    fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        platform::mem_alloc(size, align)
    }

    fn allocate_handle(&self, _size: usize, _align: usize) -> Handle {
        debug_assert!(false, "SystemAllocator does not support handle addressing");
        INVALID_HANDLE
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize, _align: usize) -> Realloc {
        // SAFETY: ptr is null or a live platform block per the trait contract.
        let grown = unsafe { platform::mem_realloc(ptr, new_size) };
        Realloc { ptr: grown, must_memcpy: false }
    }

    unsafe fn reallocate_handle(
        &self,
        _handle: Handle,
        _new_size: usize,
        _align: usize,
    ) -> ReallocHandle {
        debug_assert!(false, "SystemAllocator does not support handle addressing");
        ReallocHandle { handle: INVALID_HANDLE, must_memcpy: false }
    }

    fn handle_to_ptr(&self, _handle: Handle) -> *mut u8 {
        debug_assert!(false, "SystemAllocator does not support handle addressing");
        core::ptr::null_mut()
    }

    fn ptr_to_handle(&self, _ptr: *mut u8) -> Handle {
        debug_assert!(false, "SystemAllocator does not support handle addressing");
        INVALID_HANDLE
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: ptr is null or a live platform block per the trait contract.
        unsafe { platform::mem_free(ptr) };
    }

    unsafe fn free_handle(&self, _handle: Handle) {
        debug_assert!(false, "SystemAllocator does not support handle addressing");
    }

    unsafe fn clear(&self) {
        // Stateless; nothing to reset.
    }
}
