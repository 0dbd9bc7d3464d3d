//! Linear (bump) allocator over a growable buffer.
//!
//! ## Invariants
//!
//! - `0 <= count <= capacity`
//! - The cursor only moves forward between clears; freed bytes are never
//!   reclaimed individually
//! - Growth doubles the capacity until the request fits, relocating the
//!   buffer; handles survive the move, raw pointers do not

use core::cell::Cell;

use crate::allocator::{
    handle_into_ptr, is_handle_in_range, ptr_into_handle, Handle, RawAllocator, Realloc,
    ReallocHandle, INVALID_HANDLE,
};
use crate::error::{AllocError, AllocResult};
use crate::platform;
use crate::utils::{is_in_range, normalize_align, padding_for};
use tracing::debug;

/// Largest capacity a 32-bit handle can address.
const MAX_CAPACITY: usize = (INVALID_HANDLE - 1) as usize;

/// Monotonic bump allocator.
///
/// Each allocation takes the next aligned slot; individual `free` is a
/// no-op and `reallocate` is always a fresh allocation with
/// `must_memcpy = true`. The buffer doubles when a request does not fit,
/// which relocates it; raw pointers into a grown linear allocator are
/// invalidated, so callers either size it up front or address it through
/// handles.
#[derive(Debug)]
pub struct LinearAllocator {
    buffer: Cell<*mut u8>,
    capacity: Cell<usize>,
    count: Cell<usize>,
    peak_count: Cell<usize>,
}

impl LinearAllocator {
    /// Capacity used when growing from an empty buffer.
    pub const DEFAULT_INIT_CAPACITY: usize = 1024;

    /// Creates an allocator sized to ten pages.
    pub fn new() -> Self {
        let capacity = platform::page_size() * 10;
        Self {
            buffer: Cell::new(platform::mem_alloc(capacity, crate::utils::WORD_ALIGN)),
            capacity: Cell::new(capacity),
            count: Cell::new(0),
            peak_count: Cell::new(0),
        }
    }

    /// Creates an allocator with an explicit starting capacity.
    pub fn with_capacity(capacity: usize) -> AllocResult<Self> {
        if capacity == 0 {
            return Err(AllocError::ZeroCapacity);
        }
        if capacity > MAX_CAPACITY {
            return Err(AllocError::CapacityTooLarge { requested: capacity, max: MAX_CAPACITY });
        }
        Ok(Self {
            buffer: Cell::new(platform::mem_alloc(capacity, crate::utils::WORD_ALIGN)),
            capacity: Cell::new(capacity),
            count: Cell::new(0),
            peak_count: Cell::new(0),
        })
    }

    /// Bytes consumed so far, padding included.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.get()
    }

    /// Highest byte count reached since construction or the last clear.
    #[inline]
    pub fn peak_count(&self) -> usize {
        self.peak_count.get()
    }

    /// Total capacity of the backing buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Base address of the backing buffer.
    ///
    /// Valid only until the next growth; meant for range checks, not for
    /// dereferencing.
    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.buffer.get()
    }

    fn resize(&self, new_capacity: usize) {
        debug!(
            old_capacity = self.capacity.get(),
            new_capacity, "linear allocator resizing backing buffer"
        );
        // SAFETY: buffer is the live block owned by this allocator.
        let grown = unsafe { platform::mem_realloc(self.buffer.get(), new_capacity) };
        self.buffer.set(grown);
        self.capacity.set(new_capacity);
    }

    /// Grows until `count + padding + size` fits, doubling each step.
    fn grow_for(&self, needed: usize) {
        let capacity = self.capacity.get();
        let mut new_capacity =
            if capacity == 0 { Self::DEFAULT_INIT_CAPACITY } else { capacity * 2 };
        while needed > new_capacity {
            new_capacity *= 2;
        }
        assert!(new_capacity <= MAX_CAPACITY, "linear allocator exceeded handle range");
        self.resize(new_capacity);
    }
}

impl Default for LinearAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LinearAllocator {
    fn drop(&mut self) {
        // SAFETY: buffer is owned by this allocator and freed exactly once.
        unsafe { platform::mem_free(self.buffer.get()) };
        self.buffer.set(core::ptr::null_mut());
    }
}

// SAFETY: bump allocation hands out disjoint, aligned slices of the owned
// buffer; handles are plain offsets from its base.
unsafe impl RawAllocator for LinearAllocator {
    const USES_HANDLES: bool = true;

    fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        let align = normalize_align(align);

        loop {
            let count = self.count.get();
            let addr = self.buffer.get() as usize + count;
            let padding = padding_for(addr, align);

            if count + padding + size > self.capacity.get() {
                // Growth moves the buffer, which can change the residue the
                // padding was computed against; recompute on the next pass.
                self.grow_for(count + padding + size);
                continue;
            }

            let ptr = handle_into_ptr((count + padding) as Handle, self.buffer.get());
            self.count.set(count + padding + size);
            self.peak_count.set(self.peak_count.get().max(count + padding + size));
            return ptr;
        }
    }

    fn allocate_handle(&self, size: usize, align: usize) -> Handle {
        ptr_into_handle(self.allocate(size, align), self.buffer.get())
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize, align: usize) -> Realloc {
        if ptr.is_null() {
            return Realloc { ptr: self.allocate(new_size, align), must_memcpy: true };
        }
        if !is_in_range(self.buffer.get(), self.capacity.get(), ptr) {
            return Realloc { ptr: core::ptr::null_mut(), must_memcpy: true };
        }
        // The old bytes linger until `clear`; the caller copies them over.
        Realloc { ptr: self.allocate(new_size, align), must_memcpy: true }
    }

    unsafe fn reallocate_handle(
        &self,
        handle: Handle,
        new_size: usize,
        align: usize,
    ) -> ReallocHandle {
        if handle == INVALID_HANDLE {
            return ReallocHandle { handle: self.allocate_handle(new_size, align), must_memcpy: true };
        }
        if !is_handle_in_range(self.buffer.get(), self.capacity.get(), handle) {
            return ReallocHandle { handle: INVALID_HANDLE, must_memcpy: true };
        }
        ReallocHandle { handle: self.allocate_handle(new_size, align), must_memcpy: true }
    }

    fn handle_to_ptr(&self, handle: Handle) -> *mut u8 {
        if !is_handle_in_range(self.buffer.get(), self.capacity.get(), handle) {
            return core::ptr::null_mut();
        }
        handle_into_ptr(handle, self.buffer.get())
    }

    fn ptr_to_handle(&self, ptr: *mut u8) -> Handle {
        if ptr.is_null() || !is_in_range(self.buffer.get(), self.capacity.get(), ptr) {
            return INVALID_HANDLE;
        }
        ptr_into_handle(ptr, self.buffer.get())
    }

    unsafe fn free(&self, _ptr: *mut u8) {
        // Individual deallocation is not supported; memory returns on clear.
    }

    unsafe fn free_handle(&self, _handle: Handle) {}

    unsafe fn clear(&self) {
        self.count.set(0);
        self.peak_count.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_moves_forward() {
        let alloc = LinearAllocator::with_capacity(256).expect("capacity is valid");
        let a = alloc.allocate(16, 8);
        let b = alloc.allocate(16, 8);
        assert!(!a.is_null() && !b.is_null());
        assert!((b as usize) > (a as usize));
        assert_eq!(alloc.count(), 32);
    }

    #[test]
    fn clear_rewinds_to_start() {
        let alloc = LinearAllocator::with_capacity(256).expect("capacity is valid");
        let first = alloc.allocate(64, 8);
        unsafe { alloc.clear() };
        assert_eq!(alloc.count(), 0);
        let again = alloc.allocate(64, 8);
        assert_eq!(first, again);
    }

    #[test]
    fn growth_keeps_handles_stable() {
        let alloc = LinearAllocator::with_capacity(64).expect("capacity is valid");
        let handle = alloc.allocate_handle(32, 8);
        unsafe { alloc.handle_to_ptr(handle).write_bytes(0xAB, 32) };

        // Force a relocating growth.
        let _big = alloc.allocate(1024, 8);

        let ptr = alloc.handle_to_ptr(handle);
        assert_eq!(unsafe { *ptr }, 0xAB);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(LinearAllocator::with_capacity(0).unwrap_err(), AllocError::ZeroCapacity);
    }
}
