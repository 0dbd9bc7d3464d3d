//! Stack allocator: LIFO discipline with a per-allocation header.
//!
//! # Safety
//!
//! This module implements a single-threaded LIFO allocator:
//! - State lives in `Cell`s behind `&self`, so containers can share it
//! - Every allocation is preceded by a `StackHeader` inside its padding
//! - Only the topmost allocation can be freed or resized in place
//! - Growth goes through the platform `realloc` and relocates the buffer
//!
//! ## Invariants
//!
//! - `prev_count <= count <= capacity`
//! - `prev_count` is the start offset of the topmost live allocation
//! - `header.diff` equals `count - prev_count` at allocation time, so the
//!   chain of headers can unwind `prev_count` one level per free
//! - The returned pointer is `alloc_start + header.padding` and the header
//!   sits in the last four bytes of that padding
//!
//! ## Memory layout
//!
//! ```text
//! [base]--[pad|hdr][alloc0]--[pad|hdr][alloc1]--[top]----[free]----[end]
//!          ^prev_count points at the start of the topmost allocation
//! ```

use core::cell::Cell;

use crate::allocator::{
    handle_into_ptr, is_handle_in_range, ptr_into_handle, Handle, RawAllocator, Realloc,
    ReallocHandle, INVALID_HANDLE,
};
use crate::error::{AllocError, AllocResult};
use crate::platform;
use crate::utils::{is_in_range, normalize_align, padding_with_header};
use tracing::debug;

const MAX_CAPACITY: usize = (INVALID_HANDLE - 1) as usize;

/// Header written immediately before every returned pointer.
///
/// `diff` is `count - prev_count` at allocation time, which is exactly what
/// `free` needs to restore `prev_count` when the top allocation is popped.
/// `padding` spans from the allocation start to the returned pointer and
/// always contains this header.
#[derive(Clone, Copy)]
#[repr(C)]
struct StackHeader {
    diff: u16,
    padding: u16,
}

const HEADER_SIZE: usize = core::mem::size_of::<StackHeader>();

/// Last-in-first-out allocator.
///
/// Only the topmost allocation can be freed or resized in place; freeing
/// anything deeper is silently ignored. Growth relocates the backing
/// buffer, so long-lived references go through handles.
pub struct StackAllocator {
    buffer: Cell<*mut u8>,
    capacity: Cell<usize>,
    count: Cell<usize>,
    prev_count: Cell<usize>,
    peak_count: Cell<usize>,
}

impl StackAllocator {
    /// Capacity used when growing from an empty buffer.
    pub const DEFAULT_INIT_CAPACITY: usize = 1024;

    /// Creates a stack allocator with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_INIT_CAPACITY).expect("default capacity is valid")
    }

    /// Creates a stack allocator with an explicit capacity.
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
            prev_count: Cell::new(0),
            peak_count: Cell::new(0),
        })
    }

    /// Bytes consumed so far, headers and padding included.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.get()
    }

    /// Offset of the header of the topmost live allocation.
    #[inline]
    pub fn prev_count(&self) -> usize {
        self.prev_count.get()
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

    /// Base address of the backing buffer, for range checks.
    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.buffer.get()
    }

    fn resize(&self, new_capacity: usize) {
        debug!(
            old_capacity = self.capacity.get(),
            new_capacity, "stack allocator resizing backing buffer"
        );
        // SAFETY: buffer is the live block owned by this allocator.
        let grown = unsafe { platform::mem_realloc(self.buffer.get(), new_capacity) };
        self.buffer.set(grown);
        self.capacity.set(new_capacity);
    }

    fn grow_for(&self, needed: usize) {
        let capacity = self.capacity.get();
        let doubled = if capacity == 0 { Self::DEFAULT_INIT_CAPACITY } else { capacity * 2 };
        let new_capacity = doubled.max(needed).next_power_of_two();
        assert!(new_capacity <= MAX_CAPACITY, "stack allocator exceeded handle range");
        self.resize(new_capacity);
    }

    /// Reads the header preceding `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live allocation from this stack.
    unsafe fn header_at(&self, ptr: *mut u8) -> StackHeader {
        // SAFETY: every allocation is preceded by its header within padding.
        unsafe { ptr.sub(HEADER_SIZE).cast::<StackHeader>().read_unaligned() }
    }
}

impl Default for StackAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StackAllocator {
    fn drop(&mut self) {
        // SAFETY: buffer is owned by this allocator and freed exactly once.
        unsafe { platform::mem_free(self.buffer.get()) };
        self.buffer.set(core::ptr::null_mut());
    }
}

// SAFETY: allocations are disjoint slices of the owned buffer; the header
// chain preserves LIFO integrity and handles are offsets from the base.
unsafe impl RawAllocator for StackAllocator {
    const USES_HANDLES: bool = true;

    fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        let align = normalize_align(align);

        loop {
            let count = self.count.get();
            let addr = self.buffer.get() as usize + count;
            let padding = padding_with_header(addr, align, HEADER_SIZE);

            if count + padding + size > self.capacity.get() {
                // The buffer may move; padding is recomputed on the retry.
                self.grow_for(count + padding + size);
                continue;
            }

            let prev_count = self.prev_count.get();
            debug_assert!(count - prev_count <= u16::MAX as usize);
            debug_assert!(padding <= u16::MAX as usize);

            let header = StackHeader {
                diff: (count - prev_count) as u16,
                padding: padding as u16,
            };
            // SAFETY: header lands inside the padding, which is in bounds.
            unsafe {
                self.buffer
                    .get()
                    .add(count + padding - HEADER_SIZE)
                    .cast::<StackHeader>()
                    .write_unaligned(header);
            }

            // SAFETY: count + padding is in bounds after the fit check.
            let ptr = unsafe { self.buffer.get().add(count + padding) };
            self.prev_count.set(count);
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
            return Realloc { ptr: self.allocate(new_size, align), must_memcpy: false };
        }
        if !is_in_range(self.buffer.get(), self.capacity.get(), ptr) {
            return Realloc { ptr: core::ptr::null_mut(), must_memcpy: false };
        }
        if new_size == 0 {
            // SAFETY: ptr is a live in-range allocation per the contract.
            unsafe { self.free(ptr) };
            return Realloc { ptr: core::ptr::null_mut(), must_memcpy: false };
        }

        // SAFETY: in-range live allocation, header precedes it.
        let header = unsafe { self.header_at(ptr) };
        let ptr_offset = ptr as usize - self.buffer.get() as usize;
        let alloc_start = ptr_offset - header.padding as usize;

        if alloc_start != self.prev_count.get() {
            // Interior block: cannot be freed, so a fresh block is handed
            // out and the caller moves the payload.
            return Realloc { ptr: self.allocate(new_size, align), must_memcpy: true };
        }

        let old_size = self.count.get() - ptr_offset;
        if new_size > old_size {
            let grow_by = new_size - old_size;
            if self.capacity.get() - self.count.get() < grow_by {
                self.grow_for(self.count.get() + grow_by);
            }
            self.count.set(self.count.get() + grow_by);
            self.peak_count.set(self.peak_count.get().max(self.count.get()));
            // Growth may have moved the buffer; hand back the rebased
            // address of the same offset.
            return Realloc {
                ptr: handle_into_ptr(ptr_offset as Handle, self.buffer.get()),
                must_memcpy: false,
            };
        }

        self.count.set(self.count.get() - (old_size - new_size));
        Realloc { ptr, must_memcpy: false }
    }

    unsafe fn reallocate_handle(
        &self,
        handle: Handle,
        new_size: usize,
        align: usize,
    ) -> ReallocHandle {
        if handle == INVALID_HANDLE {
            return ReallocHandle {
                handle: self.allocate_handle(new_size, align),
                must_memcpy: false,
            };
        }
        if !is_handle_in_range(self.buffer.get(), self.capacity.get(), handle) {
            return ReallocHandle { handle: INVALID_HANDLE, must_memcpy: false };
        }

        let ptr = handle_into_ptr(handle, self.buffer.get());
        // SAFETY: handle resolved against the current base; contract holds.
        let result = unsafe { self.reallocate(ptr, new_size, align) };
        ReallocHandle {
            handle: self.ptr_to_handle(result.ptr),
            must_memcpy: result.must_memcpy,
        }
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

    unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() || !is_in_range(self.buffer.get(), self.capacity.get(), ptr) {
            return;
        }

        // SAFETY: in-range allocation carries its header in the padding.
        let header = unsafe { self.header_at(ptr) };
        let ptr_offset = ptr as usize - self.buffer.get() as usize;
        let alloc_start = ptr_offset - header.padding as usize;

        // Only the top of the stack can be released.
        if alloc_start != self.prev_count.get() {
            return;
        }

        self.count.set(alloc_start);
        self.prev_count.set(alloc_start - header.diff as usize);
    }

    unsafe fn free_handle(&self, handle: Handle) {
        if handle == INVALID_HANDLE
            || !is_handle_in_range(self.buffer.get(), self.capacity.get(), handle)
        {
            return;
        }
        // SAFETY: handle resolves to a live in-range allocation.
        unsafe { self.free(handle_into_ptr(handle, self.buffer.get())) };
    }

    unsafe fn clear(&self) {
        self.count.set(0);
        self.prev_count.set(0);
        self.peak_count.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_free_restores_previous_top() {
        let alloc = StackAllocator::with_capacity(1024).expect("capacity is valid");
        let a = alloc.allocate(100, 8);
        let count_after_a = alloc.count();
        let b = alloc.allocate(100, 8);

        unsafe { alloc.free(b) };
        assert_eq!(alloc.count(), count_after_a);

        unsafe { alloc.free(a) };
        assert_eq!(alloc.count(), 0);
        assert_eq!(alloc.prev_count(), 0);
    }

    #[test]
    fn interior_free_is_ignored() {
        let alloc = StackAllocator::with_capacity(1024).expect("capacity is valid");
        let a = alloc.allocate(64, 8);
        let _b = alloc.allocate(64, 8);
        let count = alloc.count();

        unsafe { alloc.free(a) };
        assert_eq!(alloc.count(), count);
    }

    #[test]
    fn top_realloc_grows_in_place() {
        let alloc = StackAllocator::with_capacity(1024).expect("capacity is valid");
        let ptr = alloc.allocate(32, 8);
        let count = alloc.count();

        let result = unsafe { alloc.reallocate(ptr, 64, 8) };
        assert!(!result.must_memcpy);
        assert_eq!(result.ptr, ptr);
        assert_eq!(alloc.count(), count + 32);

        let result = unsafe { alloc.reallocate(ptr, 16, 8) };
        assert!(!result.must_memcpy);
        assert_eq!(alloc.count(), count - 16);
    }
}
