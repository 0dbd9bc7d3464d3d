//! Free-list allocator: first-fit with coalescence over a resizable buffer.
//!
//! The free list is threaded through the buffer itself: each free run
//! begins with a [`FreeNode`] describing the run. Nodes address each other
//! by buffer offset rather than by pointer, so a relocating resize of the
//! backing buffer preserves the whole list without any rebasing walk.
//!
//! ## Invariants
//!
//! - Free runs are disjoint and strictly ascending by offset
//! - No two adjacent runs exist unmerged; coalescence is eager
//! - Every run is at least `size_of::<FreeNode>()` bytes
//! - The sum of free-run sizes plus the `padding + size` extents of live
//!   allocations equals the capacity exactly
//!
//! ## Memory layout
//!
//! ```text
//! [run0: FreeNode|...]--[pad|hdr][alloc]--[run1: FreeNode|......]--[end]
//!  ^head                                   ^run0.next
//! ```

use core::cell::Cell;

use crate::allocator::{
    handle_into_ptr, is_handle_in_range, ptr_into_handle, Handle, RawAllocator, Realloc,
    ReallocHandle, INVALID_HANDLE,
};
use crate::error::{AllocError, AllocResult};
use crate::platform;
use crate::utils::{is_in_range, mem_copy, normalize_align, padding_with_header};
use tracing::debug;

const MAX_CAPACITY: usize = (INVALID_HANDLE - 1) as usize;

/// Offset sentinel terminating the free list.
const NIL: u32 = u32::MAX;

/// Descriptor living in the first bytes of every free run.
///
/// `next` is the buffer offset of the next free run in ascending address
/// order, [`NIL`] at the tail.
#[derive(Clone, Copy)]
#[repr(C)]
struct FreeNode {
    next: u32,
    size: u32,
}

const NODE_SIZE: usize = core::mem::size_of::<FreeNode>();

/// Header preceding every live allocation. `padding` spans from the start
/// of the carved run to the user pointer and includes this header, so
/// `padding + size` is the exact extent the run returns to on free.
#[derive(Clone, Copy)]
#[repr(C)]
struct AllocHeader {
    size: u32,
    padding: u32,
}

const HEADER_SIZE: usize = core::mem::size_of::<AllocHeader>();

/// Configuration for [`FreeListAllocator`].
#[derive(Debug, Clone, Copy)]
pub struct FreeListConfig {
    /// Whether the backing buffer doubles when no free run fits. A
    /// non-resizable list fails the allocation instead.
    pub resizable: bool,
}

impl Default for FreeListConfig {
    fn default() -> Self {
        Self { resizable: true }
    }
}

/// First-fit free-list allocator.
///
/// Free runs are kept sorted by address and adjacent runs are merged
/// eagerly, both on `free` and when a resize appends fresh space at the
/// tail. Reallocation moves the payload internally (allocate, copy, free),
/// so its `must_memcpy` is always `false`.
pub struct FreeListAllocator {
    buffer: Cell<*mut u8>,
    capacity: Cell<usize>,
    head: Cell<u32>,
    config: FreeListConfig,
}

impl FreeListAllocator {
    /// Capacity used by [`new`](Self::new).
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Smallest byte count an allocation is clamped up to; a freed run must
    /// be able to hold its own [`FreeNode`].
    pub const MIN_ALLOC_SIZE: usize = NODE_SIZE;

    /// Creates a resizable free list with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY).expect("default capacity is valid")
    }

    /// Creates a resizable free list with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> AllocResult<Self> {
        Self::with_config(capacity, FreeListConfig::default())
    }

    /// Creates a free list with explicit configuration.
    pub fn with_config(capacity: usize, config: FreeListConfig) -> AllocResult<Self> {
        if capacity == 0 {
            return Err(AllocError::ZeroCapacity);
        }
        if capacity < NODE_SIZE {
            return Err(AllocError::CapacityTooSmall { requested: capacity, min: NODE_SIZE });
        }
        if capacity > MAX_CAPACITY {
            return Err(AllocError::CapacityTooLarge { requested: capacity, max: MAX_CAPACITY });
        }

        let list = Self {
            buffer: Cell::new(platform::mem_alloc(capacity, crate::utils::WORD_ALIGN)),
            capacity: Cell::new(capacity),
            head: Cell::new(NIL),
            config,
        };
        // SAFETY: freshly constructed, nothing outstanding to invalidate.
        unsafe { list.clear() };
        Ok(list)
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

    /// Sum of the sizes of all free runs.
    pub fn free_bytes(&self) -> usize {
        let mut total = 0usize;
        let mut curr = self.head.get();
        while curr != NIL {
            // SAFETY: curr came from the list, which only holds valid runs.
            let node = unsafe { self.read_node(curr) };
            total += node.size as usize;
            curr = node.next;
        }
        total
    }

    /// Number of free runs currently on the list.
    pub fn free_run_count(&self) -> usize {
        let mut count = 0usize;
        let mut curr = self.head.get();
        while curr != NIL {
            count += 1;
            // SAFETY: curr came from the list, which only holds valid runs.
            curr = unsafe { self.read_node(curr) }.next;
        }
        count
    }

    /// Free runs as `(offset, size)` pairs in address order.
    pub fn free_runs(&self) -> Vec<(u32, u32)> {
        let mut runs = Vec::new();
        let mut curr = self.head.get();
        while curr != NIL {
            // SAFETY: curr came from the list, which only holds valid runs.
            let node = unsafe { self.read_node(curr) };
            runs.push((curr, node.size));
            curr = node.next;
        }
        runs
    }

    /// # Safety
    ///
    /// `offset + NODE_SIZE` must be within the buffer.
    unsafe fn read_node(&self, offset: u32) -> FreeNode {
        // Run starts are not word-aligned in general, hence unaligned reads.
        unsafe { self.buffer.get().add(offset as usize).cast::<FreeNode>().read_unaligned() }
    }

    /// # Safety
    ///
    /// `offset + NODE_SIZE` must be within the buffer.
    unsafe fn write_node(&self, offset: u32, node: FreeNode) {
        unsafe {
            self.buffer.get().add(offset as usize).cast::<FreeNode>().write_unaligned(node);
        }
    }

    /// First-fit walk. Returns `(prev, node, padding)` of the first run that
    /// can hold `size` plus the header padding computed for its address.
    fn find_fit(&self, size: usize, align: usize) -> Option<(u32, u32, usize)> {
        let mut prev = NIL;
        let mut curr = self.head.get();

        while curr != NIL {
            // SAFETY: list offsets always point at valid runs.
            let node = unsafe { self.read_node(curr) };
            let addr = self.buffer.get() as usize + curr as usize;
            let padding = padding_with_header(addr, align, HEADER_SIZE);

            if node.size as usize >= size + padding {
                return Some((prev, curr, padding));
            }

            prev = curr;
            curr = node.next;
        }

        None
    }

    /// Doubles the buffer and splices the fresh tail space into the list.
    fn resize(&self, new_capacity: usize) {
        let old_capacity = self.capacity.get();
        debug_assert!(new_capacity > old_capacity);
        assert!(new_capacity <= MAX_CAPACITY, "free list exceeded handle range");
        debug!(old_capacity, new_capacity, "free list resizing backing buffer");

        // Offsets survive the move; only the base pointer changes.
        // SAFETY: buffer is the live block owned by this allocator.
        let grown = unsafe { platform::mem_realloc(self.buffer.get(), new_capacity) };
        self.buffer.set(grown);

        let tail_offset = old_capacity as u32;
        let tail_size = (new_capacity - old_capacity) as u32;
        self.capacity.set(new_capacity);

        if self.head.get() == NIL {
            // SAFETY: tail node lies within the grown buffer.
            unsafe { self.write_node(tail_offset, FreeNode { next: NIL, size: tail_size }) };
            self.head.set(tail_offset);
            return;
        }

        // Find the last run; the list is address-sorted so it is nearest to
        // the appended space.
        let mut last = self.head.get();
        loop {
            // SAFETY: list offsets always point at valid runs.
            let node = unsafe { self.read_node(last) };
            if node.next == NIL {
                break;
            }
            last = node.next;
        }

        // SAFETY: last is a valid run; tail node lies within the buffer.
        unsafe {
            let mut last_node = self.read_node(last);
            if last + last_node.size == tail_offset {
                // The appended space extends the final free run.
                last_node.size += tail_size;
                self.write_node(last, last_node);
            } else {
                last_node.next = tail_offset;
                self.write_node(last, last_node);
                self.write_node(tail_offset, FreeNode { next: NIL, size: tail_size });
            }
        }
    }
}

impl Default for FreeListAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FreeListAllocator {
    fn drop(&mut self) {
        // SAFETY: buffer is owned by this allocator and freed exactly once.
        unsafe { platform::mem_free(self.buffer.get()) };
        self.buffer.set(core::ptr::null_mut());
    }
}

// SAFETY: carved runs are disjoint by construction of the free list; the
// returned addresses honor the requested alignment via the header padding,
// and handles are plain offsets from the buffer base.
unsafe impl RawAllocator for FreeListAllocator {
    const USES_HANDLES: bool = true;

    fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        let size = size.max(Self::MIN_ALLOC_SIZE);
        let align = normalize_align(align);

        loop {
            let Some((prev, curr, padding)) = self.find_fit(size, align) else {
                if !self.config.resizable {
                    return core::ptr::null_mut();
                }
                self.resize(self.capacity.get() * 2);
                continue;
            };

            // SAFETY: find_fit only yields offsets from the list.
            let node = unsafe { self.read_node(curr) };
            let required = size + padding;
            let remaining = node.size as usize - required;

            let (successor, user_size) = if remaining >= NODE_SIZE + Self::MIN_ALLOC_SIZE {
                // Split: the remainder becomes a fresh run right behind the
                // carved allocation.
                let split_offset = curr + required as u32;
                // SAFETY: split_offset + NODE_SIZE lies inside the old run.
                unsafe {
                    self.write_node(
                        split_offset,
                        FreeNode { next: node.next, size: remaining as u32 },
                    );
                }
                (split_offset, size)
            } else {
                // Too small to split: fold the slack into the allocation so
                // free() returns the whole run and accounting stays exact.
                (node.next, node.size as usize - padding)
            };

            if prev == NIL {
                self.head.set(successor);
            } else {
                // SAFETY: prev is a valid run preceding curr.
                unsafe {
                    let mut prev_node = self.read_node(prev);
                    prev_node.next = successor;
                    self.write_node(prev, prev_node);
                }
            }

            // SAFETY: header lands inside the padding, which is inside the
            // carved run.
            unsafe {
                self.buffer
                    .get()
                    .add(curr as usize + padding - HEADER_SIZE)
                    .cast::<AllocHeader>()
                    .write_unaligned(AllocHeader {
                        size: user_size as u32,
                        padding: padding as u32,
                    });
                return self.buffer.get().add(curr as usize + padding);
            }
        }
    }

    fn allocate_handle(&self, size: usize, align: usize) -> Handle {
        let ptr = self.allocate(size, align);
        if ptr.is_null() {
            return INVALID_HANDLE;
        }
        ptr_into_handle(ptr, self.buffer.get())
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize, align: usize) -> Realloc {
        if ptr.is_null() {
            return Realloc { ptr: self.allocate(new_size, align), must_memcpy: false };
        }
        if !is_in_range(self.buffer.get(), self.capacity.get(), ptr) {
            return Realloc { ptr: core::ptr::null_mut(), must_memcpy: false };
        }

        // Capture offset and header before anything can move the buffer.
        let old_offset = ptr_into_handle(ptr, self.buffer.get());
        // SAFETY: live allocation carries its header in the padding.
        let header = unsafe {
            ptr.sub(HEADER_SIZE).cast::<AllocHeader>().read_unaligned()
        };

        // Shrink stays in place; the block keeps its recorded extent so the
        // run accounting is unchanged.
        if new_size <= header.size as usize {
            return Realloc { ptr, must_memcpy: false };
        }

        let new_ptr = self.allocate(new_size, align);
        if new_ptr.is_null() {
            return Realloc { ptr: core::ptr::null_mut(), must_memcpy: false };
        }

        // The allocation may have resized the buffer; re-resolve the old
        // block through its offset.
        let old_ptr = handle_into_ptr(old_offset, self.buffer.get());
        // SAFETY: both blocks are live and disjoint; header.size bytes were
        // valid in the old block and fit in the new one.
        unsafe {
            mem_copy(new_ptr, old_ptr, header.size as usize);
            self.free(old_ptr);
        }

        Realloc { ptr: new_ptr, must_memcpy: false }
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

        // SAFETY: live allocation carries its header in the padding.
        let header = unsafe {
            ptr.sub(HEADER_SIZE).cast::<AllocHeader>().read_unaligned()
        };
        let ptr_offset = ptr_into_handle(ptr, self.buffer.get());
        let node_offset = ptr_offset - header.padding;
        let node_size = header.padding + header.size;

        // Sorted insert: find the first run past the reconstituted one.
        let mut prev = NIL;
        let mut curr = self.head.get();
        while curr != NIL && curr < node_offset {
            // SAFETY: list offsets always point at valid runs.
            prev = curr;
            curr = unsafe { self.read_node(curr) }.next;
        }
        debug_assert!(curr != node_offset, "double free of a free-list block");

        // SAFETY: the reconstituted run spans padding + size live bytes.
        unsafe {
            self.write_node(node_offset, FreeNode { next: curr, size: node_size });
        }
        if prev == NIL {
            self.head.set(node_offset);
        } else {
            // SAFETY: prev is a valid run before node_offset.
            unsafe {
                let mut prev_node = self.read_node(prev);
                prev_node.next = node_offset;
                self.write_node(prev, prev_node);
            }
        }

        // Coalesce with the successor, then with the predecessor.
        // SAFETY: all three offsets address valid runs on the list.
        unsafe {
            let mut node = self.read_node(node_offset);
            if node.next != NIL && node_offset + node.size == node.next {
                let successor = self.read_node(node.next);
                node.size += successor.size;
                node.next = successor.next;
                self.write_node(node_offset, node);
            }

            if prev != NIL {
                let mut prev_node = self.read_node(prev);
                if prev + prev_node.size == node_offset {
                    prev_node.size += node.size;
                    prev_node.next = node.next;
                    self.write_node(prev, prev_node);
                }
            }
        }
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
        let capacity = self.capacity.get();
        // SAFETY: the buffer always holds at least one node (checked at
        // construction).
        unsafe { self.write_node(0, FreeNode { next: NIL, size: capacity as u32 }) };
        self.head.set(0);
    }
}
