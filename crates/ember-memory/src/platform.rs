//! Platform heap boundary.
//!
//! Every backing buffer in the crate is acquired and released through these
//! three calls. Out-of-memory is not recoverable at this layer: it is
//! logged and terminates the process, so callers never observe it as a
//! value.

use once_cell::sync::Lazy;
use tracing::error;

/// Alignment `malloc` already guarantees on every supported target.
const MALLOC_ALIGN: usize = 16;

/// Allocates `size` bytes aligned to `align`.
///
/// `align` below the `malloc` guarantee is served by plain `malloc`;
/// stricter alignments go through `posix_memalign`. The returned block is
/// released with [`mem_free`] regardless of which path produced it.
pub fn mem_alloc(size: usize, align: usize) -> *mut u8 {
    let size = size.max(1);

    let ptr = if align <= MALLOC_ALIGN {
        // SAFETY: malloc with a non-zero size; null is handled below.
        unsafe { libc::malloc(size) }
    } else {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let mut ptr: *mut libc::c_void = core::ptr::null_mut();
        // SAFETY: align is a power of two >= sizeof(void*), out-pointer is valid.
        let rc = unsafe { libc::posix_memalign(&mut ptr, align.max(core::mem::size_of::<usize>()), size) };
        if rc != 0 {
            ptr = core::ptr::null_mut();
        }
        ptr
    };

    if ptr.is_null() {
        fatal_oom(size, align);
    }
    ptr.cast()
}

/// Grows or shrinks a heap block, preserving its contents.
///
/// A null `ptr` behaves like [`mem_alloc`]. The block may move; the caller
/// is responsible for rebasing anything that pointed into it. Alignment of
/// the returned block is the `malloc` guarantee, so blocks that need
/// stricter alignment must not be resized through this call.
///
/// # Safety
///
/// `ptr` must be null or a block returned by [`mem_alloc`] with an
/// alignment within the `malloc` guarantee, not yet freed.
pub unsafe fn mem_realloc(ptr: *mut u8, new_size: usize) -> *mut u8 {
    let new_size = new_size.max(1);
    // SAFETY: per the caller contract ptr is a live malloc-family block.
    let grown = unsafe { libc::realloc(ptr.cast(), new_size) };
    if grown.is_null() {
        fatal_oom(new_size, MALLOC_ALIGN);
    }
    grown.cast()
}

/// Releases a block obtained from [`mem_alloc`] or [`mem_realloc`].
///
/// Null is accepted and ignored.
///
/// # Safety
///
/// `ptr` must be null or a live block from this module, freed at most once.
pub unsafe fn mem_free(ptr: *mut u8) {
    if !ptr.is_null() {
        // SAFETY: free accepts any live malloc-family pointer.
        unsafe { libc::free(ptr.cast()) };
    }
}

/// Size of a virtual-memory page on this machine.
pub fn page_size() -> usize {
    static PAGE_SIZE: Lazy<usize> = Lazy::new(|| {
        // SAFETY: sysconf is always safe to call.
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if raw > 0 { raw as usize } else { 4096 }
    });
    *PAGE_SIZE
}

#[cold]
fn fatal_oom(size: usize, align: usize) -> ! {
    error!(size, align, "platform heap is out of memory, terminating");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_sane() {
        let page = page_size();
        assert!(page >= 4096);
        assert!(page.is_power_of_two());
    }

    #[test]
    fn aligned_allocation_round_trip() {
        for align in [8usize, 16, 64, 256] {
            let ptr = mem_alloc(128, align);
            assert_eq!(ptr as usize % align, 0);
            unsafe { mem_free(ptr) };
        }
    }
}
