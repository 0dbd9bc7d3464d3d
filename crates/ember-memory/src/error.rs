//! Error types for allocator construction and validation.
//!
//! Only the cold, fallible surface returns `Result`: constructors that
//! validate a requested capacity, and arena snapshot validation. The hot
//! allocation paths follow the allocator contract instead and fail with a
//! null pointer or [`INVALID_HANDLE`](crate::allocator::INVALID_HANDLE).

use thiserror::Error;

/// Result type for fallible allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors surfaced by allocator constructors and validation paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A backing buffer cannot be empty.
    #[error("capacity cannot be zero")]
    ZeroCapacity,

    /// The buffer is too small to hold the allocator's own bookkeeping.
    #[error("capacity {requested} is below the minimum of {min} bytes")]
    CapacityTooSmall {
        /// Requested capacity in bytes.
        requested: usize,
        /// Smallest workable capacity.
        min: usize,
    },

    /// Handles are 32-bit byte offsets; the buffer must stay addressable.
    #[error("capacity {requested} exceeds the handle-addressable range of {max} bytes")]
    CapacityTooLarge {
        /// Requested capacity in bytes.
        requested: usize,
        /// Largest capacity a handle can address.
        max: usize,
    },

    /// A handle operation was invoked on a pointer-only allocator.
    #[error("{allocator} does not support handle addressing")]
    HandleModeUnsupported {
        /// Name of the offending allocator.
        allocator: &'static str,
    },

    /// A snapshot refers to a region this arena does not have.
    #[error("snapshot region {region_index} is out of range ({region_count} regions)")]
    StaleSnapshot {
        /// Region index captured by the snapshot.
        region_index: u32,
        /// Number of regions currently held by the arena.
        region_count: u32,
    },
}
