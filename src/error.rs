//! Error types for pool operations.
//!
//! The allocator reports failures in-band: every fallible public operation
//! returns [`MemoryResult`]. There is no global error state.

use thiserror::Error;

/// Failure modes of the pool runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum MemoryError {
    /// The system allocator refused a node block of the given size.
    #[error("system allocator refused {size} bytes for a pool node")]
    OutOfMemory {
        /// Node block size that was requested.
        size: usize,
    },

    /// Handle tag validation failed: the pool (or one of its ancestors)
    /// has been destroyed, or the handle was never valid.
    #[error("pool handle is stale or was never valid")]
    StaleHandle,

    /// `alloc_multi` was called on a handle that does not own a dispatch
    /// table (only the first pool of a `create_multi` group does).
    #[error("handle does not refer to a multi-size pool")]
    NotMultiSize,

    /// An operation that needs the global runtime ran before `init` or
    /// after the final `finalize`.
    #[error("pool runtime is not initialized")]
    NotInitialized,

    /// `create_multi` was called with an empty size-class list.
    #[error("multi-size pool needs at least one size class")]
    EmptySizeClasses,

    /// Deriving slice or node sizes from the requested object size
    /// overflowed `usize`.
    #[error("object size {size} overflows pool geometry")]
    SizeOverflow {
        /// Requested object size.
        size: usize,
    },
}

impl MemoryError {
    /// True for failures the caller can recover from by freeing memory
    /// and retrying.
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, MemoryError::OutOfMemory { .. })
    }

    /// True for use-after-destroy detections.
    pub const fn is_stale(&self) -> bool {
        matches!(self, MemoryError::StaleHandle)
    }
}

/// Result type for pool operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
