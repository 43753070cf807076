//! # slicepool
//!
//! Hierarchical fixed-size-block memory pools with tagged handles.
//!
//! Pools amortise the system allocator by carving node-sized blocks into
//! equally-sized slices, form a parent/child tree so destroying a pool
//! reclaims every descendant, and hand out generation-tagged handles
//! that detect use-after-destroy instead of dangling. A multi-size pool
//! dispatches variable-size requests across an ordered set of size
//! classes, growing oversize classes on demand.
//!
//! ```no_run
//! use slicepool::PoolHandle;
//!
//! slicepool::init()?;
//!
//! let mut pool = PoolHandle::create(None, 256)?;
//! let payload = pool.alloc()?;
//! assert_eq!(unsafe { slicepool::allocated_size(payload) }, 256);
//! unsafe { slicepool::free(payload) };
//!
//! pool.destroy();
//! slicepool::finalize();
//! # Ok::<(), slicepool::MemoryError>(())
//! ```

pub mod error;
pub mod pool;
mod sync;
pub mod utils;

pub use error::{MemoryError, MemoryResult};
pub use pool::{
    AUTO_RELEASE_THRESHOLD, DEFAULT_SIZE_CLASSES, MAX_SLICE_COUNT, MAX_SLICE_SIZE, OVERRANGE_UNIT,
    PoolHandle, SliceCallback, alloc_multi, allocated_size, auto_release_threshold, finalize, free,
    init, occupied_bytes, set_auto_release_threshold,
};
