//! Hierarchical fixed-size slice pools.
//!
//! ## Modules
//! - `config` - constants and per-pool geometry derivation
//! - `slice` - intrusive slice header layout
//! - `node` - node header layout
//! - `pool` - the engine: lists, nodes, auto-release, destruction
//! - `handle` - tagged handles, the public pool API
//! - `multi` - multi-size pool creation and dispatch
//! - `runtime` - process-wide root pool, global multi pool, init/finalize

pub mod config;
pub mod handle;
pub mod multi;
mod node;
mod pool;
pub mod runtime;
mod slice;

pub use config::{
    AUTO_RELEASE_THRESHOLD, DEFAULT_SIZE_CLASSES, MAX_SLICE_COUNT, MAX_SLICE_SIZE, OVERRANGE_UNIT,
};
pub use handle::PoolHandle;
pub use multi::alloc_multi;
pub use pool::{SliceCallback, allocated_size, free};
pub use runtime::{
    auto_release_threshold, finalize, init, occupied_bytes, set_auto_release_threshold,
};
