//! Process-wide state: the root pool, the global multi-size pool, the
//! occupation counter and the init/finalize reference count.
//!
//! The root pool parents every pool created with a `None` parent, so the
//! whole pool population forms one tree and the final `finalize` can
//! reclaim everything in a single post-order sweep. The reference count
//! lets unrelated subsystems init and finalize independently.

use core::mem;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::config::{AUTO_RELEASE_THRESHOLD, DEFAULT_SIZE_CLASSES, PoolGeometry};
use super::handle::PoolHandle;
use super::multi;
use super::pool::{self, MemPool};
use crate::error::{MemoryError, MemoryResult};
use crate::sync::{PoolMutex, SyncUnsafeCell};

/// Live init count. Teardown happens on the 1 -> 0 transition only.
static RUNTIME_REFS: AtomicUsize = AtomicUsize::new(0);

/// Bytes of node blocks currently held from the system, across all
/// pools. Updated under the relevant pool's lock but read without any
/// global coordination; it is a threshold input, not an exact figure.
static OCCUPIED: AtomicUsize = AtomicUsize::new(0);

/// Occupation level at which emptied nodes go straight back to the
/// system.
static AUTO_RELEASE_LIMIT: AtomicUsize = AtomicUsize::new(AUTO_RELEASE_THRESHOLD);

/// The root pool. Not backed by any slice; sized to store pool objects.
static ROOT: SyncUnsafeCell<MemPool> = SyncUnsafeCell::new(MemPool::unused());

/// Handle of the global multi-size pool.
struct HandleCell {
    lock: PoolMutex,
    cell: SyncUnsafeCell<PoolHandle>,
}

// SAFETY: the inner handle is only read or written under `lock`.
unsafe impl Sync for HandleCell {}

impl HandleCell {
    const fn new() -> Self {
        Self {
            lock: PoolMutex::new(),
            cell: SyncUnsafeCell::new(PoolHandle::INVALID),
        }
    }

    fn get(&self) -> PoolHandle {
        let _guard = self.lock.lock();
        // SAFETY: guarded by `lock`.
        unsafe { *self.cell.get() }
    }

    fn set_if_unset(&self, handle: PoolHandle) {
        let _guard = self.lock.lock();
        // SAFETY: guarded by `lock`.
        unsafe {
            if (*self.cell.get()).raw_pool().is_null() {
                *self.cell.get() = handle;
            }
        }
    }

    fn clear(&self) {
        let _guard = self.lock.lock();
        // SAFETY: guarded by `lock`.
        unsafe {
            *self.cell.get() = PoolHandle::INVALID;
        }
    }
}

static GLOBAL_MULTI: HandleCell = HandleCell::new();

/// Brings the pool runtime up. Idempotent: every call past the first
/// only bumps the reference count, and each one must be paired with a
/// [`finalize`].
///
/// The first call builds the root pool and the global multi-size pool
/// with the default size classes.
pub fn init() -> MemoryResult<()> {
    if RUNTIME_REFS.fetch_add(1, Ordering::AcqRel) > 0 {
        return Ok(());
    }

    OCCUPIED.store(0, Ordering::Relaxed);

    let Some(geometry) = PoolGeometry::for_object_size(mem::size_of::<MemPool>()) else {
        RUNTIME_REFS.fetch_sub(1, Ordering::AcqRel);
        return Err(MemoryError::SizeOverflow {
            size: mem::size_of::<MemPool>(),
        });
    };

    let root = ROOT.get();
    // SAFETY: we own the 0 -> 1 transition; nobody else touches the
    // dormant root. The previous lifecycle (if any) left every field in
    // its cleared state.
    unsafe {
        (*root).parent = core::ptr::null_mut();
        (*root).first_child = core::ptr::null_mut();
        (*root).prev = core::ptr::null_mut();
        (*root).next = core::ptr::null_mut();
        (*root).multi = None;
        (*root).geometry = geometry;
        (*root).first_node = core::ptr::null_mut();
        (*root).newly_alloc_node = core::ptr::null_mut();
        (*root).first_free_slice = core::ptr::null_mut();
        (*root).first_occupied_slice = core::ptr::null_mut();
        (*root).on_alloc = None;
        (*root).on_free = None;
        (*root).slice_tag.store(0, Ordering::Relaxed);
    }

    GLOBAL_MULTI.clear();

    if let Err(e) = multi::create_multi(None, &DEFAULT_SIZE_CLASSES, None, None) {
        // Partial failure may have left the root holding a node; no
        // state survives a failed init.
        unsafe {
            pool::destroy_tree(ROOT.get(), true);
        }
        GLOBAL_MULTI.clear();
        RUNTIME_REFS.fetch_sub(1, Ordering::AcqRel);
        return Err(e);
    }

    #[cfg(feature = "logging")]
    tracing::debug!(
        classes = DEFAULT_SIZE_CLASSES.len(),
        "pool runtime initialized"
    );

    Ok(())
}

/// Drops one reference to the runtime. The call matching the first
/// `init` destroys the root pool, which recursively reclaims the global
/// multi-size pool and every still-live pool.
///
/// Calls beyond the outstanding init count are ignored.
pub fn finalize() {
    let mut refs = RUNTIME_REFS.load(Ordering::Acquire);
    loop {
        if refs == 0 {
            return;
        }
        match RUNTIME_REFS.compare_exchange(refs, refs - 1, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => break,
            Err(observed) => refs = observed,
        }
    }
    if refs != 1 {
        return;
    }

    // SAFETY: the count reached zero, so no other runtime user remains.
    unsafe {
        pool::destroy_tree(ROOT.get(), true);
    }
    GLOBAL_MULTI.clear();
    debug_assert_eq!(OCCUPIED.load(Ordering::Relaxed), 0);

    #[cfg(feature = "logging")]
    tracing::debug!("pool runtime finalized");
}

/// Bytes of node blocks currently held from the system across all
/// pools.
pub fn occupied_bytes() -> usize {
    OCCUPIED.load(Ordering::Relaxed)
}

/// Occupation level at or above which freeing the last slice of a node
/// returns that node to the system immediately.
pub fn auto_release_threshold() -> usize {
    AUTO_RELEASE_LIMIT.load(Ordering::Relaxed)
}

/// Adjusts the auto-release threshold. Zero releases every node as soon
/// as it empties; `usize::MAX` effectively disables eager release.
pub fn set_auto_release_threshold(bytes: usize) {
    AUTO_RELEASE_LIMIT.store(bytes, Ordering::Relaxed);
}

pub(crate) fn add_occupied(bytes: usize) {
    OCCUPIED.fetch_add(bytes, Ordering::Relaxed);
}

pub(crate) fn sub_occupied(bytes: usize) {
    OCCUPIED.fetch_sub(bytes, Ordering::Relaxed);
}

pub(crate) fn is_initialized() -> bool {
    RUNTIME_REFS.load(Ordering::Acquire) > 0
}

pub(crate) fn root_pool() -> *mut MemPool {
    ROOT.get()
}

pub(crate) fn global_multi() -> Option<PoolHandle> {
    let handle = GLOBAL_MULTI.get();
    if handle.raw_pool().is_null() {
        None
    } else {
        Some(handle)
    }
}

/// Installs `handle` as the global multi-size pool if none is set yet.
/// The first `create_multi` of a lifecycle wins, which during `init` is
/// the default-class group.
pub(crate) fn adopt_global_multi(handle: PoolHandle) {
    GLOBAL_MULTI.set_if_unset(handle);
}
