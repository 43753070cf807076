//! Tagged pool handles.
//!
//! A handle is a `(pool pointer, generation tag)` pair — the only
//! user-visible way to name a pool. The tag is checked against the pool's
//! stored tag *and* against the slice that physically stores the pool
//! object, so destroying a pool (or any of its ancestors) turns every
//! outstanding handle stale instead of dangling.

use core::ptr::{self, NonNull};
use core::sync::atomic::Ordering;

use super::multi;
use super::pool::{self, MemPool, SliceCallback};
use super::runtime;
use super::slice::SliceHeader;
use crate::error::{MemoryError, MemoryResult};

/// Reference to a pool. Copyable; copies of a destroyed pool's handle
/// all validate as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHandle {
    pool: *mut MemPool,
    tag: i32,
}

// SAFETY: a handle is just a name. Every operation reached through it
// revalidates the generation tags and takes the pool's mutex before
// touching pool state, so handles may be shared and sent freely in
// threaded builds.
#[cfg(feature = "threading")]
unsafe impl Send for PoolHandle {}
#[cfg(feature = "threading")]
unsafe impl Sync for PoolHandle {}

impl PoolHandle {
    /// The never-valid handle; what `destroy` leaves behind.
    pub const INVALID: PoolHandle = PoolHandle {
        pool: ptr::null_mut(),
        tag: 0,
    };

    pub(crate) fn from_raw(pool: *mut MemPool, tag: i32) -> Self {
        Self { pool, tag }
    }

    pub(crate) fn raw_pool(&self) -> *mut MemPool {
        self.pool
    }

    pub(crate) fn raw_tag(&self) -> i32 {
        self.tag
    }

    /// Creates a fixed-size pool. A `None` parent puts the pool directly
    /// under the global root, so it lives until destroyed explicitly or
    /// until [`finalize`](crate::finalize) tears the tree down.
    pub fn create(parent: Option<PoolHandle>, object_size: usize) -> MemoryResult<PoolHandle> {
        Self::create_with_callbacks(parent, object_size, None, None)
    }

    /// [`create`](Self::create) with per-slice callbacks. `on_alloc` runs
    /// after each allocation, `on_free` on each free and, as leak
    /// cleanup, on every still-occupied slice when the pool is
    /// destroyed.
    pub fn create_with_callbacks(
        parent: Option<PoolHandle>,
        object_size: usize,
        on_alloc: Option<SliceCallback>,
        on_free: Option<SliceCallback>,
    ) -> MemoryResult<PoolHandle> {
        if !runtime::is_initialized() {
            return Err(MemoryError::NotInitialized);
        }
        let parent = resolve_parent(parent)?;
        // SAFETY: parent is the root or was just tag-validated.
        unsafe { pool::create_pool(parent, object_size, on_alloc, on_free) }
    }

    /// Creates one pool per size class (ascending) under the same parent
    /// and returns the handle of the first, which owns the dispatch
    /// table for [`alloc_multi`](Self::alloc_multi). Partial failure
    /// rolls back every pool created so far.
    pub fn create_multi(parent: Option<PoolHandle>, sizes: &[usize]) -> MemoryResult<PoolHandle> {
        Self::create_multi_with_callbacks(parent, sizes, None, None)
    }

    /// [`create_multi`](Self::create_multi) with callbacks applied to
    /// every member pool.
    pub fn create_multi_with_callbacks(
        parent: Option<PoolHandle>,
        sizes: &[usize],
        on_alloc: Option<SliceCallback>,
        on_free: Option<SliceCallback>,
    ) -> MemoryResult<PoolHandle> {
        multi::create_multi(parent, sizes, on_alloc, on_free)
    }

    /// Whether this handle still names a live pool: the pointer is
    /// non-null, the tag matches the pool, and the pool's backing slice
    /// has not been handed to anyone else.
    pub fn is_valid(&self) -> bool {
        if self.pool.is_null() {
            return false;
        }
        // SAFETY: non-null handles only come out of pool creation; the
        // pool object's storage stays mapped while its backing node
        // lives, and the tag comparison detects reuse.
        unsafe {
            self.tag == (*self.pool).slice_tag.load(Ordering::Relaxed)
                && pool::backing_tag_matches(self.pool)
        }
    }

    /// Object size this pool serves, if the handle is still valid.
    pub fn object_size(&self) -> Option<usize> {
        if !self.is_valid() {
            return None;
        }
        // SAFETY: validated above; geometry is immutable after creation.
        Some(unsafe { (*self.pool).geometry.object_size })
    }

    /// Allocates one object. The payload is valid until freed or until
    /// this pool (or an ancestor) is destroyed; its bytes are not
    /// zeroed.
    pub fn alloc(&self) -> MemoryResult<NonNull<u8>> {
        if self.pool.is_null() {
            return Err(MemoryError::StaleHandle);
        }
        // SAFETY: take_slice revalidates the backing tag under the pool
        // lock before touching any list.
        unsafe {
            if self.tag != (*self.pool).slice_tag.load(Ordering::Relaxed) {
                #[cfg(feature = "logging")]
                tracing::warn!("alloc on a stale pool handle refused");
                return Err(MemoryError::StaleHandle);
            }
            let (slice, on_alloc) = pool::take_slice(self.pool)?;
            let payload = SliceHeader::payload(slice);
            if let Some(cb) = on_alloc {
                cb(payload);
            }
            Ok(payload)
        }
    }

    /// Dispatches a variable-size request to the smallest member pool
    /// whose object size covers it, creating an oversize pool on demand
    /// when every class is too small. Only valid on the first handle of
    /// a `create_multi` group.
    pub fn alloc_multi(&self, size: usize) -> MemoryResult<NonNull<u8>> {
        multi::dispatch(Some(*self), size)
    }

    /// Destroys the pool and, post-order, every descendant. For a
    /// multi-size group this destroys every member. Stale handles are
    /// ignored. The handle is overwritten with [`PoolHandle::INVALID`].
    pub fn destroy(&mut self) {
        let this = *self;
        *self = PoolHandle::INVALID;

        if !this.is_valid() {
            #[cfg(feature = "logging")]
            if !this.pool.is_null() {
                tracing::warn!("destroy of a stale pool handle ignored");
            }
            return;
        }
        let pool = this.pool;

        // SAFETY: validated above; the dispatch table is detached under
        // the pool's lock so a racing alloc_multi either sees the whole
        // table or none of it.
        unsafe {
            let members = {
                let _guard = (*pool).mutex.lock();
                if this.tag != (*pool).slice_tag.load(Ordering::Relaxed)
                    || !pool::backing_tag_matches(pool)
                {
                    #[cfg(feature = "logging")]
                    tracing::warn!("destroy of a stale pool handle ignored");
                    return;
                }
                (*pool).multi.take()
            };

            match members {
                Some(list) => {
                    // Members are siblings; the first is this pool.
                    for &member in list.iter() {
                        pool::destroy_tree(member, true);
                    }
                }
                None => pool::destroy_tree(pool, true),
            }
        }
    }
}

/// Maps an optional parent handle to a raw pool, defaulting to the root.
fn resolve_parent(parent: Option<PoolHandle>) -> MemoryResult<*mut MemPool> {
    match parent {
        Some(handle) => {
            if !handle.is_valid() {
                return Err(MemoryError::StaleHandle);
            }
            Ok(handle.pool)
        }
        None => Ok(runtime::root_pool()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handle_is_never_valid() {
        assert!(!PoolHandle::INVALID.is_valid());
        assert_eq!(PoolHandle::INVALID.object_size(), None);
        assert_eq!(
            PoolHandle::INVALID.alloc().unwrap_err(),
            MemoryError::StaleHandle
        );
    }

    #[test]
    fn destroy_of_invalid_handle_is_a_no_op() {
        let mut handle = PoolHandle::INVALID;
        handle.destroy();
        assert_eq!(handle, PoolHandle::INVALID);
    }

    #[test]
    fn create_before_init_is_rejected() {
        // Unit tests never initialize the runtime, so creation must
        // refuse rather than touch the dormant root pool.
        if !runtime::is_initialized() {
            assert_eq!(
                PoolHandle::create(None, 64).unwrap_err(),
                MemoryError::NotInitialized
            );
        }
    }
}
