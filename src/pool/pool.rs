//! The pool engine.
//!
//! # Safety
//!
//! Everything in this module manipulates intrusive lists through raw
//! pointers. The rules that keep it sound:
//!
//! - A pool's node list, slice lists and child list are only touched with
//!   that pool's mutex held. Fields observed without the lock
//!   (generation tags, the occupation counter) are atomics.
//! - Every non-root pool object lives in the payload of one slice of the
//!   root pool, so pool pointers stay valid for as long as that backing
//!   slice's node exists; generation tags detect reuse.
//! - A node's free slices form one contiguous span inside the owning
//!   pool's free list. That invariant is what makes whole-node release
//!   O(1): the span is excised by bridging its two ends.

use std::alloc::{Layout, alloc as sys_alloc, dealloc as sys_dealloc};
use std::sync::Arc;

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicI32, Ordering};

use super::config::{ALIGNMENT, PoolGeometry};
use super::handle::PoolHandle;
use super::node::{NODE_HEADER_SIZE, NodeHeader};
use super::runtime;
use super::slice::{SLICE_HEADER_SIZE, SliceHeader};
use crate::error::{MemoryError, MemoryResult};
use crate::sync::PoolMutex;

/// Callback invoked with the payload pointer when a slice is handed out
/// or returned. Must not allocate from or free into the pool that is
/// invoking it.
pub type SliceCallback = Arc<dyn Fn(NonNull<u8>) + Send + Sync + 'static>;

pub(crate) type PoolPtr = *mut MemPool;

/// One pool: a set of nodes sharing a single object size, plus its
/// position in the pool tree. Non-root pools are themselves stored in a
/// slice of the root pool.
#[repr(C)]
pub(crate) struct MemPool {
    pub parent: *mut MemPool,
    pub first_child: *mut MemPool,
    pub prev: *mut MemPool,
    pub next: *mut MemPool,
    /// Dispatch table of a multi-size group; only the first pool of the
    /// group owns one.
    pub multi: Option<Box<[PoolPtr]>>,
    pub geometry: PoolGeometry,
    pub first_node: *mut NodeHeader,
    /// The single node still in its bump-allocation phase, if any.
    pub newly_alloc_node: *mut NodeHeader,
    /// Head of the pool-wide free-slice list.
    pub first_free_slice: *mut SliceHeader,
    /// Head of the pool-wide occupied-slice list.
    pub first_occupied_slice: *mut SliceHeader,
    pub on_alloc: Option<SliceCallback>,
    pub on_free: Option<SliceCallback>,
    /// Tag of the backing slice at the moment this pool was created; -1
    /// once destroyed.
    pub slice_tag: AtomicI32,
    pub mutex: PoolMutex,
}

impl MemPool {
    /// A dormant pool. Used for the static root; `init` fills in the
    /// geometry on the 0 -> 1 reference transition.
    pub(crate) const fn unused() -> Self {
        Self {
            parent: ptr::null_mut(),
            first_child: ptr::null_mut(),
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
            multi: None,
            geometry: PoolGeometry::EMPTY,
            first_node: ptr::null_mut(),
            newly_alloc_node: ptr::null_mut(),
            first_free_slice: ptr::null_mut(),
            first_occupied_slice: ptr::null_mut(),
            on_alloc: None,
            on_free: None,
            slice_tag: AtomicI32::new(0),
            mutex: PoolMutex::new(),
        }
    }
}

/// Header of the slice that physically contains this pool object.
///
/// # Safety
/// `pool` must be a non-root pool (root pools are statics, not slices).
#[inline]
unsafe fn backing_slice(pool: *mut MemPool) -> *mut SliceHeader {
    // SAFETY: non-root pools are written into slice payloads, so the
    // header sits SLICE_HEADER_SIZE bytes below the pool object.
    unsafe { pool.cast::<u8>().sub(SLICE_HEADER_SIZE).cast::<SliceHeader>() }
}

/// Checks the pool object against the slice that stores it. The root has
/// no backing slice and always passes.
///
/// # Safety
/// `pool` must point at a pool object whose storage is still mapped.
#[inline]
pub(crate) unsafe fn backing_tag_matches(pool: *mut MemPool) -> bool {
    unsafe {
        if (*pool).parent.is_null() {
            return true;
        }
        let slice = backing_slice(pool);
        (*slice).tag.load(Ordering::Relaxed) == (*pool).slice_tag.load(Ordering::Relaxed)
    }
}

/// Requests one node block from the system and pushes it at the head of
/// the pool's node list as the new bump node.
///
/// # Safety
/// Caller holds the pool's mutex.
unsafe fn acquire_node(pool: *mut MemPool) -> MemoryResult<()> {
    unsafe {
        let geometry = (*pool).geometry;
        // Geometry validated this layout at pool creation.
        let layout = Layout::from_size_align(geometry.node_size, ALIGNMENT)
            .map_err(|_| MemoryError::SizeOverflow {
                size: geometry.object_size,
            })?;

        // SAFETY: node_size is non-zero (it always includes the header).
        let raw = sys_alloc(layout);
        let Some(base) = NonNull::new(raw) else {
            return Err(MemoryError::OutOfMemory {
                size: geometry.node_size,
            });
        };

        runtime::add_occupied(geometry.node_size);

        let node = base.as_ptr().cast::<NodeHeader>();
        // SAFETY: the block is at least NODE_HEADER_SIZE bytes and
        // word-aligned; writing the header claims it.
        ptr::write(
            node,
            NodeHeader {
                owner: pool,
                prev: ptr::null_mut(),
                next: (*pool).first_node,
                free_head: ptr::null_mut(),
                free_tail: ptr::null_mut(),
                using_slices: 0,
                used_slices: 0,
                first_avail: base.as_ptr().add(NODE_HEADER_SIZE),
            },
        );

        if !(*pool).first_node.is_null() {
            (*(*pool).first_node).prev = node;
        }
        (*pool).first_node = node;
        (*pool).newly_alloc_node = node;

        #[cfg(feature = "logging")]
        tracing::trace!(
            node_size = geometry.node_size,
            object_size = geometry.object_size,
            "acquired pool node"
        );

        Ok(())
    }
}

/// Returns an idle node block to the system.
///
/// # Safety
/// Caller holds the owning pool's mutex and the node has no slices
/// handed out.
unsafe fn release_node(node: *mut NodeHeader) {
    unsafe {
        debug_assert_eq!((*node).using_slices, 0);
        let pool = (*node).owner;

        // Excise the node's free subrange from the pool free list. The
        // subrange is contiguous, so bridging tail.next with head.prev
        // detaches the whole span at once.
        let head = (*node).free_head;
        let tail = (*node).free_tail;
        if !tail.is_null() && !(*tail).next.is_null() {
            (*(*tail).next).prev = (*head).prev;
        }
        if !head.is_null() && !(*head).prev.is_null() {
            (*(*head).prev).next = (*tail).next;
        }
        if !head.is_null() && (*pool).first_free_slice == head {
            (*pool).first_free_slice = (*tail).next;
        }

        if (*pool).newly_alloc_node == node {
            (*pool).newly_alloc_node = ptr::null_mut();
        }

        if !(*node).next.is_null() {
            (*(*node).next).prev = (*node).prev;
        }
        if !(*node).prev.is_null() {
            (*(*node).prev).next = (*node).next;
        } else {
            (*pool).first_node = (*node).next;
        }

        let node_size = (*pool).geometry.node_size;
        runtime::sub_occupied(node_size);

        #[cfg(feature = "logging")]
        tracing::trace!(node_size, "released pool node");

        // SAFETY: the block was produced by sys_alloc with this exact
        // layout in acquire_node.
        let layout = Layout::from_size_align_unchecked(node_size, ALIGNMENT);
        sys_dealloc(node.cast::<u8>(), layout);
    }
}

/// Carves the next never-used slice out of the pool's bump node.
///
/// # Safety
/// Caller holds the pool's mutex and `newly_alloc_node` is non-null.
unsafe fn carve_slice(pool: *mut MemPool) -> *mut SliceHeader {
    unsafe {
        let geometry = (*pool).geometry;
        let node = (*pool).newly_alloc_node;
        debug_assert!(!node.is_null());

        (*node).used_slices += 1;
        (*node).using_slices += 1;

        let slice = (*node).first_avail.cast::<SliceHeader>();
        // Only the header is cleared; the payload keeps whatever bytes
        // the system handed over.
        ptr::write_bytes(slice.cast::<u8>(), 0, SLICE_HEADER_SIZE);
        (*slice).node = node;

        (*node).first_avail = (*node).first_avail.add(geometry.slice_size);
        if (*node).used_slices == geometry.slice_count {
            (*pool).newly_alloc_node = ptr::null_mut();
        }

        slice
    }
}

/// Takes one slice out of the pool: free list first, then the bump node,
/// acquiring a fresh node when both are exhausted. The slice ends up at
/// the head of the occupied list.
///
/// Also returns the pool's `on_alloc` callback, cloned under the same
/// lock acquisition so the caller can invoke it unlocked.
///
/// # Safety
/// `pool` must point at a pool object whose storage is still mapped.
pub(crate) unsafe fn take_slice(
    pool: *mut MemPool,
) -> MemoryResult<(*mut SliceHeader, Option<SliceCallback>)> {
    unsafe {
        let _guard = (*pool).mutex.lock();

        if !backing_tag_matches(pool) {
            #[cfg(feature = "logging")]
            tracing::warn!("allocation from a destroyed pool refused");
            return Err(MemoryError::StaleHandle);
        }

        let slice;
        if !(*pool).first_free_slice.is_null() {
            let s = (*pool).first_free_slice;
            let node = (*s).node;

            // The list head is always the head of its node's subrange;
            // the subrange follows the head into the list tail-wards.
            (*pool).first_free_slice = (*s).next;
            (*node).free_head = ptr::null_mut();
            if !(*pool).first_free_slice.is_null() {
                (*(*pool).first_free_slice).prev = ptr::null_mut();
                if (*(*pool).first_free_slice).node == node {
                    (*node).free_head = (*pool).first_free_slice;
                }
            }
            if (*node).free_head.is_null() {
                (*node).free_tail = ptr::null_mut();
            }

            (*s).next = ptr::null_mut();
            (*s).prev = ptr::null_mut();
            (*s).tag.fetch_add(1, Ordering::Relaxed);
            (*node).using_slices += 1;
            slice = s;
        } else {
            if (*pool).newly_alloc_node.is_null() {
                acquire_node(pool)?;
            }
            slice = carve_slice(pool);
        }

        (*slice).prev = ptr::null_mut();
        (*slice).next = (*pool).first_occupied_slice;
        if !(*pool).first_occupied_slice.is_null() {
            (*(*pool).first_occupied_slice).prev = slice;
        }
        (*pool).first_occupied_slice = slice;

        Ok((slice, (*pool).on_alloc.clone()))
    }
}

/// Returns an allocation to its pool; the node goes back to the system
/// when this empties it and the process-wide occupation is at or above
/// the auto-release threshold.
///
/// If the owning pool has been destroyed in the meantime the call is a
/// no-op, so late frees arriving after a parent-first teardown are
/// tolerated.
///
/// # Safety
/// `payload` must come from [`PoolHandle::alloc`] or
/// [`PoolHandle::alloc_multi`](crate::PoolHandle::alloc_multi) and must
/// not have been freed already.
pub unsafe fn free(payload: NonNull<u8>) {
    unsafe {
        let slice = SliceHeader::from_payload(payload);
        let node = (*slice).node;
        let pool = (*node).owner;

        let _guard = (*pool).mutex.lock();

        if !backing_tag_matches(pool) {
            #[cfg(feature = "logging")]
            tracing::warn!("free on a destroyed pool ignored");
            return;
        }

        (*slice).tag.fetch_add(1, Ordering::Relaxed);
        (*node).using_slices -= 1;
        if let Some(cb) = (*pool).on_free.as_ref() {
            cb(payload);
        }

        // Detach from the occupied list.
        if !(*slice).next.is_null() {
            (*(*slice).next).prev = (*slice).prev;
        }
        if !(*slice).prev.is_null() {
            (*(*slice).prev).next = (*slice).next;
        } else {
            (*pool).first_occupied_slice = (*slice).next;
        }

        if (*node).using_slices == 0 && runtime::occupied_bytes() >= runtime::auto_release_threshold()
        {
            release_node(node);
        } else if (*node).free_head.is_null() {
            // First free slice of this node: open a new subrange at the
            // head of the pool free list.
            (*node).free_head = slice;
            (*node).free_tail = slice;
            (*slice).prev = ptr::null_mut();
            (*slice).next = (*pool).first_free_slice;
            if !(*pool).first_free_slice.is_null() {
                (*(*pool).first_free_slice).prev = slice;
            }
            (*pool).first_free_slice = slice;
        } else {
            // Extend the node's subrange at its tail, keeping the
            // subrange contiguous in the pool list.
            let tail = (*node).free_tail;
            (*slice).next = (*tail).next;
            if !(*tail).next.is_null() {
                (*(*tail).next).prev = slice;
            }
            (*tail).next = slice;
            (*slice).prev = tail;
            (*node).free_tail = slice;
        }
    }
}

/// Object size of the pool an allocation came from. O(1), lock-free: it
/// reads only fields that are immutable after pool creation.
///
/// # Safety
/// `payload` must be a live allocation from some pool.
pub unsafe fn allocated_size(payload: NonNull<u8>) -> usize {
    unsafe {
        let slice = SliceHeader::from_payload(payload);
        (*(*(*slice).node).owner).geometry.object_size
    }
}

/// Removes a pool from its parent's child list.
///
/// # Safety
/// Caller holds the parent's mutex, or the parent is itself mid-destroy
/// and unreachable.
unsafe fn unlink_child(pool: *mut MemPool) {
    unsafe {
        if !(*pool).next.is_null() {
            (*(*pool).next).prev = (*pool).prev;
        }
        if !(*pool).prev.is_null() {
            (*(*pool).prev).next = (*pool).next;
        } else if !(*pool).parent.is_null() {
            (*(*pool).parent).first_child = (*pool).next;
        }
        (*pool).prev = ptr::null_mut();
        (*pool).next = ptr::null_mut();
    }
}

/// Reads a droppable field out of a pool object and leaves a fresh
/// `None` behind, so the storage stays a valid `MemPool` (the root is
/// reused by a later `init`).
///
/// # Safety
/// `field` must be valid for reads and writes.
unsafe fn take_field<T>(field: *mut Option<T>) -> Option<T> {
    unsafe {
        let value = ptr::read(field);
        ptr::write(field, None);
        value
    }
}

/// Post-order destruction of a pool and every descendant.
///
/// `outermost` is true for the pool named by the caller's handle; only
/// that unlink races against its parent's other mutations and needs the
/// parent's lock. Children unlink lock-free while this pool is being
/// torn down.
///
/// # Safety
/// `pool` must point at a live pool object. The caller must not hold
/// this pool's mutex, its parent's, or the root pool's.
pub(crate) unsafe fn destroy_tree(pool: *mut MemPool, outermost: bool) {
    unsafe {
        let parent = (*pool).parent;

        if !parent.is_null() {
            if outermost {
                let _parent_guard = (*parent).mutex.lock();
                unlink_child(pool);
            } else {
                unlink_child(pool);
            }
        }

        {
            // Barrier: anything already inside alloc/free on this pool
            // finishes, and the poisoned tag turns every later entry
            // into a stale no-op. -1 is stronger than a bump; no handle
            // can ever match it through the backing-slice check.
            let _guard = (*pool).mutex.lock();
            (*pool).slice_tag.store(-1, Ordering::Relaxed);
        }

        // Children free their backing slices into the root pool, not
        // into this one, so recursing without this pool's lock held
        // cannot deadlock.
        while !(*pool).first_child.is_null() {
            destroy_tree((*pool).first_child, false);
        }

        {
            let _guard = (*pool).mutex.lock();

            // Leak cleanup: still-occupied slices get the free callback.
            if let Some(cb) = (*pool).on_free.as_ref() {
                let mut s = (*pool).first_occupied_slice;
                while !s.is_null() {
                    (*pool).first_occupied_slice = (*s).next;
                    cb(SliceHeader::payload(s));
                    s = (*pool).first_occupied_slice;
                }
            }
            (*pool).first_occupied_slice = ptr::null_mut();

            // Return every node wholesale; no per-slice bookkeeping
            // needed.
            let node_size = (*pool).geometry.node_size;
            let mut node = (*pool).first_node;
            while !node.is_null() {
                (*pool).first_node = (*node).next;
                runtime::sub_occupied(node_size);
                let layout = Layout::from_size_align_unchecked(node_size, ALIGNMENT);
                sys_dealloc(node.cast::<u8>(), layout);
                node = (*pool).first_node;
            }
            (*pool).newly_alloc_node = ptr::null_mut();
            (*pool).first_free_slice = ptr::null_mut();
            (*pool).parent = ptr::null_mut();

            drop(take_field(ptr::addr_of_mut!((*pool).multi)));
            drop(take_field(ptr::addr_of_mut!((*pool).on_alloc)));
            drop(take_field(ptr::addr_of_mut!((*pool).on_free)));
        }

        #[cfg(feature = "logging")]
        tracing::debug!(outermost, "pool destroyed");

        // Give the pool's own storage back to the root pool. Bumps the
        // backing slice's tag, which is what invalidates copied handles.
        if !parent.is_null() {
            free(NonNull::new_unchecked(pool.cast::<u8>()));
        }
    }
}

/// Creates a pool under `parent` (a raw pool pointer; the root for
/// orphan creations). The pool object itself is carved from the root
/// pool.
///
/// # Safety
/// `parent` must point at a live pool object and the runtime must be
/// initialized.
pub(crate) unsafe fn create_pool(
    parent: *mut MemPool,
    object_size: usize,
    on_alloc: Option<SliceCallback>,
    on_free: Option<SliceCallback>,
) -> MemoryResult<PoolHandle> {
    unsafe {
        let geometry = PoolGeometry::for_object_size(object_size)
            .ok_or(MemoryError::SizeOverflow { size: object_size })?;

        let (slice, _) = take_slice(runtime::root_pool())?;
        let tag = (*slice).tag.load(Ordering::Relaxed);
        let pool = SliceHeader::payload(slice).as_ptr().cast::<MemPool>();

        // SAFETY: the root pool's object size is size_of::<MemPool>(),
        // so the payload fits a pool object; ptr::write claims the raw
        // payload bytes without dropping them.
        ptr::write(
            pool,
            MemPool {
                parent,
                first_child: ptr::null_mut(),
                prev: ptr::null_mut(),
                next: ptr::null_mut(),
                multi: None,
                geometry,
                first_node: ptr::null_mut(),
                newly_alloc_node: ptr::null_mut(),
                first_free_slice: ptr::null_mut(),
                first_occupied_slice: ptr::null_mut(),
                on_alloc,
                on_free,
                slice_tag: AtomicI32::new(tag),
                mutex: PoolMutex::new(),
            },
        );

        {
            let _parent_guard = (*parent).mutex.lock();
            (*pool).next = (*parent).first_child;
            if !(*pool).next.is_null() {
                (*(*pool).next).prev = pool;
            }
            (*parent).first_child = pool;
        }

        #[cfg(feature = "logging")]
        tracing::debug!(
            object_size,
            slice_count = geometry.slice_count,
            "pool created"
        );

        Ok(PoolHandle::from_raw(pool, tag))
    }
}
