//! Multi-size dispatch.
//!
//! `create_multi` builds one fixed-size pool per class under a common
//! parent; the first pool of the group owns an ordered dispatch table
//! listing all of them. Variable-size requests scan the table for the
//! smallest sufficient class, then fall back to previously created
//! oversize pools (siblings under the largest class), and finally create
//! a new oversize pool rounded up to the overrange unit.

use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use super::config::OVERRANGE_UNIT;
use super::handle::PoolHandle;
use super::pool::{self, MemPool, PoolPtr, SliceCallback};
use super::runtime;
use crate::error::{MemoryError, MemoryResult};

pub(crate) fn create_multi(
    parent: Option<PoolHandle>,
    sizes: &[usize],
    on_alloc: Option<SliceCallback>,
    on_free: Option<SliceCallback>,
) -> MemoryResult<PoolHandle> {
    if !runtime::is_initialized() {
        return Err(MemoryError::NotInitialized);
    }
    if sizes.is_empty() {
        return Err(MemoryError::EmptySizeClasses);
    }

    let parent = match parent {
        Some(handle) => {
            if !handle.is_valid() {
                return Err(MemoryError::StaleHandle);
            }
            handle.raw_pool()
        }
        None => runtime::root_pool(),
    };

    let mut created: Vec<PoolHandle> = Vec::with_capacity(sizes.len());
    for &size in sizes {
        // SAFETY: parent is the root or was tag-validated above; member
        // pools being rolled back were created right here.
        unsafe {
            match pool::create_pool(parent, size, on_alloc.clone(), on_free.clone()) {
                Ok(handle) => created.push(handle),
                Err(e) => {
                    for handle in &created {
                        pool::destroy_tree(handle.raw_pool(), true);
                    }
                    return Err(e);
                }
            }
        }
    }

    let table: Box<[PoolPtr]> = created.iter().map(|h| h.raw_pool()).collect();
    let first = created[0];

    // SAFETY: first was just created and is only reachable through the
    // handle we are about to return; publish the table under its lock.
    unsafe {
        let _guard = (*first.raw_pool()).mutex.lock();
        (*first.raw_pool()).multi = Some(table);
    }

    // The first multi-size group ever created doubles as the global one.
    runtime::adopt_global_multi(first);

    Ok(first)
}

/// Serves one variable-size request through a multi-size group. `None`
/// uses the global group.
pub(crate) fn dispatch(handle: Option<PoolHandle>, size: usize) -> MemoryResult<NonNull<u8>> {
    let handle = match handle {
        Some(h) => h,
        None => runtime::global_multi().ok_or(MemoryError::NotInitialized)?,
    };
    let owner = handle.raw_pool();
    if owner.is_null() {
        #[cfg(feature = "logging")]
        tracing::warn!("multi-size dispatch on a stale handle refused");
        return Err(MemoryError::StaleHandle);
    }

    // Pool selection happens under the owner's lock so concurrent
    // requests agree on the dispatch table; the chosen pool's own
    // allocation path revalidates after the lock is dropped.
    //
    // SAFETY: the owner pointer is validated against its tags under the
    // lock before any pool state is read.
    let (chosen, largest): (Option<PoolHandle>, *mut MemPool) = unsafe {
        let _guard = (*owner).mutex.lock();

        if handle.raw_tag() != (*owner).slice_tag.load(Ordering::Relaxed)
            || !pool::backing_tag_matches(owner)
        {
            #[cfg(feature = "logging")]
            tracing::warn!("multi-size dispatch on a stale handle refused");
            return Err(MemoryError::StaleHandle);
        }

        let table = (*owner).multi.as_ref().ok_or(MemoryError::NotMultiSize)?;
        let Some(&largest) = table.last() else {
            return Err(MemoryError::NotMultiSize);
        };

        let mut chosen = None;
        for &candidate in table.iter() {
            if (*candidate).geometry.object_size >= size {
                chosen = Some(capture(candidate));
                break;
            }
        }

        if chosen.is_none() {
            // Previously created oversize pools live as children of the
            // largest class. Its child list needs its own lock, unless
            // the largest class *is* the owner (single-class group).
            if largest == owner {
                chosen = scan_oversize(largest, size);
            } else {
                let _largest_guard = (*largest).mutex.lock();
                chosen = scan_oversize(largest, size);
            }
        }

        (chosen, largest)
    };

    // SAFETY: largest stays valid while the group exists; a racing
    // destroy is caught by the tag checks inside create/alloc.
    unsafe {
        let target = match chosen {
            Some(handle) => handle,
            None => {
                // No class fits: grow a new pool, sized to the next
                // overrange unit, under the largest class. It is not
                // added to the fixed table; future oversize scans find
                // it as a sibling.
                let rounded = size
                    .checked_add(OVERRANGE_UNIT - 1)
                    .map(|s| s / OVERRANGE_UNIT * OVERRANGE_UNIT)
                    .ok_or(MemoryError::SizeOverflow { size })?;
                let (on_alloc, on_free) = {
                    let _guard = (*largest).mutex.lock();
                    ((*largest).on_alloc.clone(), (*largest).on_free.clone())
                };
                pool::create_pool(largest, rounded, on_alloc, on_free)?
            }
        };
        target.alloc()
    }
}

/// Scans the largest class's children for an oversize pool that covers
/// `size`.
///
/// # Safety
/// Caller holds `largest`'s mutex (or an equivalent exclusion).
unsafe fn scan_oversize(largest: *mut MemPool, size: usize) -> Option<PoolHandle> {
    unsafe {
        let mut child = (*largest).first_child;
        while !child.is_null() {
            if (*child).geometry.object_size >= size {
                return Some(capture(child));
            }
            child = (*child).next;
        }
        None
    }
}

/// Snapshot of a live pool as a handle.
///
/// # Safety
/// `pool` must point at a live pool object.
unsafe fn capture(pool: *mut MemPool) -> PoolHandle {
    unsafe { PoolHandle::from_raw(pool, (*pool).slice_tag.load(Ordering::Relaxed)) }
}

/// Allocates `size` bytes through the global multi-size pool.
pub fn alloc_multi(size: usize) -> MemoryResult<NonNull<u8>> {
    dispatch(None, size)
}
