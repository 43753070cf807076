//! Sizing rules: compile-time constants and per-pool geometry.

use core::alloc::Layout;

use super::node::NODE_HEADER_SIZE;
use super::slice::SLICE_HEADER_SIZE;
use crate::utils::checked_align_up;

/// Largest slice size at which a node is still split into multiple
/// slices. At or above this, every node carries exactly one slice.
pub const MAX_SLICE_SIZE: usize = 32 * 1024;

/// Slice count of a node whose slices are vanishingly small. The node
/// payload area approaches `MAX_SLICE_SIZE * MAX_SLICE_COUNT` (2 MiB) as
/// slices grow; the count formula below keeps it near that target.
pub const MAX_SLICE_COUNT: usize = 64;

/// Granularity of oversize pools created on demand by multi-size
/// dispatch: requests beyond every configured class round up to the next
/// multiple of this unit.
pub const OVERRANGE_UNIT: usize = 1024;

/// Default occupation level (bytes of live node blocks, process-wide)
/// above which freeing the last slice of a node returns the node to the
/// system instead of keeping it cached.
pub const AUTO_RELEASE_THRESHOLD: usize = 512 * 1024 * 1024;

/// Size classes of the global multi-size pool, ascending.
pub const DEFAULT_SIZE_CLASSES: [usize; 13] = [
    64, 98, 128, 192, 256, 384, 512, 768, 1024, 1280, 1536, 1792, 2048,
];

/// Header and payload boundaries are machine-word aligned.
pub(crate) const ALIGNMENT: usize = core::mem::size_of::<usize>();

/// Derived sizes of one pool: fixed at creation, immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolGeometry {
    /// Payload bytes handed to the caller per slice.
    pub object_size: usize,
    /// Aligned slice header plus aligned payload.
    pub slice_size: usize,
    /// Slices carved out of each node.
    pub slice_count: usize,
    /// Bytes requested from the system per node.
    pub node_size: usize,
}

impl PoolGeometry {
    pub(crate) const EMPTY: PoolGeometry = PoolGeometry {
        object_size: 0,
        slice_size: 0,
        slice_count: 0,
        node_size: 0,
    };

    /// Derives the geometry for one object size.
    ///
    /// The slice count shrinks linearly from `MAX_SLICE_COUNT` down to 1
    /// as the slice size approaches `MAX_SLICE_SIZE`, so node sizes stay
    /// near the `MAX_SLICE_SIZE * MAX_SLICE_COUNT` target without small
    /// pools wasting whole megabytes per node.
    ///
    /// Returns `None` when the requested size cannot be laid out.
    pub(crate) fn for_object_size(object_size: usize) -> Option<Self> {
        let slice_size = SLICE_HEADER_SIZE.checked_add(checked_align_up(object_size, ALIGNMENT)?)?;

        let slice_count = if slice_size >= MAX_SLICE_SIZE {
            1
        } else {
            MAX_SLICE_COUNT - slice_size * (MAX_SLICE_COUNT - 1) / MAX_SLICE_SIZE
        };

        let node_size = NODE_HEADER_SIZE.checked_add(slice_size.checked_mul(slice_count)?)?;

        // Node blocks must be expressible as a Layout.
        Layout::from_size_align(node_size, ALIGNMENT).ok()?;

        Some(Self {
            object_size,
            slice_size,
            slice_count,
            node_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_objects_get_full_count() {
        let geo = PoolGeometry::for_object_size(16).unwrap();
        assert_eq!(geo.slice_count, MAX_SLICE_COUNT);
        assert_eq!(geo.slice_size, SLICE_HEADER_SIZE + 16);
    }

    #[test]
    fn count_shrinks_with_slice_size() {
        let small = PoolGeometry::for_object_size(256).unwrap();
        let large = PoolGeometry::for_object_size(16 * 1024).unwrap();
        assert!(large.slice_count < small.slice_count);
        assert!(large.slice_count >= 1);
    }

    #[test]
    fn giant_objects_get_one_slice_per_node() {
        let geo = PoolGeometry::for_object_size(MAX_SLICE_SIZE).unwrap();
        assert_eq!(geo.slice_count, 1);

        // Exactly at the boundary: slice_size == MAX_SLICE_SIZE.
        let geo = PoolGeometry::for_object_size(MAX_SLICE_SIZE - SLICE_HEADER_SIZE).unwrap();
        assert_eq!(geo.slice_size, MAX_SLICE_SIZE);
        assert_eq!(geo.slice_count, 1);
    }

    #[test]
    fn node_payload_never_exceeds_target() {
        for size in [0, 1, 8, 64, 98, 1024, 4096, 16 * 1024, 31 * 1024] {
            let geo = PoolGeometry::for_object_size(size).unwrap();
            assert!(geo.slice_count >= 1, "object_size={size}");
            if geo.slice_size < MAX_SLICE_SIZE {
                assert!(geo.slice_size * geo.slice_count <= MAX_SLICE_SIZE * MAX_SLICE_COUNT);
            }
        }
    }

    #[test]
    fn absurd_sizes_are_rejected() {
        assert!(PoolGeometry::for_object_size(usize::MAX).is_none());
        assert!(PoolGeometry::for_object_size(usize::MAX - ALIGNMENT).is_none());
    }
}
