//! Multi-size dispatch: class selection, oversize growth and reuse,
//! custom groups, and failure modes.

mod common;

use slicepool::{
    DEFAULT_SIZE_CLASSES, MemoryError, PoolHandle, alloc_multi, allocated_size, finalize, free,
    init, occupied_bytes,
};

#[test]
fn requests_land_in_the_smallest_sufficient_class() {
    let _lock = common::runtime_guard();
    init().unwrap();

    let m69 = alloc_multi(69).unwrap();
    assert_eq!(unsafe { allocated_size(m69) }, 98);

    let m64 = alloc_multi(64).unwrap();
    assert_eq!(unsafe { allocated_size(m64) }, 64);

    let m65 = alloc_multi(65).unwrap();
    assert_eq!(unsafe { allocated_size(m65) }, 98);

    let m2048 = alloc_multi(2048).unwrap();
    assert_eq!(unsafe { allocated_size(m2048) }, 2048);

    unsafe {
        free(m69);
        free(m64);
        free(m65);
        free(m2048);
    }
    finalize();
}

#[test]
fn zero_sized_requests_use_the_smallest_class() {
    let _lock = common::runtime_guard();
    init().unwrap();

    let m = alloc_multi(0).unwrap();
    assert_eq!(unsafe { allocated_size(m) }, DEFAULT_SIZE_CLASSES[0]);
    unsafe { free(m) };

    finalize();
}

#[test]
fn oversize_requests_grow_a_rounded_pool_and_reuse_it() {
    let _lock = common::runtime_guard();
    init().unwrap();

    // 2096 exceeds the largest class; it rounds up to the next multiple
    // of the overrange unit.
    let first = alloc_multi(2096).unwrap();
    assert_eq!(unsafe { allocated_size(first) }, 3072);

    // A second request at the same size reuses the oversize pool: no new
    // pool, no new node.
    let occupied = occupied_bytes();
    let second = alloc_multi(2096).unwrap();
    assert_eq!(unsafe { allocated_size(second) }, 3072);
    assert_eq!(occupied_bytes(), occupied);

    // A slightly smaller oversize request fits the same pool too.
    let third = alloc_multi(2049).unwrap();
    assert_eq!(unsafe { allocated_size(third) }, 3072);

    unsafe {
        free(first);
        free(second);
        free(third);
    }
    finalize();
}

#[test]
fn exact_unit_multiples_round_to_themselves() {
    let _lock = common::runtime_guard();
    init().unwrap();

    let m = alloc_multi(4096).unwrap();
    assert_eq!(unsafe { allocated_size(m) }, 4096);
    unsafe { free(m) };

    finalize();
}

#[test]
fn custom_groups_dispatch_independently() {
    let _lock = common::runtime_guard();
    init().unwrap();

    let mut group = PoolHandle::create_multi(None, &[32, 64]).unwrap();

    let small = group.alloc_multi(20).unwrap();
    assert_eq!(unsafe { allocated_size(small) }, 32);

    // Beyond both classes: a fresh oversize pool rounded to the unit.
    let big = group.alloc_multi(100).unwrap();
    assert_eq!(unsafe { allocated_size(big) }, 1024);

    unsafe {
        free(small);
        free(big);
    }

    group.destroy();
    assert!(!group.is_valid());
    assert_eq!(
        group.alloc_multi(20).unwrap_err(),
        MemoryError::StaleHandle
    );

    finalize();
}

#[test]
fn empty_class_lists_are_rejected() {
    let _lock = common::runtime_guard();
    init().unwrap();

    assert_eq!(
        PoolHandle::create_multi(None, &[]).unwrap_err(),
        MemoryError::EmptySizeClasses
    );

    finalize();
}

#[test]
fn plain_pools_cannot_dispatch() {
    let _lock = common::runtime_guard();
    init().unwrap();

    let mut pool = PoolHandle::create(None, 64).unwrap();
    assert_eq!(
        pool.alloc_multi(10).unwrap_err(),
        MemoryError::NotMultiSize
    );
    pool.destroy();

    finalize();
}

#[test]
fn single_class_groups_handle_oversize_requests() {
    let _lock = common::runtime_guard();
    init().unwrap();

    let mut group = PoolHandle::create_multi(None, &[128]).unwrap();
    let m = group.alloc_multi(64).unwrap();
    assert_eq!(unsafe { allocated_size(m) }, 128);

    let big = group.alloc_multi(5000).unwrap();
    assert_eq!(unsafe { allocated_size(big) }, 5120);

    unsafe {
        free(m);
        free(big);
    }
    group.destroy();

    finalize();
}

#[test]
fn global_dispatch_requires_an_initialized_runtime() {
    let _lock = common::runtime_guard();

    assert_eq!(
        alloc_multi(100).unwrap_err(),
        MemoryError::NotInitialized
    );
}
