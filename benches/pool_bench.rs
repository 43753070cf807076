//! Alloc/free hot paths against the system allocator baseline.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use slicepool::{PoolHandle, alloc_multi, free, init};

fn alloc_free_cycle(c: &mut Criterion) {
    init().expect("runtime init");
    let pool = PoolHandle::create(None, 256).expect("pool creation");

    c.bench_function("pool_alloc_free_256", |b| {
        b.iter(|| {
            let payload = pool.alloc().expect("alloc");
            unsafe { free(black_box(payload)) };
        })
    });

    c.bench_function("system_alloc_free_256", |b| {
        b.iter(|| {
            let v = black_box(vec![0u8; 256]);
            drop(v);
        })
    });
}

fn multi_dispatch(c: &mut Criterion) {
    init().expect("runtime init");

    c.bench_function("multi_dispatch_mixed", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = i.wrapping_add(1);
            let size = 1 + (i * 97) % 2048;
            let payload = alloc_multi(black_box(size)).expect("dispatch");
            unsafe { free(payload) };
        })
    });
}

fn batch_allocation(c: &mut Criterion) {
    init().expect("runtime init");
    let pool = PoolHandle::create(None, 64).expect("pool creation");

    c.bench_function("pool_batch_64x64", |b| {
        b.iter(|| {
            let mut held = Vec::with_capacity(64);
            for _ in 0..64 {
                held.push(pool.alloc().expect("alloc"));
            }
            for payload in held {
                unsafe { free(payload) };
            }
        })
    });
}

criterion_group!(benches, alloc_free_cycle, multi_dispatch, batch_allocation);
criterion_main!(benches);
