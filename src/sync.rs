//! Locking shims.
//!
//! Every pool embeds one [`PoolMutex`]. With the `threading` feature (the
//! default) it is a `parking_lot::Mutex<()>`; without it the lock is a
//! zero-sized no-op, for single-threaded embeddings that want the mutex
//! and atomic traffic elided.

use core::cell::UnsafeCell;

#[cfg(feature = "threading")]
mod imp {
    /// Per-pool coarse lock.
    pub(crate) struct PoolMutex(parking_lot::Mutex<()>);

    impl PoolMutex {
        pub(crate) const fn new() -> Self {
            Self(parking_lot::Mutex::new(()))
        }

        #[inline]
        pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, ()> {
            self.0.lock()
        }
    }
}

#[cfg(not(feature = "threading"))]
mod imp {
    /// Per-pool lock, compiled out in single-threaded builds.
    pub(crate) struct PoolMutex;

    pub(crate) struct PoolGuard;

    impl PoolMutex {
        pub(crate) const fn new() -> Self {
            Self
        }

        #[inline]
        pub(crate) fn lock(&self) -> PoolGuard {
            PoolGuard
        }
    }
}

pub(crate) use imp::PoolMutex;

/// Thread-safe wrapper for statics with interior mutability
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T: ?Sized>(UnsafeCell<T>);

// SAFETY: SyncUnsafeCell<T> is Sync even though UnsafeCell<T> is not.
// All mutation of the wrapped value happens through raw pointers while the
// owning lock (the pool mutex, or the init reference count for the
// 0 -> 1 transition) is held; concurrently observed fields are atomics.
unsafe impl<T: ?Sized> Sync for SyncUnsafeCell<T> {}

// SAFETY: repr(transparent) over UnsafeCell<T>; moving the wrapper moves
// the inner value, so Send follows from T: Send.
unsafe impl<T: ?Sized + Send> Send for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }
}

impl<T: ?Sized> SyncUnsafeCell<T> {
    #[inline]
    pub(crate) fn get(&self) -> *mut T {
        self.0.get()
    }
}
