//! Shared test plumbing.
//!
//! The pool runtime is process-wide, so tests inside one binary must not
//! interleave init/finalize cycles. Every test takes this lock first.

use std::sync::{Mutex, MutexGuard};

static RUNTIME_LOCK: Mutex<()> = Mutex::new(());

pub fn runtime_guard() -> MutexGuard<'static, ()> {
    RUNTIME_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
