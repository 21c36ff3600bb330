//! One-way termination signal shared by the worker loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Inner {
    terminated: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

/// Cloneable shutdown token
///
/// Once `terminate` is called the token stays terminated. Loops check it
/// before every access to state owned by the UI context and use `sleep` for
/// delays that must end early at shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

impl ShutdownToken {
    /// Create a token that is not terminated
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every sleeper
    pub fn terminate(&self) {
        let _guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.terminated.store(true, Ordering::SeqCst);
        self.inner.cvar.notify_all();
    }

    /// Check whether the signal has been raised
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless terminated first
    ///
    /// Returns `true` if the token was terminated.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if self.is_terminated() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .inner
                .cvar
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
