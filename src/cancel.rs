//! Cooperative cancellation scope: an explicit token handed to everything
//! that blocks, implemented with `AtomicBool` + `Condvar` in the same
//! blocking-with-timeout style the socket reads use, rather than pulling in
//! an async runtime for one flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    signal: Arc<(Mutex<()>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            signal: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let (_lock, cvar) = &*self.signal;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks the calling thread until either cancellation fires or
    /// `timeout` elapses, whichever is first.
    pub fn wait_timeout(&self, timeout: Duration) {
        if self.is_cancelled() {
            return;
        }
        let (lock, cvar) = &*self.signal;
        let guard = lock.lock().unwrap();
        let _ = cvar.wait_timeout(guard, timeout);
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
