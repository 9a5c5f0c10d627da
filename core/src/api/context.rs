//! Cooperative cancellation for script runs.
//!
//! A [`Context`] is a cloneable, thread-safe token. The VM polls it
//! between instructions; any clone may cancel it from any thread, and a
//! deadline set at construction cancels it on first poll past the limit.
//! Once cancelled a context stays cancelled and keeps its original cause.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct ContextState {
    cancelled: AtomicBool,
    cause: Mutex<Option<String>>,
    deadline: Option<Instant>,
}

/// A cancellation token shared between the host and a running VM.
#[derive(Clone, Debug, Default)]
pub struct Context {
    state: Arc<ContextState>,
}

impl Context {
    /// A context that never cancels on its own.
    pub fn background() -> Context {
        Context::default()
    }

    /// A context that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Context {
        Context::with_deadline(Instant::now() + timeout)
    }

    /// A context that cancels itself at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Context {
        Context {
            state: Arc::new(ContextState {
                cancelled: AtomicBool::new(false),
                cause: Mutex::new(None),
                deadline: Some(deadline),
            }),
        }
    }

    /// Cancel with the default cause.
    pub fn cancel(&self) {
        self.cancel_with_cause("context canceled");
    }

    /// Cancel, recording `cause`. The first cancellation wins; later calls
    /// are no-ops.
    pub fn cancel_with_cause(&self, cause: &str) {
        let mut slot = self.state.cause.lock().unwrap();
        if slot.is_none() {
            *slot = Some(cause.to_string());
            self.state.cancelled.store(true, Ordering::Release);
        }
    }

    /// Cheap flag check; the VM calls this between instructions.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Check the deadline, cancelling if it has passed. Returns the
    /// current cancellation state. Costs a clock read, so the VM calls it
    /// on a coarser cadence than `is_cancelled`.
    pub fn poll_deadline(&self) -> bool {
        if self.is_cancelled() {
            return true;
        }
        if let Some(deadline) = self.state.deadline {
            if Instant::now() >= deadline {
                self.cancel_with_cause("context deadline exceeded");
                return true;
            }
        }
        false
    }

    /// Why this context was cancelled.
    pub fn cause(&self) -> String {
        self.state
            .cause
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| "context canceled".to_string())
    }
}

#[cfg(test)]
mod context_test {
    use super::*;

    #[test]
    fn cancel_is_sticky_and_keeps_first_cause() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());

        ctx.cancel_with_cause("first");
        assert!(ctx.is_cancelled());
        ctx.cancel_with_cause("second");
        assert_eq!(ctx.cause(), "first");

        // clones share the same state
        let clone = ctx.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn deadline_cancels_on_poll() {
        let ctx = Context::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(!ctx.is_cancelled());
        assert!(ctx.poll_deadline());
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cause(), "context deadline exceeded");
    }

    #[test]
    fn cancel_from_another_thread() {
        let ctx = Context::background();
        let remote = ctx.clone();
        let handle = std::thread::spawn(move || remote.cancel_with_cause("remote"));
        handle.join().unwrap();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cause(), "remote");
    }
}
