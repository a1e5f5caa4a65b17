//! Debounce and throttle helpers built on tokio timers

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Coalesces bursts of calls into one trailing invocation.
///
/// Each `call` cancels the pending timer and starts a new one, so the
/// action runs once, `delay` after the last call of a burst.
pub struct Debouncer {
    delay: Duration,
    action: Arc<dyn Fn() + Send + Sync>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new<F>(delay: Duration, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            delay,
            action: Arc::new(action),
            pending: Mutex::new(None),
        }
    }

    /// Schedule the action. Must be called within a tokio runtime.
    pub fn call(&self) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };

        // Cancel previous timer to batch rapid calls
        if let Some(task) = pending.take() {
            task.abort();
        }

        let delay = self.delay;
        let action = Arc::clone(&self.action);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        }));
    }

    /// Drop a pending invocation without running it.
    pub fn cancel(&self) {
        if let Ok(mut pending) = self.pending.lock()
            && let Some(task) = pending.take()
        {
            task.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .map(|p| p.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Allows at most one invocation per window.
///
/// The first call of a window runs immediately; calls inside the window are
/// dropped.
#[derive(Debug)]
pub struct Throttle {
    limit: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            last_run: Mutex::new(None),
        }
    }

    /// Run `f` if the window allows it. Returns `None` when dropped.
    pub fn call<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        {
            let mut last_run = self.last_run.lock().ok()?;
            let now = Instant::now();
            if let Some(last) = *last_run
                && now.duration_since(last) < self.limit
            {
                return None;
            }
            *last_run = Some(now);
        }
        Some(f())
    }
}
