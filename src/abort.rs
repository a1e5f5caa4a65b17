//! Cooperative cancellation and timeouts
//!
//! An [`AbortSignal`] is passed explicitly into every suspending call. Work
//! checks it (or races against it); nothing is killed from the outside.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;

/// Why a signal was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Timeout,
    Teardown,
    Custom(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Timeout => write!(f, "Timeout"),
            AbortReason::Teardown => write!(f, "Teardown"),
            AbortReason::Custom(reason) => write!(f, "{}", reason),
        }
    }
}

/// Owner side of a cancellation pair.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
}

/// Observer side of a cancellation pair.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.clone(),
            reason: Arc::clone(&self.reason),
        }
    }

    /// Abort with `reason`. Only the first abort wins; later calls return false.
    pub fn abort(&self, reason: AbortReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl AbortSignal {
    /// A signal that is never aborted.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.reason.get().cloned()
    }

    /// Resolves once the signal is aborted.
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }

    /// Return an error if the signal has been aborted.
    pub fn check(&self) -> Result<(), ApiError> {
        if self.is_aborted() {
            return Err(self.to_error());
        }
        Ok(())
    }

    fn to_error(&self) -> ApiError {
        let reason = self
            .reason()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "aborted".to_string());
        ApiError::Aborted(reason)
    }
}

/// Create a fresh controller and its signal.
pub fn create_abort_controller() -> (AbortController, AbortSignal) {
    let controller = AbortController::new();
    let signal = controller.signal();
    (controller, signal)
}

/// Abort if possible. Never panics; false when absent or already aborted.
pub fn safe_abort(controller: Option<&AbortController>, reason: AbortReason) -> bool {
    match controller {
        Some(controller) => controller.abort(reason),
        None => false,
    }
}

/// Null-safe abort check.
pub fn is_aborted(signal: Option<&AbortSignal>) -> bool {
    signal.is_some_and(AbortSignal::is_aborted)
}

/// A signal that aborts itself with [`AbortReason::Timeout`].
pub struct TimeoutSignal {
    pub signal: AbortSignal,
    pub controller: AbortController,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutSignal {
    /// Stop the timer. Safe to call after it already fired.
    pub fn clear(&self) {
        if let Ok(mut timer) = self.timer.lock()
            && let Some(handle) = timer.take()
        {
            handle.abort();
        }
    }
}

impl Drop for TimeoutSignal {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Create a signal that aborts after `timeout` unless cleared first.
///
/// Must be called within a tokio runtime.
pub fn create_timeout_signal(timeout: Duration) -> TimeoutSignal {
    let controller = AbortController::new();
    let signal = controller.signal();

    let timer_controller = controller.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if timer_controller.abort(AbortReason::Timeout) {
            debug!("Timeout signal fired after {:?}", timeout);
        }
    });

    TimeoutSignal {
        signal,
        controller,
        timer: Mutex::new(Some(timer)),
    }
}

/// Race `fut` against a timer.
///
/// The future runs as its own task. When the timer wins the task is
/// abandoned, not cancelled: it keeps running to completion in the
/// background and its result is discarded.
pub async fn with_timeout<F, T>(fut: F, timeout: Duration) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(fut);

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ApiError::Aborted(format!("task failed: {}", join_err))),
        Err(_) => {
            debug!("Operation abandoned after {:?}", timeout);
            Err(ApiError::Timeout(timeout))
        }
    }
}

/// Race `fut` against `signal`, returning [`ApiError::Aborted`] if the
/// signal fires first.
pub async fn or_abort<F, T>(fut: F, signal: &AbortSignal) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        _ = signal.aborted() => Err(signal.to_error()),
        res = fut => res,
    }
}
