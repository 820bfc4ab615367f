//! The consent protocol between the rights manager and the modal dialog.
//!
//! The dialog itself is an external collaborator: the manager launches it
//! through [`ConsentLauncher`] and blocks on a [`ConsentSignal`] until the
//! dialog reports completion or the bounded wait elapses. The manager's
//! single-flight lock guarantees at most one dialog is in flight
//! process-wide; this module only carries the handshake.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use common::{DeviceKey, Result, RightsError};

/// Everything the dialog needs to show a meaningful prompt.
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    /// Bus address form of the device, shown to the user.
    pub bus_dev_key: String,
    pub device_key: DeviceKey,
    pub app_id: String,
    pub client_token: String,
}

/// Completion handshake for one dialog interaction.
///
/// The launcher hands this to the dialog side; the manager waits on it.
/// Completion only means the dialog closed; the decision is re-read from
/// the store afterwards.
#[derive(Debug, Clone, Default)]
pub struct ConsentSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ConsentSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that the dialog interaction finished.
    pub fn complete(&self) {
        let (done, cvar) = &*self.inner;
        let mut guard = done.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = true;
        cvar.notify_all();
    }

    /// Block until [`complete`](Self::complete) or the deadline.
    ///
    /// Returns `true` when the dialog completed, `false` on timeout.
    /// Spurious wakeups re-check the flag against the original deadline.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (done, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut guard = done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*guard {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            guard = cvar
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Launches the modal consent dialog.
///
/// `launch` must not block on the user; it starts the interaction and
/// returns, and the dialog side calls `done.complete()` when it closes.
pub trait ConsentLauncher: Send + Sync {
    fn launch(&self, request: &ConsentRequest, done: ConsentSignal) -> Result<()>;
}

/// Launcher for hosts without a dialog service; every request is denied
/// because consent can never be collected.
#[derive(Debug, Default)]
pub struct NoConsentUi;

impl ConsentLauncher for NoConsentUi {
    fn launch(&self, request: &ConsentRequest, _done: ConsentSignal) -> Result<()> {
        Err(RightsError::PermissionDenied(format!(
            "no consent dialog available for {}",
            request.device_key
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wait_returns_after_complete() {
        let signal = ConsentSignal::new();
        let remote = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.complete();
        });
        assert!(signal.wait(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_times_out_without_completion() {
        let signal = ConsentSignal::new();
        assert!(!signal.wait(Duration::from_millis(20)));
    }

    #[test]
    fn test_complete_before_wait_is_not_lost() {
        let signal = ConsentSignal::new();
        signal.complete();
        assert!(signal.wait(Duration::from_millis(1)));
    }
}
