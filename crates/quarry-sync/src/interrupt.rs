//! Cooperative cancellation shared across scan workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

/// Returned by [`InterruptionState::check`] once a scan has been cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("scan interrupted")]
pub struct Interrupted;

/// A flag shared by every worker of a scan, together with the first
/// failure any worker recorded.
///
/// Long-running loops poll [`InterruptionState::check`] at a bounded
/// frequency (see [`InterruptionState::POLL_INTERVAL`]) and abort at the
/// next poll after [`InterruptionState::interrupt`] has been called or a
/// worker recorded an error. No primitive in this crate depends on OS
/// thread interruption.
pub struct InterruptionState<E> {
    interrupted: AtomicBool,
    error: Mutex<Option<E>>,
}

impl<E> Default for InterruptionState<E> {
    fn default() -> Self {
        Self {
            interrupted: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }
}

impl<E> InterruptionState<E> {
    /// How often a blocking wait re-checks for cancellation.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn interrupt(&self) {
        if !self.interrupted.swap(true, Ordering::SeqCst) {
            tracing::debug!(target: "quarry.sync", "scan interruption requested");
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Record a worker failure. The first error wins; recording any error
    /// also interrupts, so the remaining workers stop at their next poll.
    pub fn set_error(&self, err: E) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        drop(slot);
        self.interrupt();
    }

    pub fn has_error(&self) -> bool {
        self.error.lock().is_some()
    }

    /// Remove and return the recorded error, if any. The interrupted flag
    /// stays set.
    pub fn take_error(&self) -> Option<E> {
        self.error.lock().take()
    }
}

impl<E> std::fmt::Debug for InterruptionState<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptionState")
            .field("interrupted", &self.is_interrupted())
            .field("has_error", &self.has_error())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_reports_interruption() {
        let state: InterruptionState<()> = InterruptionState::new();
        assert_eq!(state.check(), Ok(()));
        state.interrupt();
        state.interrupt();
        assert_eq!(state.check(), Err(Interrupted));
    }

    #[test]
    fn first_error_wins_and_interrupts() {
        let state: InterruptionState<&str> = InterruptionState::new();
        assert!(!state.has_error());

        state.set_error("first");
        state.set_error("second");
        assert!(state.is_interrupted());
        assert_eq!(state.take_error(), Some("first"));
        assert_eq!(state.take_error(), None);
        assert_eq!(state.check(), Err(Interrupted));
    }
}
