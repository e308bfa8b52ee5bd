//! Ambient cancellation token (spec.md §5/§9).
//!
//! A deadline plus a shared cancel flag, threaded through the RPC client
//! and the authentication pipeline so that a cancelled or expired request
//! budget interrupts any blocked call at its next suspension point,
//! rather than only being checked after the fact. Mirrors the
//! `Arc<AtomicBool>` cancel-flag idiom `camera.rs` already uses for the
//! capture producer thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct CancelToken {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Explicit cancellation, distinct from the deadline simply elapsing.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// True once either the caller cancelled explicitly or the deadline
    /// passed — the condition every suspension point in the pipeline
    /// checks before doing more blocking work.
    pub fn should_stop(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Distinguishes "cancelled while time remained" from "ran out of
    /// time" — the RPC client needs this to report `Cancelled` rather
    /// than `Timeout` for peer cancellation (spec.md §5).
    pub fn was_cancelled_not_expired(&self) -> bool {
        self.is_cancelled() && !self.is_expired()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Shared flag view, for handing to APIs (e.g. `challenge::run`) that
    /// already take a plain `&AtomicBool` cancel signal.
    pub fn flag(&self) -> &AtomicBool {
        &self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_has_remaining_time_and_is_not_stopped() {
        let token = CancelToken::new(Duration::from_secs(5));
        assert!(!token.should_stop());
        assert!(token.remaining() > Duration::from_secs(1));
    }

    #[test]
    fn explicit_cancel_is_distinguished_from_expiry() {
        let token = CancelToken::new(Duration::from_secs(5));
        token.cancel();
        assert!(token.should_stop());
        assert!(token.was_cancelled_not_expired());
    }

    #[test]
    fn expired_deadline_stops_without_explicit_cancel() {
        let token = CancelToken::new(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(token.should_stop());
        assert!(!token.was_cancelled_not_expired());
    }

    #[test]
    fn remaining_never_goes_negative() {
        let token = CancelToken::new(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(token.remaining(), Duration::ZERO);
    }
}
