//! One-shot quorum latch
//!
//! Tracks "enough successes" against "too many failures" across the
//! deliveries of one write. The outcome is decided exactly once and never
//! reverts; waiters are released at the moment it is decided.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;

/// Decision state of a latch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pending,
    Succeeded,
    Failed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Pending => write!(f, "pending"),
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Failed => write!(f, "failed"),
        }
    }
}

/// Counters and outcome of a latch at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatchState {
    pub required_successes: usize,
    pub failure_tolerance: usize,
    pub successes: usize,
    pub failures: usize,
    pub outcome: Outcome,
}

impl LatchState {
    const VIRGIN: LatchState = LatchState {
        required_successes: 0,
        failure_tolerance: 0,
        successes: 0,
        failures: 0,
        outcome: Outcome::Pending,
    };
}

pub struct QuorumLatch {
    state: watch::Sender<LatchState>,
}

impl Default for QuorumLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl QuorumLatch {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LatchState::VIRGIN);
        Self { state }
    }

    /// Shorthand for `new` followed by `configure`.
    pub fn with_quorum(required_successes: usize, total_participants: usize) -> Self {
        let latch = Self::new();
        latch.configure(required_successes, total_participants);
        latch
    }

    /// Arm the latch for one write. A latch that requires no success is
    /// decided on the spot.
    pub fn configure(&self, required_successes: usize, total_participants: usize) {
        self.state.send_modify(|s| {
            debug_assert_eq!(s.successes + s.failures, 0, "configure after records");
            s.required_successes = required_successes;
            s.failure_tolerance = total_participants.saturating_sub(required_successes);
            if required_successes == 0 {
                s.outcome = Outcome::Succeeded;
            }
        });
    }

    pub fn record_success(&self) {
        let decided = self.state.send_if_modified(|s| {
            if s.outcome != Outcome::Pending {
                return false;
            }
            s.successes += 1;
            if s.successes >= s.required_successes {
                s.outcome = Outcome::Succeeded;
                return true;
            }
            false
        });
        if decided {
            tracing::debug!("Quorum latch released: enough successes");
        }
    }

    pub fn record_failure(&self) {
        let decided = self.state.send_if_modified(|s| {
            if s.outcome != Outcome::Pending {
                return false;
            }
            s.failures += 1;
            if s.failures > s.failure_tolerance {
                s.outcome = Outcome::Failed;
                return true;
            }
            false
        });
        if decided {
            tracing::debug!("Quorum latch released: failure tolerance exceeded");
        }
    }

    /// Wait for a decision. Returns `Outcome::Pending` if `timeout` elapses first.
    pub async fn await_outcome(&self, timeout: Duration) -> Outcome {
        let mut rx = self.state.subscribe();
        let decided = rx.wait_for(|s| s.outcome != Outcome::Pending);
        let outcome = match tokio::time::timeout(timeout, decided).await {
            Ok(Ok(state)) => state.outcome,
            // the sender lives in `self`, so the channel cannot close here
            Ok(Err(_)) | Err(_) => self.outcome(),
        };
        outcome
    }

    /// Return to the virgin state. Only valid once every delivery of the
    /// previous write has stopped recording.
    pub fn reset(&self) {
        self.state.send_replace(LatchState::VIRGIN);
    }

    pub fn outcome(&self) -> Outcome {
        self.state.borrow().outcome
    }

    pub fn successes(&self) -> usize {
        self.state.borrow().successes
    }

    pub fn failures(&self) -> usize {
        self.state.borrow().failures
    }

    pub fn state(&self) -> LatchState {
        *self.state.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_succeeds_at_threshold() {
        let latch = QuorumLatch::with_quorum(2, 3);
        assert_eq!(latch.state().failure_tolerance, 1);

        latch.record_success();
        assert_eq!(latch.outcome(), Outcome::Pending);
        latch.record_failure();
        assert_eq!(latch.outcome(), Outcome::Pending);
        latch.record_success();
        assert_eq!(latch.outcome(), Outcome::Succeeded);
    }

    #[test]
    fn test_fails_beyond_tolerance() {
        let latch = QuorumLatch::with_quorum(2, 3);
        latch.record_failure();
        assert_eq!(latch.outcome(), Outcome::Pending);
        latch.record_failure();
        assert_eq!(latch.outcome(), Outcome::Failed);
        assert_eq!(latch.failures(), 2);
    }

    #[test]
    fn test_outcome_never_reverts_and_counters_freeze() {
        let latch = QuorumLatch::with_quorum(1, 3);
        latch.record_success();
        assert_eq!(latch.outcome(), Outcome::Succeeded);

        for _ in 0..5 {
            latch.record_failure();
            latch.record_success();
        }
        assert_eq!(latch.outcome(), Outcome::Succeeded);
        assert_eq!(latch.successes(), 1);
        assert_eq!(latch.failures(), 0);
    }

    #[test]
    fn test_order_independent() {
        // every interleaving of 2 successes and 1 failure succeeds for (2, 3)
        let orders: [[bool; 3]; 3] = [
            [true, true, false],
            [true, false, true],
            [false, true, true],
        ];
        for order in orders {
            let latch = QuorumLatch::with_quorum(2, 3);
            for success in order {
                if success {
                    latch.record_success();
                } else {
                    latch.record_failure();
                }
            }
            assert_eq!(latch.outcome(), Outcome::Succeeded, "order {:?}", order);
        }
    }

    #[test]
    fn test_zero_required_is_decided() {
        let latch = QuorumLatch::with_quorum(0, 3);
        assert_eq!(latch.outcome(), Outcome::Succeeded);
        latch.record_failure();
        latch.record_failure();
        latch.record_failure();
        latch.record_failure();
        assert_eq!(latch.outcome(), Outcome::Succeeded);
    }

    #[test]
    fn test_zero_tolerance() {
        let latch = QuorumLatch::with_quorum(3, 3);
        latch.record_success();
        latch.record_success();
        latch.record_failure();
        assert_eq!(latch.outcome(), Outcome::Failed);
    }

    #[test]
    fn test_reset() {
        let latch = QuorumLatch::with_quorum(1, 1);
        latch.record_failure();
        assert_eq!(latch.outcome(), Outcome::Failed);

        latch.reset();
        assert_eq!(latch.state(), LatchState::VIRGIN);

        latch.configure(1, 2);
        latch.record_success();
        assert_eq!(latch.outcome(), Outcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_times_out_as_pending() {
        let latch = QuorumLatch::with_quorum(2, 3);
        latch.record_success();
        assert_eq!(
            latch.await_outcome(Duration::from_secs(5)).await,
            Outcome::Pending
        );
    }

    #[tokio::test]
    async fn test_await_wakes_on_decision() {
        let latch = Arc::new(QuorumLatch::with_quorum(2, 4));

        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.await_outcome(Duration::from_secs(10)).await })
        };

        for _ in 0..2 {
            let latch = latch.clone();
            tokio::spawn(async move { latch.record_success() });
        }

        assert_eq!(waiter.await.unwrap(), Outcome::Succeeded);
    }

    #[tokio::test]
    async fn test_await_after_decision_returns_immediately() {
        let latch = QuorumLatch::with_quorum(1, 1);
        latch.record_failure();
        latch.record_failure();
        assert_eq!(
            latch.await_outcome(Duration::from_millis(1)).await,
            Outcome::Failed
        );
    }
}
