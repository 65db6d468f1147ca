//! Retry orchestrator (C4, `spec.md` §4.4).
//!
//! Backoff shape is grounded in the teacher's `compute_backoff_seconds`
//! (`keeper-rs/src/main.rs`): `base * 2^(failures-1)` capped at `b_max`. The
//! jitter is multiplicative (`spec.md` §4.4 fixes this as a hard contract),
//! unlike the teacher's additive deterministic jitter.

use kv_protocol::OpCode;
use rand::Rng;
use std::time::Duration;

/// Why a command is being considered for retry (`spec.md` §4.4 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    KvNotMyVbucket,
    KvLocked,
    KvTemporaryFailure,
    KvSyncWriteInProgress,
    KvSyncWriteReCommitInProgress,
    KvCollectionOutdated,
    ErrorMapRetryNow,
    ErrorMapRetryLater,
    SocketClosedWhileInFlight,
    DoNotRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    RetrySameNode,
    RetryOtherNode,
    DoNotRetry,
}

/// Backoff shape: exponential with multiplicative jitter (`spec.md` §4.4).
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy { base: Duration::from_millis(1), max: Duration::from_millis(500), jitter_fraction: 0.1 }
    }
}

impl BackoffPolicy {
    /// `base * 2^(attempt-1)`, capped at `max`, times a jitter factor drawn
    /// uniformly from `[1 - j, 1 + j]`.
    pub fn compute(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let unjittered = self.base.as_secs_f64() * 2f64.powi(exp as i32);
        let capped = unjittered.min(self.max.as_secs_f64());
        let jitter = rand::thread_rng().gen_range((1.0 - self.jitter_fraction)..=(1.0 + self.jitter_fraction));
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }
}

/// Decides the retry action for `(opcode, reason)` per the table in
/// `spec.md` §4.4.
pub fn decide(opcode: OpCode, reason: RetryReason) -> RetryAction {
    use RetryAction as A;
    use RetryReason as R;
    match reason {
        R::DoNotRetry => A::DoNotRetry,
        R::KvNotMyVbucket => A::RetryOtherNode,
        R::KvLocked => {
            if matches!(opcode, OpCode::Unlock) {
                A::DoNotRetry
            } else {
                A::RetrySameNode
            }
        }
        R::KvTemporaryFailure | R::KvSyncWriteInProgress | R::KvSyncWriteReCommitInProgress => {
            A::RetrySameNode
        }
        R::KvCollectionOutdated => A::RetrySameNode,
        R::ErrorMapRetryNow | R::ErrorMapRetryLater => A::RetrySameNode,
        R::SocketClosedWhileInFlight => {
            if opcode.is_idempotent() {
                A::RetryOtherNode
            } else {
                A::DoNotRetry
            }
        }
    }
}

/// Outcome of asking the orchestrator to retry a command whose remaining
/// deadline budget is `remaining`. If the computed delay would exceed the
/// budget, sleep until the deadline then fail, per `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineOutcome {
    Delay(Duration),
    ExceedsDeadline,
}

pub fn delay_within_deadline(policy: &BackoffPolicy, attempt: u32, remaining: Duration) -> DeadlineOutcome {
    let delay = policy.compute(attempt);
    if delay > remaining {
        DeadlineOutcome::ExceedsDeadline
    } else {
        DeadlineOutcome::Delay(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_my_vbucket_retries_on_other_node() {
        assert_eq!(decide(OpCode::Get, RetryReason::KvNotMyVbucket), RetryAction::RetryOtherNode);
    }

    #[test]
    fn locked_retries_except_for_unlock() {
        assert_eq!(decide(OpCode::Get, RetryReason::KvLocked), RetryAction::RetrySameNode);
        assert_eq!(decide(OpCode::Unlock, RetryReason::KvLocked), RetryAction::DoNotRetry);
    }

    #[test]
    fn socket_closed_honours_idempotence() {
        assert_eq!(
            decide(OpCode::Get, RetryReason::SocketClosedWhileInFlight),
            RetryAction::RetryOtherNode
        );
        assert_eq!(
            decide(OpCode::Set, RetryReason::SocketClosedWhileInFlight),
            RetryAction::DoNotRetry
        );
    }

    #[test]
    fn do_not_retry_is_always_terminal() {
        assert_eq!(decide(OpCode::Get, RetryReason::DoNotRetry), RetryAction::DoNotRetry);
    }

    #[test]
    fn backoff_is_capped_and_jittered_within_bounds() {
        let policy = BackoffPolicy { base: Duration::from_millis(10), max: Duration::from_millis(100), jitter_fraction: 0.1 };
        for attempt in 1..10 {
            let d = policy.compute(attempt);
            assert!(d.as_secs_f64() <= 0.1 * 1.1 + 1e-9, "attempt {attempt} exceeded cap+jitter: {d:?}");
        }
    }

    #[test]
    fn delay_exceeding_deadline_is_flagged() {
        let policy = BackoffPolicy { base: Duration::from_secs(10), max: Duration::from_secs(10), jitter_fraction: 0.0 };
        assert_eq!(
            delay_within_deadline(&policy, 1, Duration::from_millis(100)),
            DeadlineOutcome::ExceedsDeadline
        );
    }
}
