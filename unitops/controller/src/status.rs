//! Pure decisions over a [`GrpcCallStatus`]: whether it needs persisting, and what a
//! reconciliation has to do with the call it belongs to.

use std::time::Duration;

use chrono::{DateTime, Utc};
use unitops_kube::crd::{GrpcCall, GrpcCallStatus};

/// `true` when any of the persisted fields differ. Timestamps are compared exactly.
pub fn has_changed(new: &GrpcCallStatus, old: &GrpcCallStatus) -> bool {
    new.result != old.result
        || new.message != old.message
        || new.start_time != old.start_time
        || new.completion_time != old.completion_time
}

/// Time left until a completed call may be deleted, [`None`] for calls that are not
/// completed.
pub fn ttl_remaining(
    status: &GrpcCallStatus,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let completed = status.completion_time?;
    let elapsed = now.signed_duration_since(completed);

    // A negative elapsed time (clock skew) fails `to_std`, the full ttl is left then.
    let elapsed = elapsed.to_std().unwrap_or_default();
    Some(ttl.saturating_sub(elapsed))
}

/// `true` iff the call completed and at least `ttl` passed since.
pub fn should_delete(status: &GrpcCallStatus, ttl: Duration, now: DateTime<Utc>) -> bool {
    ttl_remaining(status, ttl, now).is_some_and(|remaining| remaining.is_zero())
}

/// Where a call stands, decides the work of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// Completed without a TTL, kept until someone else deletes it.
    Retained,

    /// Completed, deleted once `remaining` elapsed.
    PendingTtl { remaining: Duration },

    /// Completed and past its TTL.
    ExpiredTtl,

    /// Claimed at `since` by an earlier reconciliation that never completed it.
    AlreadyStarted { since: DateTime<Utc> },

    /// Never claimed.
    Fresh,
}

impl CallState {
    pub fn of(call: &GrpcCall, now: DateTime<Utc>) -> Self {
        let Some(status) = call.status.as_ref() else {
            return Self::Fresh;
        };

        if status.completion_time.is_some() {
            return match call.spec.ttl_after_finished() {
                None => Self::Retained,
                Some(ttl) => match ttl_remaining(status, ttl, now) {
                    Some(remaining) if !remaining.is_zero() => Self::PendingTtl { remaining },
                    _ => Self::ExpiredTtl,
                },
            };
        }

        match status.start_time {
            Some(since) => Self::AlreadyStarted { since },
            None => Self::Fresh,
        }
    }
}
