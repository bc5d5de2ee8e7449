//! Deadline utilities for a verification run.

use std::time::{Duration, Instant};

pub(crate) fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => Instant::now() >= deadline,
        None => false,
    }
}

pub(crate) fn overall_timeout_duration(timeout_secs: u64) -> Option<Duration> {
    if timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(timeout_secs))
    }
}

pub(crate) fn deadline_from_timeout_secs(timeout_secs: u64) -> Option<Instant> {
    overall_timeout_duration(timeout_secs).and_then(|t| Instant::now().checked_add(t))
}

/// Per-call solver timeout in milliseconds, clipped to what is left before
/// the deadline. Zero means no limit.
pub(crate) fn solver_timeout_ms(solver_timeout_secs: u64, deadline: Option<Instant>) -> u64 {
    let per_call = solver_timeout_secs.saturating_mul(1000);
    let Some(deadline) = deadline else {
        return per_call;
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    let remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX).max(1);
    if per_call == 0 {
        remaining_ms
    } else {
        per_call.min(remaining_ms)
    }
}

pub(crate) fn timeout_reason(context: &str) -> String {
    format!("{context} timed out before completion.")
}
