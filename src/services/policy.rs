use chrono::{Duration, NaiveDateTime};

/// Below this many hours before start, cancellation is refused outright.
pub const APPROVAL_WINDOW_HOURS: i64 = 6;
/// At or beyond this many hours before start, cancellation is immediate.
pub const DIRECT_CANCEL_HOURS: i64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationDecision {
    /// start_time is in the past.
    AlreadyStarted,
    /// Less than `APPROVAL_WINDOW_HOURS` to go.
    TooLate,
    /// Between the two thresholds: transition to cancellation_requested and
    /// wait for the teacher.
    RequiresApproval,
    /// `DIRECT_CANCEL_HOURS` or more to go: cancel and refund immediately.
    Direct,
}

/// The whole cancellation-window rule lives in this one function of
/// `(now, start_time)` so it is testable without booking or ledger state.
pub fn evaluate_cancellation(now: NaiveDateTime, start: NaiveDateTime) -> CancellationDecision {
    let until_start = start - now;

    if until_start < Duration::zero() {
        CancellationDecision::AlreadyStarted
    } else if until_start < Duration::hours(APPROVAL_WINDOW_HOURS) {
        CancellationDecision::TooLate
    } else if until_start < Duration::hours(DIRECT_CANCEL_HOURS) {
        CancellationDecision::RequiresApproval
    } else {
        CancellationDecision::Direct
    }
}
