//! Notification payload type constants for generation job events.
//!
//! Written into the `type` field of every [`NotifyMessage`](crate::task::NotifyMessage)
//! payload so that clients can tell completions from failures.

/// Generation finished and the result is attached.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Generation failed; the reserved power will be refunded by the reconciler.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";
