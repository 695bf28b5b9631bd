use crate::models::PollState;
use thiserror::Error;

/// Everything a caller can get back from the core. All variants are
/// returned as typed results, never used for internal control flow.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Value outside [0,10] or a malformed/unknown identifier.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Role/capability mismatch or an unauthenticated contributor.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// Write attempted outside the poll's active window.
    #[error("poll {poll_id} is {state}; writes are only accepted while active")]
    PollState { poll_id: String, state: PollState },

    /// Resubmission with a different value than the immutable original.
    /// The original value is retained and the new one discarded.
    #[error("contribution already recorded with value {existing}, refusing {submitted}")]
    DuplicateContribution { existing: f64, submitted: f64 },

    /// Transient infrastructure fault; callers retry with backoff.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Per-subscriber delivery failure; isolated and non-fatal.
    #[error("observer delivery failed: {0}")]
    ObserverDelivery(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
