//! Error taxonomy for the job dispatch layer.

use thiserror::Error;

/// Result type threaded through every fallible operation in this crate.
pub type JobResult<T> = Result<T, JobError>;

/// Every error this crate can surface, grouped by the component that raises
/// it rather than by underlying cause.
#[derive(Debug, Error)]
pub enum JobError {
    /// The codec's round-trip check failed, or the bytes handed to `decode`
    /// do not describe a value this codec produced.
    #[error("codec error: {0}")]
    Codec(String),

    /// A queue handle string did not match the `H:token:digits` (optionally
    /// `server//`-prefixed) shape.
    #[error("malformed handle: {0}")]
    HandleFormat(String),

    /// The queue backend (the Gearman connection, protocol framing, or
    /// admin channel) failed or returned something this client can't parse.
    #[error("queue error: {0}")]
    Queue(String),

    /// A function ran to exhaustion of its attempt budget and the final
    /// attempt still failed. Carries the last attempt's message.
    #[error("job failed: {0}")]
    JobFailure(String),

    /// A single attempt exceeded its configured timeout.
    #[error("job timed out after {0}s")]
    JobTimeout(u64),

    /// The worker pool already has as many instances of a function running
    /// as its cap allows.
    #[error("pool capacity exceeded for function '{0}'")]
    PoolCapacityExceeded(String),

    /// A function descriptor could not be registered (duplicate name, or a
    /// descriptor attribute failed validation).
    #[error("backend registration error: {0}")]
    BackendRegistration(String),

    /// The notifier's mail transport failed to hand off a message. Non-fatal
    /// to the job itself; the caller decides whether to surface it.
    #[error("notifier error: {0}")]
    Notifier(String),

    /// `ProgressSink::report` was called with a non-positive denominator.
    #[error("invalid progress report: denominator must be > 0, got {0}")]
    InvalidProgress(i64),
}

impl JobError {
    /// True for errors that originate in the queue/transport layer rather
    /// than in the user's function body — useful for callers deciding
    /// whether to log at `warn` vs `error`.
    pub fn is_transport(&self) -> bool {
        matches!(self, JobError::Queue(_) | JobError::HandleFormat(_))
    }
}
