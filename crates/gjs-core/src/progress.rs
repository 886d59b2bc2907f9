//! The progress-reporting sink handed to a running function instance.

use std::sync::Arc;

use crate::error::{JobError, JobResult};

/// What a [`crate::function::FunctionInstance`] calls to report progress.
/// `denominator` must be strictly positive; anything else is an
/// [`JobError::InvalidProgress`].
pub trait ProgressSink: Send + Sync {
    fn report(&self, numerator: i64, denominator: i64) -> JobResult<()>;
}

/// Used when a function runs locally (spec's `run_locally` dispatch mode):
/// progress reports are accepted (so the same function code works
/// unmodified) but go nowhere.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(&self, _numerator: i64, denominator: i64) -> JobResult<()> {
        if denominator <= 0 {
            return Err(JobError::InvalidProgress(denominator));
        }
        Ok(())
    }
}

/// Forwards progress reports to a callback, used by the worker to push
/// `WORK_STATUS` packets back to the queue for a job it is currently
/// running.
pub struct CallbackProgressSink<F>
where
    F: Fn(i64, i64) -> JobResult<()> + Send + Sync,
{
    callback: F,
}

impl<F> CallbackProgressSink<F>
where
    F: Fn(i64, i64) -> JobResult<()> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressSink for CallbackProgressSink<F>
where
    F: Fn(i64, i64) -> JobResult<()> + Send + Sync,
{
    fn report(&self, numerator: i64, denominator: i64) -> JobResult<()> {
        if denominator <= 0 {
            return Err(JobError::InvalidProgress(denominator));
        }
        (self.callback)(numerator, denominator)
    }
}

/// A shared handle to whatever sink is currently bound — rebound around
/// each retry attempt by [`crate::job_runner::JobRunner`] so a function
/// instance from a stale attempt can never report into a later one.
pub type SharedProgressSink = Arc<dyn ProgressSink>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_still_validates_denominator() {
        let sink = NoopProgressSink;
        assert!(sink.report(1, 0).is_err());
        assert!(sink.report(1, 10).is_ok());
    }

    #[test]
    fn callback_sink_forwards_reports() {
        let seen = std::sync::Mutex::new(Vec::new());
        let sink = CallbackProgressSink::new(|n, d| {
            seen.lock().unwrap().push((n, d));
            Ok(())
        });
        sink.report(3, 10).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(3, 10)]);
    }
}
