//! The three ways a caller can run a registered function: in-process
//! (`run_locally`), blocking on a queue round-trip (`run_on_gearman`), or
//! fire-and-forget (`enqueue_on_gearman`). All three return the same
//! uniform `Result` shape via [`crate::job_runner::JobOutcome::into_result`]
//! or an equivalent codec round-trip, so callers don't need to branch on
//! how a function happened to be dispatched.

use std::sync::Arc;

use crate::codec::{self, Dict};
use crate::error::JobResult;
use crate::function::FunctionDescriptor;
use crate::identity::{canonical_job_key, gjs_job_id, PrefixSource};
use crate::job_runner::JobRunner;
use crate::progress::NoopProgressSink;
use crate::queue::{QueueClient, QueueHandle};

pub struct Dispatcher {
    runner: JobRunner,
}

impl Dispatcher {
    pub fn new(runner: JobRunner) -> Self {
        Self { runner }
    }

    /// Runs `descriptor` entirely in-process: no queue, no worker, a fresh
    /// random-prefixed GJS id, and a no-op progress sink (progress reports
    /// are accepted but go nowhere).
    pub async fn run_locally(
        &self,
        descriptor: &FunctionDescriptor,
        args: Option<Dict>,
    ) -> JobResult<Option<Dict>> {
        let key = canonical_job_key(&descriptor.name, args.as_ref());
        let gjs_id = gjs_job_id(PrefixSource::Local, &key)?;

        let outcome = self
            .runner
            .execute(descriptor, &gjs_id, args, Arc::new(NoopProgressSink))
            .await;
        outcome.into_result()
    }

    /// Submits `descriptor` to the queue and blocks until a worker
    /// somewhere finishes it, returning the decoded result. The `JobRunner`
    /// for this attempt runs on whichever worker dequeues it, not here.
    pub async fn run_on_gearman(
        &self,
        descriptor: &FunctionDescriptor,
        args: Option<Dict>,
        queue: &dyn QueueClient,
    ) -> JobResult<Option<Dict>> {
        let payload = codec::encode(args.as_ref())?;
        let unique = unique_token(descriptor, args.as_ref());

        let result_bytes = queue
            .submit_foreground(&descriptor.name, &payload, descriptor.priority, unique.as_deref())
            .await?;

        let wrapped = codec::decode(&result_bytes)?;
        codec::unwrap_result(wrapped)
    }

    /// Submits `descriptor` to the queue and returns immediately with a
    /// handle the caller can later pass to `QueueClient::status`/`cancel`.
    pub async fn enqueue_on_gearman(
        &self,
        descriptor: &FunctionDescriptor,
        args: Option<Dict>,
        queue: &dyn QueueClient,
    ) -> JobResult<QueueHandle> {
        let payload = codec::encode(args.as_ref())?;
        let unique = unique_token(descriptor, args.as_ref());

        queue
            .submit_background(&descriptor.name, &payload, descriptor.priority, unique.as_deref())
            .await
    }
}

fn unique_token(descriptor: &FunctionDescriptor, args: Option<&Dict>) -> Option<String> {
    descriptor.unique.then(|| canonical_job_key(&descriptor.name, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Value;
    use crate::queue::{AdminCommand, AdminResponse, Priority, StatusReport};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeQueue {
        submitted: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl QueueClient for FakeQueue {
        async fn submit_foreground(
            &self,
            function: &str,
            payload: &[u8],
            _priority: Priority,
            unique: Option<&str>,
        ) -> JobResult<Vec<u8>> {
            self.submitted
                .lock()
                .push((function.to_string(), unique.map(str::to_string)));
            // Simulate a worker: decode the submitted args, wrap them as a
            // "result" exactly as `worker.rs::reply` does, and hand the
            // wrapped bytes back as if the job ran to completion.
            let args = codec::decode(payload)?;
            let wrapped = codec::wrap_result(args);
            codec::encode(Some(&wrapped))
        }

        async fn submit_background(
            &self,
            function: &str,
            _payload: &[u8],
            _priority: Priority,
            unique: Option<&str>,
        ) -> JobResult<QueueHandle> {
            self.submitted
                .lock()
                .push((function.to_string(), unique.map(str::to_string)));
            Ok(QueueHandle(format!("H:test:{}", function)))
        }

        async fn status(&self, _handle: &QueueHandle) -> JobResult<StatusReport> {
            Ok(StatusReport {
                known: true,
                running: false,
                numerator: 0,
                denominator: 0,
            })
        }

        async fn cancel(&self, _handle: &QueueHandle) -> JobResult<()> {
            Ok(())
        }

        async fn admin(&self, _command: AdminCommand) -> JobResult<AdminResponse> {
            Ok(AdminResponse(String::new()))
        }
    }

    fn tmp_log_dir() -> String {
        std::env::temp_dir()
            .join(format!("gjs-core-dispatcher-test-{}", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[tokio::test]
    async fn run_on_gearman_round_trips_through_the_codec() {
        let dispatcher = Dispatcher::new(JobRunner::new(tmp_log_dir()));
        let descriptor = FunctionDescriptor::new("Echo", || {
            |args: Option<&Dict>, _: &dyn crate::progress::ProgressSink| Ok(args.cloned())
        });
        let queue = FakeQueue::default();

        let mut args = Dict::new();
        args.insert("x".to_string(), Value::Int(5));

        let result = dispatcher.run_on_gearman(&descriptor, Some(args.clone()), &queue).await.unwrap();
        assert_eq!(result, Some(args));
    }

    #[tokio::test]
    async fn unique_functions_submit_a_canonical_token() {
        let dispatcher = Dispatcher::new(JobRunner::new(tmp_log_dir()));
        let descriptor = FunctionDescriptor::new("Count", || {
            |_: Option<&Dict>, _: &dyn crate::progress::ProgressSink| Ok(None)
        })
        .with_unique(true);
        let queue = FakeQueue::default();

        let mut args = Dict::new();
        args.insert("bucket".to_string(), Value::Str("a".into()));

        let _ = dispatcher.enqueue_on_gearman(&descriptor, Some(args), &queue).await.unwrap();

        let submitted = queue.submitted.lock();
        assert_eq!(submitted[0].1.as_deref(), Some("Count(bucket=a)"));
    }

    #[tokio::test]
    async fn run_locally_needs_no_queue_at_all() {
        let dispatcher = Dispatcher::new(JobRunner::new(tmp_log_dir()));
        let descriptor = FunctionDescriptor::new("Double", || {
            |args: Option<&Dict>, _: &dyn crate::progress::ProgressSink| {
                let n = match args.and_then(|d| d.get("n")) {
                    Some(Value::Int(v)) => *v,
                    _ => 0,
                };
                Ok(Some(Dict::from([("result".to_string(), Value::Int(n * 2))])))
            }
        });

        let mut args = Dict::new();
        args.insert("n".to_string(), Value::Int(21));

        let result = dispatcher.run_locally(&descriptor, Some(args)).await.unwrap();
        assert_eq!(result.unwrap().get("result"), Some(&Value::Int(42)));
    }
}
