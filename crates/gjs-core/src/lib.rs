//! gjs-core — a uniform function-dispatch layer over a Gearman-style job
//! queue.
//!
//! A registered function (a [`function::FunctionDescriptor`]) can be run
//! three ways through the same [`dispatcher::Dispatcher`] — in-process, as a
//! blocking round trip through the queue, or fire-and-forget — and all three
//! converge on the same `Result<Option<Dict>, JobError>` shape. Every
//! attempt of every run, regardless of dispatch mode, passes through exactly
//! one [`job_runner::JobRunner`], which owns retrying, per-job log
//! isolation, timeout enforcement, and failure notification.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         gjs-core Architecture                         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                        │
//! │   Caller                                                               │
//! │     │                                                                  │
//! │     ▼                                                                  │
//! │  ┌────────────────────────────────────────────────────────────────┐   │
//! │  │                          Dispatcher                              │   │
//! │  │   run_locally        run_on_gearman        enqueue_on_gearman    │   │
//! │  └──────┬───────────────────┬───────────────────────┬──────────────┘   │
//! │         │                   │                       │                  │
//! │         │           ┌───────┴────────┐      ┌───────┴────────┐        │
//! │         │           │  QueueClient    │      │  QueueClient    │        │
//! │         │           │ (Gearman TCP)   │      │ submit_background│        │
//! │         │           └───────┬────────┘      └───────┬────────┘        │
//! │         │                   │                       │                  │
//! │         │                   ▼                       ▼                  │
//! │         │           ┌──────────────────────────────────────┐          │
//! │         │           │              WorkerPool                │          │
//! │         │           │  ┌──────────┐ ┌──────────┐ ┌────────┐ │          │
//! │         │           │  │ Worker 1 │ │ Worker 2 │ │Worker N│ │          │
//! │         │           │  └────┬─────┘ └────┬─────┘ └───┬────┘ │          │
//! │         │           └───────┼────────────┼───────────┼──────┘          │
//! │         ▼                   ▼            ▼           ▼                  │
//! │  ┌────────────────────────────────────────────────────────────────┐   │
//! │  │                          JobRunner                                │   │
//! │  │   retry loop · per-job log isolation · timeout · notification    │   │
//! │  └────────────────────────────────────────────────────────────────┘   │
//! │                                                                        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use gjs_core::{Dict, Dispatcher, FunctionDescriptor, JobRunner, Value};
//!
//! let descriptor = FunctionDescriptor::new("Add", || {
//!     |args: Option<&Dict>, _progress: &dyn gjs_core::ProgressSink| {
//!         let a = match args.and_then(|d| d.get("a")) {
//!             Some(Value::Int(v)) => *v,
//!             _ => 0,
//!         };
//!         let b = match args.and_then(|d| d.get("b")) {
//!             Some(Value::Int(v)) => *v,
//!             _ => 0,
//!         };
//!         Ok(Some(Dict::from([("sum".to_string(), Value::Int(a + b))])))
//!     }
//! })
//! .with_retries(2);
//!
//! let dispatcher = Dispatcher::new(JobRunner::new("/var/log/gjs/workers"));
//! let mut args = Dict::new();
//! args.insert("a".to_string(), Value::Int(2));
//! args.insert("b".to_string(), Value::Int(3));
//!
//! let result = dispatcher.run_locally(&descriptor, Some(args)).await?;
//! # Ok::<(), gjs_core::JobError>(())
//! ```

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod function;
pub mod gearman;
pub mod identity;
pub mod job_runner;
pub mod metrics;
pub mod notifier;
pub mod progress;
pub mod queue;
pub mod worker;
pub mod worker_pool;

pub use codec::{decode, encode, Dict, Value};
pub use config::GjsConfig;
pub use dispatcher::Dispatcher;
pub use error::{JobError, JobResult};
pub use function::{FunctionDescriptor, FunctionInstance};
pub use gearman::{GearmanQueueClient, GearmanWorkerConnection};
pub use identity::{canonical_job_key, gjs_job_id, PrefixSource};
pub use job_runner::{JobOutcome, JobRunner, JobState};
pub use metrics::{register_metrics, JobMetrics, WorkerMetrics};
pub use notifier::{CapturingMailTransport, Email, EmailNotifier, LoggingMailTransport, MailTransport, Notifier};
pub use progress::{CallbackProgressSink, NoopProgressSink, ProgressSink, SharedProgressSink};
pub use queue::{
    AdminCommand, AdminResponse, FunctionStats, Priority, QueueClient, QueueHandle, QueueStats,
    StatusReport, WorkerInfo,
};
pub use worker::Worker;
pub use worker_pool::{discover_function_modules, WorkerPool, WorkerPoolStats};

/// Re-exports the handful of items most call sites need.
pub mod prelude {
    pub use crate::codec::{Dict, Value};
    pub use crate::dispatcher::Dispatcher;
    pub use crate::function::{FunctionDescriptor, FunctionInstance};
    pub use crate::progress::ProgressSink;
    pub use crate::queue::{Priority, QueueClient};
    pub use crate::{JobError, JobResult};
}
