//! Drives a single job's lifecycle: per-attempt log isolation, the full
//! retry loop, timeout enforcement, and failure notification — regardless
//! of whether the job is running locally, in the foreground of a queue
//! submission, or inside a worker.
//!
//! All attempts for one job happen inside one [`JobRunner::execute`] call
//! and are appended to the same log file; the queue is only told the final
//! outcome once (`complete`/`fail`), never per attempt.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;

use crate::codec::Dict;
use crate::error::{JobError, JobResult};
use crate::function::FunctionDescriptor;
use crate::metrics::JobMetrics;
use crate::notifier::Notifier;
use crate::progress::SharedProgressSink;

/// The lifecycle states spec §4.9 names. `JobRunner` itself only ever
/// produces a terminal [`JobOutcome`]; this enum exists so callers (and
/// tests) can talk about the state machine by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Created,
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// The terminal result of running a job through its whole retry budget.
/// `into_result` is the uniform wrapping every dispatch mode
/// (`run_locally`, `run_on_gearman`, `enqueue_on_gearman`) converts this
/// into, so callers see the same `Result` shape no matter how the job was
/// dispatched.
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(Option<Dict>),
    Failed { message: String },
    TimedOut { message: String, after_secs: u64 },
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Succeeded(_) => JobState::Succeeded,
            JobOutcome::Failed { .. } => JobState::Failed,
            JobOutcome::TimedOut { .. } => JobState::TimedOut,
        }
    }

    pub fn into_result(self) -> JobResult<Option<Dict>> {
        match self {
            JobOutcome::Succeeded(v) => Ok(v),
            JobOutcome::Failed { message } => Err(JobError::JobFailure(message)),
            JobOutcome::TimedOut { after_secs, .. } => Err(JobError::JobTimeout(after_secs)),
        }
    }
}

/// Serializes the one piece of this crate's isolation contract that is
/// genuinely process-global: redirecting fd 1/2 into a job's log file.
/// Workers run as independent OS threads in the same process (see
/// `worker_pool`), so without this lock two jobs running concurrently on
/// different workers could interleave or overwrite each other's captured
/// output. Holding it for the duration of one attempt trades throughput
/// for the guarantee that "one job's streams must not leak into another's"
/// holds exactly, not just approximately.
static STDIO_LOCK: OnceLock<AsyncMutex<()>> = OnceLock::new();

fn stdio_lock() -> &'static AsyncMutex<()> {
    STDIO_LOCK.get_or_init(|| AsyncMutex::new(()))
}

/// Writes timestamped lines directly to a job's log file. Deliberately not
/// routed through `tracing` — this file may be the current redirect target
/// of stdout/stderr, and a subscriber that itself writes to stdout would
/// recurse into the stream it's supposed to be isolating.
struct JobLog {
    file: File,
    pid: u32,
}

impl JobLog {
    fn open(path: &Path, restarting: bool) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut log = Self {
            file,
            pid: std::process::id(),
        };
        log.line(if restarting { "Restarting job" } else { "Starting job" });
        Ok(log)
    }

    fn line(&mut self, message: &str) {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let _ = writeln!(self.file, "[{timestamp}] [{}] {message}", self.pid);
        let _ = self.file.flush();
    }

    fn try_clone_file(&self) -> std::io::Result<File> {
        self.file.try_clone()
    }
}

pub struct JobRunner {
    log_dir: String,
    notifier: Option<std::sync::Arc<dyn Notifier>>,
}

impl JobRunner {
    pub fn new(log_dir: impl Into<String>) -> Self {
        Self {
            log_dir: log_dir.into(),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: std::sync::Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn log_path(&self, descriptor: &FunctionDescriptor, gjs_id: &str) -> PathBuf {
        let sanitized_name: String = descriptor
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        Path::new(&self.log_dir).join(sanitized_name).join(format!("{gjs_id}.log"))
    }

    /// Runs `descriptor` against `args` under `gjs_id`, looping attempts up
    /// to `descriptor.max_attempts()` and returning the terminal outcome.
    pub async fn execute(
        &self,
        descriptor: &FunctionDescriptor,
        gjs_id: &str,
        args: Option<Dict>,
        progress: SharedProgressSink,
    ) -> JobOutcome {
        let log_path = self.log_path(descriptor, gjs_id);
        let mut attempt_notes = Vec::new();
        let mut last_was_timeout = false;
        let started = Instant::now();

        for attempt in 0..descriptor.max_attempts() {
            let restarting = attempt > 0;
            let outcome = self
                .run_one_attempt(descriptor, &log_path, restarting, args.as_ref(), progress.clone())
                .await;

            match outcome {
                Ok(result) => {
                    JobMetrics::completed(&descriptor.name, started.elapsed());
                    return JobOutcome::Succeeded(result);
                }
                Err(JobError::JobTimeout(secs)) => {
                    JobMetrics::timed_out(&descriptor.name);
                    last_was_timeout = true;
                    attempt_notes.push(format!("attempt {attempt}: timed out after {secs}s"));
                }
                Err(e) => {
                    last_was_timeout = false;
                    attempt_notes.push(format!("attempt {attempt}: {e}"));
                }
            }

            let is_last_attempt = attempt + 1 == descriptor.max_attempts();
            if !is_last_attempt {
                JobMetrics::retried(&descriptor.name, attempt + 1);
                append_log_line(&log_path, &format!("Retrying ({})...", attempt + 1));
            }
        }

        JobMetrics::failed(&descriptor.name, started.elapsed());
        let mut message = attempt_notes.join("; ");
        if let Err(notify_err) = self.notify_failure(descriptor, gjs_id, &log_path, &message).await {
            message.push_str(&format!("; notification failed: {notify_err}"));
        }

        if last_was_timeout {
            let after_secs = descriptor.timeout.as_secs();
            JobOutcome::TimedOut { message, after_secs }
        } else {
            JobOutcome::Failed { message }
        }
    }

    async fn run_one_attempt(
        &self,
        descriptor: &FunctionDescriptor,
        log_path: &Path,
        restarting: bool,
        args: Option<&Dict>,
        progress: SharedProgressSink,
    ) -> JobResult<Option<Dict>> {
        let guard = stdio_lock().lock().await;

        let mut log = JobLog::open(log_path, restarting)
            .map_err(|e| JobError::JobFailure(format!("could not open job log: {e}")))?;

        let stdout_file = log
            .try_clone_file()
            .map_err(|e| JobError::JobFailure(format!("could not clone log handle: {e}")))?;
        let stderr_file = log
            .try_clone_file()
            .map_err(|e| JobError::JobFailure(format!("could not clone log handle: {e}")))?;

        let stdout_redirect = gag::Redirect::stdout(stdout_file)
            .map_err(|e| JobError::JobFailure(format!("stdout redirect failed: {e}")))?;
        let stderr_redirect = gag::Redirect::stderr(stderr_file)
            .map_err(|e| JobError::JobFailure(format!("stderr redirect failed: {e}")))?;

        let instance = descriptor.instantiate();
        let owned_args = args.cloned();
        let result = run_with_timeout(instance, owned_args, progress, descriptor.timeout).await;

        match &result {
            Ok(_) => log.line("Finished job: success"),
            Err(e) => log.line(&format!("Finished job: failure: {e}")),
        }

        drop(stdout_redirect);
        drop(stderr_redirect);
        drop(guard);

        result
    }

    /// Sends the terminal-failure notification, if configured. Returns the
    /// notifier's error (rather than swallowing it) so `execute` can append
    /// it to the job's own failure message — spec §4.5/§8 property 8 require
    /// that a notification failure never *replace* the surfaced job
    /// failure, only ride alongside it.
    async fn notify_failure(
        &self,
        descriptor: &FunctionDescriptor,
        gjs_id: &str,
        log_path: &Path,
        message: &str,
    ) -> JobResult<()> {
        if !descriptor.notify_on_failure {
            return Ok(());
        }
        let Some(notifier) = &self.notifier else {
            return Ok(());
        };

        let tail = read_log_tail(log_path, 50).unwrap_or_default();
        let subject = format!("Function \"{}\" failed", descriptor.name);
        let host = hostname();
        let timestamp = chrono::Utc::now().to_rfc3339();
        let body = format!(
            "function: {}\nhost: {host}\ntime: {timestamp}\nlog: {}\n\n{message}\n\n--- last log lines ---\n{tail}",
            descriptor.name,
            log_path.display(),
        );

        notifier.notify(&subject, &body).await.map_err(|notify_err| {
            tracing::warn!(job = %gjs_id, error = %notify_err, "failure notification itself failed");
            notify_err
        })
    }
}

/// Appends one timestamped line to a job's log outside of the
/// stdio-redirection window (used for the retry banner between attempts,
/// which is logged by the runner itself, not by the redirected process
/// streams). Best-effort: a write failure here must never fail the job.
fn append_log_line(path: &Path, message: &str) {
    let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let timestamp = chrono::Utc::now().to_rfc3339();
    let _ = writeln!(file, "[{timestamp}] [{}] {message}", std::process::id());
}

/// Best-effort local hostname for failure notification bodies; falls back
/// to a fixed placeholder rather than failing the notification outright.
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Reads the last `n` lines of a job's log file, used to enrich failure
/// notifications. Best-effort: a missing or unreadable file yields `None`.
fn read_log_tail(path: &Path, n: usize) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Some(lines[start..].join("\n"))
}

/// Runs one attempt's function body on a dedicated OS thread so a timeout
/// can be enforced without needing the function itself to be
/// cancellation-aware. If the timeout elapses first, the thread is
/// abandoned (Rust has no safe way to force-stop it) — its eventual result,
/// if any, is simply discarded. A panic inside the function is caught and
/// turned into a `JobFailure` rather than taking the worker down with it.
async fn run_with_timeout(
    mut instance: Box<dyn crate::function::FunctionInstance>,
    args: Option<Dict>,
    progress: SharedProgressSink,
    timeout: Duration,
) -> JobResult<Option<Dict>> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    std::thread::spawn(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            instance.run(args.as_ref(), progress.as_ref())
        }))
        .unwrap_or_else(|_| Err(JobError::JobFailure("function panicked".into())));
        let _ = tx.send(result);
    });

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(JobError::JobFailure("function thread ended without a result".into())),
        Err(_) => Err(JobError::JobTimeout(timeout.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::CapturingMailTransport;
    use crate::notifier::EmailNotifier;
    use crate::progress::NoopProgressSink;
    use std::sync::Arc;

    fn tmp_log_dir(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("gjs-core-test-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let runner = JobRunner::new(tmp_log_dir("succeeds"));
        let descriptor = FunctionDescriptor::new("Add", || {
            |args: Option<&Dict>, _: &dyn crate::progress::ProgressSink| {
                let a = match args.and_then(|d| d.get("a")) {
                    Some(crate::codec::Value::Int(v)) => *v,
                    _ => 0,
                };
                Ok(Some(Dict::from([("sum".to_string(), crate::codec::Value::Int(a))])))
            }
        });

        let mut args = Dict::new();
        args.insert("a".to_string(), crate::codec::Value::Int(7));

        let outcome = runner
            .execute(&descriptor, "test.Add(a=7)", Some(args), Arc::new(NoopProgressSink))
            .await;

        match outcome {
            JobOutcome::Succeeded(Some(result)) => {
                assert_eq!(result.get("sum"), Some(&crate::codec::Value::Int(7)));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retries_exactly_retries_plus_one_times_then_fails() {
        let runner = JobRunner::new(tmp_log_dir("retries"));
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls_in_closure = calls.clone();

        let descriptor = FunctionDescriptor::new("AlwaysFails", move || {
            let calls = calls_in_closure.clone();
            move |_: Option<&Dict>, _: &dyn crate::progress::ProgressSink| {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(JobError::JobFailure("nope".into()))
            }
        })
        .with_retries(2);

        let outcome = runner
            .execute(&descriptor, "test.AlwaysFails()", None, Arc::new(NoopProgressSink))
            .await;

        assert!(matches!(outcome, JobOutcome::Failed { .. }));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn notifies_on_terminal_failure_when_configured() {
        let transport = Arc::new(CapturingMailTransport::new());
        let notifier = Arc::new(EmailNotifier::new(
            CapturingMailTransportHandle(transport.clone()),
            vec!["oncall@example.com".into()],
            "gjs@example.com".into(),
            "[gjs] ".into(),
        ));

        let runner = JobRunner::new(tmp_log_dir("notifies")).with_notifier(notifier);
        let descriptor = FunctionDescriptor::new("AlwaysFails", || {
            |_: Option<&Dict>, _: &dyn crate::progress::ProgressSink| {
                Err(JobError::JobFailure("boom".into()))
            }
        })
        .with_notify_on_failure(true);

        let _ = runner
            .execute(&descriptor, "test.AlwaysFails()", None, Arc::new(NoopProgressSink))
            .await;

        assert_eq!(transport.sent().len(), 1);
    }

    /// A thin `MailTransport` that forwards to a shared `CapturingMailTransport`
    /// so the test above can inspect it after the notifier (which owns its
    /// transport by value) has been moved into an `Arc`.
    struct CapturingMailTransportHandle(Arc<CapturingMailTransport>);

    #[async_trait::async_trait]
    impl crate::notifier::MailTransport for CapturingMailTransportHandle {
        async fn send(&self, email: &crate::notifier::Email) -> JobResult<()> {
            self.0.send(email).await
        }
    }

    /// A `Notifier` that always fails, used to prove a notification failure
    /// rides alongside the job's own failure instead of replacing it.
    struct FailingNotifier;

    #[async_trait::async_trait]
    impl crate::notifier::Notifier for FailingNotifier {
        async fn notify(&self, _subject: &str, _body: &str) -> JobResult<()> {
            Err(JobError::Notifier("smtp relay unreachable".into()))
        }
    }

    #[tokio::test]
    async fn notification_failure_is_appended_not_substituted() {
        let runner = JobRunner::new(tmp_log_dir("notify-fails")).with_notifier(Arc::new(FailingNotifier));
        let descriptor = FunctionDescriptor::new("AlwaysFails", || {
            |_: Option<&Dict>, _: &dyn crate::progress::ProgressSink| {
                Err(JobError::JobFailure("boom".into()))
            }
        })
        .with_notify_on_failure(true);

        let outcome = runner
            .execute(&descriptor, "test.AlwaysFails()", None, Arc::new(NoopProgressSink))
            .await;

        match outcome {
            JobOutcome::Failed { message } => {
                assert!(message.contains("boom"), "original failure must survive: {message}");
                assert!(
                    message.contains("notification failed") && message.contains("smtp relay unreachable"),
                    "notifier error must be appended: {message}"
                );
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
