//! The abstract queue-side contract: submit, check status, cancel, and run
//! administrative commands against an opaque Gearman-shaped job queue.
//!
//! A dequeued job is handed to [`crate::job_runner::JobRunner`] exactly
//! once; the queue itself does not retry, delay, or dead-letter jobs — spec
//! §4.5's retry loop lives entirely inside one `JobRunner::execute` call.

use async_trait::async_trait;

use crate::error::JobResult;

/// Submission priority. Mirrors Gearman's own three-level priority, used to
/// pick `SUBMIT_JOB` vs `SUBMIT_JOB_HIGH` vs `SUBMIT_JOB_LOW` (and their
/// `_BG` background counterparts).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// An opaque queue handle, as returned by a background submission and
/// accepted by `status`/`cancel`. Wraps the raw Gearman handle string (e.g.
/// `H:host.example:123`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub String);

impl std::fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A snapshot of a queued or running job's progress, as returned by
/// `status`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport {
    /// Whether the queue still recognizes the handle.
    pub known: bool,
    /// Whether the job is currently running.
    pub running: bool,
    pub numerator: u64,
    pub denominator: u64,
}

/// A plaintext administrative command (`status`, `workers`, `version`,
/// `show jobs`, `show unique jobs`, `getpid`, `create function`,
/// `drop function`, `shutdown`, or `cancel job <id>`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    Status,
    Workers,
    Version,
    ShowJobs,
    ShowUniqueJobs,
    GetPid,
    CreateFunction(String),
    DropFunction(String),
    Shutdown,
    CancelJob(String),
}

impl AdminCommand {
    /// Renders the command the way the Gearman admin protocol expects it on
    /// the wire: a single line terminated by `\r\n`.
    pub fn to_line(&self) -> String {
        match self {
            AdminCommand::Status => "status\r\n".to_string(),
            AdminCommand::Workers => "workers\r\n".to_string(),
            AdminCommand::Version => "version\r\n".to_string(),
            AdminCommand::ShowJobs => "show jobs\r\n".to_string(),
            AdminCommand::ShowUniqueJobs => "show unique jobs\r\n".to_string(),
            AdminCommand::GetPid => "getpid\r\n".to_string(),
            AdminCommand::CreateFunction(name) => format!("create function {name}\r\n"),
            AdminCommand::DropFunction(name) => format!("drop function {name}\r\n"),
            AdminCommand::Shutdown => "shutdown\r\n".to_string(),
            AdminCommand::CancelJob(id) => format!("cancel job {id}\r\n"),
        }
    }
}

/// The raw text response to an administrative command. `cancel job` is
/// special-cased by callers: success is exactly the line `OK\r\n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminResponse(pub String);

impl AdminResponse {
    pub fn is_cancel_ok(&self) -> bool {
        self.0.trim_end_matches(['\r', '\n']) == "OK"
    }
}

/// One line of a `status` admin response: a registered function and its
/// queue depth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionStats {
    pub function: String,
    pub queued: u64,
    pub running: u64,
    pub available_workers: u64,
}

/// One line of a `workers` admin response: a live worker connection and the
/// functions it has registered via `CAN_DO`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerInfo {
    pub file_descriptor: String,
    pub ip_address: String,
    pub client_id: String,
    pub functions: Vec<String>,
}

/// A dashboard-shaped read model over the Gearman admin protocol's `status`
/// and `workers` commands, for callers (spec §6's admin surface) that want
/// structured data rather than the server's raw tab/space-delimited text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub functions: Vec<FunctionStats>,
    pub workers: Vec<WorkerInfo>,
}

impl QueueStats {
    /// Parses a `status` response: lines of
    /// `function\tqueued\trunning\tavailable_workers`, terminated by a bare
    /// `.` line.
    pub fn parse_status(response: &AdminResponse) -> Vec<FunctionStats> {
        response
            .0
            .lines()
            .map(str::trim_end)
            .take_while(|line| *line != ".")
            .filter_map(|line| {
                let mut fields = line.split('\t');
                let function = fields.next()?.to_string();
                let queued = fields.next()?.parse().ok()?;
                let running = fields.next()?.parse().ok()?;
                let available_workers = fields.next()?.parse().ok()?;
                Some(FunctionStats {
                    function,
                    queued,
                    running,
                    available_workers,
                })
            })
            .collect()
    }

    /// Parses a `workers` response: lines of
    /// `fd ip-address client-id : function1 function2 ...`, terminated by a
    /// bare `.` line.
    pub fn parse_workers(response: &AdminResponse) -> Vec<WorkerInfo> {
        response
            .0
            .lines()
            .map(str::trim_end)
            .take_while(|line| *line != ".")
            .filter_map(|line| {
                let (head, tail) = line.split_once(" : ")?;
                let mut head_fields = head.split_whitespace();
                let file_descriptor = head_fields.next()?.to_string();
                let ip_address = head_fields.next()?.to_string();
                let client_id = head_fields.next()?.to_string();
                let functions = tail.split_whitespace().map(str::to_string).collect();
                Some(WorkerInfo {
                    file_descriptor,
                    ip_address,
                    client_id,
                    functions,
                })
            })
            .collect()
    }

    /// Issues both `status` and `workers` against `client` and composes the
    /// combined read model.
    pub async fn fetch(client: &dyn QueueClient) -> JobResult<Self> {
        let status = client.admin(AdminCommand::Status).await?;
        let workers = client.admin(AdminCommand::Workers).await?;
        Ok(Self {
            functions: Self::parse_status(&status),
            workers: Self::parse_workers(&workers),
        })
    }
}

/// The QueueClient contract. Implemented concretely by
/// [`crate::gearman::client::GearmanQueueClient`]; kept as a trait so
/// [`crate::dispatcher::Dispatcher`] and this crate's own tests can run
/// against an in-memory fake without a live Gearman server.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Submits a job and blocks until the server replies with the result
    /// (Gearman's `SUBMIT_JOB`/`SUBMIT_JOB_HIGH`/`SUBMIT_JOB_LOW`).
    async fn submit_foreground(
        &self,
        function: &str,
        payload: &[u8],
        priority: Priority,
        unique: Option<&str>,
    ) -> JobResult<Vec<u8>>;

    /// Submits a job and returns immediately with its handle
    /// (`SUBMIT_JOB_BG` and priority variants).
    async fn submit_background(
        &self,
        function: &str,
        payload: &[u8],
        priority: Priority,
        unique: Option<&str>,
    ) -> JobResult<QueueHandle>;

    /// Polls `GET_STATUS` for a background job.
    async fn status(&self, handle: &QueueHandle) -> JobResult<StatusReport>;

    /// Issues `cancel job <id>\r\n` over the admin channel and requires the
    /// exact reply `OK\r\n`.
    async fn cancel(&self, handle: &QueueHandle) -> JobResult<()>;

    /// Issues any other administrative command.
    async fn admin(&self, command: AdminCommand) -> JobResult<AdminResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_low_normal_high() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
    }

    #[test]
    fn cancel_line_format() {
        assert_eq!(
            AdminCommand::CancelJob("H:x:1".into()).to_line(),
            "cancel job H:x:1\r\n"
        );
    }

    #[test]
    fn admin_response_recognizes_ok() {
        assert!(AdminResponse("OK\r\n".into()).is_cancel_ok());
        assert!(!AdminResponse("ERR unknown_job\r\n".into()).is_cancel_ok());
    }

    #[test]
    fn parses_status_response() {
        let response = AdminResponse("Add\t3\t1\t2\r\nBottles\t0\t0\t1\r\n.\r\n".into());
        let stats = QueueStats::parse_status(&response);
        assert_eq!(
            stats,
            vec![
                FunctionStats {
                    function: "Add".into(),
                    queued: 3,
                    running: 1,
                    available_workers: 2,
                },
                FunctionStats {
                    function: "Bottles".into(),
                    queued: 0,
                    running: 0,
                    available_workers: 1,
                },
            ]
        );
    }

    #[test]
    fn parses_workers_response() {
        let response = AdminResponse("12 10.0.0.4 - : Add Bottles\r\n.\r\n".into());
        let stats = QueueStats::parse_workers(&response);
        assert_eq!(
            stats,
            vec![WorkerInfo {
                file_descriptor: "12".into(),
                ip_address: "10.0.0.4".into(),
                client_id: "-".into(),
                functions: vec!["Add".into(), "Bottles".into()],
            }]
        );
    }

    #[test]
    fn status_parse_ignores_malformed_lines() {
        let response = AdminResponse("garbage line\r\nAdd\t1\t0\t1\r\n.\r\n".into());
        let stats = QueueStats::parse_status(&response);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].function, "Add");
    }
}
