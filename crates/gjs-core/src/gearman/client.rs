//! A [`QueueClient`] backed by real TCP connections to one or more Gearman
//! servers, speaking the binary protocol for job submission/status and the
//! plaintext admin protocol for `cancel`/`status`/`workers`/etc.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{JobError, JobResult};
use crate::queue::{AdminCommand, AdminResponse, Priority, QueueClient, QueueHandle, StatusReport};

use super::protocol::{arg_str, read_packet, rejoin_tail, write_packet, Magic, Packet, PacketType};

/// Speaks the Gearman protocol against a fixed list of `host:port` servers.
/// Connections are opened fresh per call; callers that submit many jobs are
/// expected to sit behind their own pooling if they want to reuse sockets
/// (this mirrors the queue being treated as an opaque external service per
/// spec, not a connection-pool component this crate owns).
pub struct GearmanQueueClient {
    servers: Vec<String>,
    next: AtomicUsize,
}

impl GearmanQueueClient {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            next: AtomicUsize::new(0),
        }
    }

    fn pick_server(&self) -> JobResult<&str> {
        if self.servers.is_empty() {
            return Err(JobError::Queue("no gearman servers configured".into()));
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        Ok(&self.servers[idx])
    }

    async fn connect(&self) -> JobResult<TcpStream> {
        let addr = self.pick_server()?;
        TcpStream::connect(addr)
            .await
            .map_err(|e| JobError::Queue(format!("connect to {addr} failed: {e}")))
    }

    fn submit_packet_type(priority: Priority, background: bool) -> PacketType {
        use PacketType::*;
        match (priority, background) {
            (Priority::Low, false) => SubmitJobLow,
            (Priority::Low, true) => SubmitJobLowBg,
            (Priority::Normal, false) => SubmitJob,
            (Priority::Normal, true) => SubmitJobBg,
            (Priority::High, false) => SubmitJobHigh,
            (Priority::High, true) => SubmitJobHighBg,
        }
    }

    async fn submit(
        &self,
        function: &str,
        payload: &[u8],
        priority: Priority,
        unique: Option<&str>,
        background: bool,
    ) -> JobResult<(QueueHandle, TcpStream)> {
        let mut stream = self.connect().await?;
        let kind = Self::submit_packet_type(priority, background);
        let packet = Packet::with_payload(kind, &[function, unique.unwrap_or("")], payload);
        write_packet(&mut stream, Magic::Req, &packet).await?;

        let (_, reply) = read_packet(&mut stream).await?;
        if reply.kind != PacketType::JobCreated {
            return Err(JobError::Queue(format!(
                "expected JOB_CREATED, got {:?}",
                reply.kind
            )));
        }
        let handle = arg_str(&reply.args, 0)?;
        Ok((QueueHandle(handle), stream))
    }
}

#[async_trait]
impl QueueClient for GearmanQueueClient {
    async fn submit_foreground(
        &self,
        function: &str,
        payload: &[u8],
        priority: Priority,
        unique: Option<&str>,
    ) -> JobResult<Vec<u8>> {
        let (_, mut stream) = self.submit(function, payload, priority, unique, false).await?;

        loop {
            let (_, packet) = read_packet(&mut stream).await?;
            match packet.kind {
                PacketType::WorkComplete => return Ok(rejoin_tail(&packet.args, 1)),
                PacketType::WorkFail => {
                    return Err(JobError::Queue("work failed (WORK_FAIL)".into()))
                }
                PacketType::WorkException => {
                    let msg = String::from_utf8_lossy(&rejoin_tail(&packet.args, 1)).into_owned();
                    return Err(JobError::Queue(format!("work exception: {msg}")));
                }
                PacketType::WorkData | PacketType::WorkWarning | PacketType::WorkStatus => {
                    continue;
                }
                other => {
                    return Err(JobError::Queue(format!(
                        "unexpected packet while awaiting result: {other:?}"
                    )))
                }
            }
        }
    }

    async fn submit_background(
        &self,
        function: &str,
        payload: &[u8],
        priority: Priority,
        unique: Option<&str>,
    ) -> JobResult<QueueHandle> {
        let (handle, _stream) = self.submit(function, payload, priority, unique, true).await?;
        Ok(handle)
    }

    async fn status(&self, handle: &QueueHandle) -> JobResult<StatusReport> {
        let mut stream = self.connect().await?;
        let packet = Packet::with_payload(PacketType::GetStatus, &[], handle.0.as_bytes());
        write_packet(&mut stream, Magic::Req, &packet).await?;

        let (_, reply) = read_packet(&mut stream).await?;
        if reply.kind != PacketType::StatusRes {
            return Err(JobError::Queue(format!(
                "expected STATUS_RES, got {:?}",
                reply.kind
            )));
        }

        let known = arg_str(&reply.args, 1)? == "1";
        let running = arg_str(&reply.args, 2)? == "1";
        let numerator: u64 = arg_str(&reply.args, 3)?.parse().unwrap_or(0);
        let denominator: u64 = arg_str(&reply.args, 4)?.parse().unwrap_or(0);

        Ok(StatusReport {
            known,
            running,
            numerator,
            denominator,
        })
    }

    async fn cancel(&self, handle: &QueueHandle) -> JobResult<()> {
        let response = self.admin(AdminCommand::CancelJob(handle.0.clone())).await?;
        if response.is_cancel_ok() {
            Ok(())
        } else {
            Err(JobError::Queue(format!(
                "cancel rejected for {}: {}",
                handle.0,
                response.0.trim_end()
            )))
        }
    }

    async fn admin(&self, command: AdminCommand) -> JobResult<AdminResponse> {
        let stream = self.connect().await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(command.to_line().as_bytes())
            .await
            .map_err(|e| JobError::Queue(format!("admin write failed: {e}")))?;

        // `cancel job` and `getpid`/`version` reply with a single line;
        // the multi-line commands (`status`, `workers`, `show jobs`) are
        // terminated by a line containing only `.`.
        let mut out = String::new();
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .await
                .map_err(|e| JobError::Queue(format!("admin read failed: {e}")))?;
            if n == 0 {
                break;
            }
            let is_terminator = line.trim_end_matches(['\r', '\n']) == ".";
            out.push_str(&line);
            if is_terminator || !matches!(
                command,
                AdminCommand::Status | AdminCommand::Workers | AdminCommand::ShowJobs | AdminCommand::ShowUniqueJobs
            ) {
                break;
            }
        }

        Ok(AdminResponse(out))
    }
}
