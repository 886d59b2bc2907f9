//! The worker-side half of the Gearman protocol: registering abilities,
//! grabbing assigned jobs, and reporting progress/completion/failure back
//! to the server.
//!
//! A connection is owned by exactly one [`crate::worker::Worker`] and used
//! sequentially — there is never more than one in-flight request on it,
//! which matches spec's "no intra-process multiplexing within a worker"
//! invariant for free.

use tokio::net::TcpStream;

use crate::error::{JobError, JobResult};

use super::protocol::{arg_str, read_packet, rejoin_tail, write_packet, Magic, Packet, PacketType};

/// A job handed to a worker by `JOB_ASSIGN`.
#[derive(Clone, Debug)]
pub struct AssignedJob {
    pub handle: String,
    pub function: String,
    pub payload: Vec<u8>,
}

/// A single worker's connection to one Gearman server.
pub struct GearmanWorkerConnection {
    stream: TcpStream,
}

impl GearmanWorkerConnection {
    pub async fn connect(server: &str) -> JobResult<Self> {
        let stream = TcpStream::connect(server)
            .await
            .map_err(|e| JobError::Queue(format!("worker connect to {server} failed: {e}")))?;
        Ok(Self { stream })
    }

    /// Registers an unconditional ability to run `function` (`CAN_DO`).
    pub async fn can_do(&mut self, function: &str) -> JobResult<()> {
        let packet = Packet::new(PacketType::CanDo, vec![function.as_bytes().to_vec()]);
        write_packet(&mut self.stream, Magic::Req, &packet).await
    }

    /// Registers an ability with a server-enforced timeout (`CAN_DO_TIMEOUT`).
    pub async fn can_do_timeout(&mut self, function: &str, timeout_secs: u32) -> JobResult<()> {
        let packet = Packet::new(
            PacketType::CanDoTimeout,
            vec![
                function.as_bytes().to_vec(),
                timeout_secs.to_string().into_bytes(),
            ],
        );
        write_packet(&mut self.stream, Magic::Req, &packet).await
    }

    /// Asks the server for the next assigned job (`GRAB_JOB`). Returns
    /// `None` if the server replies `NO_JOB`, in which case the caller
    /// should call [`Self::sleep_until_woken`] before retrying.
    pub async fn grab_job(&mut self) -> JobResult<Option<AssignedJob>> {
        let packet = Packet::new(PacketType::GrabJob, vec![]);
        write_packet(&mut self.stream, Magic::Req, &packet).await?;

        let (_, reply) = read_packet(&mut self.stream).await?;
        match reply.kind {
            PacketType::NoJob => Ok(None),
            PacketType::JobAssign => Ok(Some(AssignedJob {
                handle: arg_str(&reply.args, 0)?,
                function: arg_str(&reply.args, 1)?,
                payload: rejoin_tail(&reply.args, 2),
            })),
            other => Err(JobError::Queue(format!(
                "unexpected reply to GRAB_JOB: {other:?}"
            ))),
        }
    }

    /// Tells the server this worker is idle (`PRE_SLEEP`) and blocks until
    /// it wakes the worker with a `NOOP` because new work arrived.
    pub async fn sleep_until_woken(&mut self) -> JobResult<()> {
        let packet = Packet::new(PacketType::PreSleep, vec![]);
        write_packet(&mut self.stream, Magic::Req, &packet).await?;

        let (_, reply) = read_packet(&mut self.stream).await?;
        if reply.kind != PacketType::Noop {
            return Err(JobError::Queue(format!(
                "expected NOOP after PRE_SLEEP, got {:?}",
                reply.kind
            )));
        }
        Ok(())
    }

    /// Reports progress on the currently assigned job (`WORK_STATUS`).
    pub async fn work_status(&mut self, handle: &str, numerator: u64, denominator: u64) -> JobResult<()> {
        let packet = Packet::new(
            PacketType::WorkStatus,
            vec![
                handle.as_bytes().to_vec(),
                numerator.to_string().into_bytes(),
                denominator.to_string().into_bytes(),
            ],
        );
        write_packet(&mut self.stream, Magic::Res, &packet).await
    }

    /// Reports successful completion with a result payload (`WORK_COMPLETE`).
    pub async fn work_complete(&mut self, handle: &str, result: &[u8]) -> JobResult<()> {
        let packet = Packet::with_payload(PacketType::WorkComplete, &[handle], result);
        write_packet(&mut self.stream, Magic::Res, &packet).await
    }

    /// Reports failure (`WORK_FAIL`).
    pub async fn work_fail(&mut self, handle: &str) -> JobResult<()> {
        let packet = Packet::new(PacketType::WorkFail, vec![handle.as_bytes().to_vec()]);
        write_packet(&mut self.stream, Magic::Res, &packet).await
    }
}
