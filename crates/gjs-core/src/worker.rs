//! A single worker: one or more Gearman connections bound to one function
//! descriptor, dequeuing jobs and handing each one to a [`JobRunner`]
//! exactly once.
//!
//! Spec §4.8 step 1 requires a worker to connect to *every* configured
//! server and only abort if none accept; a worker with several live
//! connections polls each in turn for work and replies on whichever
//! connection the job came from. A worker processes one job at a time by
//! construction — it never issues another `GRAB_JOB` on any connection
//! until the previous job's `JobRunner::execute` call (including all of
//! that job's retries) has returned — matching spec's "no intra-process
//! multiplexing within a worker" invariant.

use std::sync::Arc;

use futures::future::select_all;
use tokio::sync::{mpsc, watch};

use crate::codec;
use crate::error::{JobError, JobResult};
use crate::function::FunctionDescriptor;
use crate::gearman::worker_conn::GearmanWorkerConnection;
use crate::identity::{canonical_job_key, gjs_job_id, PrefixSource};
use crate::job_runner::{JobOutcome, JobRunner};
use crate::progress::CallbackProgressSink;

/// One worker's loop. Owns one connection per configured server, polled in
/// turn; each is used sequentially, never concurrently with itself.
pub struct Worker {
    connections: Vec<GearmanWorkerConnection>,
    descriptor: FunctionDescriptor,
    runner: Arc<JobRunner>,
}

impl Worker {
    /// `connections` must be non-empty — callers are expected to have
    /// already connected to every configured server and aborted with
    /// `BackendRegistrationError` if none accepted (spec §4.8 step 1).
    pub fn new(connections: Vec<GearmanWorkerConnection>, descriptor: FunctionDescriptor, runner: Arc<JobRunner>) -> Self {
        Self {
            connections,
            descriptor,
            runner,
        }
    }

    /// Registers this worker's ability on every connection and runs until
    /// `shutdown` fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> JobResult<()> {
        for connection in &mut self.connections {
            if self.descriptor.timeout.as_secs() > 0 {
                connection
                    .can_do_timeout(&self.descriptor.name, self.descriptor.timeout.as_secs() as u32)
                    .await?;
            } else {
                connection.can_do(&self.descriptor.name).await?;
            }
        }

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            match self.grab_from_any().await? {
                Some((idx, handle, payload)) => {
                    let outcome = self.process(idx, handle.clone(), payload).await;
                    self.reply(idx, &handle, outcome).await?;
                }
                None => {
                    tokio::select! {
                        result = Self::sleep_on_any(&mut self.connections) => { result?; }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Polls every connection once for an assigned job, in order, returning
    /// the first one found along with the index of the connection it came
    /// from (needed so the eventual reply goes back to the same server).
    async fn grab_from_any(&mut self) -> JobResult<Option<(usize, String, Vec<u8>)>> {
        for (idx, connection) in self.connections.iter_mut().enumerate() {
            if let Some(job) = connection.grab_job().await? {
                return Ok(Some((idx, job.handle, job.payload)));
            }
        }
        Ok(None)
    }

    /// Sleeps on every connection concurrently, returning as soon as any one
    /// of them wakes the worker with a `NOOP`. The other connections are
    /// left mid-`PRE_SLEEP`; the next poll round reads their eventual
    /// `NOOP` implicitly via `grab_job`'s own request/response pairing.
    async fn sleep_on_any(connections: &mut [GearmanWorkerConnection]) -> JobResult<()> {
        let futures: Vec<_> = connections.iter_mut().map(|c| Box::pin(c.sleep_until_woken())).collect();
        let (result, _idx, _rest) = select_all(futures).await;
        result
    }

    async fn process(&mut self, connection_idx: usize, handle: String, payload: Vec<u8>) -> JobOutcome {
        let args = match codec::decode(&payload) {
            Ok(args) => args,
            Err(e) => {
                return JobOutcome::Failed {
                    message: format!("could not decode job payload: {e}"),
                }
            }
        };

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(i64, i64)>();
        let progress = Arc::new(CallbackProgressSink::new(move |n, d| {
            progress_tx
                .send((n, d))
                .map_err(|_| JobError::Queue("progress channel closed".into()))
        }));

        let canonical_key = canonical_job_key(&self.descriptor.name, args.as_ref());
        let gjs_id = match gjs_job_id(PrefixSource::Handle(&handle), &canonical_key) {
            Ok(id) => id,
            Err(e) => return JobOutcome::Failed { message: e.to_string() },
        };

        let mut execute_fut = Box::pin(self.runner.execute(&self.descriptor, &gjs_id, args, progress));

        loop {
            tokio::select! {
                biased;
                maybe_msg = progress_rx.recv() => {
                    match maybe_msg {
                        Some((n, d)) => {
                            let _ = self.connections[connection_idx]
                                .work_status(&handle, n.max(0) as u64, d.max(0) as u64)
                                .await;
                        }
                        None => return (&mut execute_fut).await,
                    }
                }
                outcome = &mut execute_fut => return outcome,
            }
        }
    }

    async fn reply(&mut self, idx: usize, handle: &str, outcome: JobOutcome) -> JobResult<()> {
        match outcome {
            JobOutcome::Succeeded(result) => {
                let wrapped = codec::wrap_result(result);
                let bytes = codec::encode(Some(&wrapped))?;
                self.connections[idx].work_complete(handle, &bytes).await
            }
            JobOutcome::Failed { .. } | JobOutcome::TimedOut { .. } => {
                self.connections[idx].work_fail(handle).await
            }
        }
    }
}
