//! Supervises the fan-out of workers across registered functions.
//!
//! Spec models "process-level" parallelism: each worker is its own OS
//! process, forked by a supervisor. This crate substitutes a dedicated OS
//! thread per worker — each running its own single-threaded Tokio runtime —
//! which keeps "no intra-process multiplexing within a worker" true while
//! staying inside one Rust process (see `job_runner`'s stdio-lock doc
//! comment for the corresponding log-isolation tradeoff this implies).

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{JobError, JobResult};
use crate::function::FunctionDescriptor;
use crate::gearman::worker_conn::GearmanWorkerConnection;
use crate::job_runner::JobRunner;
use crate::metrics::WorkerMetrics;
use crate::worker::Worker;

/// Suffix a caller's function-module files are expected to use for
/// directory-scan discovery (spec §6's CLI convention). Rust has no runtime
/// dynamic-module-loading equivalent to loading those files directly, so
/// this only returns candidate names; the caller maps each one to an
/// actual [`FunctionDescriptor`] via its own registry.
pub const FUNCTION_MODULE_SUFFIX: &str = "_function.rs";

/// Scans `dir` for files ending in [`FUNCTION_MODULE_SUFFIX`] and returns
/// the function names implied by their basenames, sorted for determinism.
pub fn discover_function_modules(dir: impl AsRef<Path>) -> JobResult<Vec<String>> {
    let entries = std::fs::read_dir(dir.as_ref())
        .map_err(|e| JobError::BackendRegistration(format!("could not scan function directory: {e}")))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| JobError::BackendRegistration(format!("could not read directory entry: {e}")))?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if let Some(stripped) = file_name.strip_suffix(FUNCTION_MODULE_SUFFIX) {
            names.push(stripped.to_string());
        }
    }
    names.sort();
    Ok(names)
}

struct ChildWorker {
    thread: Option<std::thread::JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    registered_at: Instant,
}

/// A snapshot of how many worker instances are running per function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerPoolStats {
    pub workers_by_function: HashMap<String, usize>,
}

impl WorkerPoolStats {
    pub fn total(&self) -> usize {
        self.workers_by_function.values().sum()
    }
}

/// Owns the fan-out of OS-thread workers across registered functions,
/// capped per function by `capacity_per_function`.
pub struct WorkerPool {
    gearman_servers: Vec<String>,
    runner: Arc<JobRunner>,
    shutdown_tx: watch::Sender<bool>,
    capacity_per_function: usize,
    children: Mutex<Vec<(String, ChildWorker)>>,
}

impl WorkerPool {
    pub fn new(gearman_servers: Vec<String>, runner: Arc<JobRunner>, capacity_per_function: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            gearman_servers,
            runner,
            shutdown_tx,
            capacity_per_function,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Spawns `instances` workers for `descriptor`, each its own OS thread
    /// with its own connection. Rejected if this function already has
    /// `capacity_per_function` workers running.
    pub fn register(&self, descriptor: FunctionDescriptor, instances: usize) -> JobResult<()> {
        let current = self.count_for(&descriptor.name);
        if current + instances > self.capacity_per_function {
            return Err(JobError::PoolCapacityExceeded(descriptor.name.clone()));
        }

        for _ in 0..instances {
            self.spawn_one(descriptor.clone())?;
        }
        WorkerMetrics::set_active(&descriptor.name, self.count_for(&descriptor.name));
        Ok(())
    }

    fn count_for(&self, function: &str) -> usize {
        self.children
            .lock()
            .iter()
            .filter(|(name, child)| name == function && child.alive.load(Ordering::Relaxed))
            .count()
    }

    fn spawn_one(&self, descriptor: FunctionDescriptor) -> JobResult<()> {
        if self.gearman_servers.is_empty() {
            return Err(JobError::BackendRegistration("no gearman servers configured".into()));
        }
        let servers = self.gearman_servers.clone();
        let runner = self.runner.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let name = descriptor.name.clone();
        let alive = Arc::new(AtomicBool::new(true));
        let alive_in_thread = alive.clone();

        let thread = std::thread::Builder::new()
            .name(format!("gjs-worker-{name}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build worker runtime");

                runtime.block_on(async move {
                    // Spec §4.8 step 1: connect to every configured server
                    // and only abort if none accept — a worker with several
                    // live connections polls each one in turn for work.
                    let mut connections = Vec::with_capacity(servers.len());
                    for server in &servers {
                        match GearmanWorkerConnection::connect(server).await {
                            Ok(connection) => connections.push(connection),
                            Err(e) => {
                                tracing::warn!(function = %name, server = %server, error = %e, "worker could not connect to gearman server");
                            }
                        }
                    }

                    if connections.is_empty() {
                        tracing::error!(function = %name, "worker could not connect to any configured gearman server");
                    } else {
                        let worker = Worker::new(connections, descriptor, runner);
                        if let Err(e) = worker.run(shutdown_rx).await {
                            tracing::error!(function = %name, error = %e, "worker exited with an error");
                        }
                    }
                });

                alive_in_thread.store(false, Ordering::Relaxed);
            })
            .map_err(|e| JobError::BackendRegistration(format!("failed to spawn worker thread: {e}")))?;

        self.children.lock().push((
            descriptor.name.clone(),
            ChildWorker {
                thread: Some(thread),
                alive,
                registered_at: Instant::now(),
            },
        ));
        Ok(())
    }

    /// Signals every worker to stop after its current job (or sleep) ends.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Blocks until every spawned worker thread has exited. Call after
    /// [`Self::shutdown`].
    pub fn join(&self) {
        let mut children = self.children.lock();
        for (_, child) in children.iter_mut() {
            if let Some(thread) = child.thread.take() {
                let _ = thread.join();
            }
        }
    }

    pub fn stats(&self) -> WorkerPoolStats {
        let mut workers_by_function = HashMap::new();
        for (name, child) in self.children.lock().iter() {
            if child.alive.load(Ordering::Relaxed) {
                *workers_by_function.entry(name.clone()).or_insert(0) += 1;
            }
        }
        WorkerPoolStats { workers_by_function }
    }

    /// Seconds since the oldest still-alive worker for `function` was
    /// registered, used for simple uptime reporting.
    pub fn oldest_worker_age_secs(&self, function: &str) -> Option<u64> {
        self.children
            .lock()
            .iter()
            .filter(|(name, child)| name == function && child.alive.load(Ordering::Relaxed))
            .map(|(_, child)| child.registered_at.elapsed().as_secs())
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_function_modules_by_suffix() {
        let dir = std::env::temp_dir().join(format!("gjs-core-discover-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("add_function.rs"), "").unwrap();
        std::fs::write(dir.join("bottles_function.rs"), "").unwrap();
        std::fs::write(dir.join("README.md"), "").unwrap();

        let names = discover_function_modules(&dir).unwrap();
        assert_eq!(names, vec!["add".to_string(), "bottles".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn register_rejects_over_capacity() {
        let pool = WorkerPool::new(vec![], Arc::new(JobRunner::new("/tmp/gjs-core-test-logs")), 2);
        let descriptor = FunctionDescriptor::new("Noop", || {
            |_: Option<&crate::codec::Dict>, _: &dyn crate::progress::ProgressSink| Ok(None)
        });

        // capacity_per_function=2, requesting 3 instances: the capacity
        // check runs before spawn_one ever looks at gearman_servers.
        let err = pool.register(descriptor.clone(), 3).unwrap_err();
        assert!(matches!(err, JobError::PoolCapacityExceeded(_)));
    }

    #[test]
    fn register_rejects_with_no_servers_configured() {
        let pool = WorkerPool::new(vec![], Arc::new(JobRunner::new("/tmp/gjs-core-test-logs")), 4);
        let descriptor = FunctionDescriptor::new("Noop", || {
            |_: Option<&crate::codec::Dict>, _: &dyn crate::progress::ProgressSink| Ok(None)
        });

        // Within capacity, but no servers configured at all: spawn_one
        // fails fast with BackendRegistration before ever touching the
        // network, rather than spawning a thread doomed to connect to
        // nothing.
        let err = pool.register(descriptor, 1).unwrap_err();
        assert!(matches!(err, JobError::BackendRegistration(_)));
    }
}
