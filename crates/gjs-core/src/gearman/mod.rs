//! A minimal implementation of the Gearman binary and admin protocols,
//! covering exactly the packet types [`crate::queue::QueueClient`] and
//! [`crate::worker_pool::WorkerPool`] need. The Gearman server itself is
//! out of scope; this module only speaks its wire format to one.

pub mod client;
pub mod protocol;
pub mod worker_conn;

pub use client::GearmanQueueClient;
pub use worker_conn::GearmanWorkerConnection;
