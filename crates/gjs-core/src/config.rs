//! Configuration data shape (spec §6). Loading this from YAML/env/CLI
//! flags is an external collaborator's job, not this crate's — `GjsConfig`
//! only defines the fields and their defaults, the way
//! `arcana-jobs::config::{RedisConfig, WorkerConfig}` define theirs.

use serde::{Deserialize, Serialize};

fn default_worker_log_dir() -> String {
    "/var/log/gjs/workers".to_string()
}

fn default_notifications_subject_prefix() -> String {
    "[gjs] ".to_string()
}

fn default_pool_capacity() -> usize {
    32
}

/// Everything a host application needs to wire up this crate: which
/// Gearman servers to talk to, where per-job logs live, and how failure
/// notifications are addressed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GjsConfig {
    /// `host:port` pairs for one or more Gearman servers.
    pub gearman_servers: Vec<String>,

    /// Directory under which `JobRunner` creates one subdirectory per
    /// function name, each holding that function's per-job log files.
    #[serde(default = "default_worker_log_dir")]
    pub worker_log_dir: String,

    /// Recipients for failure notifications on descriptors with
    /// `notify_on_failure` set. Empty means notifications are a no-op.
    #[serde(default)]
    pub notifications_emails: Vec<String>,

    /// The `From:` address used on outgoing failure notification emails.
    #[serde(default)]
    pub notifications_from_address: String,

    /// Prepended to every failure notification's subject line.
    #[serde(default = "default_notifications_subject_prefix")]
    pub notifications_subject_prefix: String,

    /// Default cap on concurrently running instances per function, used
    /// when a [`crate::worker_pool::WorkerPool`] registration doesn't
    /// specify its own.
    #[serde(default = "default_pool_capacity")]
    pub default_pool_capacity: usize,
}

impl Default for GjsConfig {
    fn default() -> Self {
        Self {
            gearman_servers: Vec::new(),
            worker_log_dir: default_worker_log_dir(),
            notifications_emails: Vec::new(),
            notifications_from_address: String::new(),
            notifications_subject_prefix: default_notifications_subject_prefix(),
            default_pool_capacity: default_pool_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = GjsConfig::default();
        assert!(cfg.gearman_servers.is_empty());
        assert_eq!(cfg.worker_log_dir, "/var/log/gjs/workers");
        assert_eq!(cfg.default_pool_capacity, 32);
        assert_eq!(cfg.notifications_subject_prefix, "[gjs] ");
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let json = r#"{"gearman_servers": ["10.0.0.1:4730"]}"#;
        let cfg: GjsConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.gearman_servers, vec!["10.0.0.1:4730".to_string()]);
        assert_eq!(cfg.worker_log_dir, "/var/log/gjs/workers");
    }
}
