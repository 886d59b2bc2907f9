//! Prometheus-shaped metrics for job and worker lifecycle events. Scoped
//! down from the teacher's version: no Redis-pool or scheduler-leader
//! gauges, since neither subsystem exists in this crate.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "gjs_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "gjs_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "gjs_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "gjs_jobs_retried_total";
    pub const JOBS_TIMED_OUT_TOTAL: &str = "gjs_jobs_timed_out_total";
    pub const JOB_DURATION_SECONDS: &str = "gjs_job_duration_seconds";
    pub const WORKERS_ACTIVE: &str = "gjs_workers_active";
}

/// Registers metric descriptions so exporters can surface help text even
/// before the first event fires.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SUBMITTED_TOTAL, "Total jobs submitted to a queue");
    describe_counter!(names::JOBS_COMPLETED_TOTAL, "Total jobs completed successfully");
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total jobs that failed terminally");
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total retry attempts across all jobs");
    describe_counter!(names::JOBS_TIMED_OUT_TOTAL, "Total attempts that hit their timeout");
    describe_histogram!(names::JOB_DURATION_SECONDS, "Per-attempt job execution duration");
    describe_gauge!(names::WORKERS_ACTIVE, "Currently running worker instances");
}

/// Job lifecycle metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    pub fn submitted(function: &str) {
        counter!(names::JOBS_SUBMITTED_TOTAL, "function" => function.to_string()).increment(1);
    }

    pub fn completed(function: &str, duration: Duration) {
        counter!(names::JOBS_COMPLETED_TOTAL, "function" => function.to_string()).increment(1);
        histogram!(
            names::JOB_DURATION_SECONDS,
            "function" => function.to_string(),
            "outcome" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn failed(function: &str, duration: Duration) {
        counter!(names::JOBS_FAILED_TOTAL, "function" => function.to_string()).increment(1);
        histogram!(
            names::JOB_DURATION_SECONDS,
            "function" => function.to_string(),
            "outcome" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn retried(function: &str, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "function" => function.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    pub fn timed_out(function: &str) {
        counter!(names::JOBS_TIMED_OUT_TOTAL, "function" => function.to_string()).increment(1);
    }
}

/// Worker pool gauges.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    pub fn set_active(function: &str, active: usize) {
        gauge!(names::WORKERS_ACTIVE, "function" => function.to_string()).set(active as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_does_not_panic() {
        register_metrics();
    }

    #[test]
    fn recorders_do_not_panic() {
        JobMetrics::submitted("Add");
        JobMetrics::completed("Add", Duration::from_millis(10));
        JobMetrics::failed("Add", Duration::from_millis(10));
        JobMetrics::retried("Add", 1);
        JobMetrics::timed_out("Add");
        WorkerMetrics::set_active("Add", 4);
    }
}
