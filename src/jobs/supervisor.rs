//! Timeout supervisor — bounds the wall time of asynchronous jobs.
//!
//! When a job overruns its budget the supervisor finalizes it as failed
//! first, then asks the process to terminate and, after a grace period,
//! kills it. Escalation is best-effort: a process that is already gone is
//! not an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;

use super::runner::ProcessHandle;
use super::store::JobStore;
use super::types::{Finalization, TaskResult};
use crate::logging::{JobLogRecord, JobLogger};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Env var overriding the async job budget, in milliseconds.
pub const TIMEOUT_ENV_VAR: &str = "MODEL_RELAY_JOB_TIMEOUT_MS";

/// Default async job budget: 20 minutes.
pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 20 * 60 * 1000;

/// Time between graceful termination and the forceful kill.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

// ─── Budget Resolution ───────────────────────────────────────────────────────

/// Parse a timeout override. Only positive integers are accepted.
pub fn parse_timeout_ms(raw: &str) -> Option<u64> {
    match raw.trim().parse::<i64>() {
        Ok(ms) if ms > 0 => Some(ms as u64),
        _ => None,
    }
}

/// Resolve the job budget: env override, then `configured`, then the default.
///
/// A configured value of `0` disables the supervisor.
pub fn resolve_timeout_ms(configured: Option<u64>) -> u64 {
    if let Ok(raw) = std::env::var(TIMEOUT_ENV_VAR) {
        match parse_timeout_ms(&raw) {
            Some(ms) => return ms,
            None => tracing::warn!(
                value = %raw,
                default_ms = DEFAULT_JOB_TIMEOUT_MS,
                "ignoring invalid job timeout override"
            ),
        }
    }
    configured.unwrap_or(DEFAULT_JOB_TIMEOUT_MS)
}

/// Message stored in a timed-out job's stderr.
pub fn timeout_message(timeout_ms: u64) -> String {
    format!("Job timed out after {timeout_ms}ms")
}

// ─── Supervisor ──────────────────────────────────────────────────────────────

/// Arms per-job timers against a shared job store.
#[derive(Clone)]
pub struct TimeoutSupervisor {
    store: Arc<JobStore>,
    grace_period: Duration,
}

impl TimeoutSupervisor {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self {
            store,
            grace_period: KILL_GRACE_PERIOD,
        }
    }

    /// Override the terminate→kill grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Start the timer for `job_id`. Returns `None` when `timeout_ms` is 0
    /// (unbounded job).
    ///
    /// The timer is registered with the store so a natural completion
    /// cancels it.
    pub fn supervise(
        &self,
        job_id: &str,
        timeout_ms: u64,
        process: ProcessHandle,
        logger: Option<Arc<dyn JobLogger>>,
        log_record: JobLogRecord,
    ) -> Option<AbortHandle> {
        if timeout_ms == 0 {
            return None;
        }

        let store = Arc::clone(&self.store);
        let grace_period = self.grace_period;
        let id = job_id.to_string();

        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;

            let result = TaskResult::failure(timeout_message(timeout_ms));
            let Some(job) = store.finalize(&id, result, Finalization::TimedOut) else {
                return;
            };

            tracing::warn!(
                job_id = %job.id,
                tool = %job.tool_name,
                timeout_ms,
                pid = ?process.pid(),
                "job timed out, terminating process"
            );
            if let Some(logger) = &logger {
                logger.job_timed_out(&log_record.for_job(&job));
            }

            escalate(&process, grace_period).await;
        });

        let abort = task.abort_handle();
        self.store.attach_timer(job_id, abort.clone());
        Some(abort)
    }
}

/// Terminate, wait out the grace period, then kill if still alive.
async fn escalate(process: &ProcessHandle, grace_period: Duration) {
    if !process.terminate() {
        return;
    }
    tokio::time::sleep(grace_period).await;
    if !process.has_exited() {
        tracing::warn!(pid = ?process.pid(), "process ignored termination, killing");
        let _ = process.kill();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout_ms() {
        assert_eq!(parse_timeout_ms("1500"), Some(1500));
        assert_eq!(parse_timeout_ms(" 42 "), Some(42));
        assert_eq!(parse_timeout_ms("0"), None);
        assert_eq!(parse_timeout_ms("-5"), None);
        assert_eq!(parse_timeout_ms("ten minutes"), None);
        assert_eq!(parse_timeout_ms(""), None);
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(timeout_message(250), "Job timed out after 250ms");
    }

    /// All env cases live in one test so they never race each other.
    #[test]
    fn test_resolve_timeout_ms_env_precedence() {
        std::env::remove_var(TIMEOUT_ENV_VAR);
        assert_eq!(resolve_timeout_ms(None), DEFAULT_JOB_TIMEOUT_MS);
        assert_eq!(resolve_timeout_ms(Some(45_000)), 45_000);
        assert_eq!(resolve_timeout_ms(Some(0)), 0);

        std::env::set_var(TIMEOUT_ENV_VAR, "900000");
        assert_eq!(resolve_timeout_ms(Some(45_000)), 900_000);
        assert_eq!(resolve_timeout_ms(Some(0)), 900_000);

        std::env::set_var(TIMEOUT_ENV_VAR, "soon");
        assert_eq!(resolve_timeout_ms(Some(45_000)), 45_000);
        assert_eq!(resolve_timeout_ms(None), DEFAULT_JOB_TIMEOUT_MS);

        // Zero is not a valid override; it does not disable the budget.
        std::env::set_var(TIMEOUT_ENV_VAR, "0");
        assert_eq!(resolve_timeout_ms(None), DEFAULT_JOB_TIMEOUT_MS);
        assert_eq!(resolve_timeout_ms(Some(0)), 0);

        std::env::remove_var(TIMEOUT_ENV_VAR);
    }

    #[test]
    fn test_default_budget_is_twenty_minutes() {
        assert_eq!(DEFAULT_JOB_TIMEOUT_MS, 1_200_000);
    }

    #[cfg(unix)]
    mod unix {
        use super::super::*;
        use crate::jobs::runner::spawn_task;
        use crate::jobs::types::{CommandSpec, JobStatus, TaskInvocation};

        fn shell(script: &str) -> TaskInvocation {
            TaskInvocation {
                command: CommandSpec::new("sh", &["-c", script]),
                model: None,
                task: "task".into(),
                working_dir: None,
            }
        }

        fn record() -> JobLogRecord {
            JobLogRecord::start("slow", "sh", None, "task")
        }

        #[tokio::test]
        async fn test_zero_budget_disables_supervisor() {
            let store = Arc::new(JobStore::new());
            let job = store.create("slow", 0);
            let process = spawn_task(&shell("exit 0")).unwrap();
            let supervisor = TimeoutSupervisor::new(Arc::clone(&store));
            let timer = supervisor.supervise(&job.id, 0, process.handle().clone(), None, record());
            assert!(timer.is_none());
            process.wait().await;
        }

        #[tokio::test]
        async fn test_overrun_job_is_failed_and_process_terminated() {
            let store = Arc::new(JobStore::new());
            let job = store.create("slow", 100);
            let process = spawn_task(&shell("sleep 30")).unwrap();
            let handle = process.handle().clone();

            let supervisor = TimeoutSupervisor::new(Arc::clone(&store))
                .with_grace_period(Duration::from_millis(200));
            supervisor.supervise(&job.id, 100, handle.clone(), None, record());

            let natural = tokio::time::timeout(Duration::from_secs(10), process.wait())
                .await
                .expect("process should be terminated");

            let seen = store.get(&job.id).unwrap();
            assert_eq!(seen.status, JobStatus::Failed);
            assert!(seen.timed_out);
            let result = seen.result.clone().unwrap();
            assert_eq!(result.exit_code, -1);
            assert!(result.stderr.contains("timed out after 100ms"));

            // The late natural completion must not overwrite the timeout.
            assert!(store
                .finalize(&job.id, natural, Finalization::Natural)
                .is_none());
            assert_eq!(store.get(&job.id).unwrap(), seen);
            assert!(handle.has_exited());
        }

        #[tokio::test]
        async fn test_escalates_to_kill_when_terminate_ignored() {
            let store = Arc::new(JobStore::new());
            let job = store.create("stubborn", 100);
            let process = spawn_task(&shell("trap '' TERM; while :; do sleep 1; done")).unwrap();

            let supervisor = TimeoutSupervisor::new(Arc::clone(&store))
                .with_grace_period(Duration::from_millis(300));
            supervisor.supervise(&job.id, 100, process.handle().clone(), None, record());

            let result = tokio::time::timeout(Duration::from_secs(15), process.wait())
                .await
                .expect("process should be killed after the grace period");
            assert_eq!(result.exit_code, -1);
            assert!(store.get(&job.id).unwrap().timed_out);
        }

        #[tokio::test]
        async fn test_completion_before_budget_wins() {
            let store = Arc::new(JobStore::new());
            let job = store.create("fast", 5_000);
            let process = spawn_task(&shell("echo quick")).unwrap();

            let supervisor = TimeoutSupervisor::new(Arc::clone(&store));
            let timer = supervisor
                .supervise(&job.id, 5_000, process.handle().clone(), None, record())
                .unwrap();

            let result = process.wait().await;
            let done = store.finalize(&job.id, result, Finalization::Natural).unwrap();
            assert_eq!(done.status, JobStatus::Completed);
            assert!(!done.timed_out);

            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(timer.is_finished());
        }
    }
}
