//! Job store — the registry of asynchronous jobs.
//!
//! Each record sits behind its own mutex so distinct jobs never contend, and
//! finalization is a check-and-set under that lock: the first finalizer wins
//! and every later attempt is a no-op. Records are never evicted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use tokio::task::AbortHandle;

use super::types::{Finalization, Job, JobStatus, TaskResult};

// ─── Entry ───────────────────────────────────────────────────────────────────

struct JobEntry {
    job: Job,
    /// Pending timeout supervisor, cancelled on natural completion.
    timer: Option<AbortHandle>,
}

type SharedEntry = Arc<Mutex<JobEntry>>;

fn lock_entry(entry: &SharedEntry) -> MutexGuard<'_, JobEntry> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Generate an opaque job id, unique even for jobs created in the same millisecond.
pub fn new_job_id() -> String {
    format!(
        "job_{}_{}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

// ─── JobStore ────────────────────────────────────────────────────────────────

/// In-memory job registry, constructed once at server startup.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, SharedEntry>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `running` job and return its snapshot.
    ///
    /// The record is visible to `get` before this returns, so the id can be
    /// handed out immediately.
    pub fn create(&self, tool_name: &str, timeout_ms: u64) -> Job {
        let job = Job::new(new_job_id(), tool_name, timeout_ms);
        let entry = Arc::new(Mutex::new(JobEntry {
            job: job.clone(),
            timer: None,
        }));

        let mut jobs = self
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.insert(job.id.clone(), entry);
        job
    }

    fn entry(&self, id: &str) -> Option<SharedEntry> {
        let jobs = self
            .jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.get(id).cloned()
    }

    /// Snapshot of a job, or `None` for an unknown id.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.entry(id).map(|entry| lock_entry(&entry).job.clone())
    }

    /// Attach the timeout supervisor for a job.
    ///
    /// If the job already completed naturally the timer is aborted on the
    /// spot. A job the timer itself already timed out keeps it running so
    /// signal escalation can finish.
    pub fn attach_timer(&self, id: &str, timer: AbortHandle) {
        let Some(entry) = self.entry(id) else {
            timer.abort();
            return;
        };
        let mut guard = lock_entry(&entry);
        if guard.job.status.is_terminal() {
            if !guard.job.timed_out {
                timer.abort();
            }
        } else {
            guard.timer = Some(timer);
        }
    }

    /// Move a running job to its terminal state.
    ///
    /// Returns the finalized snapshot if this call won, or `None` if the job
    /// is unknown or was already terminal (late completion after a timeout,
    /// or a timeout firing after completion).
    pub fn finalize(&self, id: &str, result: TaskResult, how: Finalization) -> Option<Job> {
        let entry = self.entry(id)?;
        let mut guard = lock_entry(&entry);

        if guard.job.status != JobStatus::Running {
            tracing::debug!(
                job_id = id,
                status = %guard.job.status,
                ?how,
                "ignoring finalization of terminal job"
            );
            return None;
        }

        if let Some(timer) = guard.timer.take() {
            // The supervisor finalizes from inside its own task and still has
            // escalation work to do, so only a natural completion aborts it.
            if how == Finalization::Natural {
                timer.abort();
            }
        }

        let mut updated = guard.job.clone();
        updated.completed_at = Some(Utc::now());
        updated.status = if result.is_success() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        updated.timed_out = how == Finalization::TimedOut;
        updated.result = Some(result);
        guard.job = updated.clone();

        Some(updated)
    }

    /// Total number of jobs ever created.
    pub fn len(&self) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of jobs still running.
    pub fn running_count(&self) -> usize {
        let jobs = self
            .jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        jobs.values()
            .filter(|entry| lock_entry(entry).job.status == JobStatus::Running)
            .count()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
