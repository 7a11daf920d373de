//! Job and task-result types shared by the runner, store, and dispatcher.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── TaskResult ──────────────────────────────────────────────────────────────

/// Exit code reported when a process was not observed to exit normally
/// (spawn failure, killed by a signal, forced timeout).
pub const UNOBSERVED_EXIT_CODE: i32 = -1;

/// Captured outcome of one external process execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl TaskResult {
    /// Build the result for a process that never produced an exit status.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: UNOBSERVED_EXIT_CODE,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    /// Whether the process exited with code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

// ─── Task Invocation ─────────────────────────────────────────────────────────

/// How to launch one external model CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name or path (resolved through `PATH`).
    pub program: String,
    /// Fixed arguments placed between the model flag and the task string.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment entries layered over the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
        }
    }
}

/// Everything the process runner needs for one task.
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    pub command: CommandSpec,
    /// Optional model variant, passed as `--model <id>`.
    pub model: Option<String>,
    /// The fully composed prompt, always appended last.
    pub task: String,
    pub working_dir: Option<PathBuf>,
}

impl TaskInvocation {
    /// Full argument list: `--model <id>` first, then base args, then the task.
    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.command.args.len() + 3);
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(self.command.args.iter().cloned());
        args.push(self.task.clone());
        args
    }
}

// ─── Job ─────────────────────────────────────────────────────────────────────

/// Lifecycle state of an asynchronous job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` are terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One asynchronous task execution tracked by the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub tool_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    pub timeout_ms: u64,
    pub timed_out: bool,
}

impl Job {
    pub(crate) fn new(id: String, tool_name: &str, timeout_ms: u64) -> Self {
        Self {
            id,
            status: JobStatus::Running,
            tool_name: tool_name.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            timeout_ms,
            timed_out: false,
        }
    }

    /// Elapsed wall time, up to completion if terminal.
    pub fn duration_ms(&self) -> i64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds()
    }
}

/// How a job is being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// The subprocess exited on its own.
    Natural,
    /// The timeout supervisor forced termination.
    TimedOut,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(model: Option<&str>) -> TaskInvocation {
        TaskInvocation {
            command: CommandSpec::new("claude", &["-p"]),
            model: model.map(String::from),
            task: "summarize the repo".into(),
            working_dir: None,
        }
    }

    #[test]
    fn test_arguments_without_model() {
        assert_eq!(invocation(None).arguments(), vec!["-p", "summarize the repo"]);
    }

    #[test]
    fn test_arguments_with_model_prepended() {
        assert_eq!(
            invocation(Some("opus")).arguments(),
            vec!["--model", "opus", "-p", "summarize the repo"]
        );
    }

    #[test]
    fn test_task_result_serializes_camel_case() {
        let json = serde_json::to_value(TaskResult::failure("boom")).unwrap();
        assert_eq!(json["exitCode"], -1);
        assert_eq!(json["stdout"], "");
        assert_eq!(json["stderr"], "boom");
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert_eq!(
            serde_json::to_value(JobStatus::Completed).unwrap(),
            serde_json::json!("completed")
        );
    }

    #[test]
    fn test_new_job_is_running_without_result() {
        let job = Job::new("job_1".into(), "ask", 1000);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.result.is_none());
        assert!(job.completed_at.is_none());
        assert!(!job.timed_out);
    }
}
