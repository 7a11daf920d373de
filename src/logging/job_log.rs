//! Per-tool job event log.
//!
//! The dispatcher reports job start, timeout, and finish through the
//! [`JobLogger`] trait. A tool with logging disabled simply has no logger.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use super::FlushingWriter;
use crate::jobs::{Job, JobStatus, TaskResult};

// ─── Record ──────────────────────────────────────────────────────────────────

/// Which lifecycle point a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    Started,
    TimedOut,
    Finished,
}

/// Structured metadata attached to every job log event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLogRecord {
    pub tool_name: String,
    /// Absent for synchronous invocations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(rename = "async")]
    pub is_async: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub timed_out: bool,
    /// Size of the composed task string, not its contents.
    pub task_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
}

/// Longest stderr excerpt kept in a finish record.
const STDERR_TAIL_CHARS: usize = 500;

impl JobLogRecord {
    /// Record for an invocation that has not produced a result yet.
    pub fn start(tool_name: &str, command: &str, model: Option<&str>, task: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            job_id: None,
            is_async: false,
            command: command.to_string(),
            model: model.map(String::from),
            status: None,
            exit_code: None,
            duration_ms: None,
            timeout_ms: None,
            timed_out: false,
            task_chars: task.chars().count(),
            stderr_tail: None,
        }
    }

    /// Attach the async job's identity and budget.
    pub fn for_job(mut self, job: &Job) -> Self {
        self.job_id = Some(job.id.clone());
        self.is_async = true;
        self.status = Some(job.status);
        self.timeout_ms = Some(job.timeout_ms);
        self.timed_out = job.timed_out;
        if job.status.is_terminal() {
            self.duration_ms = Some(job.duration_ms());
        }
        if let Some(result) = &job.result {
            self = self.with_result(result);
        }
        self
    }

    /// Attach the outcome of a finished process.
    pub fn with_result(mut self, result: &TaskResult) -> Self {
        self.exit_code = Some(result.exit_code);
        if !result.is_success() && !result.stderr.is_empty() {
            self.stderr_tail = Some(tail(&result.stderr, STDERR_TAIL_CHARS));
        }
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Sink for job lifecycle events. Implementations must never fail loudly.
pub trait JobLogger: Send + Sync {
    fn job_started(&self, record: &JobLogRecord);
    fn job_timed_out(&self, record: &JobLogRecord);
    fn job_finished(&self, record: &JobLogRecord);
}

// ─── JSONL implementation ────────────────────────────────────────────────────

/// Appends one JSON object per event to `<dir>/<tool>.jsonl`.
pub struct JsonlJobLogger {
    path: PathBuf,
    writer: FlushingWriter,
}

#[derive(Serialize)]
struct JsonlLine<'a> {
    timestamp: String,
    event: JobEvent,
    #[serde(flatten)]
    record: &'a JobLogRecord,
}

impl JsonlJobLogger {
    /// Open (creating if needed) the log file for `tool_name` under `dir`.
    pub fn open(dir: &Path, tool_name: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.jsonl", sanitize_file_stem(tool_name)));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: FlushingWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&self, event: JobEvent, record: &JobLogRecord) {
        let line = JsonlLine {
            timestamp: Utc::now().to_rfc3339(),
            event,
            record,
        };
        let mut json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize job log record");
                return;
            }
        };
        json.push('\n');

        let mut writer = self.writer.clone();
        if let Err(e) = writer.write_all(json.as_bytes()) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to write job log record"
            );
        }
    }
}

impl JobLogger for JsonlJobLogger {
    fn job_started(&self, record: &JobLogRecord) {
        self.write_event(JobEvent::Started, record);
    }

    fn job_timed_out(&self, record: &JobLogRecord) {
        self.write_event(JobEvent::TimedOut, record);
    }

    fn job_finished(&self, record: &JobLogRecord) {
        self.write_event(JobEvent::Finished, record);
    }
}

/// Keep tool names usable as file names on every platform.
fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_jsonl_logger_appends_events() {
        let dir = TempDir::new().unwrap();
        let logger = JsonlJobLogger::open(dir.path(), "ask_claude").unwrap();

        let record = JobLogRecord::start("ask_claude", "claude", Some("opus"), "hello");
        logger.job_started(&record);
        let finished = record.with_result(&TaskResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "rate limited".into(),
        });
        logger.job_finished(&finished);

        let lines = read_lines(logger.path());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "started");
        assert_eq!(lines[0]["toolName"], "ask_claude");
        assert_eq!(lines[0]["model"], "opus");
        assert_eq!(lines[0]["taskChars"], 5);
        assert!(lines[0].get("jobId").is_none());
        assert_eq!(lines[1]["event"], "finished");
        assert_eq!(lines[1]["exitCode"], 1);
        assert_eq!(lines[1]["stderrTail"], "rate limited");
        assert!(lines[1]["timestamp"].is_string());
    }

    #[test]
    fn test_record_for_job_carries_identity() {
        let job = Job::new("job_1_abc".into(), "ask", 1000);
        let record = JobLogRecord::start("ask", "claude", None, "x").for_job(&job);
        assert_eq!(record.job_id.as_deref(), Some("job_1_abc"));
        assert!(record.is_async);
        assert_eq!(record.timeout_ms, Some(1000));
        assert_eq!(record.status, Some(JobStatus::Running));
        assert!(record.duration_ms.is_none());
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let long = "e".repeat(STDERR_TAIL_CHARS * 3);
        let record = JobLogRecord::start("ask", "claude", None, "")
            .with_result(&TaskResult::failure(long));
        assert_eq!(record.stderr_tail.unwrap().len(), STDERR_TAIL_CHARS);
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("ask/claude now"), "ask_claude_now");
        assert_eq!(sanitize_file_stem("review-pr.v2"), "review-pr.v2");
    }
}
