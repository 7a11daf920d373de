//! Dispatch policy — runs each tool invocation synchronously or as a job.
//!
//! A tool's own `async` flag wins over the server-wide default. The sync
//! path blocks on the process and returns its output; the async path
//! registers a job, hands back the id, and finalizes in the background.
//! Nothing here returns an error: every outcome is a [`ToolResponse`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::config::{RelayConfig, ToolConfig};
use super::errors::ToolError;
use super::prompt::build_prompt;
use super::STATUS_TOOL_NAME;
use crate::jobs::{
    resolve_timeout_ms, run_task, spawn_task, Finalization, JobStore, TaskInvocation,
    TimeoutSupervisor,
};
use crate::logging::{JobLogRecord, JobLogger, JsonlJobLogger};

// ─── Response ────────────────────────────────────────────────────────────────

/// Outcome of one tool call, ready to be wrapped in MCP content.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub payload: serde_json::Value,
    pub is_error: bool,
}

impl ToolResponse {
    fn ok(payload: serde_json::Value) -> Self {
        Self {
            payload,
            is_error: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            payload: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }
}

/// Immediate reply for an async invocation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobStarted<'a> {
    job_id: &'a str,
    status: &'static str,
    message: String,
}

/// Status reply for an id the store has never seen.
#[derive(Debug, Serialize)]
struct JobNotFound<'a> {
    id: &'a str,
    status: &'static str,
    error: String,
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Routes tool calls to the process runner and the job store.
pub struct Dispatcher {
    config: Arc<RelayConfig>,
    store: Arc<JobStore>,
    supervisor: TimeoutSupervisor,
    timeout_ms: u64,
    loggers: HashMap<String, Arc<dyn JobLogger>>,
}

impl Dispatcher {
    /// Build a dispatcher around an already-constructed job store.
    ///
    /// Job log files are opened up front; a tool whose log cannot be opened
    /// runs without one.
    pub fn new(config: RelayConfig, store: Arc<JobStore>) -> Self {
        let timeout_ms = resolve_timeout_ms(config.jobs.timeout_ms);

        let mut loggers: HashMap<String, Arc<dyn JobLogger>> = HashMap::new();
        for tool in &config.tools {
            let Some(dir) = config.log_dir_for(tool) else {
                continue;
            };
            match JsonlJobLogger::open(&dir, &tool.name) {
                Ok(logger) => {
                    loggers.insert(tool.name.clone(), Arc::new(logger));
                }
                Err(e) => tracing::warn!(
                    tool = %tool.name,
                    dir = %dir.display(),
                    error = %e,
                    "job log unavailable, continuing without it"
                ),
            }
        }

        tracing::info!(
            tools = config.tools.len(),
            async_default = config.async_default,
            timeout_ms,
            logged_tools = loggers.len(),
            "dispatcher ready"
        );

        Self {
            supervisor: TimeoutSupervisor::new(Arc::clone(&store)),
            config: Arc::new(config),
            store,
            timeout_ms,
            loggers,
        }
    }

    /// Override the async job budget (`0` disables it).
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Override the terminate→kill grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.supervisor = self.supervisor.with_grace_period(grace_period);
        self
    }

    /// Replace (or remove) a tool's job logger.
    pub fn with_logger(mut self, tool_name: &str, logger: Option<Arc<dyn JobLogger>>) -> Self {
        match logger {
            Some(logger) => {
                self.loggers.insert(tool_name.to_string(), logger);
            }
            None => {
                self.loggers.remove(tool_name);
            }
        }
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    fn logger_for(&self, tool_name: &str) -> Option<Arc<dyn JobLogger>> {
        self.loggers.get(tool_name).cloned()
    }

    // ─── Entry Point ─────────────────────────────────────────────────────

    /// Handle one `tools/call`.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> ToolResponse {
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };

        if name == STATUS_TOOL_NAME {
            return match arguments.get("jobId").and_then(|v| v.as_str()) {
                Some(job_id) => self.job_status(job_id),
                None => ToolResponse::error(
                    ToolError::InvalidArguments {
                        tool: STATUS_TOOL_NAME.to_string(),
                        reason: "missing required field: 'jobId'".into(),
                    }
                    .to_string(),
                ),
            };
        }

        let tool = match self.prepare(name, &arguments) {
            Ok(tool) => tool,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "rejected tool call");
                return ToolResponse::error(e.to_string());
            }
        };

        let invocation = match self.build_invocation(tool, &arguments) {
            Ok(invocation) => invocation,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "rejected tool call");
                return ToolResponse::error(e.to_string());
            }
        };

        if self.config.is_async(tool) {
            self.start_job(tool, invocation)
        } else {
            self.run_sync(tool, invocation).await
        }
    }

    /// Look up the tool and check required arguments.
    fn prepare(&self, name: &str, arguments: &serde_json::Value) -> Result<&ToolConfig, ToolError> {
        let tool = self.config.tool(name).ok_or(ToolError::UnknownTool {
            name: name.to_string(),
        })?;

        let args_obj = arguments
            .as_object()
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: "arguments must be an object".into(),
            })?;

        for field in tool.required_parameters() {
            if !args_obj.contains_key(field) {
                return Err(ToolError::InvalidArguments {
                    tool: name.to_string(),
                    reason: format!("missing required field: '{field}'"),
                });
            }
        }

        Ok(tool)
    }

    fn build_invocation(
        &self,
        tool: &ToolConfig,
        arguments: &serde_json::Value,
    ) -> Result<TaskInvocation, ToolError> {
        // Validated at load time; a miss here means the config was mutated.
        let command = self
            .config
            .resolve_command(tool)
            .ok_or_else(|| ToolError::InvalidArguments {
                tool: tool.name.clone(),
                reason: format!("unknown command '{}'", tool.command),
            })?;

        let task = build_prompt(tool, &self.config.base_dir, arguments)?;
        let working_dir: Option<PathBuf> =
            tool.working_dir.as_deref().map(|d| self.config.resolve_path(d));

        Ok(TaskInvocation {
            command,
            model: tool.model.clone(),
            task,
            working_dir,
        })
    }

    fn log_record(tool: &ToolConfig, invocation: &TaskInvocation) -> JobLogRecord {
        JobLogRecord::start(
            &tool.name,
            &invocation.command.program,
            invocation.model.as_deref(),
            &invocation.task,
        )
    }

    // ─── Synchronous Path ────────────────────────────────────────────────

    /// Run the process to completion and return `{exitCode, stdout, stderr}`.
    pub async fn run_sync(&self, tool: &ToolConfig, invocation: TaskInvocation) -> ToolResponse {
        let logger = self.logger_for(&tool.name);
        let record = Self::log_record(tool, &invocation);
        if let Some(logger) = &logger {
            logger.job_started(&record);
        }

        tracing::info!(tool = %tool.name, program = %invocation.command.program, "running tool");
        let start = Instant::now();
        let result = run_task(&invocation).await;
        let elapsed = start.elapsed().as_millis() as i64;

        tracing::info!(
            tool = %tool.name,
            exit_code = result.exit_code,
            duration_ms = elapsed,
            "tool finished"
        );
        if let Some(logger) = &logger {
            logger.job_finished(&record.with_result(&result).with_duration_ms(elapsed));
        }

        let is_error = !result.is_success();
        ToolResponse {
            payload: serde_json::to_value(&result).unwrap_or_default(),
            is_error,
        }
    }

    // ─── Asynchronous Path ───────────────────────────────────────────────

    /// Register a job, start the process in the background, and return the
    /// job id immediately.
    pub fn start_job(&self, tool: &ToolConfig, invocation: TaskInvocation) -> ToolResponse {
        // Inserted as `running` before anything is spawned.
        let job = self.store.create(&tool.name, self.timeout_ms);
        let logger = self.logger_for(&tool.name);
        let record = Self::log_record(tool, &invocation).for_job(&job);

        tracing::info!(
            job_id = %job.id,
            tool = %tool.name,
            program = %invocation.command.program,
            timeout_ms = job.timeout_ms,
            "job started"
        );
        if let Some(logger) = &logger {
            logger.job_started(&record);
        }

        match spawn_task(&invocation) {
            Err(result) => {
                if let Some(done) = self.store.finalize(&job.id, result, Finalization::Natural) {
                    tracing::warn!(job_id = %done.id, "job failed to spawn");
                    if let Some(logger) = &logger {
                        logger.job_finished(&record.for_job(&done));
                    }
                }
            }
            Ok(process) => {
                self.supervisor.supervise(
                    &job.id,
                    job.timeout_ms,
                    process.handle().clone(),
                    logger.clone(),
                    record.clone(),
                );

                let store = Arc::clone(&self.store);
                let job_id = job.id.clone();
                tokio::spawn(async move {
                    let result = process.wait().await;
                    if let Some(done) = store.finalize(&job_id, result, Finalization::Natural) {
                        tracing::info!(
                            job_id = %done.id,
                            status = %done.status,
                            duration_ms = done.duration_ms(),
                            "job finished"
                        );
                        if let Some(logger) = &logger {
                            logger.job_finished(&record.for_job(&done));
                        }
                    }
                });
            }
        }

        let started = JobStarted {
            job_id: &job.id,
            status: "running",
            message: format!(
                "Job started for tool '{}'. Call {STATUS_TOOL_NAME} with this jobId to get the result.",
                tool.name
            ),
        };
        ToolResponse::ok(serde_json::to_value(&started).unwrap_or_default())
    }

    // ─── Status Query ────────────────────────────────────────────────────

    /// Snapshot a job. Unknown ids get a `failed`-shaped not-found reply.
    pub fn job_status(&self, job_id: &str) -> ToolResponse {
        match self.store.get(job_id) {
            Some(job) => ToolResponse::ok(serde_json::to_value(&job).unwrap_or_default()),
            None => {
                let not_found = JobNotFound {
                    id: job_id,
                    status: "failed",
                    error: format!("Job not found: {job_id}"),
                };
                ToolResponse {
                    payload: serde_json::to_value(&not_found).unwrap_or_default(),
                    is_error: true,
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
