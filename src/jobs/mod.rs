//! Jobs — asynchronous execution of model CLI tasks.
//!
//! This module handles:
//! - Spawning one external process per task and capturing its output
//! - The in-memory job store with first-writer-wins finalization
//! - Per-job timeouts with terminate-then-kill escalation
//!
//! The dispatcher in `tools::dispatch` is the only producer of jobs.

pub mod runner;
pub mod store;
pub mod supervisor;
pub mod types;

pub use runner::{run_task, spawn_task, ProcessHandle, TaskProcess};
pub use store::JobStore;
pub use supervisor::{resolve_timeout_ms, TimeoutSupervisor, DEFAULT_JOB_TIMEOUT_MS};
pub use types::{CommandSpec, Finalization, Job, JobStatus, TaskInvocation, TaskResult};
