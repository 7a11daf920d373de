//! Logging — process-wide tracing setup plus per-tool job event logs.
//!
//! Tracing output goes to stderr because stdout carries the MCP protocol.
//! Setting `MODEL_RELAY_LOG_FILE` sends it to a rotated, line-flushed file
//! instead.

pub mod job_log;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub use job_log::{JobEvent, JobLogRecord, JobLogger, JsonlJobLogger};

/// Env var holding the tracing filter (falls back to `RUST_LOG`).
pub const LOG_FILTER_ENV_VAR: &str = "MODEL_RELAY_LOG";

/// Env var naming a file to write tracing output to.
pub const LOG_FILE_ENV_VAR: &str = "MODEL_RELAY_LOG_FILE";

const DEFAULT_FILTER: &str = "model_relay=info,warn";

/// Number of rotated log files kept next to the active one.
const LOG_ROTATIONS: u32 = 3;

/// Initialize the global tracing subscriber.
///
/// When a log file is configured:
/// 1. Rotates existing logs (relay.log → relay.log.1 → .2 → .3).
/// 2. Opens a fresh file behind a line-flushing writer.
pub fn init_tracing() -> std::io::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_path = std::env::var_os(LOG_FILE_ENV_VAR).map(PathBuf::from);

    let writer = match &log_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            rotate_log_file(path, LOG_ROTATIONS);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(FlushingWriter::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_path.as_ref().map(|p| p.display().to_string()),
        pid = std::process::id(),
        "=== model-relay starting ==="
    );

    Ok(())
}

/// Rotate log files: `relay.log` → `relay.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
pub(crate) fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Keeps each log line on disk immediately so nothing is lost if the host
/// kills the server without warning.
#[derive(Clone)]
pub(crate) struct FlushingWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl FlushingWriter {
    pub(crate) fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = f.write(buf)?;
        f.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        f.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
