//! Process runner — one external model CLI invocation per task.
//!
//! The runner never fails: spawn errors, I/O errors, and signal deaths all
//! fold into a [`TaskResult`] with exit code `-1`. A spawned process is driven
//! by its own tokio task that owns the `Child`; callers reach it through a
//! [`ProcessHandle`], which is how the timeout supervisor delivers signals.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::types::{TaskInvocation, TaskResult, UNOBSERVED_EXIT_CODE};

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long to keep draining stdout/stderr after the process exits.
///
/// Grandchildren that inherited the pipes can hold them open indefinitely.
/// Both streams share this one deadline, and whatever was read before it
/// passes is kept.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Process Handle ──────────────────────────────────────────────────────────

/// Signal request delivered to a running task process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to exit (SIGTERM on unix).
    Terminate,
    /// Kill the process outright (SIGKILL on unix).
    Kill,
}

/// Cloneable control handle for a spawned task process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    control: mpsc::UnboundedSender<Signal>,
}

impl ProcessHandle {
    /// OS process id, if the platform reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request graceful termination. Returns `false` if the process is gone.
    pub fn terminate(&self) -> bool {
        self.control.send(Signal::Terminate).is_ok()
    }

    /// Request a forceful kill. Returns `false` if the process is gone.
    pub fn kill(&self) -> bool {
        self.control.send(Signal::Kill).is_ok()
    }

    /// Whether the process has exited (its driver stopped accepting signals).
    pub fn has_exited(&self) -> bool {
        self.control.is_closed()
    }
}

// ─── Task Process ────────────────────────────────────────────────────────────

/// A spawned task whose result can be awaited exactly once.
pub struct TaskProcess {
    handle: ProcessHandle,
    driver: JoinHandle<TaskResult>,
}

impl TaskProcess {
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Await the process and return its captured result.
    pub async fn wait(self) -> TaskResult {
        match self.driver.await {
            Ok(result) => result,
            Err(e) => TaskResult::failure(format!("process driver failed: {e}")),
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn the external command for `invocation`.
///
/// On spawn failure the error is already converted into the `TaskResult`
/// the caller should report.
pub fn spawn_task(invocation: &TaskInvocation) -> Result<TaskProcess, TaskResult> {
    let program = &invocation.command.program;
    let mut cmd = Command::new(program);
    cmd.args(invocation.arguments());

    for (key, value) in &invocation.command.env {
        cmd.env(key, value);
    }

    if let Some(dir) = &invocation.working_dir {
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    // One-shot, non-interactive: no stdin at all.
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        tracing::warn!(program = %program, error = %e, "failed to spawn task process");
        TaskResult::failure(format!("failed to spawn '{program}': {e}"))
    })?;

    let pid = child.id();
    tracing::debug!(
        program = %program,
        pid = ?pid,
        task_len = invocation.task.len(),
        "spawned task process"
    );

    let stdout = child.stdout.take().map(OutputCapture::start);
    let stderr = child.stderr.take().map(OutputCapture::start);

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let driver = tokio::spawn(drive(child, control_rx, stdout, stderr));

    Ok(TaskProcess {
        handle: ProcessHandle {
            pid,
            control: control_tx,
        },
        driver,
    })
}

/// Spawn the command and wait for it to finish.
pub async fn run_task(invocation: &TaskInvocation) -> TaskResult {
    match spawn_task(invocation) {
        Ok(process) => process.wait().await,
        Err(result) => result,
    }
}

// ─── Driver ──────────────────────────────────────────────────────────────────

async fn drive(
    mut child: Child,
    mut control: mpsc::UnboundedReceiver<Signal>,
    stdout: Option<OutputCapture>,
    stderr: Option<OutputCapture>,
) -> TaskResult {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(signal) = control.recv() => deliver(&mut child, signal),
        }
    };
    // Closing the channel is what makes `ProcessHandle::has_exited` true.
    control.close();

    let deadline = Instant::now() + OUTPUT_DRAIN_TIMEOUT;
    let (stdout, mut stderr) = tokio::join!(
        OutputCapture::finish(stdout, deadline),
        OutputCapture::finish(stderr, deadline),
    );

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(UNOBSERVED_EXIT_CODE),
        Err(e) => {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!("failed to wait for process: {e}"));
            UNOBSERVED_EXIT_CODE
        }
    };

    TaskResult {
        exit_code,
        stdout,
        stderr,
    }
}

/// Deliver a signal to the child. Failures mean it is already gone.
fn deliver(child: &mut Child, signal: Signal) {
    match signal {
        Signal::Terminate => terminate(child),
        Signal::Kill => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    match child.id() {
        // SAFETY: `pid` belongs to a child we own and have not reaped yet.
        Some(pid) => unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        },
        None => {
            let _ = child.start_kill();
        }
    }
}

/// No graceful signal here; both stages use the platform kill.
#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

// ─── Output Capture ──────────────────────────────────────────────────────────

/// A pipe being read into a buffer the runner owns, so output read so far
/// survives a reader that never reaches EOF.
struct OutputCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<std::io::Result<()>>,
}

impl OutputCapture {
    fn start<R: AsyncRead + Unpin + Send + 'static>(pipe: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let reader = tokio::spawn(read_chunks(pipe, Arc::clone(&buf)));
        Self { buf, reader }
    }

    /// Wait for EOF until `deadline`, then return everything captured.
    async fn finish(capture: Option<Self>, deadline: Instant) -> String {
        let Some(Self { buf, mut reader }) = capture else {
            return String::new();
        };

        let note = match tokio::time::timeout_at(deadline, &mut reader).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(format!("<failed to read output: {e}>")),
            Ok(Err(e)) => Some(format!("<output reader failed: {e}>")),
            Err(_) => {
                reader.abort();
                tracing::debug!("output pipe still open after process exit; keeping partial output");
                None
            }
        };

        let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(|e| e.into_inner()));
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if let Some(note) = note {
            text.push_str(&note);
        }
        text
    }
}

async fn read_chunks<R: AsyncRead + Unpin>(
    mut pipe: R,
    buf: Arc<Mutex<Vec<u8>>>,
) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(&chunk[..n]);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
