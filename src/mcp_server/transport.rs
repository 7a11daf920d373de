//! Line-delimited JSON-RPC transport.
//!
//! One JSON object per line in each direction. Reading happens on the serve
//! loop only; writes come from many request tasks, so the writer is shared
//! behind an async mutex and each response is written and flushed whole.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::errors::ServerError;
use super::types::{JsonRpcRequest, JsonRpcResponse};

/// A line read from the client.
#[derive(Debug)]
pub enum Incoming {
    Request(JsonRpcRequest),
    /// The line was not a JSON-RPC request.
    Malformed { reason: String },
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Reads requests from the client, one per line.
pub struct MessageReader<R> {
    reader: R,
    line_buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buf: Vec::new(),
        }
    }

    /// Next message, or `None` once the client closes its end.
    ///
    /// Blank lines are skipped. A line that is not UTF-8 is reported as
    /// malformed; only I/O failures end the stream with an error.
    pub async fn next_message(&mut self) -> Result<Option<Incoming>, ServerError> {
        loop {
            self.line_buf.clear();
            let bytes_read = self
                .reader
                .read_until(b'\n', &mut self.line_buf)
                .await
                .map_err(|e| ServerError::ReadFailed {
                    reason: e.to_string(),
                })?;

            if bytes_read == 0 {
                return Ok(None);
            }

            let line = match std::str::from_utf8(&self.line_buf) {
                Ok(line) => line,
                Err(e) => {
                    return Ok(Some(Incoming::Malformed {
                        reason: format!("invalid UTF-8: {e}"),
                    }));
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return Ok(Some(match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => Incoming::Request(request),
                Err(e) => Incoming::Malformed {
                    reason: e.to_string(),
                },
            }));
        }
    }
}

// ─── Writer ──────────────────────────────────────────────────────────────────

/// Writes responses to the client; safe to share across tasks.
pub struct MessageWriter<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Serialize and send one response line.
    pub async fn send(&self, response: &JsonRpcResponse) -> Result<(), ServerError> {
        let mut json = serde_json::to_string(response).map_err(|e| ServerError::SerializeFailed {
            reason: e.to_string(),
        })?;
        json.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| ServerError::WriteFailed {
                reason: e.to_string(),
            })?;
        writer.flush().await.map_err(|e| ServerError::WriteFailed {
            reason: e.to_string(),
        })?;

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
