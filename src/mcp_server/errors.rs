//! MCP server error types.

use thiserror::Error;

/// Errors that end the serve loop or a single message exchange.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Reading a request from the client failed.
    #[error("failed to read request: {reason}")]
    ReadFailed { reason: String },

    /// Writing a response to the client failed.
    #[error("failed to write response: {reason}")]
    WriteFailed { reason: String },

    /// A response could not be serialized.
    #[error("failed to serialize response: {reason}")]
    SerializeFailed { reason: String },
}
