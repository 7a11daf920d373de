//! MCP Server — JSON-RPC over stdio exposing the configured tools.
//!
//! This module handles:
//! - Line-delimited JSON-RPC 2.0 framing on stdin/stdout
//! - The `initialize`, `ping`, `tools/list`, and `tools/call` methods
//! - Concurrent request handling with serialized response writes
//!
//! Tool semantics live in `tools::dispatch`; this layer only translates.

pub mod errors;
pub mod server;
pub mod transport;
pub mod types;

pub use errors::ServerError;
pub use server::McpServer;
pub use types::{JsonRpcRequest, JsonRpcResponse, ToolDefinition};
