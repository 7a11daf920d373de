//! Tool configuration and invocation error types.

use thiserror::Error;

/// Errors raised while locating, parsing, or validating the tools config.
///
/// These are the only fatal errors in the server: a bad config stops startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file could be located.
    #[error("config file not found: {reason}")]
    NotFound { reason: String },

    /// The config file exists but could not be read.
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    /// YAML/JSON syntax or schema mismatch.
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// Structurally valid config with inconsistent contents.
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

/// Errors that stop a tool invocation before any process is spawned.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool not present in the config.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Arguments missing a required parameter or of the wrong shape.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The prompt template or prompt file could not be used.
    #[error("failed to build prompt for '{tool}': {reason}")]
    PromptFailed { tool: String, reason: String },
}
