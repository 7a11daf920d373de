//! Tools — configuration, prompt composition, and dispatch of tool calls.
//!
//! Every configured tool maps to one model CLI. The dispatcher decides per
//! call whether to block on the process or run it as a background job, and
//! serves the fixed status tool used to poll those jobs.

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod prompt;

pub use config::{find_config_path, load_config, RelayConfig, ToolConfig};
pub use dispatch::{Dispatcher, ToolResponse};
pub use errors::{ConfigError, ToolError};

/// Name of the built-in job polling tool.
pub const STATUS_TOOL_NAME: &str = "get_job_status";

/// Input schema of the status tool.
pub fn status_tool_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "jobId": {
                "type": "string",
                "description": "Identifier returned when the job was started"
            }
        },
        "required": ["jobId"]
    })
}

/// Description of the status tool.
pub const STATUS_TOOL_DESCRIPTION: &str =
    "Get the status and, once finished, the result of an asynchronous job.";
