//! Command-line arguments for the `model-relay` binary.

use std::path::PathBuf;

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Serve MCP over stdio.
    Serve { config: Option<PathBuf> },
    /// Load and validate the config, then exit.
    Check { config: Option<PathBuf> },
    Help,
    Version,
}

pub const USAGE: &str = "\
model-relay — MCP server that runs AI model CLIs as tools

USAGE:
    model-relay [--config <path>]          serve over stdio
    model-relay check [--config <path>]    validate the config and exit
    model-relay --help | --version

ENVIRONMENT:
    MODEL_RELAY_CONFIG           config file path
    MODEL_RELAY_JOB_TIMEOUT_MS   async job budget in milliseconds (default 1200000)
    MODEL_RELAY_LOG              tracing filter (default model_relay=info,warn)
    MODEL_RELAY_LOG_FILE         write logs to this file instead of stderr";

/// Parse arguments (without the program name).
pub fn parse_args(args: &[&str]) -> Result<CliCommand, String> {
    let mut config = None;
    let mut check = false;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match *arg {
            "-h" | "--help" => return Ok(CliCommand::Help),
            "-V" | "--version" => return Ok(CliCommand::Version),
            "check" if !check => check = true,
            "-c" | "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| format!("{arg} requires a path"))?;
                config = Some(PathBuf::from(value));
            }
            other => {
                if let Some(value) = other.strip_prefix("--config=") {
                    config = Some(PathBuf::from(value));
                } else {
                    return Err(format!("unexpected argument '{other}'"));
                }
            }
        }
    }

    Ok(if check {
        CliCommand::Check { config }
    } else {
        CliCommand::Serve { config }
    })
}
