//! model-relay — MCP server entry point.
//!
//! # Usage
//!
//! ```text
//! model-relay --config model-relay.yaml
//! model-relay check
//! ```

use std::sync::Arc;

use anyhow::Context;
use model_relay::cli::{parse_args, CliCommand, USAGE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

    let command = match parse_args(&arg_refs) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("model-relay: {e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let check_only = matches!(command, CliCommand::Check { .. });
    let config = match command {
        CliCommand::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        CliCommand::Version => {
            println!("model-relay {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        CliCommand::Serve { config } | CliCommand::Check { config } => config,
    };

    model_relay::logging::init_tracing().context("failed to initialize logging")?;

    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let server = match model_relay::build_server(config.as_deref(), &cwd) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            eprintln!("model-relay: {e}");
            std::process::exit(1);
        }
    };

    if check_only {
        // The status tool is always listed last.
        println!("config ok: {} tools", server.tool_definitions().len() - 1);
        return Ok(());
    }

    Arc::new(server)
        .serve_stdio()
        .await
        .context("stdio transport failed")?;

    tracing::info!("=== model-relay stopped ===");
    Ok(())
}
