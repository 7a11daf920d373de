pub mod cli;
pub mod jobs;
pub mod logging;
pub mod mcp_server;
pub mod tools;

use std::path::Path;
use std::sync::Arc;

use jobs::JobStore;
use mcp_server::McpServer;
use tools::Dispatcher;

/// Load the tools config and build the server around a fresh job store.
///
/// The job store lives for the whole process; there is no teardown.
pub fn build_server(
    explicit_config: Option<&Path>,
    cwd: &Path,
) -> Result<McpServer, tools::ConfigError> {
    let config_path = tools::find_config_path(explicit_config, cwd)?;
    let config = tools::load_config(&config_path)?;

    tracing::info!(
        config = %config_path.display(),
        tools = ?config.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        "loaded tools config"
    );

    let store = Arc::new(JobStore::new());
    let dispatcher = Dispatcher::new(config, store);
    Ok(McpServer::new(Arc::new(dispatcher)))
}
