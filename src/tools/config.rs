//! Tools configuration loading and validation.
//!
//! Reads a YAML (or JSON) file describing the server-wide defaults and the
//! tools to expose. `${VAR}` and `${VAR:-default}` references are resolved
//! before parsing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::commands::{builtin_command, DEFAULT_COMMAND};
use super::errors::ConfigError;
use super::STATUS_TOOL_NAME;
use crate::jobs::CommandSpec;

/// Env var naming the config file.
pub const CONFIG_ENV_VAR: &str = "MODEL_RELAY_CONFIG";

/// File names searched for in the working directory, in order.
const CONFIG_FILE_NAMES: &[&str] = &["model-relay.yaml", "model-relay.yml", "model-relay.json"];

// ─── Public Types ────────────────────────────────────────────────────────────

/// Name and version reported in the `initialize` handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerIdentity {
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_server_version")]
    pub version: String,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
        }
    }
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}
fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Async job settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobsConfig {
    /// Budget per async job in ms; `0` disables the timeout. The
    /// `MODEL_RELAY_JOB_TIMEOUT_MS` env var takes precedence.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Server-wide job event logging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Directory for `<tool>.jsonl` files (default `./logs`).
    #[serde(default)]
    pub dir: Option<String>,
}

/// Per-tool logging override; unset fields inherit the server setting.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolLoggingConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub dir: Option<String>,
}

/// One declared input parameter of a tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterConfig {
    pub name: String,
    /// JSON Schema type (`string`, `number`, `boolean`, ...).
    #[serde(rename = "type", default = "default_param_type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

fn default_param_type() -> String {
    "string".to_string()
}

/// A tool exposed over MCP and backed by a model CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
    /// Built-in CLI name or a key of the top-level `commands` map.
    #[serde(default = "default_command")]
    pub command: String,
    /// Model variant passed as `--model <id>`.
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the server-wide `async_default`.
    #[serde(default, rename = "async")]
    pub is_async: Option<bool>,
    /// Inline prompt template with `{{param}}` placeholders.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Template file, relative to the config file's directory.
    #[serde(default)]
    pub prompt_file: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub logging: Option<ToolLoggingConfig>,
}

fn default_command() -> String {
    DEFAULT_COMMAND.to_string()
}

impl ToolConfig {
    /// JSON Schema for the tool's arguments, built from `parameters`.
    ///
    /// A tool without declared parameters or a fixed template takes a
    /// single required `prompt`.
    pub fn input_schema(&self) -> serde_json::Value {
        if self.takes_free_prompt() {
            return serde_json::json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "Instructions passed to the model"
                    }
                },
                "required": ["prompt"]
            });
        }

        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = serde_json::json!({ "type": param.kind });
            if !param.description.is_empty() {
                prop["description"] = serde_json::Value::String(param.description.clone());
            }
            properties.insert(param.name.clone(), prop);
            if param.required {
                required.push(serde_json::Value::String(param.name.clone()));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Whether a template supplies the task instead of a `prompt` argument.
    pub fn has_template(&self) -> bool {
        self.prompt.is_some() || self.prompt_file.is_some()
    }

    fn takes_free_prompt(&self) -> bool {
        self.parameters.is_empty() && !self.has_template()
    }

    /// Names of parameters callers must supply.
    pub fn required_parameters(&self) -> Vec<&str> {
        if self.takes_free_prompt() {
            return vec!["prompt"];
        }
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerIdentity,
    /// Dispatch mode for tools without their own `async` flag.
    #[serde(default)]
    pub async_default: bool,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Extra or overriding CLI definitions, keyed by command name.
    #[serde(default)]
    pub commands: HashMap<String, CommandSpec>,
    pub tools: Vec<ToolConfig>,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl RelayConfig {
    /// Look up a tool by name.
    pub fn tool(&self, name: &str) -> Option<&ToolConfig> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Command line for a tool: `commands` entries win over built-ins.
    pub fn resolve_command(&self, tool: &ToolConfig) -> Option<CommandSpec> {
        self.commands
            .get(&tool.command)
            .cloned()
            .or_else(|| builtin_command(&tool.command))
    }

    /// Resolved dispatch mode for a tool.
    pub fn is_async(&self, tool: &ToolConfig) -> bool {
        tool.is_async.unwrap_or(self.async_default)
    }

    /// Log directory for a tool's job events, or `None` when disabled.
    pub fn log_dir_for(&self, tool: &ToolConfig) -> Option<PathBuf> {
        let override_cfg = tool.logging.clone().unwrap_or_default();
        let enabled = override_cfg.enabled.unwrap_or(self.logging.enabled);
        if !enabled {
            return None;
        }
        let dir = override_cfg
            .dir
            .or_else(|| self.logging.dir.clone())
            .unwrap_or_else(|| "logs".to_string());
        Some(self.resolve_path(&dir))
    }

    /// Resolve a config-relative path (absolute paths pass through).
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let expanded = PathBuf::from(expand_tilde(path));
        if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        }
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tools.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "no tools configured".into(),
            });
        }

        let mut seen = HashSet::new();
        for tool in &self.tools {
            if tool.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: "tool with empty name".into(),
                });
            }
            if tool.name == STATUS_TOOL_NAME {
                return Err(ConfigError::Invalid {
                    reason: format!("tool name '{STATUS_TOOL_NAME}' is reserved"),
                });
            }
            if !seen.insert(tool.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate tool name '{}'", tool.name),
                });
            }
            if self.resolve_command(tool).is_none() {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "tool '{}' uses unknown command '{}'",
                        tool.name, tool.command
                    ),
                });
            }
            if tool.prompt.is_some() && tool.prompt_file.is_some() {
                return Err(ConfigError::Invalid {
                    reason: format!(
                        "tool '{}' sets both prompt and prompt_file",
                        tool.name
                    ),
                });
            }
            let mut params = HashSet::new();
            for param in &tool.parameters {
                if !params.insert(param.name.as_str()) {
                    return Err(ConfigError::Invalid {
                        reason: format!(
                            "tool '{}' declares parameter '{}' twice",
                            tool.name, param.name
                        ),
                    });
                }
            }
        }

        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Order: explicit path, `MODEL_RELAY_CONFIG`, `model-relay.{yaml,yml,json}`
/// in `cwd`, then `<user config dir>/model-relay/config.yaml`.
pub fn find_config_path(explicit: Option<&Path>, cwd: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return existing(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return existing(PathBuf::from(expand_tilde(&path)));
        }
    }

    for name in CONFIG_FILE_NAMES {
        let candidate = cwd.join(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("model-relay").join("config.yaml");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(ConfigError::NotFound {
        reason: format!(
            "pass --config, set {CONFIG_ENV_VAR}, or create {} in {}",
            CONFIG_FILE_NAMES[0],
            cwd.display()
        ),
    })
}

fn existing(path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(ConfigError::NotFound {
            reason: path.display().to_string(),
        })
    }
}

/// Load, interpolate, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    parse_config(&raw, base_dir)
}

/// Parse config text. JSON is accepted since it is a subset of YAML.
pub fn parse_config(raw: &str, base_dir: PathBuf) -> Result<RelayConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);

    let mut config: RelayConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;
    config.base_dir = base_dir;
    config.validate()?;

    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| default.to_string()),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
server:
  name: relay-test
async_default: false
jobs:
  timeout_ms: 60000
logging:
  enabled: true
  dir: ./job-logs
commands:
  local:
    program: ./bin/local-model
    args: ["--quiet"]
tools:
  - name: ask_claude
    description: Ask Claude anything
    model: sonnet
  - name: review
    description: Review a file
    command: codex
    async: true
    prompt: "Review {{file}}"
    logging:
      enabled: false
    parameters:
      - name: file
        description: Path to review
        required: true
      - name: depth
        type: number
  - name: offline
    command: local
    logging:
      dir: /var/log/relay
  - name: standup
    description: Fixed daily summary
    prompt: "Summarize yesterday's commits"
"#;

    fn sample() -> RelayConfig {
        parse_config(SAMPLE, PathBuf::from("/etc/relay")).unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        assert_eq!(config.server.name, "relay-test");
        assert_eq!(config.server.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.jobs.timeout_ms, Some(60000));
        assert_eq!(config.tools.len(), 4);

        let ask = config.tool("ask_claude").unwrap();
        assert_eq!(ask.command, "claude");
        assert_eq!(ask.model.as_deref(), Some("sonnet"));
        assert!(ask.is_async.is_none());

        let review = config.tool("review").unwrap();
        assert_eq!(review.parameters[0].kind, "string");
        assert_eq!(review.parameters[1].kind, "number");
        assert!(!review.parameters[1].required);
    }

    #[test]
    fn test_dispatch_mode_resolution() {
        let config = sample();
        assert!(!config.is_async(config.tool("ask_claude").unwrap()));
        assert!(config.is_async(config.tool("review").unwrap()));

        let mut all_async = sample();
        all_async.async_default = true;
        assert!(all_async.is_async(all_async.tool("ask_claude").unwrap()));
    }

    #[test]
    fn test_resolve_command_prefers_config_entries() {
        let config = sample();
        let local = config.resolve_command(config.tool("offline").unwrap()).unwrap();
        assert_eq!(local.program, "./bin/local-model");
        assert_eq!(local.args, vec!["--quiet"]);

        let codex = config.resolve_command(config.tool("review").unwrap()).unwrap();
        assert_eq!(codex.program, "codex");
    }

    #[test]
    fn test_log_dir_overrides() {
        let config = sample();
        assert_eq!(
            config.log_dir_for(config.tool("ask_claude").unwrap()),
            Some(PathBuf::from("/etc/relay/./job-logs"))
        );
        assert_eq!(config.log_dir_for(config.tool("review").unwrap()), None);
        assert_eq!(
            config.log_dir_for(config.tool("offline").unwrap()),
            Some(PathBuf::from("/var/log/relay"))
        );
    }

    #[test]
    fn test_input_schema_from_parameters() {
        let config = sample();
        let schema = config.tool("review").unwrap().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["file"]["type"], "string");
        assert_eq!(schema["properties"]["file"]["description"], "Path to review");
        assert_eq!(schema["properties"]["depth"]["type"], "number");
        assert_eq!(schema["required"], serde_json::json!(["file"]));
    }

    #[test]
    fn test_input_schema_default_prompt() {
        let config = sample();
        let tool = config.tool("ask_claude").unwrap();
        assert_eq!(tool.input_schema()["required"], serde_json::json!(["prompt"]));
        assert_eq!(tool.required_parameters(), vec!["prompt"]);
    }

    #[test]
    fn test_fixed_template_takes_no_prompt_argument() {
        let config = sample();
        let tool = config.tool("standup").unwrap();
        let schema = tool.input_schema();
        assert_eq!(schema["required"], serde_json::json!([]));
        assert!(schema["properties"].as_object().unwrap().is_empty());
        assert!(tool.required_parameters().is_empty());
    }

    #[test]
    fn test_json_config_is_accepted() {
        let json = r#"{"async_default": true, "tools": [{"name": "ask", "command": "gemini"}]}"#;
        let config = parse_config(json, PathBuf::from(".")).unwrap();
        assert!(config.async_default);
        assert_eq!(config.tools[0].command, "gemini");
    }

    #[test]
    fn test_validate_rejects_empty_tools() {
        let err = parse_config("tools: []", PathBuf::from(".")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let yaml = "tools:\n  - name: a\n  - name: a\n";
        let err = parse_config(yaml, PathBuf::from(".")).unwrap_err();
        assert!(err.to_string().contains("duplicate tool name 'a'"));
    }

    #[test]
    fn test_validate_rejects_reserved_name() {
        let yaml = format!("tools:\n  - name: {STATUS_TOOL_NAME}\n");
        let err = parse_config(&yaml, PathBuf::from(".")).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_validate_rejects_unknown_command() {
        let yaml = "tools:\n  - name: a\n    command: mystery\n";
        let err = parse_config(yaml, PathBuf::from(".")).unwrap_err();
        assert!(err.to_string().contains("unknown command 'mystery'"));
    }

    #[test]
    fn test_validate_rejects_two_prompt_sources() {
        let yaml = "tools:\n  - name: a\n    prompt: x\n    prompt_file: y.md\n";
        let err = parse_config(yaml, PathBuf::from(".")).unwrap_err();
        assert!(err.to_string().contains("both prompt and prompt_file"));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = parse_config("tools: [", PathBuf::from(".")).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__RELAY_TEST_UNSET__");
        assert_eq!(
            interpolate_env_vars("model: ${__RELAY_TEST_UNSET__:-haiku}"),
            "model: haiku"
        );
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__RELAY_TEST_MODEL__", "opus");
        assert_eq!(
            interpolate_env_vars("model: ${__RELAY_TEST_MODEL__:-haiku}"),
            "model: opus"
        );
        std::env::remove_var("__RELAY_TEST_MODEL__");
    }

    #[test]
    fn test_interpolate_leaves_prompt_placeholders() {
        let input = "prompt: \"Review {{file}} for $5\"";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_load_config_sets_base_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model-relay.yaml");
        std::fs::write(&path, "tools:\n  - name: ask\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.base_dir, dir.path());
    }

    #[test]
    fn test_find_config_in_cwd() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model-relay.yml");
        std::fs::write(&path, "tools: []").unwrap();
        assert_eq!(find_config_path(None, dir.path()).unwrap(), path);
    }

    #[test]
    fn test_find_config_explicit_missing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.yaml");
        let err = find_config_path(Some(&missing), dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }
}
