//! Built-in model CLI command lines.
//!
//! Each entry is the fixed argument list a CLI needs for a one-shot,
//! non-interactive run. The task string is appended after these, and a
//! configured model variant is prepended as `--model <id>`.

use crate::jobs::CommandSpec;

/// Names accepted in a tool's `command` field without a `commands:` entry.
pub const BUILTIN_COMMANDS: &[&str] = &["claude", "codex", "gemini"];

/// Command used when a tool does not name one.
pub const DEFAULT_COMMAND: &str = "claude";

/// Look up a built-in CLI by name.
pub fn builtin_command(name: &str) -> Option<CommandSpec> {
    match name {
        // claude -p <task>: print mode, exits after one response.
        "claude" => Some(CommandSpec::new("claude", &["-p"])),
        // codex exec <task>: non-interactive execution subcommand.
        "codex" => Some(CommandSpec::new("codex", &["exec"])),
        "gemini" => Some(CommandSpec::new("gemini", &["-p"])),
        _ => None,
    }
}
