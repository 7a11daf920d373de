//! Prompt builder — turns tool arguments into the task string.

use std::path::Path;

use super::config::ToolConfig;
use super::errors::ToolError;

/// Compose the task string for one invocation.
///
/// - `prompt`: inline template, `{{param}}` placeholders substituted.
/// - `prompt_file`: template read from disk on every call, same substitution.
/// - neither: the `prompt` argument verbatim, else the arguments as JSON.
pub fn build_prompt(
    tool: &ToolConfig,
    base_dir: &Path,
    arguments: &serde_json::Value,
) -> Result<String, ToolError> {
    if let Some(template) = &tool.prompt {
        return Ok(render_template(template, arguments));
    }

    if let Some(file) = &tool.prompt_file {
        let path = base_dir.join(file);
        let template = std::fs::read_to_string(&path).map_err(|e| ToolError::PromptFailed {
            tool: tool.name.clone(),
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        return Ok(render_template(&template, arguments));
    }

    match arguments.get("prompt") {
        Some(serde_json::Value::String(prompt)) => Ok(prompt.clone()),
        Some(other) => Ok(other.to_string()),
        None => Ok(arguments.to_string()),
    }
}

/// Replace every `{{name}}` with the matching argument.
///
/// Strings are inserted verbatim, other values as JSON, missing ones as "".
/// Whitespace inside the braces is ignored. An unterminated `{{` is kept.
pub fn render_template(template: &str, arguments: &serde_json::Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        out.push_str(&argument_text(arguments, key));
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

fn argument_text(arguments: &serde_json::Value, key: &str) -> String {
    match arguments.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn tool(prompt: Option<&str>, prompt_file: Option<&str>) -> ToolConfig {
        ToolConfig {
            name: "t".into(),
            description: String::new(),
            parameters: vec![],
            command: "claude".into(),
            model: None,
            is_async: None,
            prompt: prompt.map(String::from),
            prompt_file: prompt_file.map(String::from),
            working_dir: None,
            logging: None,
        }
    }

    #[test]
    fn test_render_substitutes_values() {
        let args = json!({"file": "src/main.rs", "depth": 3, "strict": true});
        assert_eq!(
            render_template("Review {{file}} at depth {{ depth }} strict={{strict}}", &args),
            "Review src/main.rs at depth 3 strict=true"
        );
    }

    #[test]
    fn test_render_missing_and_null_are_empty() {
        let args = json!({"a": null});
        assert_eq!(render_template("[{{a}}][{{b}}]", &args), "[][]");
    }

    #[test]
    fn test_render_unterminated_is_kept() {
        assert_eq!(render_template("keep {{open", &json!({})), "keep {{open");
    }

    #[test]
    fn test_build_prompt_inline_template() {
        let t = tool(Some("Explain {{topic}}"), None);
        let out = build_prompt(&t, Path::new("."), &json!({"topic": "lifetimes"})).unwrap();
        assert_eq!(out, "Explain lifetimes");
    }

    #[test]
    fn test_build_prompt_from_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("review.md"), "Review {{file}} carefully").unwrap();
        let t = tool(None, Some("review.md"));
        let out = build_prompt(&t, dir.path(), &json!({"file": "lib.rs"})).unwrap();
        assert_eq!(out, "Review lib.rs carefully");
    }

    #[test]
    fn test_build_prompt_missing_file() {
        let dir = TempDir::new().unwrap();
        let t = tool(None, Some("absent.md"));
        let err = build_prompt(&t, dir.path(), &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::PromptFailed { .. }));
    }

    #[test]
    fn test_build_prompt_passthrough() {
        let t = tool(None, None);
        assert_eq!(
            build_prompt(&t, Path::new("."), &json!({"prompt": "hi"})).unwrap(),
            "hi"
        );
        assert_eq!(
            build_prompt(&t, Path::new("."), &json!({"q": 1})).unwrap(),
            r#"{"q":1}"#
        );
    }
}
