//! Hook protocol glue: stdin payloads, exit codes, and the detached
//! learning hand-off.
//!
//! The host agent invokes rampart around its own tool execution: a
//! pre-tool-use hook that blocks on the decision, and a session-end hook
//! that must return immediately. Exit code 0 allows; exit code 2 blocks or
//! warns with the explanation on stderr.

use serde_json::Value;

use std::process::Stdio;

/// Exit code that allows the tool call.
pub const EXIT_ALLOW: i32 = 0;
/// Exit code that stops the tool call (block and warn both use it; the
/// stderr framing tells them apart).
pub const EXIT_STOP: i32 = 2;

/// Parsed hook payload from stdin.
#[derive(Debug, Clone)]
pub struct HookInput {
    pub tool_name: String,
    pub tool_input: Value,
    pub justification: Option<String>,
    pub transcript_path: Option<String>,
}

impl HookInput {
    /// Parse a hook payload. Malformed JSON degrades to an empty payload
    /// rather than failing the hook.
    ///
    /// The justification (where an override token would appear) comes from
    /// the payload's own field, or from a description/justification embedded
    /// in the tool input.
    pub fn parse(raw: &str) -> Self {
        let parsed: Value = serde_json::from_str(raw).unwrap_or(Value::Null);
        let tool_input = parsed.get("tool_input").cloned().unwrap_or(Value::Null);

        let justification = parsed
            .get("justification")
            .and_then(Value::as_str)
            .or_else(|| {
                let object = tool_input.as_object()?;
                object
                    .get("description")
                    .or_else(|| object.get("justification"))
                    .and_then(Value::as_str)
            })
            .map(String::from);

        Self {
            tool_name: parsed
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            tool_input,
            justification,
            transcript_path: parsed
                .get("transcript_path")
                .and_then(Value::as_str)
                .map(String::from),
        }
    }

    /// Tool input as analyzable text: strings pass through, structures are
    /// pretty-printed.
    pub fn tool_input_text(&self) -> String {
        match &self.tool_input {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Hand the transcript off to a detached background worker and return
/// immediately. Ending a session never blocks on transcript analysis.
pub fn spawn_detached_learning(transcript_path: &str) -> std::io::Result<u32> {
    let current_exe = std::env::current_exe()?;

    let mut command = std::process::Command::new(current_exe);
    command
        .arg("learn-worker")
        .arg(transcript_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // Detach from the session's process group so the worker survives the
    // hook process and never receives its signals.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        command.process_group(0);
    }

    let child = command.spawn()?;
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extracts_tool_fields() {
        let input = HookInput::parse(
            r#"{"tool_name": "Bash", "tool_input": {"command": "ls"}, "transcript_path": "/tmp/t.jsonl"}"#,
        );
        assert_eq!(input.tool_name, "Bash");
        assert_eq!(input.transcript_path.as_deref(), Some("/tmp/t.jsonl"));
    }

    #[test]
    fn test_parse_tolerates_malformed_payload() {
        let input = HookInput::parse("{not json");
        assert_eq!(input.tool_name, "unknown");
        assert!(input.transcript_path.is_none());
        assert_eq!(input.tool_input_text(), "");
    }

    #[test]
    fn test_justification_from_description_or_justification() {
        let with_description = HookInput::parse(
            r#"{"tool_name": "Bash", "tool_input": {"command": "x", "description": "OVERRIDE: shim"}}"#,
        );
        assert_eq!(
            with_description.justification.as_deref(),
            Some("OVERRIDE: shim")
        );

        let with_justification = HookInput::parse(
            r#"{"tool_name": "Bash", "tool_input": {"command": "x", "justification": "reason"}}"#,
        );
        assert_eq!(with_justification.justification.as_deref(), Some("reason"));

        let top_level = HookInput::parse(
            r#"{"tool_name": "Bash", "tool_input": "x", "justification": "OVERRIDE: approved"}"#,
        );
        assert_eq!(
            top_level.justification.as_deref(),
            Some("OVERRIDE: approved"),
            "top-level justification wins"
        );

        let without = HookInput::parse(r#"{"tool_name": "Bash", "tool_input": "plain string"}"#);
        assert!(without.justification.is_none());
    }

    #[test]
    fn test_tool_input_text_pretty_prints_objects() {
        let input =
            HookInput::parse(r#"{"tool_name": "Write", "tool_input": {"file_path": "a.txt"}}"#);
        let text = input.tool_input_text();
        assert!(text.contains("\"file_path\": \"a.txt\""));

        let string_input =
            HookInput::parse(r#"{"tool_name": "Bash", "tool_input": "rm -rf /"}"#);
        assert_eq!(string_input.tool_input_text(), "rm -rf /");
    }
}
