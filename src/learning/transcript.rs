//! Transcript parsing and excerpt formatting.
//!
//! Transcripts arrive as JSONL: one entry per line, user/assistant turns
//! mixed with tool_use and tool_result blocks. The excerpt builder bounds
//! what reaches the extraction model: recent turns only, per-line caps,
//! tool results elided entirely.

use super::LearningError;

use serde::Deserialize;
use serde_json::Value;

use std::path::Path;

const STRING_CONTENT_CHARS: usize = 500;
const TEXT_BLOCK_CHARS: usize = 300;

/// One transcript line.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptEntry {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: Option<TranscriptMessage>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// The message payload of a turn. Content is either a plain string or an
/// array of typed blocks, so it stays a raw value with helpers below.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Value,
}

/// A tool invocation pulled out of an assistant turn.
#[derive(Debug, Clone)]
pub struct ToolUse {
    pub id: Option<String>,
    pub name: String,
    pub input: String,
}

/// The matched result for a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl TranscriptEntry {
    /// Whether this entry is a conversation turn.
    pub fn is_turn(&self) -> bool {
        self.kind == "user" || self.kind == "assistant"
    }

    pub fn role(&self) -> &str {
        self.message
            .as_ref()
            .and_then(|message| message.role.as_deref())
            .unwrap_or(&self.kind)
    }
}

/// Load a transcript file, one JSON entry per non-empty line.
pub fn load(path: &Path) -> Result<Vec<TranscriptEntry>, LearningError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|error| LearningError::Transcript(format!("{}: {error}", path.display())))?;

    let mut entries = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: TranscriptEntry = serde_json::from_str(line)
            .map_err(|error| LearningError::Transcript(format!("bad transcript line: {error}")))?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Extract readable text from a content value (string or block array).
pub fn extract_text(content: &Value, max_chars: usize) -> String {
    match content {
        Value::String(text) => clip(text, max_chars).to_string(),
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            clip(&texts.join(" "), max_chars).to_string()
        }
        Value::Null => String::new(),
        other => clip(&other.to_string(), max_chars).to_string(),
    }
}

/// Pull tool_use blocks out of a content array.
pub fn extract_tool_uses(content: &Value) -> Vec<ToolUse> {
    let Value::Array(blocks) = content else {
        return Vec::new();
    };

    blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .map(|block| ToolUse {
            id: block.get("id").and_then(Value::as_str).map(String::from),
            name: block
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            input: clip(
                &block.get("input").cloned().unwrap_or(Value::Null).to_string(),
                5000,
            )
            .to_string(),
        })
        .collect()
}

/// Find the tool_result matching a tool_use id anywhere in the transcript.
pub fn find_tool_result(entries: &[TranscriptEntry], tool_use_id: &str) -> Option<ToolResult> {
    for entry in entries {
        let Some(message) = &entry.message else {
            continue;
        };
        let Value::Array(blocks) = &message.content else {
            continue;
        };
        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                continue;
            }
            if block.get("tool_use_id").and_then(Value::as_str) != Some(tool_use_id) {
                continue;
            }
            let output = block.get("content").cloned().unwrap_or(Value::Null);
            let output_text = match &output {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            let is_error = block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            return Some(ToolResult {
                output: clip(&output_text, 5000).to_string(),
                success: !is_error,
                error_message: is_error.then(|| clip(&output_text, 500).to_string()),
            });
        }
    }
    None
}

/// Build the bounded conversation excerpt sent to the extraction model.
///
/// Only the most recent `max_turns` user/assistant entries contribute. Tool
/// results never appear, only the tool names used. The total stops growing
/// once `max_chars` is reached.
pub fn format_excerpt(
    entries: &[TranscriptEntry],
    max_turns: usize,
    max_chars: usize,
    line_chars: usize,
) -> String {
    let turns: Vec<&TranscriptEntry> = entries.iter().filter(|entry| entry.is_turn()).collect();
    let recent = if turns.len() > max_turns {
        &turns[turns.len() - max_turns..]
    } else {
        &turns[..]
    };

    let mut lines: Vec<String> = Vec::new();
    let mut total_chars = 0;

    for entry in recent {
        let Some(message) = &entry.message else {
            continue;
        };

        let text = match &message.content {
            Value::String(text) => clip(text, STRING_CONTENT_CHARS).to_string(),
            Value::Array(blocks) => {
                let mut parts: Vec<String> = Vec::new();
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                parts.push(clip(text, TEXT_BLOCK_CHARS).to_string());
                            }
                        }
                        Some("tool_use") => {
                            let name = block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown");
                            parts.push(format!("[Tool: {name}]"));
                        }
                        // Tool results are far too verbose for the excerpt.
                        _ => {}
                    }
                }
                parts.join(" ")
            }
            other => clip(&other.to_string(), TEXT_BLOCK_CHARS).to_string(),
        };

        if text.trim().is_empty() {
            continue;
        }

        let line = format!(
            "{}: {}",
            entry.role().to_uppercase(),
            clip(&text, line_chars)
        );
        if total_chars + line.len() > max_chars {
            break;
        }
        total_chars += line.len();
        lines.push(line);
    }

    lines.join("\n\n")
}

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(kind: &str, content: Value) -> TranscriptEntry {
        TranscriptEntry {
            kind: kind.into(),
            message: Some(TranscriptMessage {
                role: Some(kind.into()),
                content,
            }),
            uuid: None,
            session_id: None,
            cwd: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_excerpt_surfaces_tool_names_and_elides_results() {
        let entries = vec![
            turn("user", Value::String("delete the build dir".into())),
            turn(
                "assistant",
                serde_json::json!([
                    { "type": "text", "text": "running it now" },
                    { "type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "rm -rf build"} },
                ]),
            ),
            turn(
                "user",
                serde_json::json!([
                    { "type": "tool_result", "tool_use_id": "t1", "content": "a".repeat(10_000) },
                ]),
            ),
        ];

        let excerpt = format_excerpt(&entries, 30, 8000, 400);
        assert!(excerpt.contains("USER: delete the build dir"));
        assert!(excerpt.contains("[Tool: Bash]"));
        assert!(
            !excerpt.contains("aaaa"),
            "tool result payloads never reach the excerpt"
        );
    }

    #[test]
    fn test_excerpt_keeps_only_recent_turns() {
        let entries: Vec<TranscriptEntry> = (0..50)
            .map(|index| turn("user", Value::String(format!("turn {index}"))))
            .collect();

        let excerpt = format_excerpt(&entries, 30, 8000, 400);
        assert!(!excerpt.contains("turn 19"), "older turns are dropped");
        assert!(excerpt.contains("turn 20"));
        assert!(excerpt.contains("turn 49"));
    }

    #[test]
    fn test_excerpt_respects_total_char_cap() {
        let entries: Vec<TranscriptEntry> = (0..30)
            .map(|_| turn("user", Value::String("x".repeat(450))))
            .collect();

        let excerpt = format_excerpt(&entries, 30, 1000, 400);
        assert!(
            excerpt.len() <= 1000 + 2 * 30,
            "total stays near the cap, got {}",
            excerpt.len()
        );
    }

    #[test]
    fn test_find_tool_result_matches_by_id() {
        let entries = vec![turn(
            "user",
            serde_json::json!([
                { "type": "tool_result", "tool_use_id": "t9", "content": "exit 1", "is_error": true },
            ]),
        )];

        let result = find_tool_result(&entries, "t9").expect("result found");
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("exit 1"));
        assert!(find_tool_result(&entries, "missing").is_none());
    }

    #[test]
    fn test_extract_tool_uses_from_assistant_content() {
        let content = serde_json::json!([
            { "type": "text", "text": "on it" },
            { "type": "tool_use", "id": "t1", "name": "Write", "input": {"file": "a.txt"} },
        ]);

        let uses = extract_tool_uses(&content);
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].name, "Write");
        assert_eq!(uses[0].id.as_deref(), Some("t1"));
    }
}
