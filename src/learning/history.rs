//! Session history logging: transcripts → projects, sessions, messages,
//! and tool calls.

use super::LearningError;
use super::transcript::{self, TranscriptEntry};

use sqlx::SqlitePool;

/// What one history pass wrote.
#[derive(Debug, Clone, Default)]
pub struct HistoryStats {
    pub session_id: Option<i64>,
    pub messages: usize,
    pub tool_calls: usize,
    pub skipped: usize,
}

/// Persist a transcript into the history tables.
///
/// Re-running over the same transcript is safe: messages are deduplicated by
/// their external uuid, and project/session rows are get-or-create.
pub async fn log_transcript(
    pool: &SqlitePool,
    transcript_path: &str,
    entries: &[TranscriptEntry],
) -> Result<HistoryStats, LearningError> {
    let Some(session_entry) = entries.iter().find(|entry| entry.session_id.is_some()) else {
        return Err(LearningError::Transcript("no session id in transcript".into()));
    };
    let external_id = session_entry
        .session_id
        .clone()
        .unwrap_or_default();
    let project_path = session_entry
        .cwd
        .clone()
        .or_else(|| {
            std::env::current_dir()
                .ok()
                .map(|path| path.display().to_string())
        })
        .unwrap_or_else(|| ".".into());

    let project_id = get_or_create_project(pool, &project_path).await?;
    let session_id = get_or_create_session(pool, project_id, &external_id, transcript_path).await?;

    let mut stats = HistoryStats {
        session_id: Some(session_id),
        ..HistoryStats::default()
    };

    // First plain-text user message becomes the session task, once.
    for entry in entries {
        if entry.kind != "user" {
            continue;
        }
        let Some(message) = &entry.message else {
            continue;
        };
        if let serde_json::Value::String(text) = &message.content
            && !text.trim().is_empty()
        {
            let task: String = text.chars().take(200).collect();
            sqlx::query("UPDATE sessions SET task = ? WHERE id = ? AND task IS NULL")
                .bind(&task)
                .bind(session_id)
                .execute(pool)
                .await?;
            break;
        }
    }

    let existing: Vec<(String,)> = sqlx::query_as(
        "SELECT external_id FROM messages WHERE session_id = ? AND external_id IS NOT NULL",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;
    let existing: std::collections::HashSet<String> =
        existing.into_iter().map(|(id,)| id).collect();

    for entry in entries {
        if !entry.is_turn() {
            continue;
        }
        let Some(message) = &entry.message else {
            continue;
        };

        if let Some(uuid) = &entry.uuid
            && existing.contains(uuid)
        {
            stats.skipped += 1;
            continue;
        }

        let role = entry.role().to_string();
        let text = transcript::extract_text(&message.content, 2000);

        let result = sqlx::query(
            "INSERT INTO messages (session_id, external_id, role, content, timestamp) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(&entry.uuid)
        .bind(&role)
        .bind(&text)
        .bind(&entry.timestamp)
        .execute(pool)
        .await?;
        let message_id = result.last_insert_rowid();
        stats.messages += 1;

        if role != "assistant" {
            continue;
        }

        for tool_use in transcript::extract_tool_uses(&message.content) {
            let result = tool_use
                .id
                .as_deref()
                .and_then(|id| transcript::find_tool_result(entries, id));

            sqlx::query(
                "INSERT INTO tool_calls (message_id, tool, input, output, success, error_message) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(message_id)
            .bind(&tool_use.name)
            .bind(&tool_use.input)
            .bind(result.as_ref().map(|r| r.output.clone()))
            .bind(result.as_ref().map(|r| r.success).unwrap_or(true))
            .bind(result.as_ref().and_then(|r| r.error_message.clone()))
            .execute(pool)
            .await?;
            stats.tool_calls += 1;
        }
    }

    sqlx::query(
        "UPDATE sessions SET ended_at = datetime('now'), status = 'completed' WHERE id = ?",
    )
    .bind(session_id)
    .execute(pool)
    .await?;

    Ok(stats)
}

async fn get_or_create_project(pool: &SqlitePool, path: &str) -> Result<i64, LearningError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM projects WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    if let Some((id,)) = row {
        return Ok(id);
    }

    let name = std::path::Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string());
    let result = sqlx::query("INSERT INTO projects (path, name) VALUES (?, ?)")
        .bind(path)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

async fn get_or_create_session(
    pool: &SqlitePool,
    project_id: i64,
    external_id: &str,
    transcript_path: &str,
) -> Result<i64, LearningError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM sessions WHERE external_id = ?")
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    if let Some((id,)) = row {
        return Ok(id);
    }

    let result = sqlx::query(
        "INSERT INTO sessions (project_id, external_id, transcript_path) VALUES (?, ?, ?)",
    )
    .bind(project_id)
    .bind(external_id)
    .bind(transcript_path)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}
