//! Append-only audit traces for evaluation and learning runs.
//!
//! Traces are write-only observability: nothing on the decision path ever
//! reads them. Recording returns a `Result` and every call site explicitly
//! ignores failure; the contract is "never affect the decision", and an
//! explicit ignore keeps that visible in code instead of hiding it behind
//! blanket suppression.

use sqlx::SqlitePool;

/// Writes trace rows for one rampart install.
#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

/// Fields for one evaluation trace.
#[derive(Debug, Clone)]
pub struct EvaluationTrace<'a> {
    pub tool_name: &'a str,
    pub tool_input: &'a str,
    pub rules_checked: i64,
    pub matched_rule_ids: &'a [i64],
    pub decision: &'a str,
    pub reason: &'a str,
    pub llm_prompt: Option<&'a str>,
    pub llm_response: Option<&'a str>,
    pub duration_ms: i64,
}

/// Fields for one learning trace.
#[derive(Debug, Clone)]
pub struct LearningTrace<'a> {
    pub transcript_path: &'a str,
    pub created: i64,
    pub updated: i64,
    pub deleted: i64,
    pub summary: &'a str,
    pub llm_prompt: Option<&'a str>,
    pub llm_response: Option<&'a str>,
    pub duration_ms: i64,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one evaluation run.
    pub async fn record_evaluation(&self, trace: &EvaluationTrace<'_>) -> Result<(), sqlx::Error> {
        let matched_json = serde_json::to_string(trace.matched_rule_ids).unwrap_or_default();
        sqlx::query(
            "INSERT INTO traces (hook_type, tool_name, tool_input, rules_checked, rules_matched, \
             matched_rule_ids, decision, reason, llm_prompt, llm_response, duration_ms)
             VALUES ('pre', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(trace.tool_name)
        .bind(clip(trace.tool_input, 1000))
        .bind(trace.rules_checked)
        .bind(trace.matched_rule_ids.len() as i64)
        .bind(matched_json)
        .bind(trace.decision)
        .bind(trace.reason)
        .bind(trace.llm_prompt.map(|prompt| clip(prompt, 2000)))
        .bind(trace.llm_response.map(|response| clip(response, 2000)))
        .bind(trace.duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record one learning run.
    pub async fn record_learning(&self, trace: &LearningTrace<'_>) -> Result<(), sqlx::Error> {
        let counts = serde_json::json!({
            "created": trace.created,
            "updated": trace.updated,
            "deleted": trace.deleted,
        });
        sqlx::query(
            "INSERT INTO traces (hook_type, tool_name, tool_input, rules_checked, rules_matched, \
             matched_rule_ids, decision, reason, llm_prompt, llm_response, duration_ms)
             VALUES ('stop', 'learning', ?, ?, ?, ?, 'learn', ?, ?, ?, ?)",
        )
        .bind(clip(trace.transcript_path, 500))
        .bind(trace.created + trace.updated + trace.deleted)
        .bind(trace.created)
        .bind(counts.to_string())
        .bind(trace.summary)
        .bind(trace.llm_prompt.map(|prompt| clip(prompt, 2000)))
        .bind(trace.llm_response.map(|response| clip(response, 2000)))
        .bind(trace.duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
