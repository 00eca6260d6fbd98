//! Runtime settings resolved once per pipeline invocation.
//!
//! Model names and system prompts are mutable per-install state in the
//! `settings` table so a dashboard or CLI can retune them without a rebuild.
//! Everything else is a compiled-in default on the struct. Pipelines receive
//! a resolved `Settings` value instead of reading global state mid-flight.

use sqlx::SqlitePool;

use std::path::PathBuf;
use std::time::Duration;

/// Resolved configuration for one evaluation or learning run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Model for arbitration decisions, as "provider/model".
    pub eval_model: String,
    /// Model for rule extraction, as "provider/model".
    pub learn_model: String,
    /// System prompt for the arbitration model.
    pub eval_prompt: String,
    /// System prompt for the extraction model.
    pub learn_prompt: String,
    /// Vector distance below which a semantic candidate counts as close.
    pub distance_threshold: f32,
    /// Nearest-neighbor count for the vector strategy.
    pub vector_top_k: usize,
    /// Maximum rules forwarded to one arbitration call.
    pub arbitration_rule_cap: usize,
    /// Tool input characters forwarded to arbitration.
    pub arbitration_input_chars: usize,
    /// Justification characters forwarded to arbitration.
    pub justification_chars: usize,
    /// Wall-clock budget for the semantic + arbitration phase. The caller
    /// blocks the agent's tool execution on this result, so keep it tight.
    pub eval_timeout: Duration,
    /// Most recent transcript turns considered by the extractor.
    pub excerpt_max_turns: usize,
    /// Total character budget for the conversation excerpt.
    pub excerpt_max_chars: usize,
    /// Character budget for a single excerpt line.
    pub excerpt_line_chars: usize,
    /// Character budget for the existing-rules snapshot.
    pub rules_snapshot_chars: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            eval_model: "openai/gpt-4o".into(),
            learn_model: "openai/gpt-4o".into(),
            eval_prompt: DEFAULT_EVAL_PROMPT.into(),
            learn_prompt: DEFAULT_LEARN_PROMPT.into(),
            distance_threshold: 0.8,
            vector_top_k: 5,
            arbitration_rule_cap: 5,
            arbitration_input_chars: 800,
            justification_chars: 200,
            eval_timeout: Duration::from_secs(10),
            excerpt_max_turns: 30,
            excerpt_max_chars: 8000,
            excerpt_line_chars: 400,
            rules_snapshot_chars: 3000,
        }
    }
}

impl Settings {
    /// Load settings from the database, falling back to defaults for any
    /// missing key. A read failure resolves to pure defaults rather than
    /// failing the pipeline.
    pub async fn load(pool: &SqlitePool) -> Self {
        let mut settings = Self::default();

        for (key, target) in [
            ("eval_model", &mut settings.eval_model as &mut String),
            ("learn_model", &mut settings.learn_model),
            ("eval_prompt", &mut settings.eval_prompt),
            ("learn_prompt", &mut settings.learn_prompt),
        ] {
            match lookup(pool, key).await {
                Ok(Some(value)) => *target = value,
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(%error, key, "failed to read setting, using default");
                }
            }
        }

        settings
    }
}

async fn lookup(pool: &SqlitePool, key: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(value,)| value))
}

/// Database location: `RAMPART_DB` if set, else `~/.rampart/rampart.db`.
pub fn default_db_path() -> PathBuf {
    if let Some(path) = std::env::var_os("RAMPART_DB") {
        return PathBuf::from(path);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rampart")
        .join("rampart.db")
}

/// Operating instructions for the arbitration model. The override policy
/// lives here, not in the evaluator: the caller adopts the returned decision
/// verbatim.
pub const DEFAULT_EVAL_PROMPT: &str = "\
You are a rule enforcer. Only flag ACTUAL VIOLATIONS.

CRITICAL: If the input already complies with a rule, return action=\"allow\".
Do NOT suggest improvements or stylistic changes. Only flag violations.

Example: Rule \"Use uv run\" + Input \"uv run uvicorn ...\" -> ALLOW (already compliant).

Rules are HARD or SOFT:
- HARD: security rules. MUST enforce, no exceptions.
- SOFT: preferences. Can be overridden with justification.

OVERRIDE: if the justification starts with \"OVERRIDE:\" followed by a valid
reason, allow SOFT rules. HARD rules cannot be overridden.

Only return action=\"block\" or \"warn\" if the input ACTUALLY VIOLATES a rule.
If compliant or irrelevant, return approved=true and action=\"allow\".";

/// Operating instructions for the extraction model. The evidence contract is
/// enforced here by prompt, not re-validated mechanically downstream.
pub const DEFAULT_LEARN_PROMPT: &str = "\
You are a learning agent. Extract rules ONLY from concrete evidence in
conversations.

CRITICAL: do NOT invent rules. Only propose a change when you see:
1. An ACTUAL mistake or error that was corrected (quote the problem and fix)
2. The user EXPLICITLY requests a rule (\"always use X\", \"never do Y\")

If neither condition is met, return an empty change list.

RULE KINDS:
- pattern: fast regex match. Use for dangerous commands.
- semantic: matched by meaning, confirmed by review. Use for preferences.

REQUIRED EVIDENCE:
- problem: quote the actual error or mistake from the conversation
- solution: quote the actual fix or correction that was applied

ACTIONS:
- create: only with concrete evidence (quoted problem + solution)
- update: refine an existing rule based on new evidence
- delete: only when the user explicitly asks to remove a rule

Default to an empty list. Every change needs a clear justification.";
