//! Database connection management and embedded schema.

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use std::path::Path;
use std::str::FromStr;

/// Database errors surfaced to the binary layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("invalid database path: {0}")]
    InvalidPath(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Wraps the SQLite connection pool shared by every pipeline.
///
/// One database file holds rules, embeddings, session history, settings, and
/// traces. Evaluation reads and learning writes interleave on the same pool;
/// WAL mode keeps the hook's read path from blocking on background writes.
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Connect to (or create) the database at the given path.
    ///
    /// Runs the embedded schema, enables WAL mode, and configures a small
    /// pool (one writer, one reader).
    pub async fn connect(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|error| DbError::InvalidPath(error.to_string()))?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|error| DbError::InvalidPath(error.to_string()))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Run the embedded schema. Uses raw SQL with `IF NOT EXISTS` rather than
    /// a migrations directory so a bare binary can bootstrap its own store.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        sqlx::raw_sql(SCHEMA_RULES).execute(pool).await?;
        sqlx::raw_sql(SCHEMA_HISTORY).execute(pool).await?;
        Ok(())
    }

    /// The shared pool, cloned freely by subsystems.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

/// Rule store schema: rules, their embeddings, and mutable settings.
const SCHEMA_RULES: &str = r#"
-- Rules for pre-execution checks
CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL DEFAULT 'pattern',
    pattern TEXT,
    patterns TEXT,
    description TEXT NOT NULL,
    problem TEXT,
    solution TEXT,
    tool TEXT,
    action TEXT NOT NULL DEFAULT 'block',
    active INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 0,
    requires_review INTEGER NOT NULL DEFAULT 0,
    review_prompt TEXT,
    hard INTEGER NOT NULL DEFAULT 0,
    source_session_id INTEGER REFERENCES sessions(id),
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_rules_active ON rules(active, kind, tool);

-- Rule embeddings, one per rule, 384 little-endian f32 components
CREATE TABLE IF NOT EXISTS rule_embeddings (
    rule_id INTEGER PRIMARY KEY REFERENCES rules(id),
    embedding BLOB NOT NULL
);

-- Per-install mutable settings (model names, system prompts)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Session history and audit schema.
const SCHEMA_HISTORY: &str = r#"
-- Projects: working directories the agent runs in
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    name TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Sessions: one agent conversation each
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    external_id TEXT UNIQUE,
    transcript_path TEXT,
    task TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    ended_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id);

-- Messages: individual turns within a session
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    external_id TEXT,
    role TEXT NOT NULL,
    content TEXT,
    timestamp TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);

-- Tool calls extracted from assistant messages
CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id),
    tool TEXT NOT NULL,
    input TEXT,
    output TEXT,
    success INTEGER NOT NULL DEFAULT 1,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_tool_calls_message ON tool_calls(message_id);

-- Traces: append-only audit of evaluation and learning runs
CREATE TABLE IF NOT EXISTS traces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hook_type TEXT NOT NULL,
    tool_name TEXT,
    tool_input TEXT,
    rules_checked INTEGER NOT NULL DEFAULT 0,
    rules_matched INTEGER NOT NULL DEFAULT 0,
    matched_rule_ids TEXT,
    decision TEXT,
    reason TEXT,
    llm_prompt TEXT,
    llm_response TEXT,
    duration_ms INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
CREATE INDEX IF NOT EXISTS idx_traces_created ON traces(created_at);
"#;

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // sqlx enables the `foreign_keys` pragma by default; tests stamp rules with
    // session ids that have no backing `sessions` row, so keep enforcement off
    // (matching SQLite's own default) for the in-memory fixture.
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid in-memory url")
        .foreign_keys(false);
    // A single connection keeps the in-memory database alive and shared.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("in-memory pool");
    sqlx::raw_sql(SCHEMA_RULES)
        .execute(&pool)
        .await
        .expect("rules schema");
    sqlx::raw_sql(SCHEMA_HISTORY)
        .execute(&pool)
        .await
        .expect("history schema");
    pool
}
