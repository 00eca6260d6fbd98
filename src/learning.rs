//! Learning pipeline: transcript → proposed rule mutations → applied changes.
//!
//! Runs detached from the interactive session at session end. Within a run,
//! history logging and extraction proceed sequentially; every failure stays
//! inside the background run; the interactive user never sees learning
//! errors by design.

pub mod applier;
pub mod extractor;
pub mod history;
pub mod transcript;

pub use applier::{ApplyReport, apply_changes};
pub use history::HistoryStats;
pub use transcript::TranscriptEntry;

use crate::audit::{AuditLog, LearningTrace};
use crate::config::Settings;
use crate::llm::{EmbeddingProvider, ExtractionProvider};
use crate::rules::RuleStore;

use sqlx::SqlitePool;
use thiserror::Error;

use std::path::Path;
use std::time::Instant;

/// Learning pipeline errors.
#[derive(Debug, Error)]
pub enum LearningError {
    #[error("transcript error: {0}")]
    Transcript(String),

    #[error("learning database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] crate::rules::RuleError),

    #[error(transparent)]
    Provider(#[from] crate::llm::LlmError),
}

/// What one learning run changed.
#[derive(Debug, Clone, Default)]
pub struct LearningReport {
    pub summary: String,
    pub created: i64,
    pub updated: i64,
    pub deleted: i64,
}

/// Run the learning pipeline over one transcript.
///
/// History logging failures are tolerated (the extraction still runs, minus
/// provenance); extraction failures abort the run with zero changes applied.
pub async fn run(
    pool: &SqlitePool,
    store: &RuleStore,
    embedder: &dyn EmbeddingProvider,
    extraction: &dyn ExtractionProvider,
    audit: &AuditLog,
    settings: &Settings,
    transcript_path: &Path,
) -> Result<LearningReport, LearningError> {
    let started = Instant::now();
    let path_text = transcript_path.display().to_string();

    let entries = transcript::load(transcript_path)?;
    if entries.is_empty() {
        tracing::info!(path = %path_text, "empty transcript, nothing to learn");
        return Ok(LearningReport {
            summary: "Empty transcript".into(),
            ..LearningReport::default()
        });
    }

    let session_id = match history::log_transcript(pool, &path_text, &entries).await {
        Ok(stats) => {
            tracing::info!(
                messages = stats.messages,
                tool_calls = stats.tool_calls,
                "session history logged"
            );
            stats.session_id
        }
        Err(error) => {
            tracing::warn!(%error, "failed to log session history, continuing without provenance");
            None
        }
    };

    let exchange = extractor::extract(extraction, store, &entries, settings).await?;

    let report = if exchange.value.changes.is_empty() {
        tracing::info!("no rule changes proposed");
        LearningReport {
            summary: "No rule changes".into(),
            ..LearningReport::default()
        }
    } else {
        let applied =
            apply_changes(store, embedder, &exchange.value.changes, session_id).await;
        tracing::info!(
            created = applied.created,
            updated = applied.updated,
            deleted = applied.deleted,
            "rule changes applied"
        );
        LearningReport {
            summary: exchange.value.summary.clone(),
            created: applied.created,
            updated: applied.updated,
            deleted: applied.deleted,
        }
    };

    let trace = LearningTrace {
        transcript_path: &path_text,
        created: report.created,
        updated: report.updated,
        deleted: report.deleted,
        summary: &report.summary,
        llm_prompt: Some(&exchange.prompt),
        llm_response: Some(&exchange.response),
        duration_ms: started.elapsed().as_millis() as i64,
    };
    if let Err(error) = audit.record_learning(&trace).await {
        tracing::warn!(%error, "failed to record learning trace");
    }

    Ok(report)
}
