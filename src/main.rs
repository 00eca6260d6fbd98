//! rampart CLI: hook entrypoints and maintenance commands.

use rampart::audit::AuditLog;
use rampart::config::{self, Settings};
use rampart::db::Db;
use rampart::hook::{self, HookInput};
use rampart::learning;
use rampart::llm::{LlmDecider, LlmExtractor, LlmManager, OpenAiEmbeddings};
use rampart::policy::{EvaluationRequest, PolicyEvaluator};
use rampart::rules::{DecisionAction, RuleStore};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use std::io::Read as _;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "rampart", version, about = "Pre-execution policy gate for AI coding agents")]
struct Cli {
    /// Database path; defaults to $RAMPART_DB or ~/.rampart/rampart.db.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database and schema.
    Init,
    /// Pre-tool-use hook: read the payload on stdin, decide, and exit
    /// 0 (allow) or 2 (block/warn with the explanation on stderr).
    Check,
    /// Session-end hook: read the payload on stdin, hand the transcript to a
    /// detached background worker, and return immediately.
    Learn,
    /// Background worker mode spawned by `learn`.
    #[command(hide = true)]
    LearnWorker { transcript: PathBuf },
    /// Back-fill embeddings for rules that lack one.
    SyncEmbeddings,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rampart=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let db_path = cli.db.unwrap_or_else(config::default_db_path);

    match cli.command {
        Command::Init => match Db::connect(&db_path).await {
            Ok(db) => {
                println!("database initialized at {}", db_path.display());
                db.close().await;
            }
            Err(error) => {
                eprintln!("rampart: failed to initialize database: {error}");
                std::process::exit(1);
            }
        },
        Command::Check => run_check(&db_path).await,
        Command::Learn => run_learn_hook(),
        Command::LearnWorker { transcript } => run_learn_worker(&db_path, &transcript).await,
        Command::SyncEmbeddings => match run_sync_embeddings(&db_path).await {
            Ok(count) => println!("generated {count} embeddings"),
            Err(error) => {
                eprintln!("rampart: embedding sync failed: {error}");
                std::process::exit(1);
            }
        },
    }
}

/// Evaluate one tool call from the hook payload. Never exits silently on an
/// internal error: a failed check blocks with an explanation, because the
/// safer outcome is the default.
async fn run_check(db_path: &std::path::Path) {
    let input = HookInput::parse(&read_stdin());

    let decision = match build_evaluator(db_path).await {
        Ok(evaluator) => {
            let request = EvaluationRequest {
                tool_name: input.tool_name.clone(),
                tool_input: input.tool_input_text(),
                justification: input.justification.clone(),
            };
            evaluator.evaluate(&request).await
        }
        Err(error) => {
            tracing::error!(%error, "failed to set up evaluation, failing closed");
            rampart::rules::Decision::block(format!("Rule check error: {error} (failing closed)"))
        }
    };

    match decision.action {
        DecisionAction::Allow => std::process::exit(hook::EXIT_ALLOW),
        DecisionAction::Block => {
            eprintln!("BLOCKED: {}", decision.comment);
            std::process::exit(hook::EXIT_STOP);
        }
        DecisionAction::Warn => {
            eprintln!("SUGGESTION: {}", decision.comment);
            eprintln!(
                "To override: start your description with 'OVERRIDE:' followed by a justification."
            );
            std::process::exit(hook::EXIT_STOP);
        }
    }
}

/// Session-end hook: fork the worker and get out of the way.
fn run_learn_hook() {
    let input = HookInput::parse(&read_stdin());

    let Some(transcript_path) = input.transcript_path else {
        tracing::info!("no transcript path in hook payload, nothing to do");
        return;
    };

    match hook::spawn_detached_learning(&transcript_path) {
        Ok(pid) => tracing::info!(pid, "learning worker spawned"),
        Err(error) => tracing::warn!(%error, "failed to spawn learning worker"),
    }
}

/// Detached worker: run the full learning pipeline. Failures are logged and
/// swallowed; nothing here may surface to the session that spawned us.
async fn run_learn_worker(db_path: &std::path::Path, transcript: &std::path::Path) {
    let outcome = async {
        let db = Db::connect(db_path).await?;
        let pool = db.pool().clone();
        let settings = Settings::load(&pool).await;
        let store = RuleStore::new(pool.clone());
        let audit = AuditLog::new(pool.clone());

        let manager = Arc::new(LlmManager::from_env()?);
        let embedder = OpenAiEmbeddings::new(manager.clone());
        let extractor = LlmExtractor::new(manager, &settings);

        let report = learning::run(
            &pool, &store, &embedder, &extractor, &audit, &settings, transcript,
        )
        .await?;
        anyhow::Ok(report)
    }
    .await;

    match outcome {
        Ok(report) => tracing::info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            summary = %report.summary,
            "learning run complete"
        ),
        Err(error) => tracing::warn!(%error, "learning run aborted"),
    }
}

async fn run_sync_embeddings(db_path: &std::path::Path) -> anyhow::Result<usize> {
    let db = Db::connect(db_path).await?;
    let store = RuleStore::new(db.pool().clone());
    let manager = Arc::new(LlmManager::from_env()?);
    let embedder = OpenAiEmbeddings::new(manager);

    let generated = store
        .sync_missing_embeddings(&embedder)
        .await
        .context("embedding backfill failed")?;
    Ok(generated)
}

async fn build_evaluator(db_path: &std::path::Path) -> anyhow::Result<PolicyEvaluator> {
    let db = Db::connect(db_path).await.context("database connection failed")?;
    let pool = db.pool().clone();
    let settings = Settings::load(&pool).await;
    let store = RuleStore::new(pool.clone());
    let audit = AuditLog::new(pool);

    let manager = Arc::new(LlmManager::from_env().context("provider setup failed")?);
    let embedder = Arc::new(OpenAiEmbeddings::new(manager.clone()));
    let decider = Arc::new(LlmDecider::new(manager, &settings));

    Ok(PolicyEvaluator::new(store, embedder, decider, audit, settings))
}

fn read_stdin() -> String {
    let mut raw = String::new();
    if let Err(error) = std::io::stdin().read_to_string(&mut raw) {
        tracing::warn!(%error, "failed to read hook payload from stdin");
    }
    raw
}
