//! rampart: a pre-execution policy gate for AI coding agents.
//!
//! Two pipelines share one SQLite store:
//!
//! - **Evaluation**: a tool call comes in over the hook protocol, fast
//!   pattern rules run first, semantic candidates are retrieved by keyword
//!   overlap and vector similarity, and anything ambiguous is resolved by
//!   one consolidated arbitration call. Provider failures fail closed.
//! - **Learning**: at session end a detached worker replays the transcript,
//!   logs session history, asks an extraction model for evidence-backed rule
//!   changes, and applies them with per-change fault isolation.
//!
//! rampart only advises allow/warn/block; the host agent enforces the
//! decision.

pub mod audit;
pub mod config;
pub mod db;
pub mod hook;
pub mod learning;
pub mod llm;
pub mod policy;
pub mod rules;

pub use audit::AuditLog;
pub use config::Settings;
pub use db::Db;
pub use policy::{EvaluationRequest, PolicyEvaluator};
pub use rules::{Decision, DecisionAction, Rule, RuleStore};
