//! RuleStore: CRUD over rules and their embeddings.

use super::types::{NewRule, Rule, RuleAction, RuleKind, RulePatch};
use super::RuleError;
use crate::llm::EmbeddingProvider;

use sqlx::Row as _;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;

const RULE_COLUMNS: &str = "id, kind, pattern, patterns, description, problem, solution, tool, \
     action, active, priority, requires_review, review_prompt, hard, source_session_id, created_at";

/// CRUD access to the rules table and its embeddings.
///
/// Embedding writes are idempotent per rule id unless a refresh is requested;
/// deleting a rule always deletes its embedding so no orphan vector stays
/// queryable.
#[derive(Clone)]
pub struct RuleStore {
    pool: SqlitePool,
}

impl RuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List active rules, optionally scoped to a tool and/or kind.
    ///
    /// Tool scoping includes unscoped rules (tool IS NULL). Ordered by
    /// priority descending, which is evaluation order per the matcher contract.
    pub async fn list_active(
        &self,
        tool: Option<&str>,
        kind: Option<RuleKind>,
    ) -> Result<Vec<Rule>, RuleError> {
        let query = format!(
            "SELECT {RULE_COLUMNS} FROM rules
             WHERE active = 1
             AND (?1 IS NULL OR kind = ?1)
             AND (?2 IS NULL OR tool IS NULL OR tool = ?2)
             ORDER BY priority DESC, id ASC"
        );
        let rows = sqlx::query(&query)
            .bind(kind.map(|kind| kind.to_string()))
            .bind(tool)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(rule_from_row).collect()
    }

    /// Fetch one rule by id.
    pub async fn get(&self, id: i64) -> Result<Option<Rule>, RuleError> {
        let query = format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?");
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(rule_from_row).transpose()
    }

    /// Insert a new rule and return its id.
    pub async fn insert(&self, rule: &NewRule) -> Result<i64, RuleError> {
        let kind = rule.kind.unwrap_or(RuleKind::Semantic);
        let action = rule.action.unwrap_or(RuleAction::Warn);

        let result = sqlx::query(
            "INSERT INTO rules (kind, pattern, patterns, description, problem, solution, tool, \
             action, priority, requires_review, review_prompt, hard, source_session_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(kind.to_string())
        .bind(&rule.pattern)
        .bind(&rule.patterns)
        .bind(&rule.description)
        .bind(&rule.problem)
        .bind(&rule.solution)
        .bind(&rule.tool)
        .bind(action.to_string())
        .bind(rule.priority)
        .bind(rule.requires_review)
        .bind(&rule.review_prompt)
        .bind(rule.hard)
        .bind(rule.source_session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Patch only the supplied fields of a rule.
    pub async fn update(&self, id: i64, patch: &RulePatch) -> Result<(), RuleError> {
        if self.get(id).await?.is_none() {
            return Err(RuleError::NotFound(id));
        }

        if let Some(pattern) = &patch.pattern {
            sqlx::query("UPDATE rules SET pattern = ? WHERE id = ?")
                .bind(pattern)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(patterns) = &patch.patterns {
            sqlx::query("UPDATE rules SET patterns = ? WHERE id = ?")
                .bind(patterns)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(description) = &patch.description {
            sqlx::query("UPDATE rules SET description = ? WHERE id = ?")
                .bind(description)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(problem) = &patch.problem {
            sqlx::query("UPDATE rules SET problem = ? WHERE id = ?")
                .bind(problem)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(solution) = &patch.solution {
            sqlx::query("UPDATE rules SET solution = ? WHERE id = ?")
                .bind(solution)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(action) = patch.action {
            sqlx::query("UPDATE rules SET action = ? WHERE id = ?")
                .bind(action.to_string())
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(requires_review) = patch.requires_review {
            sqlx::query("UPDATE rules SET requires_review = ? WHERE id = ?")
                .bind(requires_review)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(review_prompt) = &patch.review_prompt {
            sqlx::query("UPDATE rules SET review_prompt = ? WHERE id = ?")
                .bind(review_prompt)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Delete a rule permanently, along with its embedding.
    pub async fn delete(&self, id: i64) -> Result<(), RuleError> {
        self.delete_embedding(id).await?;
        sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flip a rule's active flag.
    pub async fn set_active(&self, id: i64, active: bool) -> Result<(), RuleError> {
        sqlx::query("UPDATE rules SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- embeddings ---------------------------------------------------------

    /// Fetch a rule's stored embedding.
    pub async fn get_embedding(&self, rule_id: i64) -> Result<Option<Vec<f32>>, RuleError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT embedding FROM rule_embeddings WHERE rule_id = ?")
                .bind(rule_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(bytes,)| deserialize_vector(&bytes)))
    }

    /// Write a rule's embedding, replacing any existing one.
    pub async fn upsert_embedding(&self, rule_id: i64, vector: &[f32]) -> Result<(), RuleError> {
        sqlx::query(
            "INSERT INTO rule_embeddings (rule_id, embedding) VALUES (?, ?)
             ON CONFLICT(rule_id) DO UPDATE SET embedding = excluded.embedding",
        )
        .bind(rule_id)
        .bind(serialize_vector(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a rule's embedding.
    pub async fn delete_embedding(&self, rule_id: i64) -> Result<(), RuleError> {
        sqlx::query("DELETE FROM rule_embeddings WHERE rule_id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Ensure a rule has an embedding; no provider call when one exists.
    ///
    /// Returns true when a vector was generated.
    pub async fn ensure_embedding(
        &self,
        rule_id: i64,
        provider: &dyn EmbeddingProvider,
    ) -> Result<bool, RuleError> {
        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM rule_embeddings WHERE rule_id = ?")
                .bind(rule_id)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Ok(false);
        }

        let rule = self.get(rule_id).await?.ok_or(RuleError::NotFound(rule_id))?;
        let vector = provider.embed(&rule.embedding_text()).await?;
        self.upsert_embedding(rule_id, &vector).await?;
        Ok(true)
    }

    /// Back-fill embeddings for active rules that lack one.
    ///
    /// Returns how many vectors were generated. Per-rule failures are logged
    /// and skipped so one bad rule cannot stall the sweep.
    pub async fn sync_missing_embeddings(
        &self,
        provider: &dyn EmbeddingProvider,
    ) -> Result<usize, RuleError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT r.id FROM rules r
             LEFT JOIN rule_embeddings re ON r.id = re.rule_id
             WHERE re.rule_id IS NULL AND r.active = 1",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut generated = 0;
        for (rule_id,) in rows {
            match self.ensure_embedding(rule_id, provider).await {
                Ok(true) => generated += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(%error, rule_id, "failed to backfill embedding");
                }
            }
        }
        Ok(generated)
    }

    /// Nearest-neighbor search over active semantic rule embeddings.
    ///
    /// Scans every candidate vector and ranks by cosine distance (lower is
    /// closer). Rule sets are small enough that a linear scan beats carrying
    /// an ANN index.
    pub async fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        tool: Option<&str>,
    ) -> Result<Vec<(i64, f32)>, RuleError> {
        let rows = sqlx::query(
            "SELECT re.rule_id, re.embedding FROM rule_embeddings re
             JOIN rules r ON r.id = re.rule_id
             WHERE r.active = 1 AND r.kind = 'semantic'
             AND (?1 IS NULL OR r.tool IS NULL OR r.tool = ?1)",
        )
        .bind(tool)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(i64, f32)> = rows
            .iter()
            .map(|row| {
                let rule_id: i64 = row.get("rule_id");
                let bytes: Vec<u8> = row.get("embedding");
                let vector = deserialize_vector(&bytes);
                (rule_id, cosine_distance(query, &vector))
            })
            .collect();

        scored.sort_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStore").finish_non_exhaustive()
    }
}

fn rule_from_row(row: &SqliteRow) -> Result<Rule, RuleError> {
    let kind: String = row.try_get("kind").map_err(RuleError::Database)?;
    let action: String = row.try_get("action").map_err(RuleError::Database)?;

    Ok(Rule {
        id: row.try_get("id").map_err(RuleError::Database)?,
        kind: RuleKind::from_str_lossy(&kind),
        pattern: row.try_get("pattern").map_err(RuleError::Database)?,
        patterns: row.try_get("patterns").map_err(RuleError::Database)?,
        description: row.try_get("description").map_err(RuleError::Database)?,
        problem: row.try_get("problem").map_err(RuleError::Database)?,
        solution: row.try_get("solution").map_err(RuleError::Database)?,
        tool: row.try_get("tool").map_err(RuleError::Database)?,
        action: RuleAction::from_str_lossy(&action),
        active: row.try_get("active").map_err(RuleError::Database)?,
        priority: row.try_get("priority").map_err(RuleError::Database)?,
        requires_review: row.try_get("requires_review").map_err(RuleError::Database)?,
        review_prompt: row.try_get("review_prompt").map_err(RuleError::Database)?,
        hard: row.try_get("hard").map_err(RuleError::Database)?,
        source_session_id: row.try_get("source_session_id").map_err(RuleError::Database)?,
        created_at: row.try_get("created_at").map_err(RuleError::Database)?,
    })
}

/// Pack a vector as little-endian f32 bytes for BLOB storage.
pub fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for component in vector {
        bytes.extend_from_slice(&component.to_le_bytes());
    }
    bytes
}

/// Unpack a BLOB back into a vector. Trailing partial chunks are dropped.
pub fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine distance: 0.0 identical direction, 1.0 orthogonal, 2.0 opposite.
///
/// Degenerate inputs (zero norm, length mismatch) rank as far as possible
/// rather than erroring: a broken vector should never surface a candidate.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::llm::LlmError;

    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic embedder that counts provider calls.
    pub(crate) struct CountingEmbedder {
        pub calls: AtomicUsize,
        pub vector: Vec<f32>,
    }

    impl CountingEmbedder {
        pub fn returning(vector: Vec<f32>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                vector,
            }
        }
    }

    #[async_trait]
    impl crate::llm::EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.vector.clone())
        }
    }

    async fn store() -> RuleStore {
        RuleStore::new(memory_pool().await)
    }

    fn semantic_rule(description: &str) -> NewRule {
        NewRule {
            kind: Some(RuleKind::Semantic),
            description: description.into(),
            ..NewRule::default()
        }
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let store = store().await;
        let id = store
            .insert(&NewRule {
                kind: Some(RuleKind::Pattern),
                pattern: Some("^rm -rf".into()),
                description: "no recursive deletes".into(),
                tool: Some("Bash".into()),
                action: Some(RuleAction::Block),
                hard: true,
                ..NewRule::default()
            })
            .await
            .expect("insert");

        let rule = store.get(id).await.expect("get").expect("rule exists");
        assert_eq!(rule.kind, RuleKind::Pattern);
        assert_eq!(rule.pattern.as_deref(), Some("^rm -rf"));
        assert_eq!(rule.action, RuleAction::Block);
        assert!(rule.hard);
        assert!(rule.active, "rules start active");
    }

    #[tokio::test]
    async fn test_insert_defaults_to_semantic_warn() {
        let store = store().await;
        let id = store
            .insert(&NewRule {
                description: "prefer uv over pip".into(),
                ..NewRule::default()
            })
            .await
            .expect("insert");

        let rule = store.get(id).await.expect("get").expect("rule exists");
        assert_eq!(rule.kind, RuleKind::Semantic);
        assert_eq!(rule.action, RuleAction::Warn);
    }

    #[tokio::test]
    async fn test_list_active_scopes_by_tool_and_kind() {
        let store = store().await;
        store
            .insert(&NewRule {
                kind: Some(RuleKind::Pattern),
                description: "bash only".into(),
                tool: Some("Bash".into()),
                ..NewRule::default()
            })
            .await
            .expect("insert bash rule");
        store
            .insert(&NewRule {
                kind: Some(RuleKind::Pattern),
                description: "all tools".into(),
                ..NewRule::default()
            })
            .await
            .expect("insert unscoped rule");
        store
            .insert(&NewRule {
                kind: Some(RuleKind::Pattern),
                description: "edit only".into(),
                tool: Some("Edit".into()),
                ..NewRule::default()
            })
            .await
            .expect("insert edit rule");

        let rules = store
            .list_active(Some("Bash"), Some(RuleKind::Pattern))
            .await
            .expect("list");
        let descriptions: Vec<_> = rules.iter().map(|r| r.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec!["bash only", "all tools"],
            "tool scope includes unscoped rules and excludes other tools"
        );
    }

    #[tokio::test]
    async fn test_list_active_orders_by_priority_desc() {
        let store = store().await;
        for (description, priority) in [("low", 0), ("high", 10), ("mid", 5)] {
            store
                .insert(&NewRule {
                    kind: Some(RuleKind::Pattern),
                    description: description.into(),
                    priority,
                    ..NewRule::default()
                })
                .await
                .expect("insert");
        }

        let rules = store
            .list_active(None, Some(RuleKind::Pattern))
            .await
            .expect("list");
        let descriptions: Vec<_> = rules.iter().map(|r| r.description.as_str()).collect();
        assert_eq!(descriptions, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_deactivated_rules_are_not_listed() {
        let store = store().await;
        let id = store
            .insert(&NewRule {
                kind: Some(RuleKind::Pattern),
                description: "toggled off".into(),
                ..NewRule::default()
            })
            .await
            .expect("insert");

        store.set_active(id, false).await.expect("deactivate");
        let rules = store.list_active(None, None).await.expect("list");
        assert!(rules.is_empty(), "inactive rules never surface");

        store.set_active(id, true).await.expect("reactivate");
        let rules = store.list_active(None, None).await.expect("list");
        assert_eq!(rules.len(), 1);
    }

    #[tokio::test]
    async fn test_update_patches_only_supplied_fields() {
        let store = store().await;
        let id = store
            .insert(&NewRule {
                description: "original".into(),
                problem: Some("old problem".into()),
                action: Some(RuleAction::Warn),
                ..NewRule::default()
            })
            .await
            .expect("insert");

        store
            .update(
                id,
                &RulePatch {
                    description: Some("updated".into()),
                    action: Some(RuleAction::Block),
                    ..RulePatch::default()
                },
            )
            .await
            .expect("update");

        let rule = store.get(id).await.expect("get").expect("rule exists");
        assert_eq!(rule.description, "updated");
        assert_eq!(rule.action, RuleAction::Block);
        assert_eq!(
            rule.problem.as_deref(),
            Some("old problem"),
            "unsupplied fields stay untouched"
        );
    }

    #[tokio::test]
    async fn test_update_missing_rule_is_not_found() {
        let store = store().await;
        let result = store.update(999, &RulePatch::default()).await;
        assert!(matches!(result, Err(RuleError::NotFound(999))));
    }

    #[tokio::test]
    async fn test_delete_removes_embedding_too() {
        let store = store().await;
        let id = store.insert(&semantic_rule("no force push")).await.expect("insert");
        store
            .upsert_embedding(id, &[0.1; 4])
            .await
            .expect("upsert embedding");

        store.delete(id).await.expect("delete");

        assert!(store.get(id).await.expect("get").is_none(), "rule gone");
        assert!(
            store.get_embedding(id).await.expect("get embedding").is_none(),
            "no orphan embedding remains queryable"
        );
    }

    #[tokio::test]
    async fn test_ensure_embedding_is_idempotent() {
        let store = store().await;
        let id = store.insert(&semantic_rule("no force push")).await.expect("insert");
        let embedder = CountingEmbedder::returning(vec![0.5; 8]);

        let first = store.ensure_embedding(id, &embedder).await.expect("first ensure");
        let second = store.ensure_embedding(id, &embedder).await.expect("second ensure");

        assert!(first, "first call generates");
        assert!(!second, "second call is a no-op");
        assert_eq!(
            embedder.calls.load(Ordering::SeqCst),
            1,
            "exactly one underlying embedding generation"
        );
    }

    #[tokio::test]
    async fn test_embedding_roundtrip_preserves_components() {
        let store = store().await;
        let id = store.insert(&semantic_rule("roundtrip")).await.expect("insert");
        let vector = vec![0.25, -1.5, 3.75, 0.0];
        store.upsert_embedding(id, &vector).await.expect("upsert");

        let loaded = store.get_embedding(id).await.expect("get").expect("embedding");
        assert_eq!(loaded, vector);
    }

    #[tokio::test]
    async fn test_vector_search_ranks_by_distance_and_caps_k() {
        let store = store().await;
        let near = store.insert(&semantic_rule("near")).await.expect("insert near");
        let far = store.insert(&semantic_rule("far")).await.expect("insert far");
        let opposite = store.insert(&semantic_rule("opposite")).await.expect("insert opposite");

        store.upsert_embedding(near, &[1.0, 0.0]).await.expect("near vec");
        store.upsert_embedding(far, &[0.0, 1.0]).await.expect("far vec");
        store.upsert_embedding(opposite, &[-1.0, 0.0]).await.expect("opposite vec");

        let results = store
            .vector_search(&[1.0, 0.0], 2, None)
            .await
            .expect("search");
        assert_eq!(results.len(), 2, "capped at k");
        assert_eq!(results[0].0, near);
        assert!(results[0].1 < 0.01, "identical direction is distance ~0");
        assert_eq!(results[1].0, far);
    }

    #[tokio::test]
    async fn test_vector_search_skips_pattern_rules_and_other_tools() {
        let store = store().await;
        let pattern = store
            .insert(&NewRule {
                kind: Some(RuleKind::Pattern),
                description: "pattern rule".into(),
                ..NewRule::default()
            })
            .await
            .expect("insert pattern");
        let scoped = store
            .insert(&NewRule {
                kind: Some(RuleKind::Semantic),
                description: "edit rule".into(),
                tool: Some("Edit".into()),
                ..NewRule::default()
            })
            .await
            .expect("insert scoped");

        store.upsert_embedding(pattern, &[1.0, 0.0]).await.expect("vec");
        store.upsert_embedding(scoped, &[1.0, 0.0]).await.expect("vec");

        let results = store
            .vector_search(&[1.0, 0.0], 5, Some("Bash"))
            .await
            .expect("search");
        assert!(
            results.is_empty(),
            "pattern-kind and differently-scoped rules never surface"
        );
    }

    #[test]
    fn test_cosine_distance_degenerate_inputs_rank_far() {
        assert_eq!(cosine_distance(&[], &[]), 2.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), 2.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 2.0);
    }
}
