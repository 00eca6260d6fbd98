//! Semantic candidate retrieval: keyword overlap merged with vector search.

use super::{CandidateSource, PolicyError, ReviewCandidate};
use crate::llm::EmbeddingProvider;
use crate::rules::{Rule, RuleKind, RuleStore};

use std::collections::{HashMap, HashSet};

/// Synthetic distance for keyword candidates: close by definition, with no
/// normalized comparability to true vector distances.
pub const KEYWORD_DISTANCE: f32 = 0.5;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "for", "to", "of", "in", "on", "with", "use", "always", "never",
];

/// Find semantic rules plausibly relevant to the input.
///
/// Two strategies run and merge by rule id, keyword matches winning
/// collisions. The result is already filtered to "close" candidates: keyword
/// provenance, or vector distance below the threshold. A candidate at or
/// beyond the threshold with no keyword overlap is noise and never reaches
/// arbitration.
pub async fn find_candidates(
    store: &RuleStore,
    embedder: &dyn EmbeddingProvider,
    tool_name: &str,
    tool_input: &str,
    top_k: usize,
    distance_threshold: f32,
) -> Result<SemanticScan, PolicyError> {
    let rules = store.list_active(Some(tool_name), Some(RuleKind::Semantic)).await?;
    if rules.is_empty() {
        return Ok(SemanticScan {
            candidates: Vec::new(),
            rules_checked: 0,
        });
    }

    let mut merged: Vec<ReviewCandidate> = keyword_candidates(&rules, tool_input);
    let mut seen: HashSet<i64> = merged.iter().map(|candidate| candidate.rule_id).collect();

    // Vector strategy only runs when there are embeddings worth scanning;
    // the query embedding covers tool context and input together.
    let query = embedder.embed(&format!("{tool_name}: {tool_input}")).await?;
    let by_id: HashMap<i64, &Rule> = rules.iter().map(|rule| (rule.id, rule)).collect();

    for (rule_id, distance) in store.vector_search(&query, top_k, Some(tool_name)).await? {
        if seen.contains(&rule_id) || distance >= distance_threshold {
            continue;
        }
        let Some(rule) = by_id.get(&rule_id) else {
            continue;
        };
        seen.insert(rule_id);
        merged.push(ReviewCandidate::from_rule(rule, CandidateSource::Vector, distance));
    }

    Ok(SemanticScan {
        candidates: merged,
        rules_checked: rules.len(),
    })
}

/// Close candidates plus how many semantic rules were considered.
#[derive(Debug, Clone)]
pub struct SemanticScan {
    pub candidates: Vec<ReviewCandidate>,
    pub rules_checked: usize,
}

/// Keyword strategy: any overlap between the rule description's keywords and
/// the input's tokens makes the rule a candidate.
pub fn keyword_candidates(rules: &[Rule], tool_input: &str) -> Vec<ReviewCandidate> {
    let input_tokens = tokenize(tool_input);
    if input_tokens.is_empty() {
        return Vec::new();
    }

    rules
        .iter()
        .filter(|rule| {
            let description_tokens = tokenize(&rule.description);
            description_tokens
                .intersection(&input_tokens)
                .next()
                .is_some()
        })
        .map(|rule| ReviewCandidate::from_rule(rule, CandidateSource::Keyword, KEYWORD_DISTANCE))
        .collect()
}

/// Lowercase, split on whitespace, drop stop words.
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .filter(|token| !token.is_empty() && !STOP_WORDS.contains(token))
        .map(String::from)
        .collect()
}
