//! Fast pattern rules: regex matching against tool input.

use super::{CandidateSource, ReviewCandidate};
use crate::rules::{DecisionAction, Rule, RuleAction};

/// Result of running all pattern rules against one input.
#[derive(Debug, Clone)]
pub struct PatternCheck {
    /// False when a directly-contributing block/warn rule matched.
    pub passed: bool,
    /// Block if any direct block rule matched, Warn if only warn rules,
    /// Allow when passed.
    pub action: DecisionAction,
    /// One line per contributing rule, block rules first then warn rules,
    /// insertion order within each group. Empty when passed.
    pub comment: String,
    /// Ids of directly-contributing matched rules, blocks before warns.
    pub matched_ids: Vec<i64>,
    /// Matched log-action rules: audit trail only, never fail the check.
    pub logged_ids: Vec<i64>,
    /// Matches deferred to arbitration by `requires_review`.
    pub deferred: Vec<ReviewCandidate>,
    /// How many rules were evaluated.
    pub rules_checked: usize,
}

/// Evaluate pattern rules against the input text.
///
/// Rules arrive in evaluation order (priority descending, per the store).
/// A rule matches when its single pattern or any entry of its pattern list
/// matches case-insensitively. A malformed pattern makes that one rule a
/// non-match; it never masks other rules.
pub fn check_rules(rules: &[Rule], tool_input: &str) -> PatternCheck {
    let mut blocks: Vec<&Rule> = Vec::new();
    let mut warns: Vec<&Rule> = Vec::new();
    let mut logged_ids: Vec<i64> = Vec::new();
    let mut deferred: Vec<ReviewCandidate> = Vec::new();

    for rule in rules {
        if !rule_matches(rule, tool_input) {
            continue;
        }

        if rule.requires_review {
            deferred.push(ReviewCandidate::from_rule(
                rule,
                CandidateSource::PatternReview,
                0.0,
            ));
            continue;
        }

        match rule.action {
            RuleAction::Block => blocks.push(rule),
            RuleAction::Warn => warns.push(rule),
            RuleAction::Log => logged_ids.push(rule.id),
        }
    }

    if blocks.is_empty() && warns.is_empty() {
        return PatternCheck {
            passed: true,
            action: DecisionAction::Allow,
            comment: String::new(),
            matched_ids: Vec::new(),
            logged_ids,
            deferred,
            rules_checked: rules.len(),
        };
    }

    let action = if blocks.is_empty() {
        DecisionAction::Warn
    } else {
        DecisionAction::Block
    };

    let mut lines = Vec::with_capacity(blocks.len() + warns.len());
    let mut matched_ids = Vec::with_capacity(blocks.len() + warns.len());
    for rule in blocks.iter().chain(warns.iter()) {
        let label = match rule.action {
            RuleAction::Block => "BLOCK",
            _ => "WARN",
        };
        let mut line = format!("[{label} #{}] {}", rule.id, rule.description);
        if let Some(solution) = rule.solution.as_deref()
            && !solution.is_empty()
        {
            line.push_str(&format!(" → {solution}"));
        }
        lines.push(line);
        matched_ids.push(rule.id);
    }

    PatternCheck {
        passed: false,
        action,
        comment: lines.join("\n"),
        matched_ids,
        logged_ids,
        deferred,
        rules_checked: rules.len(),
    }
}

/// Whether a rule's single pattern or pattern list matches the input.
fn rule_matches(rule: &Rule, tool_input: &str) -> bool {
    if let Some(pattern) = rule.pattern.as_deref()
        && !pattern.is_empty()
        && regex_matches(pattern, tool_input)
    {
        return true;
    }

    if let Some(patterns_json) = rule.patterns.as_deref() {
        return patterns_match(patterns_json, tool_input);
    }

    false
}

/// Test a JSON array of patterns; a bare string is treated as a one-entry
/// list. Malformed JSON means no match.
fn patterns_match(patterns_json: &str, tool_input: &str) -> bool {
    let parsed: serde_json::Value = match serde_json::from_str(patterns_json) {
        Ok(value) => value,
        Err(_) => return false,
    };

    let patterns: Vec<String> = match parsed {
        serde_json::Value::Array(entries) => entries
            .into_iter()
            .filter_map(|entry| entry.as_str().map(String::from))
            .collect(),
        serde_json::Value::String(single) => vec![single],
        _ => return false,
    };

    patterns
        .iter()
        .any(|pattern| regex_matches(pattern, tool_input))
}

/// Case-insensitive regex search. Invalid syntax is a non-match.
fn regex_matches(pattern: &str, text: &str) -> bool {
    match regex::RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => regex.is_match(text),
        Err(_) => false,
    }
}
