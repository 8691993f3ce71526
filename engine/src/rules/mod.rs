//! Escalation rules — configurable trigger → action mappings
//!
//! Every enabled rule is evaluated independently; all matches are returned so
//! that rules aimed at different providers can fire for the same problem.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::classifier::{Problem, ProblemType, Severity};

/// Trigger conditions. Empty sets match anything on that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTrigger {
    #[serde(default)]
    pub type_set: BTreeSet<ProblemType>,
    #[serde(default)]
    pub min_severity: Severity,
    /// Same-type occurrences (including this one) required in the window.
    /// Compared against [`Problem::occurrences`], the count the severity bump uses.
    #[serde(default)]
    pub min_frequency: u32,
    /// Case-insensitive substrings looked for in the raw message
    #[serde(default)]
    pub keyword_set: BTreeSet<String>,
}

/// Where a matching rule sends the problem
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderTarget {
    /// Let the selection policy decide
    #[default]
    Auto,
    /// A specific provider id, used verbatim
    Provider(String),
}

impl From<String> for ProviderTarget {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("auto") {
            Self::Auto
        } else {
            Self::Provider(value)
        }
    }
}

impl From<ProviderTarget> for String {
    fn from(value: ProviderTarget) -> Self {
        match value {
            ProviderTarget::Auto => "auto".to_string(),
            ProviderTarget::Provider(id) => id,
        }
    }
}

impl std::fmt::Display for ProviderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Provider(id) => write!(f, "{}", id),
        }
    }
}

/// What to do when a rule matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    #[serde(default)]
    pub preferred_provider_id: ProviderTarget,
    #[serde(default)]
    pub include_full_context: bool,
    #[serde(default)]
    pub notify_human: bool,
}

/// A configured escalation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub trigger: RuleTrigger,
    #[serde(default)]
    pub action: RuleAction,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl EscalationRule {
    /// A rule that matches everything and routes automatically
    pub fn catch_all(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            trigger: RuleTrigger::default(),
            action: RuleAction::default(),
            enabled: true,
        }
    }

    /// Whether the trigger holds for `problem` (ignores `enabled`)
    pub fn matches(&self, problem: &Problem) -> bool {
        let trigger = &self.trigger;
        if !trigger.type_set.is_empty() && !trigger.type_set.contains(&problem.classified_type) {
            return false;
        }
        if problem.severity < trigger.min_severity {
            return false;
        }
        if problem.occurrences() < trigger.min_frequency {
            return false;
        }
        if !trigger.keyword_set.is_empty() {
            let text = problem.raw_text().to_lowercase();
            if !trigger
                .keyword_set
                .iter()
                .any(|k| text.contains(&k.to_lowercase()))
            {
                return false;
            }
        }
        true
    }
}

/// Evaluates rule sets against problems
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// All enabled rules matching `problem`, in rule-set order
    pub fn match_rules<'r>(&self, problem: &Problem, rules: &'r [EscalationRule]) -> Vec<&'r EscalationRule> {
        rules
            .iter()
            .filter(|r| r.enabled && r.matches(problem))
            .collect()
    }
}
