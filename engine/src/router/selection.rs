//! Provider selection for "auto" rule targets.
//!
//! Capability intersection picks the candidate pool; a short fixed-priority
//! override list then steers specific problem shapes to specially tagged
//! providers. Rate-limited providers are skipped, but selection never comes
//! back empty-handed while an enabled provider exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability;
use crate::classifier::{Problem, ProblemType, Severity};
use crate::registry::{ProviderDescriptor, ProviderEntry, ProviderRegistry};

/// When an override applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum OverrideCondition {
    /// Problem severity is at least this level
    MinSeverity(Severity),
    /// Problem has this classified type
    ProblemType(ProblemType),
}

impl OverrideCondition {
    pub fn applies(&self, problem: &Problem) -> bool {
        match self {
            Self::MinSeverity(min) => problem.severity >= *min,
            Self::ProblemType(ty) => problem.classified_type == *ty,
        }
    }
}

/// Prefer providers tagged `prefer_tag` when `condition` holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityOverride {
    pub condition: OverrideCondition,
    pub prefer_tag: String,
}

impl PriorityOverride {
    pub fn new(condition: OverrideCondition, prefer_tag: &str) -> Self {
        Self {
            condition,
            prefer_tag: prefer_tag.to_string(),
        }
    }
}

/// Why a provider was chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionReason {
    /// An override tag matched
    Override { tag: String },
    /// First non-rate-limited candidate in registration order
    FirstAvailable,
    /// Every candidate was rate-limited; the first one is used anyway
    AllRateLimited,
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Override { tag } => write!(f, "override:{}", tag),
            Self::FirstAvailable => write!(f, "first_available"),
            Self::AllRateLimited => write!(f, "all_rate_limited"),
        }
    }
}

/// Outcome of [`ProviderSelectionPolicy::select`]
#[derive(Debug, Clone)]
pub struct Selection {
    pub descriptor: ProviderDescriptor,
    pub reason: SelectionReason,
}

/// Fixed-priority, capability-aware provider picker
#[derive(Debug, Clone)]
pub struct ProviderSelectionPolicy {
    overrides: Vec<PriorityOverride>,
}

impl ProviderSelectionPolicy {
    pub fn new() -> Self {
        Self {
            overrides: Self::default_overrides(),
        }
    }

    pub fn with_overrides(overrides: Vec<PriorityOverride>) -> Self {
        Self { overrides }
    }

    /// critical/security → high-assurance, performance → optimization,
    /// dependency/build → fast-iteration
    pub fn default_overrides() -> Vec<PriorityOverride> {
        vec![
            PriorityOverride::new(
                OverrideCondition::MinSeverity(Severity::Critical),
                capability::HIGH_ASSURANCE,
            ),
            PriorityOverride::new(
                OverrideCondition::ProblemType(ProblemType::SecurityVulnerability),
                capability::HIGH_ASSURANCE,
            ),
            PriorityOverride::new(
                OverrideCondition::ProblemType(ProblemType::PerformanceIssue),
                capability::OPTIMIZATION,
            ),
            PriorityOverride::new(
                OverrideCondition::ProblemType(ProblemType::DependencyError),
                capability::FAST_ITERATION,
            ),
            PriorityOverride::new(
                OverrideCondition::ProblemType(ProblemType::BuildFailure),
                capability::FAST_ITERATION,
            ),
        ]
    }

    pub fn overrides(&self) -> &[PriorityOverride] {
        &self.overrides
    }

    /// Pick a provider for `problem`, or `None` when no provider is enabled
    pub fn select(
        &self,
        problem: &Problem,
        registry: &ProviderRegistry,
        now: DateTime<Utc>,
    ) -> Option<Selection> {
        let enabled: Vec<&ProviderEntry> = registry.enabled().collect();
        if enabled.is_empty() {
            return None;
        }

        // Overrides look across every enabled provider, not just the capability pool
        for rule in self.overrides.iter().filter(|o| o.condition.applies(problem)) {
            if let Some(entry) = enabled.iter().find(|e| {
                e.descriptor.has_capability(&rule.prefer_tag) && !e.is_rate_limited(now)
            }) {
                debug!(
                    provider = %entry.descriptor.id,
                    tag = %rule.prefer_tag,
                    "Override provider selected"
                );
                return Some(Selection {
                    descriptor: entry.descriptor.clone(),
                    reason: SelectionReason::Override {
                        tag: rule.prefer_tag.clone(),
                    },
                });
            }
        }

        let capable: Vec<&ProviderEntry> = enabled
            .iter()
            .copied()
            .filter(|e| e.descriptor.intersects(&problem.recommended_capabilities))
            .collect();
        let candidates = if capable.is_empty() { enabled } else { capable };

        if let Some(entry) = candidates.iter().find(|e| !e.is_rate_limited(now)) {
            return Some(Selection {
                descriptor: entry.descriptor.clone(),
                reason: SelectionReason::FirstAvailable,
            });
        }

        // Everything is over budget locally; let the backend decide
        candidates.first().map(|entry| Selection {
            descriptor: entry.descriptor.clone(),
            reason: SelectionReason::AllRateLimited,
        })
    }
}

impl Default for ProviderSelectionPolicy {
    fn default() -> Self {
        Self::new()
    }
}
