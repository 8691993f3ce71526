//! Problem classification
//!
//! Turns a raw error message plus its surrounding context into a typed,
//! severity- and confidence-scored [`Problem`]. Classification is total:
//! every input string yields a problem, ambiguous ones land on
//! [`ProblemType::UnknownError`].

pub mod patterns;

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::capability;
use crate::events::{ActivityEvent, RecentEvent};

pub use patterns::{match_pattern, ErrorPattern, PATTERN_TABLE};

/// Classified problem families
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    SyntaxError,
    RuntimeError,
    PerformanceIssue,
    SecurityVulnerability,
    DependencyError,
    BuildFailure,
    UnknownError,
}

impl ProblemType {
    pub fn all() -> &'static [ProblemType] {
        &[
            Self::SyntaxError,
            Self::RuntimeError,
            Self::PerformanceIssue,
            Self::SecurityVulnerability,
            Self::DependencyError,
            Self::BuildFailure,
            Self::UnknownError,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyntaxError => "syntax_error",
            Self::RuntimeError => "runtime_error",
            Self::PerformanceIssue => "performance_issue",
            Self::SecurityVulnerability => "security_vulnerability",
            Self::DependencyError => "dependency_error",
            Self::BuildFailure => "build_failure",
            Self::UnknownError => "unknown_error",
        }
    }
}

impl std::fmt::Display for ProblemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problem severity, ordered low < medium < high < critical
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One level up, saturating at critical
    pub fn bump(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// The classifier's structured judgment about one event
#[derive(Debug, Clone)]
pub struct Problem {
    pub problem_id: String,
    pub source_event: ActivityEvent,
    pub classified_type: ProblemType,
    /// Fine-grained slug of the matched pattern (e.g. `api_timeout_error`)
    pub issue_type: String,
    pub severity: Severity,
    /// Severity of the matched pattern before any adjustment
    pub base_severity: Severity,
    pub confidence: f64,
    pub recommended_capabilities: BTreeSet<String>,
    /// Earlier events of the same type inside the lookback window
    pub context_window: Vec<RecentEvent>,
    /// Human-readable account of how the classification was reached
    pub rationale: String,
}

impl Problem {
    /// Same-type occurrences in the window, counting this event
    pub fn occurrences(&self) -> u32 {
        self.context_window.len() as u32 + 1
    }

    /// Raw text rules match keywords against
    pub fn raw_text(&self) -> &str {
        &self.source_event.message
    }
}

/// Inputs beyond the message itself
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext<'a> {
    /// Event the message came from; a placeholder event is synthesised when absent
    pub event: Option<&'a ActivityEvent>,
    /// Recently classified events, any type
    pub recent: &'a [RecentEvent],
    /// Reference time for the frequency window (defaults to the event timestamp)
    pub now: Option<DateTime<Utc>>,
}

impl<'a> ClassifyContext<'a> {
    pub fn for_event(event: &'a ActivityEvent, recent: &'a [RecentEvent]) -> Self {
        Self {
            event: Some(event),
            recent,
            now: None,
        }
    }
}

/// Tunables for the classifier
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Window for counting same-type events
    pub frequency_lookback: Duration,
    /// Same-type occurrences in the window, counting this event, that bump
    /// severity one level. Counted like [`Problem::occurrences`].
    pub frequency_bump_threshold: u32,
    /// Messages shorter than this (trimmed chars) are vague
    pub vague_min_chars: usize,
    /// Messages with fewer words than this are vague
    pub vague_min_words: usize,
    /// Confidence added for a specific marker
    pub specificity_bonus: f64,
    /// Confidence removed for a vague message
    pub vagueness_penalty: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            frequency_lookback: Duration::minutes(10),
            frequency_bump_threshold: 5,
            vague_min_chars: 20,
            vague_min_words: 3,
            specificity_bonus: 0.2,
            vagueness_penalty: 0.2,
        }
    }
}

/// File extensions of code that ships; problems there are at least medium
const PRODUCTION_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "py", "rs", "go", "java", "kt", "rb", "php", "cs",
    "cpp", "cc", "c", "h", "swift", "scala", "vue", "svelte",
];

/// Phrases that carry no diagnostic information
const VAGUE_PHRASES: &[&str] = &[
    "something went wrong",
    "an error occurred",
    "unknown error",
    "unexpected error",
    "error occurred",
];

const UNKNOWN_CONFIDENCE: f64 = 0.3;
const MIN_CONFIDENCE: f64 = 0.1;

/// Keyword/regex based problem classifier
#[derive(Debug, Clone, Default)]
pub struct ProblemClassifier {
    config: ClassifierConfig,
}

impl ProblemClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify an event using its own message
    pub fn classify_event(&self, event: &ActivityEvent, recent: &[RecentEvent]) -> Problem {
        self.classify(&event.message, &ClassifyContext::for_event(event, recent))
    }

    /// Classify `message`. Never fails.
    pub fn classify(&self, message: &str, ctx: &ClassifyContext<'_>) -> Problem {
        let event = match ctx.event {
            Some(event) => event.clone(),
            None => ActivityEvent::new("error", "unknown", message),
        };
        let now = ctx.now.unwrap_or(event.timestamp);
        let lowered = message.to_lowercase();
        let mut rationale = Vec::new();

        let (classified_type, issue_type, base_severity, base_confidence, markers) =
            match match_pattern(message) {
                Some(p) => {
                    rationale.push(format!("matched pattern '{}'", p.issue_type));
                    (
                        p.problem_type,
                        p.issue_type,
                        p.base_severity,
                        p.base_confidence,
                        p.specific_markers,
                    )
                }
                None => {
                    rationale.push("no pattern matched".to_string());
                    (
                        ProblemType::UnknownError,
                        ProblemType::UnknownError.as_str(),
                        Severity::Low,
                        UNKNOWN_CONFIDENCE,
                        &[][..],
                    )
                }
            };

        // Severity: frequency bump, then floors
        let context_window: Vec<RecentEvent> = ctx
            .recent
            .iter()
            .filter(|e| {
                e.problem_type == classified_type
                    && e.event_id != event.id
                    && e.timestamp <= now
                    && e.timestamp >= now - self.config.frequency_lookback
            })
            .cloned()
            .collect();

        let occurrences = context_window.len() as u32 + 1;
        let mut severity = base_severity;
        if occurrences >= self.config.frequency_bump_threshold {
            severity = severity.bump();
            rationale.push(format!(
                "{} {} events in the last {} minutes",
                occurrences,
                classified_type,
                self.config.frequency_lookback.num_minutes()
            ));
        }
        if let Some(path) = event.file_path() {
            if is_production_file(path) && severity < Severity::Medium {
                severity = Severity::Medium;
                rationale.push(format!("production file {}", path));
            }
        }
        if let Some(hint) = event.severity_hint() {
            if hint > severity {
                severity = hint;
                rationale.push(format!("producer hinted {}", hint));
            }
        }

        // Confidence: specificity bonus, vagueness penalty
        let mut confidence = base_confidence;
        if let Some(marker) = markers.iter().find(|m| lowered.contains(*m)) {
            confidence = (confidence + self.config.specificity_bonus).min(1.0);
            rationale.push(format!("specific marker '{}'", marker));
        }
        if self.is_vague(message) {
            confidence = (confidence - self.config.vagueness_penalty).max(MIN_CONFIDENCE);
            rationale.push("vague message".to_string());
        }

        let mut recommended_capabilities = BTreeSet::new();
        if classified_type == ProblemType::SecurityVulnerability {
            recommended_capabilities.insert(capability::SECURITY.to_string());
        } else {
            recommended_capabilities.insert(capability::DEBUGGING.to_string());
        }

        Problem {
            problem_id: uuid::Uuid::new_v4().to_string(),
            source_event: event,
            classified_type,
            issue_type: issue_type.to_string(),
            severity,
            base_severity,
            confidence,
            recommended_capabilities,
            context_window,
            rationale: rationale.join("; "),
        }
    }

    fn is_vague(&self, message: &str) -> bool {
        let trimmed = message.trim();
        if trimmed.chars().count() < self.config.vague_min_chars
            || trimmed.split_whitespace().count() < self.config.vague_min_words
        {
            return true;
        }
        let lowered = trimmed.to_lowercase();
        VAGUE_PHRASES.iter().any(|p| lowered == *p || lowered.starts_with(p))
    }
}

fn is_production_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            PRODUCTION_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
