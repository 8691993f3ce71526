//! Escalation records — the audit trail of every attempt
//!
//! A record is created `pending` and moves exactly once to a terminal status.
//! Suppressed attempts are written directly as `ignored`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::{Problem, ProblemType, Severity};
use crate::escalation::payload::ContextPayload;

/// Suggestion attached to every record that needs a person
pub const MANUAL_REVIEW_SUGGESTION: &str =
    "Manual review required: automated analysis was unavailable for this problem.";

/// Lifecycle status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Resolved,
    EscalatedToHuman,
    Ignored,
}

impl EscalationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Resolved => write!(f, "resolved"),
            Self::EscalatedToHuman => write!(f, "escalated_to_human"),
            Self::Ignored => write!(f, "ignored"),
        }
    }
}

/// Attempted to move a record that is already terminal
#[derive(Debug, Clone, Error)]
#[error("Record {record_id} is already {status}")]
pub struct TransitionError {
    pub record_id: String,
    pub status: EscalationStatus,
}

/// Append-only audit entry for one dispatch (or one suppressed attempt)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationRecord {
    pub id: String,
    /// Groups the records produced by one `process_event` call
    pub attempt_id: String,
    pub source_event_id: String,
    pub timestamp: DateTime<Utc>,
    pub problem_type: ProblemType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_context: Option<ContextPayload>,
    #[serde(default)]
    pub response_text: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub status: EscalationStatus,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_timestamp: Option<DateTime<Utc>>,
}

impl EscalationRecord {
    /// New pending record for a dispatch to `provider_id`
    pub fn pending(
        attempt_id: &str,
        problem: &Problem,
        provider_id: &str,
        rule_ids: Vec<String>,
        request_context: ContextPayload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            attempt_id: attempt_id.to_string(),
            source_event_id: problem.source_event.id.clone(),
            timestamp: now,
            problem_type: problem.classified_type,
            severity: problem.severity,
            provider_id: Some(provider_id.to_string()),
            rule_ids,
            request_context: Some(request_context),
            response_text: String::new(),
            suggestions: Vec::new(),
            status: EscalationStatus::Pending,
            confidence: problem.confidence,
            resolution_timestamp: None,
        }
    }

    /// Terminal record for a suppressed attempt
    pub fn suppressed(attempt_id: &str, problem: &Problem, reason: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            attempt_id: attempt_id.to_string(),
            source_event_id: problem.source_event.id.clone(),
            timestamp: now,
            problem_type: problem.classified_type,
            severity: problem.severity,
            provider_id: None,
            rule_ids: Vec::new(),
            request_context: None,
            response_text: reason.to_string(),
            suggestions: Vec::new(),
            status: EscalationStatus::Ignored,
            confidence: problem.confidence,
            resolution_timestamp: Some(now),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_pending(&self) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                record_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Backend answered
    pub fn resolve(
        &mut self,
        response_text: String,
        suggestions: Vec<String>,
        confidence: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_pending()?;
        self.response_text = response_text;
        self.suggestions = suggestions;
        if let Some(confidence) = confidence {
            self.confidence = confidence.clamp(0.0, 1.0);
        }
        self.status = EscalationStatus::Resolved;
        self.resolution_timestamp = Some(now);
        Ok(())
    }

    /// Hand the problem to a person; confidence drops to zero
    pub fn escalate_to_human(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_pending()?;
        self.response_text = reason.to_string();
        self.suggestions = vec![MANUAL_REVIEW_SUGGESTION.to_string()];
        self.confidence = 0.0;
        self.status = EscalationStatus::EscalatedToHuman;
        self.resolution_timestamp = Some(now);
        Ok(())
    }
}
