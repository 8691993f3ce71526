//! Activity event types
//!
//! Events arrive from the workspace watcher already formed; the engine never
//! mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::Severity;

/// Optional structured details attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    /// File the error was reported against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Raw stack trace, if the producer captured one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Producer-side severity guess
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_hint: Option<Severity>,
    /// Deployment environment the event came from (e.g. "production")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// An externally produced observation fed into the triage pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Producer category (e.g. "error", "build", "terminal")
    pub category: String,
    /// User or workspace the event belongs to
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<EventDetails>,
}

impl ActivityEvent {
    /// Create an event with a fresh id stamped now
    pub fn new(
        category: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            category: category.into(),
            source: source.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Builder: override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builder: attach details
    pub fn with_details(mut self, details: EventDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn file_path(&self) -> Option<&str> {
        self.details.as_ref()?.file_path.as_deref()
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.details.as_ref()?.stack_trace.as_deref()
    }

    pub fn severity_hint(&self) -> Option<Severity> {
        self.details.as_ref()?.severity_hint
    }

    pub fn environment(&self) -> Option<&str> {
        self.details.as_ref()?.environment.as_deref()
    }
}
