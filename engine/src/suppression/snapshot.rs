//! Versioned JSON snapshots of a user's suppression state
//!
//! ```json
//! {
//!   "version": 1,
//!   "subjectKey": "alice",
//!   "plugin": "triage",
//!   "model": "meta-llama-3.1-8b-instruct",
//!   "struggles": {
//!     "api_timeout_error": {"count": 3, "autoIgnore": true, "escalateThreshold": 3, "lastSeen": "..."}
//!   },
//!   "sessionTally": 3,
//!   "lifetimeTally": 17
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot format version written by this crate
pub const SNAPSHOT_VERSION: u32 = 1;

/// Per-issue-type entry in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StruggleEntry {
    pub count: u32,
    pub auto_ignore: bool,
    pub escalate_threshold: u32,
    pub last_seen: DateTime<Utc>,
}

/// Exported suppression state for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuppressionSnapshot {
    pub version: u32,
    /// User half of the subject keys in `struggles`
    pub subject_key: String,
    pub plugin: String,
    pub model: String,
    pub struggles: BTreeMap<String, StruggleEntry>,
    pub session_tally: u64,
    pub lifetime_tally: u64,
}

impl SuppressionSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, ImportError> {
        serde_json::from_str(json).map_err(ImportError::Malformed)
    }

    /// Check the snapshot can be applied by a manager registered as `plugin`
    pub fn validate(&self, plugin: &str) -> Result<(), ImportError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(ImportError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: self.version,
            });
        }
        if self.plugin != plugin {
            return Err(ImportError::PluginMismatch {
                expected: plugin.to_string(),
                found: self.plugin.clone(),
            });
        }
        if self.subject_key.trim().is_empty() {
            return Err(ImportError::EmptySubject);
        }
        for (issue_type, entry) in &self.struggles {
            if issue_type.trim().is_empty() {
                return Err(ImportError::InvalidEntry {
                    issue_type: issue_type.clone(),
                    reason: "empty issue type".to_string(),
                });
            }
            if entry.escalate_threshold == 0 {
                return Err(ImportError::InvalidEntry {
                    issue_type: issue_type.clone(),
                    reason: "threshold must be at least 1".to_string(),
                });
            }
            if entry.auto_ignore != (entry.count >= entry.escalate_threshold) {
                return Err(ImportError::InvalidEntry {
                    issue_type: issue_type.clone(),
                    reason: format!(
                        "autoIgnore={} inconsistent with count {} and threshold {}",
                        entry.auto_ignore, entry.count, entry.escalate_threshold
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Reasons a snapshot is rejected
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Malformed snapshot JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Unsupported snapshot version {found} (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Snapshot belongs to plugin '{found}', expected '{expected}'")]
    PluginMismatch { expected: String, found: String },

    #[error("Snapshot has an empty subject key")]
    EmptySubject,

    #[error("Invalid entry for '{issue_type}': {reason}")]
    InvalidEntry { issue_type: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SuppressionSnapshot {
        let mut struggles = BTreeMap::new();
        struggles.insert(
            "api_timeout_error".to_string(),
            StruggleEntry {
                count: 3,
                auto_ignore: true,
                escalate_threshold: 3,
                last_seen: Utc::now(),
            },
        );
        SuppressionSnapshot {
            version: SNAPSHOT_VERSION,
            subject_key: "alice".to_string(),
            plugin: "triage".to_string(),
            model: "local".to_string(),
            struggles,
            session_tally: 3,
            lifetime_tally: 9,
        }
    }

    #[test]
    fn test_json_uses_camel_case_keys() {
        let json = snapshot().to_json().unwrap();
        for key in ["subjectKey", "sessionTally", "lifetimeTally", "autoIgnore", "escalateThreshold", "lastSeen"] {
            assert!(json.contains(key), "missing {key}");
        }
    }

    #[test]
    fn test_validate_accepts_consistent() {
        assert!(snapshot().validate("triage").is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_version_and_plugin() {
        let mut s = snapshot();
        s.version = 2;
        assert!(matches!(s.validate("triage"), Err(ImportError::VersionMismatch { found: 2, .. })));

        let s = snapshot();
        assert!(matches!(s.validate("other"), Err(ImportError::PluginMismatch { .. })));
    }

    #[test]
    fn test_validate_rejects_inconsistent_latch() {
        let mut s = snapshot();
        s.struggles.get_mut("api_timeout_error").unwrap().auto_ignore = false;
        assert!(matches!(s.validate("triage"), Err(ImportError::InvalidEntry { .. })));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            SuppressionSnapshot::from_json("{not json"),
            Err(ImportError::Malformed(_))
        ));
    }
}
