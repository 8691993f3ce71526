//! Suppression Manager — per-subject noise limiting
//!
//! Every (user, issue type) pair gets an occurrence counter and a one-way
//! mute latch. Once the counter reaches the subject's threshold the latch
//! closes and further occurrences are ignored without being counted. Only an
//! explicit reset or a threshold raised above the current count re-opens it.
//!
//! ```text
//! record ─▶ muted? ──yes──▶ Ignore
//!             │no
//!             ▼
//!          count += 1 ─▶ count >= threshold? ──yes──▶ mute, AutoDisabled
//!                                   │no
//!                                   ▼
//!                                Continue
//! ```

pub mod snapshot;
pub mod thresholds;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use snapshot::{ImportError, StruggleEntry, SuppressionSnapshot, SNAPSHOT_VERSION};
pub use thresholds::{default_threshold, lookup_threshold, FALLBACK_THRESHOLD};

/// Identifies a suppression subject: one user struggling with one issue type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub user: String,
    pub issue_type: String,
}

impl SubjectKey {
    pub fn new(user: impl Into<String>, issue_type: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            issue_type: issue_type.into(),
        }
    }
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.user, self.issue_type)
    }
}

/// Counter and latch for one subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionState {
    pub subject: SubjectKey,
    pub occurrence_count: u32,
    pub auto_muted: bool,
    pub mute_threshold: u32,
    pub last_seen: DateTime<Utc>,
}

impl SuppressionState {
    fn new(subject: SubjectKey, mute_threshold: u32, now: DateTime<Utc>) -> Self {
        Self {
            subject,
            occurrence_count: 0,
            auto_muted: false,
            mute_threshold: mute_threshold.max(1),
            last_seen: now,
        }
    }

    fn to_entry(&self) -> StruggleEntry {
        StruggleEntry {
            count: self.occurrence_count,
            auto_ignore: self.auto_muted,
            escalate_threshold: self.mute_threshold,
            last_seen: self.last_seen,
        }
    }
}

/// What the caller should do with the occurrence just recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressAction {
    /// Below threshold, keep processing
    Continue,
    /// Subject is muted; occurrence not counted
    Ignore,
    /// This occurrence closed the latch
    AutoDisabled,
}

/// Result of [`SuppressionManager::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub action: SuppressAction,
    pub count: u32,
}

/// Occurrence tallies for one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    session: u64,
    lifetime: u64,
}

/// Summary of an applied import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub user: String,
    pub subjects: usize,
    pub muted: usize,
}

/// Process-local suppression bookkeeping
#[derive(Debug, Clone)]
pub struct SuppressionManager {
    plugin: String,
    model: String,
    states: BTreeMap<SubjectKey, SuppressionState>,
    tallies: HashMap<String, Tally>,
}

impl SuppressionManager {
    /// `plugin` stamps exports and gates imports; `model` is informational
    pub fn new(plugin: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            model: model.into(),
            states: BTreeMap::new(),
            tallies: HashMap::new(),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Whether occurrences of `key` are currently being ignored
    pub fn should_suppress(&self, key: &SubjectKey) -> bool {
        self.states.get(key).map(|s| s.auto_muted).unwrap_or(false)
    }

    pub fn state(&self, key: &SubjectKey) -> Option<&SuppressionState> {
        self.states.get(key)
    }

    pub fn states(&self) -> impl Iterator<Item = &SuppressionState> {
        self.states.values()
    }

    /// Users with any recorded state
    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.states.keys().map(|k| k.user.clone()).collect();
        users.dedup();
        users
    }

    /// Record one occurrence of `key` now
    pub fn record(&mut self, key: &SubjectKey, default_threshold: u32) -> RecordOutcome {
        self.record_at(key, default_threshold, Utc::now())
    }

    /// Record one occurrence of `key`
    ///
    /// `default_threshold` only applies when this is the subject's first
    /// occurrence; afterwards the stored threshold governs.
    pub fn record_at(
        &mut self,
        key: &SubjectKey,
        default_threshold: u32,
        now: DateTime<Utc>,
    ) -> RecordOutcome {
        let tally = self.tallies.entry(key.user.clone()).or_default();
        tally.session += 1;
        tally.lifetime += 1;

        let state = self
            .states
            .entry(key.clone())
            .or_insert_with(|| SuppressionState::new(key.clone(), default_threshold, now));
        state.last_seen = now;

        if state.auto_muted {
            debug!(subject = %key, count = state.occurrence_count, "Occurrence ignored (muted)");
            return RecordOutcome {
                action: SuppressAction::Ignore,
                count: state.occurrence_count,
            };
        }

        state.occurrence_count += 1;
        if state.occurrence_count >= state.mute_threshold {
            state.auto_muted = true;
            info!(
                subject = %key,
                count = state.occurrence_count,
                threshold = state.mute_threshold,
                "Subject auto-muted"
            );
            return RecordOutcome {
                action: SuppressAction::AutoDisabled,
                count: state.occurrence_count,
            };
        }

        RecordOutcome {
            action: SuppressAction::Continue,
            count: state.occurrence_count,
        }
    }

    /// Clear the counter and latch for `key`. Returns false if unknown.
    pub fn reset_subject(&mut self, key: &SubjectKey) -> bool {
        match self.states.get_mut(key) {
            Some(state) => {
                state.occurrence_count = 0;
                state.auto_muted = false;
                info!(subject = %key, "Subject reset");
                true
            }
            None => false,
        }
    }

    /// Change the threshold for `key`. Returns false if unknown.
    ///
    /// A threshold above the current count re-opens a muted subject; one at or
    /// below the count closes the latch.
    pub fn update_threshold(&mut self, key: &SubjectKey, threshold: u32) -> bool {
        let Some(state) = self.states.get_mut(key) else {
            return false;
        };
        state.mute_threshold = threshold.max(1);
        let muted = state.occurrence_count >= state.mute_threshold;
        if muted != state.auto_muted {
            info!(subject = %key, threshold = state.mute_threshold, muted, "Mute latch changed by threshold update");
        }
        state.auto_muted = muted;
        true
    }

    /// Occurrences recorded for `user` since this manager was created
    pub fn session_tally(&self, user: &str) -> u64 {
        self.tallies.get(user).map(|t| t.session).unwrap_or(0)
    }

    /// Occurrences recorded for `user` including imported history
    pub fn lifetime_tally(&self, user: &str) -> u64 {
        self.tallies.get(user).map(|t| t.lifetime).unwrap_or(0)
    }

    /// Export every subject belonging to `user`
    pub fn export_user(&self, user: &str) -> SuppressionSnapshot {
        let struggles = self
            .states
            .values()
            .filter(|s| s.subject.user == user)
            .map(|s| (s.subject.issue_type.clone(), s.to_entry()))
            .collect();
        let tally = self.tallies.get(user).copied().unwrap_or_default();
        SuppressionSnapshot {
            version: SNAPSHOT_VERSION,
            subject_key: user.to_string(),
            plugin: self.plugin.clone(),
            model: self.model.clone(),
            struggles,
            session_tally: tally.session,
            lifetime_tally: tally.lifetime,
        }
    }

    /// Apply a snapshot. Nothing changes unless the whole snapshot validates.
    ///
    /// Listed subjects overwrite in-memory state; unlisted subjects of the same
    /// user are kept. The lifetime tally is taken from the snapshot, the
    /// session tally stays local.
    pub fn import(&mut self, snapshot: SuppressionSnapshot) -> Result<ImportSummary, ImportError> {
        snapshot.validate(&self.plugin)?;

        let user = snapshot.subject_key;
        let mut muted = 0;
        let subjects = snapshot.struggles.len();
        for (issue_type, entry) in snapshot.struggles {
            let key = SubjectKey::new(user.clone(), issue_type);
            if entry.auto_ignore {
                muted += 1;
            }
            self.states.insert(
                key.clone(),
                SuppressionState {
                    subject: key,
                    occurrence_count: entry.count,
                    auto_muted: entry.auto_ignore,
                    mute_threshold: entry.escalate_threshold,
                    last_seen: entry.last_seen,
                },
            );
        }
        let tally = self.tallies.entry(user.clone()).or_default();
        tally.lifetime = snapshot.lifetime_tally.max(tally.session);

        info!(user = %user, subjects, muted, "Suppression snapshot imported");
        Ok(ImportSummary {
            user,
            subjects,
            muted,
        })
    }

    /// Parse and apply a JSON snapshot
    pub fn import_json(&mut self, json: &str) -> Result<ImportSummary, ImportError> {
        self.import(SuppressionSnapshot::from_json(json)?)
    }
}
