//! Triage settings and the stores they are read from
//!
//! The executor loads settings on every attempt, so edits to rules or
//! providers take effect on the next event without a restart.

pub mod file;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::connector::OpenAiCompatConfig;
use crate::registry::ProviderDescriptor;
use crate::rules::EscalationRule;
use crate::suppression::FALLBACK_THRESHOLD;

pub use file::TomlSettingsStore;

/// Error type for settings loading
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),

    #[error("Settings store unavailable: {0}")]
    Unavailable(String),
}

/// Rules, providers and dispatch knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageSettings {
    #[serde(default)]
    pub rules: Vec<EscalationRule>,
    /// Provider descriptors in registration order
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
    /// HTTP connectors to build at startup, keyed by provider id
    #[serde(default)]
    pub connectors: Vec<OpenAiCompatConfig>,
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    /// Reported in full-context payloads when the event does not say
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Write an `ignored` record for suppressed attempts
    #[serde(default = "default_audit_suppressed")]
    pub audit_suppressed: bool,
    /// Mute threshold for issue types without a table entry
    #[serde(default = "default_mute_threshold")]
    pub default_mute_threshold: u32,
}

fn default_dispatch_timeout_ms() -> u64 {
    10_000
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_audit_suppressed() -> bool {
    true
}

fn default_mute_threshold() -> u32 {
    FALLBACK_THRESHOLD
}

impl Default for TriageSettings {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            providers: Vec::new(),
            connectors: Vec::new(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            environment: default_environment(),
            audit_suppressed: default_audit_suppressed(),
            default_mute_threshold: default_mute_threshold(),
        }
    }
}

impl TriageSettings {
    pub fn with_rule(mut self, rule: EscalationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_provider(mut self, provider: ProviderDescriptor) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_dispatch_timeout_ms(mut self, ms: u64) -> Self {
        self.dispatch_timeout_ms = ms;
        self
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// Reject settings the executor cannot act on
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.dispatch_timeout_ms == 0 {
            return Err(SettingsError::Invalid(
                "dispatch_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.default_mute_threshold == 0 {
            return Err(SettingsError::Invalid(
                "default_mute_threshold must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.as_str()) {
                return Err(SettingsError::Invalid(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(SettingsError::Invalid(format!("duplicate rule id '{}'", rule.id)));
            }
        }
        Ok(())
    }
}

/// Source of [`TriageSettings`], consulted on every attempt
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self) -> Result<TriageSettings, SettingsError>;
}

/// In-memory settings that can be swapped at runtime
#[derive(Debug, Default)]
pub struct StaticSettings {
    inner: RwLock<TriageSettings>,
}

impl StaticSettings {
    pub fn new(settings: TriageSettings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub async fn replace(&self, settings: TriageSettings) {
        *self.inner.write().await = settings;
    }

    pub async fn update<F: FnOnce(&mut TriageSettings)>(&self, f: F) {
        f(&mut *self.inner.write().await);
    }
}

#[async_trait]
impl SettingsStore for StaticSettings {
    async fn load(&self) -> Result<TriageSettings, SettingsError> {
        let settings = self.inner.read().await.clone();
        settings.validate()?;
        Ok(settings)
    }
}
