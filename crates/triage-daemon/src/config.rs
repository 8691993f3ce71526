use std::path::PathBuf;

use crate::telemetry::LogFormat;

/// Deployment profile, picked with `TRIAGE_ENV`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Development,
    Production,
    Test,
}

impl Profile {
    /// Unknown names fall back to development
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    /// Log level used when `RUST_LOG` is unset
    pub fn default_log_level(&self) -> &'static str {
        match self {
            Self::Production => "info",
            Self::Development | Self::Test => "debug",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// TOML settings file with rules, providers and connectors
    pub settings_path: PathBuf,
    /// JSON-lines audit log
    pub audit_log: PathBuf,
    /// Events allowed to wait behind the in-flight attempt
    pub queue_capacity: usize,
    pub profile: Profile,
    pub log_format: LogFormat,
    /// Stamped on suppression exports, checked on imports
    pub plugin_id: String,
    /// Informational model name carried in suppression exports
    pub model: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Build from any key lookup; missing or unparsable values use defaults
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        Self {
            settings_path: lookup("TRIAGE_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("triage.toml")),
            audit_log: lookup("TRIAGE_AUDIT_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("escalations.jsonl")),
            queue_capacity: lookup("TRIAGE_QUEUE_CAPACITY")
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(triage_engine::escalation::DEFAULT_QUEUE_CAPACITY),
            profile: lookup("TRIAGE_ENV")
                .map(|v| Profile::parse(&v))
                .unwrap_or(Profile::Development),
            log_format: lookup("TRIAGE_LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            plugin_id: lookup("TRIAGE_PLUGIN_ID")
                .unwrap_or_else(|| triage_engine::escalation::DEFAULT_PLUGIN_ID.to_string()),
            model: lookup("TRIAGE_MODEL").unwrap_or_else(|| "default".to_string()),
        }
    }
}
