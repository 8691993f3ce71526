//! TOML settings file, re-read on every load

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{SettingsError, SettingsStore, TriageSettings};

pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse and validate a settings document
pub fn parse_settings(content: &str) -> Result<TriageSettings, SettingsError> {
    let settings: TriageSettings = toml::from_str(content)?;
    settings.validate()?;
    Ok(settings)
}

#[async_trait]
impl SettingsStore for TomlSettingsStore {
    async fn load(&self) -> Result<TriageSettings, SettingsError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SettingsError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        let settings = parse_settings(&content)?;
        debug!(
            path = %self.path.display(),
            rules = settings.rules.len(),
            providers = settings.providers.len(),
            "Settings loaded"
        );
        Ok(settings)
    }
}
