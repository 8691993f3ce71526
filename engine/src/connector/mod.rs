//! Backend connectors — the only place the pipeline suspends
//!
//! A connector turns a [`ContextPayload`] into a backend answer. Timeouts are
//! enforced by the executor around [`ProviderConnector::dispatch`], so
//! implementations need not carry their own.

pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escalation::payload::ContextPayload;

pub use openai::{check_endpoint, OpenAiCompatConfig, OpenAiCompatConnector};

/// A backend's answer to one payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorResponse {
    pub text: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Backend's own confidence, when it reports one
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Errors a connector can report
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed backend response: {0}")]
    Malformed(String),

    #[error("Connector unavailable: {0}")]
    Unavailable(String),
}

/// A reasoning backend reachable by provider id
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Provider id this connector serves
    fn provider_id(&self) -> &str;

    /// Send the payload and wait for an answer
    async fn dispatch(&self, payload: &ContextPayload) -> Result<ConnectorResponse, ConnectorError>;
}

/// Connectors keyed by provider id
#[derive(Clone, Default)]
pub struct ConnectorSet {
    connectors: HashMap<String, Arc<dyn ProviderConnector>>,
}

impl ConnectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP connectors for every configured endpoint
    pub fn from_configs(configs: &[OpenAiCompatConfig]) -> Result<Self, ConnectorError> {
        let mut set = Self::new();
        for config in configs {
            set.insert(Arc::new(OpenAiCompatConnector::new(config.clone())?));
        }
        Ok(set)
    }

    /// Register a connector under its own provider id, replacing any previous one
    pub fn insert(&mut self, connector: Arc<dyn ProviderConnector>) {
        self.connectors
            .insert(connector.provider_id().to_string(), connector);
    }

    /// Builder form of [`ConnectorSet::insert`]
    pub fn with(mut self, connector: Arc<dyn ProviderConnector>) -> Self {
        self.insert(connector);
        self
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderConnector>> {
        self.connectors.get(provider_id).cloned()
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.connectors.contains_key(provider_id)
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connectors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl std::fmt::Debug for ConnectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorSet")
            .field("providers", &self.provider_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl ProviderConnector for Echo {
        fn provider_id(&self) -> &str {
            self.0
        }

        async fn dispatch(&self, payload: &ContextPayload) -> Result<ConnectorResponse, ConnectorError> {
            Ok(ConnectorResponse {
                text: payload.text.clone(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_set_keys_by_provider_id() {
        let set = ConnectorSet::new().with(Arc::new(Echo("b"))).with(Arc::new(Echo("a")));
        assert_eq!(set.provider_ids(), vec!["a".to_string(), "b".to_string()]);
        assert!(set.contains("a"));
        assert!(set.get("missing").is_none());
    }
}
