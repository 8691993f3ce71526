//! Provider Registry — backend connector descriptors and their rate-limit counters
//!
//! Providers are kept in registration order; that order is the tie-breaker
//! the selection policy relies on. Counters live here and nowhere else, so
//! the executor is the only writer.

pub mod rate_limit;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use rate_limit::{FixedWindowLimiter, RateLimit};

/// Static description of a reasoning backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: String,
    /// Capability and preference tags (see [`crate::capability`])
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::new(),
            rate_limit: RateLimit::default(),
            enabled: true,
        }
    }

    /// Builder: add a capability tag
    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.insert(tag.into());
        self
    }

    /// Builder: set the rate limit
    pub fn with_rate_limit(mut self, requests_per_window: u32, window_length_ms: u64) -> Self {
        self.rate_limit = RateLimit::new(requests_per_window, window_length_ms);
        self
    }

    /// Builder: disable the provider
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }

    /// Whether any of `wanted` is offered by this provider
    pub fn intersects(&self, wanted: &BTreeSet<String>) -> bool {
        !self.capabilities.is_disjoint(wanted)
    }
}

/// A registered provider with its live counter
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub descriptor: ProviderDescriptor,
    limiter: FixedWindowLimiter,
}

impl ProviderEntry {
    fn new(descriptor: ProviderDescriptor) -> Self {
        Self {
            limiter: FixedWindowLimiter::new(descriptor.rate_limit),
            descriptor,
        }
    }

    pub fn limiter(&self) -> &FixedWindowLimiter {
        &self.limiter
    }

    pub fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.limiter.is_limited(now)
    }
}

/// Registry of known providers in registration order
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors, keeping their order
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ProviderDescriptor>) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor);
        }
        registry
    }

    /// Register a provider, or replace the descriptor of an existing one in place
    pub fn register(&mut self, descriptor: ProviderDescriptor) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.descriptor.id == descriptor.id) {
            entry.limiter.set_limit(descriptor.rate_limit);
            entry.descriptor = descriptor;
        } else {
            self.entries.push(ProviderEntry::new(descriptor));
        }
    }

    /// Adopt the provider list from the settings store
    ///
    /// Order follows `descriptors`. Providers that remain keep their counters;
    /// providers no longer listed are dropped.
    pub fn sync(&mut self, descriptors: &[ProviderDescriptor]) {
        let mut previous = std::mem::take(&mut self.entries);
        for descriptor in descriptors {
            match previous.iter().position(|e| e.descriptor.id == descriptor.id) {
                Some(idx) => {
                    let mut entry = previous.swap_remove(idx);
                    entry.limiter.set_limit(descriptor.rate_limit);
                    entry.descriptor = descriptor.clone();
                    self.entries.push(entry);
                }
                None => self.entries.push(ProviderEntry::new(descriptor.clone())),
            }
        }
        if !previous.is_empty() {
            debug!(dropped = previous.len(), "Providers removed by settings sync");
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProviderEntry> {
        self.entries.iter().find(|e| e.descriptor.id == id)
    }

    /// All entries in registration order
    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    /// Enabled entries in registration order
    pub fn enabled(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.entries.iter().filter(|e| e.descriptor.enabled)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.descriptor.id == id) {
            Some(entry) => {
                entry.descriptor.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Count one dispatch against `id`'s window
    pub fn record_usage(&mut self, id: &str, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.descriptor.id == id) {
            entry.limiter.record(now);
        }
    }

    /// Unknown providers are never limited
    pub fn is_rate_limited(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.get(id).map(|e| e.is_rate_limited(now)).unwrap_or(false)
    }

    pub fn usage(&self, id: &str, now: DateTime<Utc>) -> u32 {
        self.get(id).map(|e| e.limiter.usage(now)).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
