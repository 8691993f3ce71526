//! Audit store — where escalation records land
//!
//! Records are appended when created and updated once when they reach a
//! terminal status. A failing store is the one error `process_event` lets
//! through to its caller.

pub mod jsonl;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::escalation::record::{EscalationRecord, EscalationStatus};

pub use jsonl::JsonlAuditStore;

/// Error type for audit store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for audit store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to an audit store
pub type SharedAuditStore = Arc<dyn AuditStore>;

/// Append-only destination for escalation records
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a new record
    async fn append(&self, record: &EscalationRecord) -> StoreResult<()>;

    /// Persist the new state of an existing record
    async fn update(&self, record: &EscalationRecord) -> StoreResult<()>;

    /// Records still pending
    async fn pending(&self) -> StoreResult<Vec<EscalationRecord>>;
}

/// In-memory store for tests and embedding
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<EscalationRecord>>,
    index: RwLock<HashMap<String, usize>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Every record in append order, in its latest state
    pub async fn records(&self) -> Vec<EscalationRecord> {
        self.records.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<EscalationRecord> {
        let index = self.index.read().await;
        let idx = *index.get(id)?;
        self.records.read().await.get(idx).cloned()
    }

    pub async fn count_by_status(&self, status: EscalationStatus) -> usize {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: &EscalationRecord) -> StoreResult<()> {
        let mut index = self.index.write().await;
        if index.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        let mut records = self.records.write().await;
        index.insert(record.id.clone(), records.len());
        records.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &EscalationRecord) -> StoreResult<()> {
        let index = self.index.read().await;
        let idx = *index
            .get(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        self.records.write().await[idx] = record.clone();
        Ok(())
    }

    async fn pending(&self) -> StoreResult<Vec<EscalationRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.status == EscalationStatus::Pending)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassifyContext, ProblemClassifier};
    use crate::escalation::payload::ContextPayload;
    use chrono::Utc;

    fn pending_record() -> EscalationRecord {
        let problem = ProblemClassifier::new().classify("build failed: linker error", &ClassifyContext::default());
        let payload = ContextPayload::build(&problem, false, "test");
        EscalationRecord::pending("a1", &problem, "p1", Vec::new(), payload, Utc::now())
    }

    #[tokio::test]
    async fn test_append_update_pending() {
        let store = InMemoryAuditStore::new();
        let mut record = pending_record();
        store.append(&record).await.unwrap();
        assert_eq!(store.pending().await.unwrap().len(), 1);

        record.escalate_to_human("timeout", Utc::now()).unwrap();
        store.update(&record).await.unwrap();
        assert!(store.pending().await.unwrap().is_empty());
        assert_eq!(store.count_by_status(EscalationStatus::EscalatedToHuman).await, 1);
        assert_eq!(store.get(&record.id).await.unwrap().confidence, 0.0);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing() {
        let store = InMemoryAuditStore::new();
        let record = pending_record();
        store.append(&record).await.unwrap();
        assert!(matches!(store.append(&record).await, Err(StoreError::Duplicate(_))));
        assert!(matches!(
            store.update(&pending_record()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
