//! JSON-lines audit log
//!
//! Every append and every update writes one line holding the full record.
//! Reading folds the log by record id, the last line for an id winning, so an
//! interrupted run leaves its `pending` lines visible to the next start.
//!
//! Record ids already in the file are indexed on first use, so an update
//! checks the index instead of reading the log back.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::{AuditStore, StoreError, StoreResult};
use crate::escalation::record::{EscalationRecord, EscalationStatus};

pub struct JsonlAuditStore {
    path: PathBuf,
    /// Known record ids; `None` until the log has been read once. Held across writes.
    index: Mutex<Option<HashSet<String>>>,
}

impl JsonlAuditStore {
    /// Open (or lazily create) the log at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            index: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Caller holds the index lock
    async fn write_line(&self, record: &EscalationRecord) -> StoreResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Latest state of every record, in first-seen order
    ///
    /// Lines that fail to parse (e.g. a torn final write) are skipped with a warning.
    pub async fn load(&self) -> StoreResult<Vec<EscalationRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, EscalationRecord> = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EscalationRecord>(line) {
                Ok(record) => {
                    if !latest.contains_key(&record.id) {
                        order.push(record.id.clone());
                    }
                    latest.insert(record.id.clone(), record);
                }
                Err(e) => {
                    warn!(path = %self.path.display(), line = lineno + 1, error = %e, "Skipping unreadable audit line");
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect())
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, record: &EscalationRecord) -> StoreResult<()> {
        let mut index = self.index.lock().await;
        self.write_line(record).await?;
        // An unread log is indexed in full on the first update
        if let Some(ids) = index.as_mut() {
            ids.insert(record.id.clone());
        }
        Ok(())
    }

    async fn update(&self, record: &EscalationRecord) -> StoreResult<()> {
        let mut index = self.index.lock().await;
        if index.is_none() {
            *index = Some(self.load().await?.into_iter().map(|r| r.id).collect());
        }
        if !index.as_ref().is_some_and(|ids| ids.contains(&record.id)) {
            return Err(StoreError::NotFound(record.id.clone()));
        }
        self.write_line(record).await
    }

    async fn pending(&self) -> StoreResult<Vec<EscalationRecord>> {
        let mut index = self.index.lock().await;
        let records = self.load().await?;
        *index = Some(records.iter().map(|r| r.id.clone()).collect());
        Ok(records
            .into_iter()
            .filter(|r| r.status == EscalationStatus::Pending)
            .collect())
    }
}
