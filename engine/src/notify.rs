//! Human notification
//!
//! Raised at most once per attempt, when a matching rule asks for a person
//! or a dispatch failed. Delivery itself belongs to whoever subscribes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::escalation::record::EscalationRecord;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Why a person is being pulled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationReason {
    /// A matching rule has `notifyHuman` set
    RuleRequested,
    /// At least one dispatch ended `escalated_to_human`
    DispatchFailed,
}

impl std::fmt::Display for NotificationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuleRequested => write!(f, "rule_requested"),
            Self::DispatchFailed => write!(f, "dispatch_failed"),
        }
    }
}

/// Outbound notification carrying every record of the attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanNotification {
    pub attempt_id: String,
    pub source_event_id: String,
    pub reason: NotificationReason,
    pub records: Vec<EscalationRecord>,
    pub raised_at: DateTime<Utc>,
}

/// Error type for notification delivery
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to deliver notification: {0}")]
    DeliveryFailed(String),
}

/// Outbound port for human notifications
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, notification: HumanNotification) -> Result<(), NotifyError>;
}

/// Shared reference to a notification channel
pub type SharedNotifier = Arc<dyn NotificationChannel>;

/// Fans notifications out to in-process subscribers
pub struct BroadcastNotifier {
    sender: broadcast::Sender<HumanNotification>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HumanNotification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for BroadcastNotifier {
    async fn notify(&self, notification: HumanNotification) -> Result<(), NotifyError> {
        let attempt_id = notification.attempt_id.clone();
        match self.sender.send(notification) {
            Ok(count) => debug!(attempt_id = %attempt_id, receivers = count, "Notification published"),
            // No receivers is OK
            Err(_) => debug!(attempt_id = %attempt_id, "Notification published (no receivers)"),
        }
        Ok(())
    }
}
