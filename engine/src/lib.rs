//! Triage Engine
//!
//! Escalation and triage for developer-activity error events. This library provides:
//! - A total, pattern-table problem classifier with frequency and context adjustments
//! - Rate-limited provider registry and capability-aware backend selection
//! - Per-subject suppression with a one-way auto-mute latch and versioned snapshots
//! - Configurable escalation rules evaluated without short-circuiting
//! - An executor that dispatches to reasoning backends under a timeout and
//!   keeps an auditable record of every attempt
//!
//! # Pipeline
//!
//! ```text
//! ActivityEvent ─▶ ProblemClassifier ─▶ SuppressionManager ─▶ RuleEngine
//!                                                               │
//!                 AuditStore ◀── ProviderConnector ◀── ProviderSelectionPolicy
//! ```
//!
//! Events enter through [`EscalationExecutor::process_event`], usually behind the
//! bounded queue returned by [`spawn_worker`]. Rules and providers are read from a
//! [`SettingsStore`] on every attempt.
//!
//! # Ports
//!
//! - [`ProviderConnector`]: reasoning backend (`connector::openai` for OpenAI-compatible servers)
//! - [`AuditStore`]: escalation records (in-memory or JSON lines)
//! - [`SettingsStore`]: rules and providers (in-memory or TOML file)
//! - [`NotificationChannel`]: human notifications

#![allow(clippy::uninlined_format_args)]

pub mod capability;
pub mod classifier;
pub mod connector;
pub mod error;
pub mod escalation;
pub mod events;
pub mod notify;
pub mod registry;
pub mod router;
pub mod rules;
pub mod settings;
pub mod store;
pub mod suppression;

pub use classifier::{ClassifyContext, Problem, ProblemClassifier, ProblemType, Severity};
pub use connector::{ConnectorError, ConnectorResponse, ConnectorSet, ProviderConnector};
pub use error::{TriageError, TriageResult};
pub use escalation::{
    spawn_worker, AttemptOutcome, AttemptReport, ContextPayload, Enqueued, EscalationExecutor,
    EscalationRecord, EscalationStatus, ShutdownReport, WorkerHandle,
};
pub use events::{ActivityEvent, EventDetails, EventHistory};
pub use notify::{BroadcastNotifier, HumanNotification, NotificationChannel, NotificationReason};
pub use registry::{ProviderDescriptor, ProviderRegistry, RateLimit};
pub use router::{ProviderSelectionPolicy, Selection, SelectionReason};
pub use rules::{EscalationRule, ProviderTarget, RuleAction, RuleEngine, RuleTrigger};
pub use settings::{SettingsError, SettingsStore, StaticSettings, TomlSettingsStore, TriageSettings};
pub use store::{AuditStore, InMemoryAuditStore, JsonlAuditStore, StoreError};
pub use suppression::{
    SubjectKey, SuppressAction, SuppressionManager, SuppressionSnapshot, SuppressionState,
};
