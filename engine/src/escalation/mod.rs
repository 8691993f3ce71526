//! Escalation attempts: records, payloads, the executor and its worker queue

pub mod executor;
pub mod payload;
pub mod record;
pub mod worker;

pub use executor::{
    force_resolve_pending, AttemptOutcome, EscalationExecutor, DEFAULT_PLUGIN_ID, RECOVERY_REASON,
    SHUTDOWN_REASON,
};
pub use payload::{ContextPayload, FullContext};
pub use record::{EscalationRecord, EscalationStatus, TransitionError, MANUAL_REVIEW_SUGGESTION};
pub use worker::{spawn_worker, AttemptReport, Enqueued, ShutdownReport, WorkerHandle, DEFAULT_QUEUE_CAPACITY};
