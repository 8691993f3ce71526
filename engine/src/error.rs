//! Crate-level error type

use thiserror::Error;

use crate::escalation::record::TransitionError;
use crate::store::StoreError;
use crate::suppression::ImportError;

/// Errors surfaced to callers of the engine
#[derive(Debug, Error)]
pub enum TriageError {
    /// The audit trail could not be written
    #[error("Audit store failure: {0}")]
    Store(#[from] StoreError),

    #[error("Suppression import rejected: {0}")]
    Import(#[from] ImportError),

    #[error("Invalid record transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("Escalation worker has stopped")]
    WorkerStopped,
}

/// Result type for engine operations
pub type TriageResult<T> = Result<T, TriageError>;
