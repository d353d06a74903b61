//! Provider and reconciler error types.

use landfall_core::Transient;
use thiserror::Error;

use crate::types::ResourceKind;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors from a provider adapter call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with status {status}: {stderr}")]
    Command {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("unexpected provider response: {0}")]
    Parse(String),

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{operation} is not supported for {kind}")]
    NotSupported { kind: ResourceKind, operation: String },

    #[error("provider error: {0}")]
    Api(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Command { .. } | ProviderError::Api(_) | ProviderError::NotFound { .. }
        )
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors from a create-or-update-then-wait cycle.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{kind} {name} did not stabilize after {attempts} attempts; recent events: [{}]", .events.join("; "))]
    StabilizationTimeout {
        kind: ResourceKind,
        name: String,
        attempts: u32,
        events: Vec<String>,
    },

    #[error("{operation} did not succeed within {attempts} attempts (last observed: {last})")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
