//! Health validation error types.

use std::time::Duration;

use landfall_core::Transient;
use landfall_state::StateError;
use thiserror::Error;

pub type HealthResult<T> = Result<T, HealthError>;

/// A single probe could not produce a response.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("invalid probe target: {0}")]
    InvalidTarget(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("{path} timed out after {after:?}")]
    Timeout { path: String, after: Duration },
}

impl Transient for ProbeError {
    fn is_transient(&self) -> bool {
        !matches!(self, ProbeError::InvalidTarget(_))
    }
}

#[derive(Debug, Error)]
pub enum HealthError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    State(#[from] StateError),
}
