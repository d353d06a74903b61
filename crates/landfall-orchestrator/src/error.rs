//! Deployment error types.

use std::fmt::Debug;

use landfall_core::{CidrError, RetryError};
use landfall_health::HealthError;
use landfall_provider::{ProviderError, ReconcileError, ResourceKind};
use landfall_state::{Phase, StateError};
use thiserror::Error;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("address space exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{kind} {name} did not stabilize after {attempts} attempts; recent events: [{}]", .events.join("; "))]
    StabilizationTimeout {
        kind: ResourceKind,
        name: String,
        attempts: u32,
        events: Vec<String>,
    },

    #[error("{0}")]
    RetriesExhausted(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("health check error: {0}")]
    Health(#[from] HealthError),

    #[error("phase {phase} failed: {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<DeployError>,
    },
}

impl DeployError {
    pub fn in_phase(self, phase: Phase) -> Self {
        DeployError::Phase {
            phase,
            source: Box::new(self),
        }
    }

    /// The failing phase, if the error came out of one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            DeployError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The error underneath any phase wrapper.
    pub fn root(&self) -> &DeployError {
        match self {
            DeployError::Phase { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<ReconcileError> for DeployError {
    fn from(e: ReconcileError) -> Self {
        match e {
            ReconcileError::StabilizationTimeout {
                kind,
                name,
                attempts,
                events,
            } => DeployError::StabilizationTimeout {
                kind,
                name,
                attempts,
                events,
            },
            e @ ReconcileError::RetriesExhausted { .. } => DeployError::RetriesExhausted(e.to_string()),
            ReconcileError::Configuration(msg) => DeployError::Configuration(msg),
            ReconcileError::Provider(e) => DeployError::Provider(e),
        }
    }
}

impl From<CidrError> for DeployError {
    fn from(e: CidrError) -> Self {
        match e {
            CidrError::ResourceExhausted => DeployError::ResourceExhausted(e.to_string()),
            other => DeployError::Configuration(other.to_string()),
        }
    }
}

impl<T: Debug> From<RetryError<T, ProviderError>> for DeployError {
    fn from(e: RetryError<T, ProviderError>) -> Self {
        match e {
            RetryError::Fatal(e) => DeployError::Provider(e),
            RetryError::Exhausted(e) => DeployError::RetriesExhausted(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_sees_through_phase_wrappers() {
        let err = DeployError::ValidationFailed("4/6 endpoints".to_string())
            .in_phase(Phase::Validated);
        assert_eq!(err.phase(), Some(Phase::Validated));
        assert!(matches!(err.root(), DeployError::ValidationFailed(_)));
        assert!(err.to_string().starts_with("phase VALIDATED failed"));
    }

    #[test]
    fn stabilization_timeout_keeps_events() {
        let err: DeployError = ReconcileError::StabilizationTimeout {
            kind: ResourceKind::Cluster,
            name: "demo".to_string(),
            attempts: 3,
            events: vec!["state: CREATING".to_string()],
        }
        .into();
        assert!(err.to_string().contains("state: CREATING"));
    }

    #[test]
    fn exhausted_lookup_stays_retries_exhausted() {
        let err: DeployError = ReconcileError::RetriesExhausted {
            operation: "describe database demo-db".to_string(),
            attempts: 3,
            last: "error: throttled".to_string(),
        }
        .into();
        assert!(matches!(err, DeployError::RetriesExhausted(_)));
        assert!(err.to_string().contains("describe database demo-db did not succeed within 3 attempts"));
    }

    #[test]
    fn exhausted_cidr_space_maps_to_resource_exhausted() {
        let err: DeployError = CidrError::ResourceExhausted.into();
        assert!(matches!(err, DeployError::ResourceExhausted(_)));
        let err: DeployError = CidrError::UnsupportedPrefix(16).into();
        assert!(matches!(err, DeployError::Configuration(_)));
    }
}
