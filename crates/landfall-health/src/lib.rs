//! landfall-health: decides whether a deployed environment is actually up.
//!
//! - [`checker`]: the [`HttpProbe`] seam and its hyper-backed implementation
//! - [`validator`]: a validation pass over the configured endpoints plus the
//!   database indicator, recorded in the deployment state as it goes

pub mod checker;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod validator;

pub use checker::{HttpProbe, HyperProbe, ProbeFuture, ProbeResponse};
pub use error::{HealthError, HealthResult, ProbeError};
pub use validator::{EndpointOutcome, EndpointResult, HealthValidator, ValidationPlan, ValidationReport, endpoint_key};
