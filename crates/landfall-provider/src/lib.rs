//! landfall-provider: how a deployment talks to the outside world.
//!
//! # Architecture
//!
//! ```text
//! Reconciler ──► CloudProvider ──► AwsCli ──────────┐
//!            └─► ClusterResources ──► Orchestrator ─┤── CommandRunner ──► aws / kubectl
//!                                     (Kubectl)     │   + Platform
//! SecretStore (AwsCli) ─────────────────────────────┘
//! ```
//!
//! The reconciler is the only component that decides whether to create,
//! update or leave a resource alone. Adapters translate one call into one
//! CLI invocation and one typed response.

pub mod api;
pub mod aws;
pub mod command;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod kubectl;
pub mod platform;
pub mod reconciler;
pub mod types;

pub use api::{CloudProvider, Orchestrator, ProviderFuture, SecretStore};
pub use aws::AwsCli;
pub use command::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
pub use error::{ProviderError, ProviderResult, ReconcileError, ReconcileResult};
pub use kubectl::{ClusterResources, Kubectl};
pub use platform::{HostPlatform, Platform};
pub use reconciler::{Action, Reconciled, Reconciler};
pub use types::{Fields, ObservedResource, ResourceHandle, ResourceKind, ResourceSpec, ResourceStatus, RolloutStatus};
