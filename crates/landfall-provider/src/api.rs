//! Capability traits for the external systems a deployment drives.
//!
//! The orchestrator only ever sees these traits. Concrete adapters
//! ([`crate::aws::AwsCli`], [`crate::kubectl::Kubectl`]) and the in-memory
//! doubles used in tests implement them. Methods return boxed futures so the
//! traits stay object-safe and adapters can be injected as `&dyn`.

use std::future::Future;
use std::pin::Pin;

use crate::error::ProviderResult;
use crate::types::{Fields, ObservedResource, ResourceHandle, ResourceKind, ResourceSpec, ResourceStatus, RolloutStatus};

/// Boxed future alias for provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = ProviderResult<T>> + Send + 'a>>;

/// Describe/create/update/status over cloud resources.
pub trait CloudProvider: Send + Sync {
    /// Look up a resource by logical name. `Ok(None)` when it does not exist.
    fn describe<'a>(&'a self, kind: ResourceKind, name: &'a str) -> ProviderFuture<'a, Option<ObservedResource>>;

    /// Create a resource with the full desired spec.
    fn create<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, ObservedResource>;

    /// Apply changed mutable fields to an existing resource. `spec` is the
    /// full desired state the changes were computed from.
    fn update<'a>(
        &'a self,
        handle: &'a ResourceHandle,
        spec: &'a ResourceSpec,
        changes: &'a Fields,
    ) -> ProviderFuture<'a, ObservedResource>;

    /// Current readiness of a resource.
    fn status<'a>(&'a self, handle: &'a ResourceHandle) -> ProviderFuture<'a, ResourceStatus>;

    /// Every network block in use in the target account and region.
    fn list_cidr_blocks(&self) -> ProviderFuture<'_, Vec<String>>;

    /// Make the named cluster reachable by the orchestrator client.
    fn connect_cluster<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, ()>;
}

/// Container orchestrator operations.
pub trait Orchestrator: Send + Sync {
    /// Apply a manifest document.
    fn apply<'a>(&'a self, manifest: &'a str) -> ProviderFuture<'a, ()>;

    /// Rollout progress of a deployment.
    fn rollout_status<'a>(&'a self, namespace: &'a str, name: &'a str) -> ProviderFuture<'a, RolloutStatus>;

    /// Raw object status, `None` if absent.
    fn get_status<'a>(
        &'a self,
        kind: &'a str,
        namespace: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<serde_json::Value>>;

    /// Whether the API server accepts our credentials yet.
    fn ping(&self) -> ProviderFuture<'_, bool>;
}

/// Secret lookup.
pub trait SecretStore: Send + Sync {
    fn get_secret<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, String>;
}
