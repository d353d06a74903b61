//! Idempotent create-or-update for any resource kind.
//!
//! One algorithm for every kind:
//!
//! 1. describe the resource by logical name (re-queried on every call,
//!    nothing is cached across runs)
//! 2. absent: create it from the full spec
//! 3. present: refuse if an immutable field differs, otherwise update only
//!    the mutable fields that drifted (no call when nothing drifted)
//! 4. wait for the provider's ready condition with a linear attempt budget
//! 5. on timeout, report the last few provider events

use std::time::Duration;

use landfall_core::{Observed, RetryBudget, RetryError, retry_until};
use tracing::{debug, info, warn};

use crate::api::CloudProvider;
use crate::error::{ReconcileError, ReconcileResult};
use crate::types::{Fields, ObservedResource, ResourceHandle, ResourceSpec, ResourceStatus};

/// Number of provider events kept on a stabilization timeout.
pub const MAX_REPORTED_EVENTS: usize = 5;

/// What a reconcile call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Created,
    /// Names of the mutable fields that were updated.
    Updated(Vec<String>),
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub handle: ResourceHandle,
    pub action: Action,
}

pub struct Reconciler<'a> {
    provider: &'a dyn CloudProvider,
    /// Budget for the ready wait.
    budget: RetryBudget,
    /// Budget for describe calls, which may fail transiently.
    lookup_budget: RetryBudget,
}

impl<'a> Reconciler<'a> {
    pub fn new(provider: &'a dyn CloudProvider, budget: RetryBudget) -> Self {
        Self {
            provider,
            budget,
            lookup_budget: RetryBudget::new(3, Duration::from_secs(2)),
        }
    }

    /// Same provider, different ready-wait budget.
    pub fn with_budget(&self, budget: RetryBudget) -> Self {
        Self {
            provider: self.provider,
            budget,
            lookup_budget: self.lookup_budget,
        }
    }

    pub fn with_lookup_budget(mut self, budget: RetryBudget) -> Self {
        self.lookup_budget = budget;
        self
    }

    /// Create or update, then wait until the provider reports ready.
    pub async fn reconcile(&self, spec: &ResourceSpec) -> ReconcileResult<Reconciled> {
        let mut reconciled = self.apply(spec).await?;
        let status = self.wait_stable(&reconciled.handle).await?;
        reconciled.handle.attributes.extend(status.attributes);
        Ok(reconciled)
    }

    /// Create or update without waiting.
    pub async fn apply(&self, spec: &ResourceSpec) -> ReconcileResult<Reconciled> {
        let operation = format!("describe {} {}", spec.kind, spec.name);
        let existing = retry_until(
            &self.lookup_budget,
            &operation,
            || self.provider.describe(spec.kind, &spec.name),
            |_| true,
        )
        .await
        .map_err(|e| match e {
            RetryError::Fatal(e) => ReconcileError::Provider(e),
            RetryError::Exhausted(e) => ReconcileError::RetriesExhausted {
                operation: e.operation,
                attempts: e.attempts,
                last: e.last.to_string(),
            },
        })?;

        match existing {
            None => {
                info!(kind = %spec.kind, name = %spec.name, "creating resource");
                let created = self.provider.create(spec).await?;
                Ok(Reconciled {
                    handle: handle_for(spec, created),
                    action: Action::Created,
                })
            }
            Some(observed) => {
                check_immutable(spec, &observed)?;
                let changes = drifted(spec, &observed);
                let handle = handle_for(spec, observed);
                if changes.is_empty() {
                    debug!(kind = %spec.kind, name = %spec.name, id = %handle.id, "resource up to date");
                    return Ok(Reconciled {
                        handle,
                        action: Action::Unchanged,
                    });
                }

                let fields: Vec<String> = changes.keys().cloned().collect();
                info!(kind = %spec.kind, name = %spec.name, id = %handle.id, ?fields, "updating resource");
                let updated = self.provider.update(&handle, spec, &changes).await?;
                let mut handle = handle;
                handle.attributes.extend(updated.attributes);
                Ok(Reconciled {
                    handle,
                    action: Action::Updated(fields),
                })
            }
        }
    }

    /// Poll the provider until the resource reports ready.
    pub async fn wait_stable(&self, handle: &ResourceHandle) -> ReconcileResult<ResourceStatus> {
        let operation = format!("wait for {} {}", handle.kind, handle.name);
        let result = retry_until(
            &self.budget,
            &operation,
            || self.provider.status(handle),
            |status| status.ready,
        )
        .await;

        match result {
            Ok(status) => {
                info!(kind = %handle.kind, name = %handle.name, state = %status.state, "resource stable");
                Ok(status)
            }
            Err(RetryError::Fatal(e)) => Err(e.into()),
            Err(RetryError::Exhausted(e)) => {
                let mut events = match e.last {
                    Observed::Value(status) => {
                        let mut events = status.events;
                        events.push(format!("state: {}", status.state));
                        events
                    }
                    Observed::Error(err) => vec![err],
                };
                let skip = events.len().saturating_sub(MAX_REPORTED_EVENTS);
                events.drain(..skip);
                warn!(kind = %handle.kind, name = %handle.name, attempts = e.attempts, ?events, "resource did not stabilize");
                Err(ReconcileError::StabilizationTimeout {
                    kind: handle.kind,
                    name: handle.name.clone(),
                    attempts: e.attempts,
                    events,
                })
            }
        }
    }
}

fn handle_for(spec: &ResourceSpec, observed: ObservedResource) -> ResourceHandle {
    ResourceHandle {
        kind: spec.kind,
        name: spec.name.clone(),
        id: observed.id,
        fingerprint: spec.fingerprint(),
        attributes: observed.attributes,
    }
}

fn check_immutable(spec: &ResourceSpec, observed: &ObservedResource) -> ReconcileResult<()> {
    for (key, desired) in &spec.immutable {
        if let Some(current) = observed.fields.get(key) {
            if current != desired {
                return Err(ReconcileError::Configuration(format!(
                    "{} {}: {key} is immutable (live {current:?}, desired {desired:?})",
                    spec.kind, spec.name
                )));
            }
        }
    }
    Ok(())
}

/// Mutable fields whose live value differs from the desired one.
fn drifted(spec: &ResourceSpec, observed: &ObservedResource) -> Fields {
    spec.mutable
        .iter()
        .filter(|(key, desired)| observed.fields.get(*key) != Some(*desired))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCloud;
    use crate::types::ResourceKind;

    fn budget() -> RetryBudget {
        RetryBudget::new(5, Duration::from_secs(10))
    }

    fn db_spec(class: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Database, "demo-db")
            .immutable("engine", "postgres")
            .mutable("instance_class", class)
    }

    #[tokio::test(start_paused = true)]
    async fn creates_once_then_leaves_alone() {
        let cloud = FakeCloud::new();
        let reconciler = Reconciler::new(&cloud, budget());

        let first = reconciler.reconcile(&db_spec("db.t3.micro")).await.unwrap();
        let second = reconciler.reconcile(&db_spec("db.t3.micro")).await.unwrap();

        assert_eq!(first.action, Action::Created);
        assert_eq!(second.action, Action::Unchanged);
        assert_eq!(first.handle.id, second.handle.id);
        assert_eq!(cloud.creates(ResourceKind::Database), 1);
        assert_eq!(cloud.updates(ResourceKind::Database), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_kind_is_idempotent() {
        let kinds = [
            ResourceKind::Certificate,
            ResourceKind::Network,
            ResourceKind::Subnet,
            ResourceKind::DbSubnetGroup,
            ResourceKind::Database,
            ResourceKind::Registry,
            ResourceKind::Cluster,
            ResourceKind::LoadBalancerController,
            ResourceKind::Workload,
        ];
        let cloud = FakeCloud::new();
        let reconciler = Reconciler::new(&cloud, budget());

        for kind in kinds {
            let spec = ResourceSpec::new(kind, format!("demo-{kind}")).mutable("tag", "v1");
            reconciler.reconcile(&spec).await.unwrap();
            reconciler.reconcile(&spec).await.unwrap();
            assert_eq!(cloud.creates(kind), 1, "{kind}");
            assert!(cloud.updates(kind) <= 1, "{kind}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drifted_mutable_field_is_updated() {
        let cloud = FakeCloud::new();
        let reconciler = Reconciler::new(&cloud, budget());

        reconciler.reconcile(&db_spec("db.t3.micro")).await.unwrap();
        let result = reconciler.reconcile(&db_spec("db.t3.small")).await.unwrap();

        assert_eq!(result.action, Action::Updated(vec!["instance_class".to_string()]));
        assert_eq!(cloud.updates(ResourceKind::Database), 1);
        assert_eq!(cloud.creates(ResourceKind::Database), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn immutable_change_is_a_configuration_error() {
        let cloud = FakeCloud::new();
        let reconciler = Reconciler::new(&cloud, budget());
        reconciler.reconcile(&db_spec("db.t3.micro")).await.unwrap();

        let changed = ResourceSpec::new(ResourceKind::Database, "demo-db")
            .immutable("engine", "mysql")
            .mutable("instance_class", "db.t3.micro");
        let err = reconciler.reconcile(&changed).await.unwrap_err();

        assert!(matches!(err, ReconcileError::Configuration(_)));
        assert_eq!(cloud.updates(ResourceKind::Database), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_ready() {
        let cloud = FakeCloud::new();
        cloud.ready_after(ResourceKind::Cluster, 3);
        let reconciler = Reconciler::new(&cloud, budget());

        let spec = ResourceSpec::new(ResourceKind::Cluster, "demo");
        reconciler.reconcile(&spec).await.unwrap();
        assert_eq!(cloud.status_polls(ResourceKind::Cluster), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_recent_events() {
        let cloud = FakeCloud::new();
        cloud.never_ready(ResourceKind::Database);
        let reconciler = Reconciler::new(&cloud, budget());

        let err = reconciler.reconcile(&db_spec("db.t3.micro")).await.unwrap_err();
        match err {
            ReconcileError::StabilizationTimeout {
                kind,
                attempts,
                events,
                ..
            } => {
                assert_eq!(kind, ResourceKind::Database);
                assert_eq!(attempts, 5);
                assert!(!events.is_empty());
                assert!(events.len() <= MAX_REPORTED_EVENTS);
                assert_eq!(events.last().map(String::as_str), Some("state: creating"));
            }
            other => panic!("expected stabilization timeout, got {other}"),
        }
        assert_eq!(cloud.status_polls(ResourceKind::Database), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn apply_does_not_wait() {
        let cloud = FakeCloud::new();
        cloud.never_ready(ResourceKind::Certificate);
        let reconciler = Reconciler::new(&cloud, budget());

        let spec = ResourceSpec::new(ResourceKind::Certificate, "app.example.com");
        let applied = reconciler.apply(&spec).await.unwrap();
        assert_eq!(applied.action, Action::Created);
        assert_eq!(cloud.status_polls(ResourceKind::Certificate), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_attributes_land_on_handle() {
        let cloud = FakeCloud::new();
        cloud.ready_attribute(ResourceKind::Database, "endpoint", "demo-db.example.internal");
        let reconciler = Reconciler::new(&cloud, budget());

        let result = reconciler.reconcile(&db_spec("db.t3.micro")).await.unwrap();
        assert_eq!(
            result.handle.attribute("endpoint"),
            Some("demo-db.example.internal")
        );
    }
}
