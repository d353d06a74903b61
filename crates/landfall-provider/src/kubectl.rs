//! `kubectl` adapter and the orchestrator-backed resource kinds.
//!
//! [`Kubectl`] implements [`Orchestrator`] over the CLI with `-o json`
//! output. [`ClusterResources`] lets the reconciler treat deployments inside
//! the cluster (application workloads, the load-balancer controller) like any
//! other resource: logical names are `namespace/name`, the namespace is fixed
//! at creation, the container image is the drift-checked field, and the
//! rendered manifest is what gets applied.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::api::{CloudProvider, Orchestrator, ProviderFuture};
use crate::command::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
use crate::error::{ProviderError, ProviderResult};
use crate::platform::{HostPlatform, Platform};
use crate::types::{Fields, ObservedResource, ResourceHandle, ResourceKind, ResourceSpec, ResourceStatus, RolloutStatus};

#[derive(Clone)]
pub struct Kubectl {
    runner: Arc<dyn CommandRunner>,
    platform: Arc<dyn Platform>,
}

impl Kubectl {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ProcessRunner), Arc::new(HostPlatform::detect()))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>, platform: Arc<dyn Platform>) -> Self {
        Self { runner, platform }
    }

    async fn run(&self, invocation: Invocation) -> ProviderResult<CommandOutput> {
        let mut output = self.runner.run(&invocation).await?;
        output.stdout = self.platform.normalize_output(&output.stdout);
        output.stderr = self.platform.normalize_output(&output.stderr);
        Ok(output)
    }

    fn kubectl(&self) -> Invocation {
        Invocation::new(self.platform.executable("kubectl"))
    }

    /// Whole object as JSON, `None` when the server says NotFound.
    async fn get_object(&self, kind: &str, namespace: &str, name: &str) -> ProviderResult<Option<Value>> {
        let invocation = self
            .kubectl()
            .args(["get", kind, name, "--namespace", namespace, "--output", "json"]);
        let output = self.run(invocation.clone()).await?;
        if !output.success() {
            if output.stderr.contains("(NotFound)") {
                return Ok(None);
            }
            return Err(command_error(&invocation, output));
        }
        serde_json::from_str(&output.stdout)
            .map(Some)
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

impl Default for Kubectl {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator for Kubectl {
    fn apply<'a>(&'a self, manifest: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let invocation = self.kubectl().args(["apply", "-f", "-"]).stdin(manifest);
            let output = self.run(invocation.clone()).await?;
            if !output.success() {
                return Err(command_error(&invocation, output));
            }
            for line in output.stdout.lines().filter(|l| !l.is_empty()) {
                debug!(result = %line, "applied");
            }
            Ok(())
        })
    }

    fn rollout_status<'a>(&'a self, namespace: &'a str, name: &'a str) -> ProviderFuture<'a, RolloutStatus> {
        Box::pin(async move {
            let object = self
                .get_object("deployment", namespace, name)
                .await?
                .ok_or_else(|| ProviderError::NotFound {
                    kind: "deployment".to_string(),
                    name: format!("{namespace}/{name}"),
                })?;
            Ok(rollout_from_object(&object))
        })
    }

    fn get_status<'a>(
        &'a self,
        kind: &'a str,
        namespace: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<Value>> {
        Box::pin(self.get_object(kind, namespace, name))
    }

    fn ping(&self) -> ProviderFuture<'_, bool> {
        Box::pin(async move {
            let output = self.run(self.kubectl().args(["get", "--raw", "/readyz"])).await?;
            Ok(output.success())
        })
    }
}

/// Rollout counters from a deployment object.
pub fn rollout_from_object(object: &Value) -> RolloutStatus {
    let count = |v: &Value| v.as_u64().map(|n| n as u32);
    let status = &object["status"];
    let messages = status["conditions"]
        .as_array()
        .map(|conditions| {
            conditions
                .iter()
                .filter_map(|c| {
                    let kind = c["type"].as_str()?;
                    let message = c["message"].as_str().unwrap_or_default();
                    Some(format!("{kind}: {message}"))
                })
                .collect()
        })
        .unwrap_or_default();

    RolloutStatus {
        desired: count(&object["spec"]["replicas"]).unwrap_or(1),
        updated: count(&status["updatedReplicas"]).unwrap_or(0),
        ready: count(&status["readyReplicas"]).unwrap_or(0),
        available: count(&status["availableReplicas"]).unwrap_or(0),
        messages,
    }
}

fn command_error(invocation: &Invocation, output: CommandOutput) -> ProviderError {
    ProviderError::Command {
        program: invocation.program.clone(),
        status: output.status,
        stderr: output.stderr.trim().to_string(),
    }
}

// ── in-cluster resources ───────────────────────────────────────────

/// Adapts an [`Orchestrator`] to the [`CloudProvider`] shape for the
/// workload and load-balancer-controller kinds.
pub struct ClusterResources<'a> {
    orchestrator: &'a dyn Orchestrator,
}

impl<'a> ClusterResources<'a> {
    pub fn new(orchestrator: &'a dyn Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Logical resource name for a deployment.
    pub fn resource_name(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    async fn observe(&self, kind: ResourceKind, name: &str) -> ProviderResult<Option<ObservedResource>> {
        check_kind(kind, "describe")?;
        let (namespace, deployment) = split_name(name)?;
        let object = self.orchestrator.get_status("deployment", namespace, deployment).await?;
        Ok(object.map(|object| {
            let mut observed = ObservedResource {
                id: name.to_string(),
                ..Default::default()
            };
            observed.fields.insert("namespace".to_string(), namespace.to_string());
            if let Some(image) = object["spec"]["template"]["spec"]["containers"][0]["image"].as_str() {
                observed.fields.insert("image".to_string(), image.to_string());
            }
            observed
        }))
    }

    async fn apply_document(&self, spec: &ResourceSpec) -> ProviderResult<ObservedResource> {
        check_kind(spec.kind, "create")?;
        split_name(&spec.name)?;
        let document = spec
            .document
            .as_deref()
            .ok_or_else(|| ProviderError::Configuration(format!("{} {} has no manifest", spec.kind, spec.name)))?;
        self.orchestrator.apply(document).await?;
        let mut fields = spec.immutable.clone();
        fields.extend(spec.mutable.clone());
        Ok(ObservedResource {
            id: spec.name.clone(),
            fields,
            attributes: Fields::new(),
        })
    }
}

impl CloudProvider for ClusterResources<'_> {
    fn describe<'a>(&'a self, kind: ResourceKind, name: &'a str) -> ProviderFuture<'a, Option<ObservedResource>> {
        Box::pin(self.observe(kind, name))
    }

    fn create<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, ObservedResource> {
        Box::pin(self.apply_document(spec))
    }

    /// Re-applies the whole manifest; the orchestrator merges the change.
    fn update<'a>(
        &'a self,
        _handle: &'a ResourceHandle,
        spec: &'a ResourceSpec,
        _changes: &'a Fields,
    ) -> ProviderFuture<'a, ObservedResource> {
        Box::pin(self.apply_document(spec))
    }

    fn status<'a>(&'a self, handle: &'a ResourceHandle) -> ProviderFuture<'a, ResourceStatus> {
        Box::pin(async move {
            check_kind(handle.kind, "status")?;
            let (namespace, name) = split_name(&handle.name)?;
            let rollout = self.orchestrator.rollout_status(namespace, name).await?;
            let state = format!(
                "{}/{} updated, {}/{} ready, {}/{} available",
                rollout.updated, rollout.desired, rollout.ready, rollout.desired, rollout.available, rollout.desired
            );
            let mut status = if rollout.complete() {
                ResourceStatus::ready(state)
            } else {
                ResourceStatus::pending(state)
            };
            status.events = rollout.messages;
            Ok(status)
        })
    }

    fn list_cidr_blocks(&self) -> ProviderFuture<'_, Vec<String>> {
        Box::pin(async move {
            Err(ProviderError::NotSupported {
                kind: ResourceKind::Workload,
                operation: "list_cidr_blocks".to_string(),
            })
        })
    }

    fn connect_cluster<'a>(&'a self, _name: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            if self.orchestrator.ping().await? {
                Ok(())
            } else {
                Err(ProviderError::Api("cluster API server not reachable".to_string()))
            }
        })
    }
}

fn check_kind(kind: ResourceKind, operation: &str) -> ProviderResult<()> {
    match kind {
        ResourceKind::Workload | ResourceKind::LoadBalancerController => Ok(()),
        kind => Err(ProviderError::NotSupported {
            kind,
            operation: operation.to_string(),
        }),
    }
}

fn split_name(name: &str) -> ProviderResult<(&str, &str)> {
    name.split_once('/')
        .filter(|(ns, n)| !ns.is_empty() && !n.is_empty())
        .ok_or_else(|| ProviderError::Configuration(format!("in-cluster resource name {name:?} is not namespace/name")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeOrchestrator, ScriptedRunner};
    use crate::reconciler::{Action, Reconciler};
    use landfall_core::RetryBudget;
    use serde_json::json;
    use std::time::Duration;

    fn kubectl(runner: &ScriptedRunner) -> Kubectl {
        Kubectl::with_runner(Arc::new(runner.clone()), Arc::new(HostPlatform::Unix))
    }

    #[tokio::test]
    async fn apply_pipes_manifest_on_stdin() {
        let runner = ScriptedRunner::new();
        runner.respond("apply", "deployment.apps/web configured\n");
        kubectl(&runner).apply("kind: Deployment\n").await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[0].display(), "kubectl apply -f -");
        assert_eq!(calls[0].stdin.as_deref(), Some("kind: Deployment\n"));
    }

    #[tokio::test]
    async fn missing_object_is_none() {
        let runner = ScriptedRunner::new();
        runner.fail(
            "get deployment",
            1,
            "Error from server (NotFound): deployments.apps \"web\" not found",
        );
        let status = kubectl(&runner).get_status("deployment", "default", "web").await.unwrap();
        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn rollout_reads_replica_counts() {
        let runner = ScriptedRunner::new();
        runner.respond(
            "get deployment",
            &json!({
                "spec": {"replicas": 2},
                "status": {
                    "updatedReplicas": 2,
                    "readyReplicas": 1,
                    "availableReplicas": 1,
                    "conditions": [{"type": "Progressing", "message": "ReplicaSet \"web-1\" is progressing."}]
                }
            })
            .to_string(),
        );
        let rollout = kubectl(&runner).rollout_status("default", "web").await.unwrap();
        assert_eq!(rollout.desired, 2);
        assert_eq!(rollout.ready, 1);
        assert!(!rollout.complete());
        assert_eq!(rollout.messages.len(), 1);
    }

    #[tokio::test]
    async fn ping_is_false_when_server_refuses() {
        let runner = ScriptedRunner::new();
        runner.fail("--raw", 1, "Unable to connect to the server");
        assert!(!kubectl(&runner).ping().await.unwrap());
    }

    #[test]
    fn names_must_be_namespaced() {
        assert_eq!(split_name("default/web").unwrap(), ("default", "web"));
        assert!(split_name("web").is_err());
        assert!(split_name("/web").is_err());
    }

    fn workload(image: &str) -> ResourceSpec {
        ResourceSpec::new(ResourceKind::Workload, "default/web")
            .immutable("namespace", "default")
            .mutable("image", image)
            .document(format!(
                "kind: Deployment\nmetadata:\n  name: web\n  namespace: default\nspec:\n  image: {image}\n"
            ))
    }

    #[tokio::test(start_paused = true)]
    async fn workload_reconcile_applies_once_and_waits_for_rollout() {
        let orchestrator = FakeOrchestrator::new();
        orchestrator.rollout_ready_after("default", "web", 2);
        let resources = ClusterResources::new(&orchestrator);
        let reconciler = Reconciler::new(&resources, RetryBudget::new(5, Duration::from_secs(10)));

        let first = reconciler.reconcile(&workload("repo/web:1")).await.unwrap();
        let second = reconciler.reconcile(&workload("repo/web:1")).await.unwrap();

        assert_eq!(first.action, Action::Created);
        assert_eq!(second.action, Action::Unchanged);
        assert_eq!(orchestrator.applied().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_image_reapplies_manifest() {
        let orchestrator = FakeOrchestrator::new();
        let resources = ClusterResources::new(&orchestrator);
        let reconciler = Reconciler::new(&resources, RetryBudget::new(5, Duration::from_secs(10)));

        reconciler.reconcile(&workload("repo/web:1")).await.unwrap();
        let second = reconciler.reconcile(&workload("repo/web:2")).await.unwrap();

        assert_eq!(second.action, Action::Updated(vec!["image".to_string()]));
        let applied = orchestrator.applied();
        assert_eq!(applied.len(), 2);
        assert!(applied[1].contains("repo/web:2"));
    }

    #[tokio::test(start_paused = true)]
    async fn workload_rollout_timeout_carries_conditions() {
        let orchestrator = FakeOrchestrator::new();
        orchestrator.rollout_never_ready("default", "web");
        let resources = ClusterResources::new(&orchestrator);
        let reconciler = Reconciler::new(&resources, RetryBudget::new(3, Duration::from_secs(10)));

        let err = reconciler.reconcile(&workload("repo/web:1")).await.unwrap_err();
        assert!(err.to_string().contains("did not stabilize after 3 attempts"));
    }

    #[tokio::test]
    async fn foreign_kinds_are_rejected() {
        let orchestrator = FakeOrchestrator::new();
        let resources = ClusterResources::new(&orchestrator);
        let err = resources.describe(ResourceKind::Database, "default/db").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotSupported { .. }));
    }
}
