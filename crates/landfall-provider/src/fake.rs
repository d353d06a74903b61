//! In-memory provider doubles.
//!
//! Each double keeps its state behind an `Arc<Mutex<..>>`, so a clone handed
//! to the code under test and the clone kept by the test observe the same
//! calls. Compiled for this crate's tests and for dependents that enable the
//! `testing` feature.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Value, json};

use crate::api::{CloudProvider, Orchestrator, ProviderFuture, SecretStore};
use crate::command::{CommandFuture, CommandOutput, CommandRunner, Invocation};
use crate::error::ProviderError;
use crate::kubectl::rollout_from_object;
use crate::types::{Fields, ObservedResource, ResourceHandle, ResourceKind, ResourceSpec, ResourceStatus, RolloutStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── FakeCloud ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredResource {
    id: String,
    fields: Fields,
    attributes: Fields,
}

#[derive(Debug, Default)]
struct CloudState {
    resources: BTreeMap<(ResourceKind, String), StoredResource>,
    next_id: u32,
    describes: BTreeMap<ResourceKind, u32>,
    creates: BTreeMap<ResourceKind, u32>,
    updates: BTreeMap<ResourceKind, u32>,
    polls: BTreeMap<(ResourceKind, String), u32>,
    ready_after: BTreeMap<ResourceKind, u32>,
    never_ready: BTreeSet<ResourceKind>,
    ready_attributes: BTreeMap<ResourceKind, Fields>,
    failing_creates: BTreeSet<ResourceKind>,
    cidr_blocks: Vec<String>,
    cidr_listings: u32,
    connected: Vec<String>,
}

/// Cloud double: resources appear on create and become ready after a
/// configurable number of status polls (one by default).
#[derive(Debug, Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks reported by `list_cidr_blocks`.
    pub fn with_cidr_blocks<I, S>(self, blocks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state).cidr_blocks = blocks.into_iter().map(Into::into).collect();
        self
    }

    /// Resources of `kind` report ready on the `polls`-th status call.
    pub fn ready_after(&self, kind: ResourceKind, polls: u32) {
        lock(&self.state).ready_after.insert(kind, polls);
    }

    pub fn never_ready(&self, kind: ResourceKind) {
        lock(&self.state).never_ready.insert(kind);
    }

    /// Attribute reported once a resource of `kind` is ready.
    pub fn ready_attribute(&self, kind: ResourceKind, key: &str, value: &str) {
        lock(&self.state)
            .ready_attributes
            .entry(kind)
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Creates of `kind` fail with a non-transient error.
    pub fn fail_creates(&self, kind: ResourceKind) {
        lock(&self.state).failing_creates.insert(kind);
    }

    /// Pre-existing resource, as if created by an earlier run.
    pub fn seed(&self, kind: ResourceKind, name: &str, fields: Fields) {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = format!("{kind}-{:04}", state.next_id);
        let attributes = default_attributes(kind, name, &id);
        state
            .resources
            .insert((kind, name.to_string()), StoredResource { id, fields, attributes });
    }

    pub fn exists(&self, kind: ResourceKind, name: &str) -> bool {
        lock(&self.state).resources.contains_key(&(kind, name.to_string()))
    }

    /// Names of every resource of `kind`.
    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        lock(&self.state)
            .resources
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn fields(&self, kind: ResourceKind, name: &str) -> Option<Fields> {
        lock(&self.state)
            .resources
            .get(&(kind, name.to_string()))
            .map(|r| r.fields.clone())
    }

    pub fn describes(&self, kind: ResourceKind) -> u32 {
        lock(&self.state).describes.get(&kind).copied().unwrap_or(0)
    }

    pub fn creates(&self, kind: ResourceKind) -> u32 {
        lock(&self.state).creates.get(&kind).copied().unwrap_or(0)
    }

    pub fn updates(&self, kind: ResourceKind) -> u32 {
        lock(&self.state).updates.get(&kind).copied().unwrap_or(0)
    }

    pub fn status_polls(&self, kind: ResourceKind) -> u32 {
        lock(&self.state)
            .polls
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn cidr_listings(&self) -> u32 {
        lock(&self.state).cidr_listings
    }

    pub fn connected_clusters(&self) -> Vec<String> {
        lock(&self.state).connected.clone()
    }

    /// Total calls that change cloud state.
    pub fn mutations(&self) -> u32 {
        let state = lock(&self.state);
        state.creates.values().sum::<u32>() + state.updates.values().sum::<u32>()
    }
}

fn default_attributes(kind: ResourceKind, name: &str, id: &str) -> Fields {
    let pairs: Vec<(&str, String)> = match kind {
        ResourceKind::Certificate => vec![("arn", format!("arn:aws:acm:fake:certificate/{id}"))],
        ResourceKind::Network => vec![("vpc_id", id.to_string())],
        ResourceKind::Subnet => vec![("subnet_id", id.to_string())],
        ResourceKind::Registry => vec![("uri", format!("123456789012.dkr.ecr.fake.amazonaws.com/{name}"))],
        ResourceKind::Database => vec![
            ("endpoint", format!("{name}.fake.rds.amazonaws.com")),
            ("port", "5432".to_string()),
            ("db_name", "postgres".to_string()),
            ("secret_arn", format!("arn:aws:secretsmanager:fake:secret:{name}")),
        ],
        ResourceKind::Cluster => vec![("endpoint", format!("https://{name}.fake.eks.amazonaws.com"))],
        _ => Vec::new(),
    };
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

impl CloudProvider for FakeCloud {
    fn describe<'a>(&'a self, kind: ResourceKind, name: &'a str) -> ProviderFuture<'a, Option<ObservedResource>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            *state.describes.entry(kind).or_default() += 1;
            Ok(state.resources.get(&(kind, name.to_string())).map(|r| ObservedResource {
                id: r.id.clone(),
                fields: r.fields.clone(),
                attributes: r.attributes.clone(),
            }))
        })
    }

    fn create<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, ObservedResource> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.failing_creates.contains(&spec.kind) {
                return Err(ProviderError::Configuration(format!("create {} {} refused", spec.kind, spec.name)));
            }
            *state.creates.entry(spec.kind).or_default() += 1;
            state.next_id += 1;
            let id = format!("{}-{:04}", spec.kind, state.next_id);
            let mut fields = spec.immutable.clone();
            fields.extend(spec.mutable.clone());
            let resource = StoredResource {
                attributes: default_attributes(spec.kind, &spec.name, &id),
                id,
                fields,
            };
            state
                .resources
                .insert((spec.kind, spec.name.clone()), resource.clone());
            Ok(ObservedResource {
                id: resource.id,
                fields: resource.fields,
                attributes: resource.attributes,
            })
        })
    }

    fn update<'a>(
        &'a self,
        handle: &'a ResourceHandle,
        _spec: &'a ResourceSpec,
        changes: &'a Fields,
    ) -> ProviderFuture<'a, ObservedResource> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            *state.updates.entry(handle.kind).or_default() += 1;
            let resource = state
                .resources
                .get_mut(&(handle.kind, handle.name.clone()))
                .ok_or_else(|| ProviderError::NotFound {
                    kind: handle.kind.to_string(),
                    name: handle.name.clone(),
                })?;
            resource.fields.extend(changes.clone());
            Ok(ObservedResource {
                id: resource.id.clone(),
                fields: resource.fields.clone(),
                attributes: resource.attributes.clone(),
            })
        })
    }

    fn status<'a>(&'a self, handle: &'a ResourceHandle) -> ProviderFuture<'a, ResourceStatus> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let key = (handle.kind, handle.name.clone());
            let attributes = state
                .resources
                .get(&key)
                .map(|r| r.attributes.clone())
                .ok_or_else(|| ProviderError::NotFound {
                    kind: handle.kind.to_string(),
                    name: handle.name.clone(),
                })?;
            let polls = {
                let polls = state.polls.entry(key).or_default();
                *polls += 1;
                *polls
            };
            let needed = state.ready_after.get(&handle.kind).copied().unwrap_or(1);
            if state.never_ready.contains(&handle.kind) || polls < needed {
                let mut status = ResourceStatus::pending("creating");
                status.events = vec![format!("{} {} is being created", handle.kind, handle.name)];
                return Ok(status);
            }
            let mut status = ResourceStatus::ready("available");
            status.attributes = attributes;
            if let Some(extra) = state.ready_attributes.get(&handle.kind) {
                status.attributes.extend(extra.clone());
            }
            Ok(status)
        })
    }

    fn list_cidr_blocks(&self) -> ProviderFuture<'_, Vec<String>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.cidr_listings += 1;
            let mut blocks = state.cidr_blocks.clone();
            blocks.extend(
                state
                    .resources
                    .iter()
                    .filter(|((kind, _), _)| *kind == ResourceKind::Network)
                    .filter_map(|(_, r)| r.fields.get("cidr").cloned()),
            );
            Ok(blocks)
        })
    }

    fn connect_cluster<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            lock(&self.state).connected.push(name.to_string());
            Ok(())
        })
    }
}

// ── FakeOrchestrator ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct OrchestratorState {
    objects: BTreeMap<(String, String, String), Value>,
    applied: Vec<String>,
    rollout_polls: BTreeMap<(String, String), u32>,
    ready_after: BTreeMap<(String, String), u32>,
    never_ready: BTreeSet<(String, String)>,
    pings: u32,
    reachable_after: u32,
}

/// Orchestrator double. Applied manifests are read line by line for
/// `kind:`, `name:`, `namespace:` and `image:`; that is enough for the
/// manifests tests render.
#[derive(Debug, Clone, Default)]
pub struct FakeOrchestrator {
    state: Arc<Mutex<OrchestratorState>>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rollout_ready_after(&self, namespace: &str, name: &str, polls: u32) {
        lock(&self.state)
            .ready_after
            .insert((namespace.to_string(), name.to_string()), polls);
    }

    pub fn rollout_never_ready(&self, namespace: &str, name: &str) {
        lock(&self.state)
            .never_ready
            .insert((namespace.to_string(), name.to_string()));
    }

    /// `ping` answers false until the `calls`-th call.
    pub fn reachable_after(&self, calls: u32) {
        lock(&self.state).reachable_after = calls;
    }

    pub fn applied(&self) -> Vec<String> {
        lock(&self.state).applied.clone()
    }

    pub fn pings(&self) -> u32 {
        lock(&self.state).pings
    }

    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        lock(&self.state)
            .objects
            .get(&(kind.to_lowercase(), namespace.to_string(), name.to_string()))
            .cloned()
    }
}

/// First `key: value` line at any indentation.
fn manifest_value<'m>(manifest: &'m str, key: &str) -> Option<&'m str> {
    let prefix = format!("{key}:");
    manifest
        .lines()
        .map(|l| l.trim_start().trim_start_matches("- "))
        .find_map(|l| l.strip_prefix(prefix.as_str()))
        .map(|v| v.trim().trim_matches('"'))
        .filter(|v| !v.is_empty())
}

impl Orchestrator for FakeOrchestrator {
    fn apply<'a>(&'a self, manifest: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let kind = manifest_value(manifest, "kind")
                .ok_or_else(|| ProviderError::Parse("manifest has no kind".to_string()))?
                .to_lowercase();
            let name = manifest_value(manifest, "name")
                .ok_or_else(|| ProviderError::Parse("manifest has no name".to_string()))?
                .to_string();
            let namespace = manifest_value(manifest, "namespace").unwrap_or("default").to_string();
            let image = manifest_value(manifest, "image").unwrap_or_default();

            let object = json!({
                "kind": kind,
                "metadata": {"name": name, "namespace": namespace},
                "spec": {
                    "replicas": 1,
                    "template": {"spec": {"containers": [{"image": image}]}}
                },
                "status": {}
            });
            let mut state = lock(&self.state);
            state.applied.push(manifest.to_string());
            state.rollout_polls.remove(&(namespace.clone(), name.clone()));
            state.objects.insert((kind, namespace, name), object);
            Ok(())
        })
    }

    fn rollout_status<'a>(&'a self, namespace: &'a str, name: &'a str) -> ProviderFuture<'a, RolloutStatus> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            let key = (namespace.to_string(), name.to_string());
            let object_key = ("deployment".to_string(), key.0.clone(), key.1.clone());
            if !state.objects.contains_key(&object_key) {
                return Err(ProviderError::NotFound {
                    kind: "deployment".to_string(),
                    name: format!("{namespace}/{name}"),
                });
            }
            let polls = {
                let polls = state.rollout_polls.entry(key.clone()).or_default();
                *polls += 1;
                *polls
            };
            let needed = state.ready_after.get(&key).copied().unwrap_or(1);
            let ready = !state.never_ready.contains(&key) && polls >= needed;

            let status = if ready {
                json!({"updatedReplicas": 1, "readyReplicas": 1, "availableReplicas": 1,
                       "conditions": [{"type": "Available", "message": "Deployment has minimum availability."}]})
            } else {
                json!({"updatedReplicas": 1, "readyReplicas": 0, "availableReplicas": 0,
                       "conditions": [{"type": "Progressing", "message": format!("ReplicaSet \"{name}\" is progressing.")}]})
            };
            let object = state
                .objects
                .get_mut(&object_key)
                .ok_or_else(|| ProviderError::Api("deployment vanished".to_string()))?;
            object["status"] = status;
            Ok(rollout_from_object(object))
        })
    }

    fn get_status<'a>(
        &'a self,
        kind: &'a str,
        namespace: &'a str,
        name: &'a str,
    ) -> ProviderFuture<'a, Option<Value>> {
        Box::pin(async move { Ok(self.object(kind, namespace, name)) })
    }

    fn ping(&self) -> ProviderFuture<'_, bool> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.pings += 1;
            Ok(state.pings >= state.reachable_after)
        })
    }
}

// ── FakeSecrets ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FakeSecrets {
    secrets: Arc<Mutex<BTreeMap<String, String>>>,
}

impl FakeSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, value: &str) {
        lock(&self.secrets).insert(id.to_string(), value.to_string());
    }
}

impl SecretStore for FakeSecrets {
    fn get_secret<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            lock(&self.secrets)
                .get(id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound {
                    kind: "secret".to_string(),
                    name: id.to_string(),
                })
        })
    }
}

// ── ScriptedRunner ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Script {
    responses: Vec<(String, VecDeque<CommandOutput>)>,
    calls: Vec<Invocation>,
}

/// Command runner answering from a script. A response is chosen by the
/// first pattern contained in the command line; repeated patterns form a
/// sequence whose last entry repeats.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.push(
            pattern,
            CommandOutput {
                status: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    pub fn fail(&self, pattern: &str, status: i32, stderr: &str) {
        self.push(
            pattern,
            CommandOutput {
                status,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn calls(&self) -> Vec<Invocation> {
        lock(&self.script).calls.clone()
    }

    fn push(&self, pattern: &str, output: CommandOutput) {
        let mut script = lock(&self.script);
        match script.responses.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(output),
            None => script
                .responses
                .push((pattern.to_string(), VecDeque::from([output]))),
        }
    }

    fn answer(&self, invocation: &Invocation) -> CommandOutput {
        let line = invocation.display();
        let mut script = lock(&self.script);
        script.calls.push(invocation.clone());
        let queue = script
            .responses
            .iter_mut()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, queue)| queue);
        match queue {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: format!("no scripted response for `{line}`"),
            },
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> CommandFuture<'a> {
        Box::pin(async move { Ok(self.answer(invocation)) })
    }
}
