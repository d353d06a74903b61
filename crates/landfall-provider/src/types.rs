//! Resource descriptions exchanged with providers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Named configuration values. Ordered so fingerprints are stable.
pub type Fields = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Certificate,
    Network,
    Subnet,
    DbSubnetGroup,
    Database,
    Registry,
    Cluster,
    LoadBalancerController,
    Workload,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Certificate => "certificate",
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::DbSubnetGroup => "db-subnet-group",
            ResourceKind::Database => "database",
            ResourceKind::Registry => "registry",
            ResourceKind::Cluster => "cluster",
            ResourceKind::LoadBalancerController => "load-balancer-controller",
            ResourceKind::Workload => "workload",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired state of one resource.
///
/// `immutable` fields can only be chosen at creation; a live resource whose
/// value differs is a configuration error. `mutable` fields are brought in
/// line with an update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(default)]
    pub immutable: Fields,
    #[serde(default)]
    pub mutable: Fields,
    /// Full document handed to providers that apply whole manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            immutable: Fields::new(),
            mutable: Fields::new(),
            document: None,
        }
    }

    pub fn immutable(mut self, key: &str, value: impl Into<String>) -> Self {
        self.immutable.insert(key.to_string(), value.into());
        self
    }

    pub fn mutable(mut self, key: &str, value: impl Into<String>) -> Self {
        self.mutable.insert(key.to_string(), value.into());
        self
    }

    /// Mutable field holding an unordered set of ids. Stored sorted and
    /// comma-joined, the form adapters report live sets in.
    pub fn mutable_set<I, S>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<String> = values.into_iter().map(Into::into).collect();
        values.sort();
        values.dedup();
        self.mutable(key, values.join(","))
    }

    pub fn document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// SHA-256 over the canonical JSON form.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// Immutable value or an empty string, for adapters building commands.
    pub fn fixed(&self, key: &str) -> &str {
        self.immutable.get(key).map(String::as_str).unwrap_or_default()
    }

    /// Any field, mutable first.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.mutable
            .get(key)
            .or_else(|| self.immutable.get(key))
            .map(String::as_str)
    }
}

/// A live resource: provider id, the spec it was reconciled against, and
/// whatever the provider reported about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub name: String,
    pub id: String,
    pub fingerprint: String,
    /// Provider-reported outputs (endpoint, URI, ARN, ...).
    #[serde(default)]
    pub attributes: Fields,
}

impl ResourceHandle {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// What a provider reports about an existing resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedResource {
    pub id: String,
    /// Current configuration, keyed like [`ResourceSpec`] fields.
    pub fields: Fields,
    pub attributes: Fields,
}

/// Readiness as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceStatus {
    pub ready: bool,
    /// Provider's own state word ("available", "ACTIVE", "ISSUED", ...).
    pub state: String,
    /// Most recent provider events, oldest first.
    pub events: Vec<String>,
    /// Outputs that only exist once the resource is ready.
    pub attributes: Fields,
}

impl ResourceStatus {
    pub fn ready(state: impl Into<String>) -> Self {
        Self {
            ready: true,
            state: state.into(),
            ..Default::default()
        }
    }

    pub fn pending(state: impl Into<String>) -> Self {
        Self {
            ready: false,
            state: state.into(),
            ..Default::default()
        }
    }
}

/// Deployment rollout progress from the container orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutStatus {
    pub desired: u32,
    pub updated: u32,
    pub ready: u32,
    pub available: u32,
    pub messages: Vec<String>,
}

impl RolloutStatus {
    pub fn complete(&self) -> bool {
        self.updated == self.desired && self.ready == self.desired && self.available == self.desired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = ResourceSpec::new(ResourceKind::Database, "demo-db")
            .immutable("engine", "postgres")
            .mutable("instance_class", "db.t3.micro");
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let c = a.clone().mutable("instance_class", "db.t3.small");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn field_lookup_prefers_mutable() {
        let spec = ResourceSpec::new(ResourceKind::Cluster, "demo")
            .immutable("version", "1.28")
            .mutable("version", "1.29")
            .immutable("role_arn", "arn:role");
        assert_eq!(spec.field("version"), Some("1.29"));
        assert_eq!(spec.fixed("role_arn"), "arn:role");
        assert_eq!(spec.fixed("missing"), "");
    }

    #[test]
    fn rollout_complete_needs_all_counts() {
        let mut status = RolloutStatus {
            desired: 2,
            updated: 2,
            ready: 1,
            available: 1,
            messages: vec![],
        };
        assert!(!status.complete());
        status.ready = 2;
        status.available = 2;
        assert!(status.complete());
    }
}
