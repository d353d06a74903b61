//! The explicit context a deployment run carries through every phase.

use std::path::{Path, PathBuf};

use landfall_core::LandfallConfig;
use landfall_core::config::WorkloadConfig;
use landfall_health::HttpProbe;
use landfall_provider::{CloudProvider, Orchestrator, SecretStore};
use landfall_state::{DeploymentState, StateStore};
use tracing::{info, warn};

use crate::error::{DeployError, DeployResult};

/// External systems a deployment talks to.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub cloud: &'a dyn CloudProvider,
    pub orchestrator: &'a dyn Orchestrator,
    pub secrets: &'a dyn SecretStore,
    pub probe: &'a dyn HttpProbe,
}

/// One named deployment: its configuration, its state record, and the
/// backends it provisions through.
pub struct Deployment<'a> {
    pub name: String,
    pub config: &'a LandfallConfig,
    pub store: &'a StateStore,
    pub backends: Backends<'a>,
    /// Directory that relative manifest paths resolve against.
    pub manifest_root: PathBuf,
}

impl<'a> Deployment<'a> {
    pub fn new(name: impl Into<String>, config: &'a LandfallConfig, store: &'a StateStore, backends: Backends<'a>) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            backends,
            manifest_root: PathBuf::from("."),
        }
    }

    pub fn with_manifest_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.manifest_root = root.into();
        self
    }

    pub fn required_endpoint_count(&self) -> u32 {
        u32::try_from(self.config.validation.endpoints.len()).unwrap_or(u32::MAX)
    }

    pub fn namespace_of<'w>(&'w self, workload: &'w WorkloadConfig) -> &'w str {
        workload
            .namespace
            .as_deref()
            .unwrap_or(&self.config.deployment.namespace)
    }

    pub fn manifest_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.manifest_root.join(path)
        }
    }

    /// Read a manifest template from disk.
    pub async fn read_manifest(&self, path: &str) -> DeployResult<String> {
        let full = self.manifest_path(path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| DeployError::Configuration(format!("reading manifest {}: {e}", full.display())))
    }
}

/// Open the state record for `name`, creating it on first use.
///
/// With `reset` any existing record is replaced by a fresh one. An existing
/// record for another deployment, or one expecting a different number of
/// endpoints, is refused rather than silently reused.
pub fn open_state(store: &StateStore, name: &str, required_endpoint_count: u32, reset: bool) -> DeployResult<DeploymentState> {
    if reset {
        warn!(deployment = %name, location = %store.location(), "resetting deployment state");
        return Ok(store.reset(name, required_endpoint_count)?);
    }
    if !store.exists()? {
        info!(deployment = %name, location = %store.location(), "initializing deployment state");
        return Ok(store.initialize(name, required_endpoint_count)?);
    }

    let state = store.load()?;
    if state.deployment != name {
        return Err(DeployError::Configuration(format!(
            "state at {} belongs to deployment {:?}, not {name:?}",
            store.location(),
            state.deployment
        )));
    }
    if state.required_endpoint_count != required_endpoint_count {
        return Err(DeployError::Configuration(format!(
            "state expects {} endpoints but {required_endpoint_count} are configured; reset to start over",
            state.required_endpoint_count
        )));
    }
    info!(
        deployment = %name,
        status = %state.status,
        completed = state.completed_phases.len(),
        "resuming deployment"
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use landfall_state::DeploymentStatus;

    #[test]
    fn creates_then_reuses_the_record() {
        let store = StateStore::open_in_memory();
        let fresh = open_state(&store, "demo", 6, false).unwrap();
        assert_eq!(fresh.status, DeploymentStatus::Started);

        store.set("vpcCidr", "10.4.0.0/16").unwrap();
        let again = open_state(&store, "demo", 6, false).unwrap();
        assert_eq!(again.output("vpcCidr"), Some("10.4.0.0/16"));
    }

    #[test]
    fn other_deployment_is_refused() {
        let store = StateStore::open_in_memory();
        open_state(&store, "demo", 6, false).unwrap();
        let err = open_state(&store, "prod", 6, false).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }

    #[test]
    fn changed_endpoint_count_needs_reset() {
        let store = StateStore::open_in_memory();
        open_state(&store, "demo", 6, false).unwrap();
        assert!(open_state(&store, "demo", 4, false).is_err());

        let reset = open_state(&store, "demo", 4, true).unwrap();
        assert_eq!(reset.required_endpoint_count, 4);
    }
}
