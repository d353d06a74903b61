use std::path::Path;
use std::process::ExitCode;

use landfall_health::{HealthError, HyperProbe};
use landfall_orchestrator::{Backends, DeployResult, Deployment, Sequencer, open_state};
use landfall_provider::{AwsCli, Kubectl};
use landfall_state::{DeploymentState, Phase, StateStore};
use tracing::{error, info};

use super::{load_config, state_path};

pub async fn deploy(
    config_path: &Path,
    name: &str,
    target: &str,
    reset: bool,
    until: Option<Phase>,
) -> anyhow::Result<ExitCode> {
    let (config, base) = load_config(config_path)?;
    let path = state_path(&config, &base, name);
    let store = StateStore::open_file(&path);

    // Checked before the state record is touched.
    let probe = match HyperProbe::new(target, config.validation.timeout()) {
        Ok(probe) => probe,
        Err(e) => return Ok(exit_code(Err(HealthError::from(e).into()), &store, &path, until)),
    };
    let aws = AwsCli::new(&config.deployment.region);
    let kubectl = Kubectl::new();
    let backends = Backends {
        cloud: &aws,
        orchestrator: &kubectl,
        secrets: &aws,
        probe: &probe,
    };
    let deployment = Deployment::new(name, &config, &store, backends).with_manifest_root(&base);

    info!(deployment = %name, %target, state = %path.display(), "deploying");
    let result = run(deployment, reset, until).await;
    Ok(exit_code(result, &store, &path, until))
}

/// Open (or reset) the state record, then drive the phases.
pub async fn run(deployment: Deployment<'_>, reset: bool, until: Option<Phase>) -> DeployResult<DeploymentState> {
    open_state(deployment.store, &deployment.name, deployment.required_endpoint_count(), reset)?;
    let sequencer = Sequencer::new(deployment);
    match until {
        Some(last) => sequencer.run_until(last).await,
        None => sequencer.run().await,
    }
}

/// Exit 0 only for a complete deployment or a finished partial run. Any
/// failure prints the last recorded state and where it lives.
pub fn exit_code(
    result: DeployResult<DeploymentState>,
    store: &StateStore,
    path: &Path,
    until: Option<Phase>,
) -> ExitCode {
    match result {
        Ok(state) => {
            println!("{}", summary(&state));
            if until.is_some() || state.is_complete() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!(error = %e, "deployment failed");
            eprintln!("✗ {e}");
            match store.load() {
                Ok(state) => eprintln!("{}", summary(&state)),
                Err(load_err) => eprintln!("no state recorded: {load_err}"),
            }
            eprintln!("state file: {}", path.display());
            ExitCode::FAILURE
        }
    }
}

/// The fields an operator needs to decide between resuming and discarding.
pub fn summary(state: &DeploymentState) -> String {
    let phase = state
        .current_phase
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "deployment {}: status {}, phase {}, endpoints {}/{}, database {}",
        state.deployment,
        state.status,
        phase,
        state.tested_endpoint_count,
        state.required_endpoint_count,
        if state.database_connected { "connected" } else { "not connected" }
    )
}
