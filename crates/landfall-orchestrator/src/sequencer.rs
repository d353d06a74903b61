//! Phase sequencer: drives a deployment through its phases in order.
//!
//! The sequencer holds no resource logic. For each phase it checks the
//! resume record, runs the body from [`crate::steps`], and on success
//! persists the phase outputs together with the completion mark in a single
//! state update. A failing phase stops the run with the phase attached to
//! the error; nothing is rolled back.

use landfall_state::{DeploymentState, DeploymentStatus, Phase};
use tracing::{error, info, warn};

use crate::deployment::Deployment;
use crate::error::{DeployError, DeployResult};
use crate::steps;

pub struct Sequencer<'a> {
    deployment: Deployment<'a>,
}

impl<'a> Sequencer<'a> {
    pub fn new(deployment: Deployment<'a>) -> Self {
        Self { deployment }
    }

    pub fn deployment(&self) -> &Deployment<'a> {
        &self.deployment
    }

    /// Run every remaining phase and mark the deployment COMPLETE.
    ///
    /// Returns an error if any phase fails or if the completion invariant
    /// does not hold once validation has run.
    pub async fn run(&self) -> DeployResult<DeploymentState> {
        self.run_phases(Phase::Validated).await?;
        self.complete()
    }

    /// Run remaining phases up to and including `last`, then stop without
    /// completing the deployment.
    pub async fn run_until(&self, last: Phase) -> DeployResult<DeploymentState> {
        self.run_phases(last).await
    }

    async fn run_phases(&self, last: Phase) -> DeployResult<DeploymentState> {
        let d = &self.deployment;
        let state = d.store.update(|s| {
            if s.status < DeploymentStatus::InProgress {
                s.status = DeploymentStatus::InProgress;
            }
            Ok(())
        })?;
        info!(
            deployment = %d.name,
            status = %state.status,
            resume_from = ?state.current_phase,
            "deployment run started"
        );

        for phase in Phase::RUNNABLE.into_iter().filter(|p| *p <= last) {
            if d.store.load()?.phase_done(phase) {
                info!(%phase, "phase already complete, skipped");
                continue;
            }
            self.run_phase(phase).await?;
        }

        Ok(d.store.load()?)
    }

    async fn run_phase(&self, phase: Phase) -> DeployResult<()> {
        let d = &self.deployment;
        d.store
            .update(|s| {
                s.current_phase = Some(phase);
                Ok(())
            })
            .map_err(|e| DeployError::from(e).in_phase(phase))?;
        info!(%phase, "phase started");

        let outputs = match steps::run(d, phase).await {
            Ok(outputs) => outputs,
            Err(e) => {
                error!(%phase, error = %e, "phase failed");
                return Err(e.in_phase(phase));
            }
        };

        let recorded = outputs.len();
        d.store
            .update(|s| {
                for (key, value) in outputs {
                    s.apply(&key, value)?;
                }
                s.completed_phases.insert(phase);
                Ok(())
            })
            .map_err(|e| DeployError::from(e).in_phase(phase))?;
        info!(%phase, outputs = recorded, "phase complete");
        Ok(())
    }

    /// Mark COMPLETE, but only when the completion invariant holds.
    fn complete(&self) -> DeployResult<DeploymentState> {
        let d = &self.deployment;
        let state = d.store.load()?;
        if !state.is_complete() {
            warn!(
                tested = state.tested_endpoint_count,
                required = state.required_endpoint_count,
                database_connected = state.database_connected,
                "completion invariant does not hold"
            );
            return Err(DeployError::ValidationFailed(format!(
                "{}/{} endpoints tested, database connected: {}",
                state.tested_endpoint_count, state.required_endpoint_count, state.database_connected
            ))
            .in_phase(Phase::Validated));
        }
        if state.status == DeploymentStatus::Complete {
            return Ok(state);
        }

        let state = d.store.update(|s| {
            s.status = DeploymentStatus::Complete;
            s.current_phase = Some(Phase::Complete);
            Ok(())
        })?;
        info!(deployment = %d.name, "deployment complete");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{Backends, open_state};
    use landfall_core::LandfallConfig;
    use landfall_health::fake::FakeProbe;
    use landfall_provider::ResourceKind;
    use landfall_provider::fake::{FakeCloud, FakeOrchestrator, FakeSecrets};
    use landfall_state::StateStore;

    struct Fixture {
        config: LandfallConfig,
        store: StateStore,
        cloud: FakeCloud,
        orchestrator: FakeOrchestrator,
        secrets: FakeSecrets,
        probe: FakeProbe,
    }

    impl Fixture {
        fn new() -> Self {
            let mut config = LandfallConfig::default();
            config.cluster.role_arn = Some("arn:aws:iam::123456789012:role/eks".to_string());
            let store = StateStore::open_in_memory();
            open_state(&store, "demo", 6, false).unwrap();
            let secrets = FakeSecrets::new();
            secrets.insert(
                "arn:aws:secretsmanager:fake:secret:demo-db",
                r#"{"username":"postgres","password":"hunter2"}"#,
            );
            Self {
                config,
                store,
                cloud: FakeCloud::new(),
                orchestrator: FakeOrchestrator::new(),
                secrets,
                probe: FakeProbe::healthy(true),
            }
        }

        fn sequencer(&self) -> Sequencer<'_> {
            let backends = Backends {
                cloud: &self.cloud,
                orchestrator: &self.orchestrator,
                secrets: &self.secrets,
                probe: &self.probe,
            };
            Sequencer::new(Deployment::new("demo", &self.config, &self.store, backends))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_every_phase_to_complete() {
        let fx = Fixture::new();
        let state = fx.sequencer().run().await.unwrap();

        assert_eq!(state.status, DeploymentStatus::Complete);
        assert_eq!(state.current_phase, Some(Phase::Complete));
        assert_eq!(state.completed_phases.len(), Phase::RUNNABLE.len());
        assert!(state.output(steps::VPC_CIDR).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_stops_after_the_named_phase() {
        let fx = Fixture::new();
        let state = fx.sequencer().run_until(Phase::NetworkDbRegistryProvisioned).await.unwrap();

        assert_eq!(state.status, DeploymentStatus::InProgress);
        assert_eq!(state.current_phase, Some(Phase::NetworkDbRegistryProvisioned));
        assert_eq!(fx.cloud.creates(ResourceKind::Cluster), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_carries_the_phase_and_keeps_earlier_marks() {
        let mut fx = Fixture::new();
        fx.config.cluster.role_arn = None;
        let err = fx.sequencer().run().await.unwrap_err();

        assert_eq!(err.phase(), Some(Phase::ClusterConfigured));
        assert!(matches!(err.root(), DeployError::Configuration(_)));
        let state = fx.store.load().unwrap();
        assert_eq!(state.current_phase, Some(Phase::ClusterConfigured));
        assert!(state.phase_done(Phase::NetworkDbRegistryProvisioned));
        assert!(!state.phase_done(Phase::ClusterConfigured));
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_of_a_complete_deployment_changes_nothing() {
        let fx = Fixture::new();
        fx.sequencer().run().await.unwrap();
        let mutations = fx.cloud.mutations();

        let state = fx.sequencer().run().await.unwrap();
        assert_eq!(state.status, DeploymentStatus::Complete);
        assert_eq!(fx.cloud.mutations(), mutations);
    }
}
