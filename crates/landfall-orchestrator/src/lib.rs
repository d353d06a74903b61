//! landfall-orchestrator: resumable, phase-by-phase environment provisioning.
//!
//! # Architecture
//!
//! ```text
//! Sequencer ──► steps::{certificate, network, cluster, workloads, validate}
//!    │              │
//!    │              ├── Reconciler (CloudProvider / ClusterResources)
//!    │              ├── SecretStore, Orchestrator
//!    │              └── HealthValidator (HttpProbe)
//!    └── StateStore (resume marks + phase outputs)
//! ```
//!
//! Phases run strictly in order:
//! `CERT_REQUESTED → NETWORK_DB_REGISTRY_PROVISIONED → CLUSTER_CONFIGURED →
//! WORKLOADS_DEPLOYED → VALIDATED → COMPLETE`. The certificate is requested
//! first so its DNS validation overlaps the rest of provisioning.

pub mod deployment;
pub mod error;
pub mod sequencer;
pub mod steps;
pub mod template;

pub use deployment::{Backends, Deployment, open_state};
pub use error::{DeployError, DeployResult};
pub use sequencer::Sequencer;
pub use steps::Outputs;
