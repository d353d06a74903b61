//! Domain types for the deployment state record.
//!
//! The record is one JSON document. Well-known keys map onto typed fields;
//! every other key lands in `outputs`, where phases leave the identifiers
//! later phases consume.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

pub const STATUS: &str = "status";
pub const REQUIRED_ENDPOINT_COUNT: &str = "requiredEndpointCount";
pub const TESTED_ENDPOINT_COUNT: &str = "testedEndpointCount";
pub const DATABASE_CONNECTED: &str = "databaseConnected";
pub const CURRENT_PHASE: &str = "currentPhase";
pub const COMPLETED_PHASES: &str = "completedPhases";
pub const VALIDATION_PASS: &str = "validationPass";

/// Output-key prefix for per-endpoint validation results.
pub const ENDPOINT_PREFIX: &str = "endpoint:";

// ── Status ─────────────────────────────────────────────────────────

/// Overall deployment status. Ordered; never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Started,
    InProgress,
    Complete,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Started => "STARTED",
            DeploymentStatus::InProgress => "IN_PROGRESS",
            DeploymentStatus::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(DeploymentStatus::Started),
            "IN_PROGRESS" => Ok(DeploymentStatus::InProgress),
            "COMPLETE" => Ok(DeploymentStatus::Complete),
            other => Err(format!("unknown status {other:?}")),
        }
    }
}

// ── Phase ──────────────────────────────────────────────────────────

/// Deployment phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    CertRequested,
    NetworkDbRegistryProvisioned,
    ClusterConfigured,
    WorkloadsDeployed,
    Validated,
    Complete,
}

impl Phase {
    /// Phases that have a body to run. `Complete` is the terminal marker.
    pub const RUNNABLE: [Phase; 5] = [
        Phase::CertRequested,
        Phase::NetworkDbRegistryProvisioned,
        Phase::ClusterConfigured,
        Phase::WorkloadsDeployed,
        Phase::Validated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::CertRequested => "CERT_REQUESTED",
            Phase::NetworkDbRegistryProvisioned => "NETWORK_DB_REGISTRY_PROVISIONED",
            Phase::ClusterConfigured => "CLUSTER_CONFIGURED",
            Phase::WorkloadsDeployed => "WORKLOADS_DEPLOYED",
            Phase::Validated => "VALIDATED",
            Phase::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::RUNNABLE
            .iter()
            .chain(std::iter::once(&Phase::Complete))
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown phase {s:?}"))
    }
}

// ── Values ─────────────────────────────────────────────────────────

/// A single state value: string, boolean, or integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl StateValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            StateValue::Text(s) => s.parse().ok(),
            StateValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(i) => Some(*i),
            StateValue::Text(s) => s.parse().ok(),
            StateValue::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(b) => write!(f, "{b}"),
            StateValue::Int(i) => write!(f, "{i}"),
            StateValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        StateValue::Bool(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Int(v)
    }
}

impl From<u32> for StateValue {
    fn from(v: u32) -> Self {
        StateValue::Int(i64::from(v))
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Text(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Text(v.to_string())
    }
}

// ── Deployment state ───────────────────────────────────────────────

/// The persisted progress record of one deployment attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentState {
    pub deployment: String,
    pub status: DeploymentStatus,
    pub required_endpoint_count: u32,
    pub tested_endpoint_count: u32,
    pub database_connected: bool,
    /// Phase most recently entered.
    pub current_phase: Option<Phase>,
    /// Phases whose bodies finished; a resumed run skips these.
    #[serde(default)]
    pub completed_phases: BTreeSet<Phase>,
    /// Incremented each time validation restarts from zero.
    #[serde(default)]
    pub validation_pass: u32,
    #[serde(default)]
    pub outputs: BTreeMap<String, StateValue>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl DeploymentState {
    pub fn new(deployment: &str, required_endpoint_count: u32) -> Self {
        let now = epoch_secs();
        Self {
            deployment: deployment.to_string(),
            status: DeploymentStatus::Started,
            required_endpoint_count,
            tested_endpoint_count: 0,
            database_connected: false,
            current_phase: None,
            completed_phases: BTreeSet::new(),
            validation_pass: 0,
            outputs: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The completion invariant: the database was verified and every
    /// required endpoint was tested.
    pub fn is_complete(&self) -> bool {
        self.database_connected && self.tested_endpoint_count == self.required_endpoint_count
    }

    pub fn phase_done(&self, phase: Phase) -> bool {
        self.completed_phases.contains(&phase)
    }

    /// Look up a well-known key or an output.
    pub fn get(&self, key: &str) -> Option<StateValue> {
        match key {
            STATUS => Some(self.status.as_str().into()),
            REQUIRED_ENDPOINT_COUNT => Some(self.required_endpoint_count.into()),
            TESTED_ENDPOINT_COUNT => Some(self.tested_endpoint_count.into()),
            DATABASE_CONNECTED => Some(self.database_connected.into()),
            CURRENT_PHASE => self.current_phase.map(|p| p.as_str().into()),
            COMPLETED_PHASES => Some(
                self.completed_phases
                    .iter()
                    .map(Phase::as_str)
                    .collect::<Vec<_>>()
                    .join(",")
                    .into(),
            ),
            VALIDATION_PASS => Some(self.validation_pass.into()),
            other => self.outputs.get(other).cloned(),
        }
    }

    /// Text output by key.
    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).and_then(StateValue::as_str)
    }

    /// Set a well-known key (type-checked) or an output.
    ///
    /// Only the value's shape is checked here; transition rules are
    /// enforced by [`DeploymentState::check_transition`] when the record is
    /// saved.
    pub fn apply(&mut self, key: &str, value: StateValue) -> StateResult<()> {
        let invalid = |reason: &str| StateError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match key {
            STATUS => {
                let text = value.to_string();
                self.status = text.parse().map_err(|e: String| invalid(&e))?;
            }
            REQUIRED_ENDPOINT_COUNT => {
                self.required_endpoint_count = to_count(&value).ok_or_else(|| invalid("expected a non-negative integer"))?;
            }
            TESTED_ENDPOINT_COUNT => {
                self.tested_endpoint_count = to_count(&value).ok_or_else(|| invalid("expected a non-negative integer"))?;
            }
            DATABASE_CONNECTED => {
                self.database_connected = value.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
            }
            CURRENT_PHASE => {
                let text = value.to_string();
                self.current_phase = Some(text.parse().map_err(|e: String| invalid(&e))?);
            }
            COMPLETED_PHASES | VALIDATION_PASS => {
                return Err(invalid("managed by the sequencer, not settable directly"));
            }
            other => {
                self.outputs.insert(other.to_string(), value);
            }
        }
        Ok(())
    }

    /// Start a fresh validation pass: counters go back to zero and recorded
    /// endpoint results are dropped.
    pub fn restart_validation(&mut self) {
        self.validation_pass += 1;
        self.tested_endpoint_count = 0;
        self.database_connected = false;
        self.outputs.retain(|k, _| !k.starts_with(ENDPOINT_PREFIX));
    }

    /// Check that moving from `prev` to `self` keeps every invariant.
    pub fn check_transition(&self, prev: &DeploymentState) -> StateResult<()> {
        if self.status < prev.status {
            return Err(StateError::Invariant(format!(
                "status cannot regress from {} to {}",
                prev.status, self.status
            )));
        }
        if self.required_endpoint_count != prev.required_endpoint_count {
            return Err(StateError::Invariant(format!(
                "{REQUIRED_ENDPOINT_COUNT} is fixed at {}",
                prev.required_endpoint_count
            )));
        }
        self.check_counts()?;
        if self.validation_pass < prev.validation_pass {
            return Err(StateError::Invariant("validation pass cannot go backwards".to_string()));
        }
        if self.validation_pass == prev.validation_pass
            && self.tested_endpoint_count < prev.tested_endpoint_count
        {
            return Err(StateError::Invariant(format!(
                "{TESTED_ENDPOINT_COUNT} cannot decrease within a validation pass ({} -> {})",
                prev.tested_endpoint_count, self.tested_endpoint_count
            )));
        }
        if self.current_phase < prev.current_phase {
            return Err(StateError::Invariant(format!(
                "phase cannot move backwards from {:?} to {:?}",
                prev.current_phase, self.current_phase
            )));
        }
        if !prev.completed_phases.is_subset(&self.completed_phases) {
            return Err(StateError::Invariant("completed phases cannot be forgotten".to_string()));
        }
        Ok(())
    }

    /// Checks that hold for any single record.
    pub fn check_counts(&self) -> StateResult<()> {
        if self.required_endpoint_count == 0 {
            return Err(StateError::Invariant(format!("{REQUIRED_ENDPOINT_COUNT} must be positive")));
        }
        if self.tested_endpoint_count > self.required_endpoint_count {
            return Err(StateError::Invariant(format!(
                "{TESTED_ENDPOINT_COUNT} {} exceeds {REQUIRED_ENDPOINT_COUNT} {}",
                self.tested_endpoint_count, self.required_endpoint_count
            )));
        }
        if self.status == DeploymentStatus::Complete && !self.is_complete() {
            return Err(StateError::Invariant(format!(
                "COMPLETE requires {DATABASE_CONNECTED}=true and {TESTED_ENDPOINT_COUNT}={} (have {}={}, {}={})",
                self.required_endpoint_count,
                DATABASE_CONNECTED,
                self.database_connected,
                TESTED_ENDPOINT_COUNT,
                self.tested_endpoint_count
            )));
        }
        Ok(())
    }

    /// Every key with its current value, for diffing and display.
    pub fn entries(&self) -> BTreeMap<String, StateValue> {
        let mut entries: BTreeMap<String, StateValue> = [
            STATUS,
            REQUIRED_ENDPOINT_COUNT,
            TESTED_ENDPOINT_COUNT,
            DATABASE_CONNECTED,
            CURRENT_PHASE,
            COMPLETED_PHASES,
            VALIDATION_PASS,
        ]
        .into_iter()
        .filter_map(|k| self.get(k).map(|v| (k.to_string(), v)))
        .collect();
        entries.extend(self.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        entries
    }
}

fn to_count(value: &StateValue) -> Option<u32> {
    value.as_int().and_then(|i| u32::try_from(i).ok())
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_complete_truth_table() {
        for required in [1u32, 6] {
            for tested in 0..=required {
                for db in [false, true] {
                    let mut state = DeploymentState::new("demo", required);
                    state.tested_endpoint_count = tested;
                    state.database_connected = db;
                    assert_eq!(
                        state.is_complete(),
                        db && tested == required,
                        "required={required} tested={tested} db={db}"
                    );
                }
            }
        }
    }

    #[test]
    fn well_known_keys_are_typed() {
        let mut state = DeploymentState::new("demo", 6);
        state.apply(TESTED_ENDPOINT_COUNT, 3u32.into()).unwrap();
        state.apply(DATABASE_CONNECTED, "true".into()).unwrap();
        state.apply(CURRENT_PHASE, "CLUSTER_CONFIGURED".into()).unwrap();

        assert_eq!(state.tested_endpoint_count, 3);
        assert!(state.database_connected);
        assert_eq!(state.current_phase, Some(Phase::ClusterConfigured));
        assert_eq!(state.get(CURRENT_PHASE), Some("CLUSTER_CONFIGURED".into()));
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut state = DeploymentState::new("demo", 6);
        assert!(matches!(
            state.apply(DATABASE_CONNECTED, 7i64.into()),
            Err(StateError::InvalidValue { .. })
        ));
        assert!(state.apply(STATUS, "DONE".into()).is_err());
        assert!(state.apply(TESTED_ENDPOINT_COUNT, (-1i64).into()).is_err());
        assert!(state.apply(COMPLETED_PHASES, "VALIDATED".into()).is_err());
    }

    #[test]
    fn other_keys_are_outputs() {
        let mut state = DeploymentState::new("demo", 6);
        state.apply("clusterName", "demo-cluster".into()).unwrap();
        assert_eq!(state.output("clusterName"), Some("demo-cluster"));
        assert!(state.entries().contains_key("clusterName"));
    }

    #[test]
    fn completion_requires_invariant() {
        let mut state = DeploymentState::new("demo", 6);
        state.status = DeploymentStatus::Complete;
        state.tested_endpoint_count = 6;
        assert!(matches!(state.check_counts(), Err(StateError::Invariant(_))));

        state.database_connected = true;
        assert!(state.check_counts().is_ok());
    }

    #[test]
    fn transitions_only_move_forward() {
        let prev = {
            let mut s = DeploymentState::new("demo", 6);
            s.status = DeploymentStatus::InProgress;
            s.tested_endpoint_count = 4;
            s.current_phase = Some(Phase::Validated);
            s
        };

        let mut regressed = prev.clone();
        regressed.status = DeploymentStatus::Started;
        assert!(regressed.check_transition(&prev).is_err());

        let mut resized = prev.clone();
        resized.required_endpoint_count = 7;
        assert!(resized.check_transition(&prev).is_err());

        let mut fewer = prev.clone();
        fewer.tested_endpoint_count = 2;
        assert!(fewer.check_transition(&prev).is_err());

        let mut backwards = prev.clone();
        backwards.current_phase = Some(Phase::CertRequested);
        assert!(backwards.check_transition(&prev).is_err());

        let mut restarted = prev.clone();
        restarted.restart_validation();
        assert!(restarted.check_transition(&prev).is_ok());
        assert_eq!(restarted.tested_endpoint_count, 0);
    }

    #[test]
    fn restart_validation_drops_endpoint_results() {
        let mut state = DeploymentState::new("demo", 6);
        state.outputs.insert(format!("{ENDPOINT_PREFIX}/health"), true.into());
        state.outputs.insert("vpcId".to_string(), "vpc-1".into());
        state.database_connected = true;

        state.restart_validation();

        assert!(!state.database_connected);
        assert_eq!(state.validation_pass, 1);
        assert_eq!(state.outputs.len(), 1);
        assert_eq!(state.output("vpcId"), Some("vpc-1"));
    }

    #[test]
    fn phase_names_round_trip() {
        for phase in Phase::RUNNABLE {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert_eq!("COMPLETE".parse::<Phase>().unwrap(), Phase::Complete);
        assert!(Phase::CertRequested < Phase::Validated);
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let state = DeploymentState::new("demo", 6);
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"requiredEndpointCount\":6"));
        assert!(json.contains("\"status\":\"STARTED\""));
    }
}
