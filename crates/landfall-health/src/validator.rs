//! Endpoint and database validation against a deployed environment.
//!
//! A validation pass probes every configured endpoint with its own retry
//! budget, then checks the database indicator (a boolean JSON field in one
//! designated endpoint) with a separate budget. The state record is written
//! after every outcome, so an interrupted pass leaves accurate counters.
//!
//! By default every pass starts from zero. With `skip_confirmed` the counters
//! carry over and endpoints already recorded green are not probed again.

use landfall_core::config::LandfallConfig;
use landfall_core::{Observed, RetryBudget, RetryError, retry_until};
use landfall_state::{DATABASE_CONNECTED, DeploymentState, ENDPOINT_PREFIX, StateStore, StateValue};
use tracing::{info, warn};

use crate::checker::{HttpProbe, ProbeResponse};
use crate::error::HealthResult;

/// What to check and how patiently.
#[derive(Debug, Clone)]
pub struct ValidationPlan {
    pub endpoints: Vec<String>,
    pub database_endpoint: String,
    pub database_field: String,
    pub skip_confirmed: bool,
    pub endpoint_budget: RetryBudget,
    pub database_budget: RetryBudget,
}

impl ValidationPlan {
    pub fn from_config(config: &LandfallConfig) -> Self {
        Self {
            endpoints: config.validation.endpoints.clone(),
            database_endpoint: config.validation.database_endpoint.clone(),
            database_field: config.validation.database_field.clone(),
            skip_confirmed: config.validation.skip_confirmed_endpoints,
            endpoint_budget: config.retry.endpoint.to_budget(),
            database_budget: config.retry.database.to_budget(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointOutcome {
    Passed,
    /// Recorded green by an earlier pass and not probed again.
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResult {
    pub path: String,
    pub outcome: EndpointOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub endpoints: Vec<EndpointResult>,
    pub tested: u32,
    pub required: u32,
    pub database_connected: bool,
    /// Why the database check failed, when it did.
    pub database_error: Option<String>,
}

impl ValidationReport {
    /// Every endpoint passed and the database indicator is true.
    pub fn success(&self) -> bool {
        self.database_connected
            && self.tested == self.required
            && self
                .endpoints
                .iter()
                .all(|e| !matches!(e.outcome, EndpointOutcome::Failed { .. }))
    }

    pub fn failed_endpoints(&self) -> Vec<&str> {
        self.endpoints
            .iter()
            .filter(|e| matches!(e.outcome, EndpointOutcome::Failed { .. }))
            .map(|e| e.path.as_str())
            .collect()
    }

    /// One-line summary for logs and errors.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{}/{} endpoints passed, database {}",
            self.tested,
            self.required,
            if self.database_connected { "connected" } else { "not connected" }
        );
        let failed = self.failed_endpoints();
        if !failed.is_empty() {
            summary.push_str(&format!("; failing: {}", failed.join(", ")));
        }
        if let Some(e) = &self.database_error {
            summary.push_str(&format!("; database check: {e}"));
        }
        summary
    }
}

pub fn endpoint_key(path: &str) -> String {
    format!("{ENDPOINT_PREFIX}{path}")
}

pub struct HealthValidator<'a> {
    probe: &'a dyn HttpProbe,
    store: &'a StateStore,
    plan: ValidationPlan,
}

impl<'a> HealthValidator<'a> {
    pub fn new(probe: &'a dyn HttpProbe, store: &'a StateStore, plan: ValidationPlan) -> Self {
        Self { probe, store, plan }
    }

    /// Run one validation pass and record the outcome in the state.
    pub async fn run(&self) -> HealthResult<ValidationReport> {
        let state = self.begin_pass()?;
        info!(
            address = %self.probe.target(),
            pass = state.validation_pass,
            endpoints = self.plan.endpoints.len(),
            "validation pass started"
        );

        let mut endpoints = Vec::with_capacity(self.plan.endpoints.len());
        for path in &self.plan.endpoints {
            let key = endpoint_key(path);
            let confirmed = state.outputs.get(&key).and_then(StateValue::as_bool) == Some(true);
            if self.plan.skip_confirmed && confirmed {
                info!(%path, "endpoint confirmed by an earlier pass, skipped");
                endpoints.push(EndpointResult {
                    path: path.clone(),
                    outcome: EndpointOutcome::Skipped,
                });
                continue;
            }

            let outcome = self.check_endpoint(path).await?;
            let passed = outcome == EndpointOutcome::Passed;
            self.store.update(|s| {
                s.apply(&key, passed.into())?;
                s.tested_endpoint_count = green_count(s, &self.plan.endpoints).min(s.required_endpoint_count);
                Ok(())
            })?;
            endpoints.push(EndpointResult {
                path: path.clone(),
                outcome,
            });
        }

        let (database_connected, database_error) = if self.plan.skip_confirmed && state.database_connected {
            info!("database connectivity confirmed by an earlier pass, skipped");
            (true, None)
        } else {
            match self.check_database().await? {
                Ok(()) => (true, None),
                Err(reason) => (false, Some(reason)),
            }
        };
        let state = self.store.update(|s| {
            s.apply(DATABASE_CONNECTED, database_connected.into())?;
            Ok(())
        })?;

        let report = ValidationReport {
            endpoints,
            tested: state.tested_endpoint_count,
            required: state.required_endpoint_count,
            database_connected: state.database_connected,
            database_error,
        };
        if report.success() {
            info!(summary = %report.summary(), "validation passed");
        } else {
            warn!(summary = %report.summary(), "validation failed");
        }
        Ok(report)
    }

    fn begin_pass(&self) -> HealthResult<DeploymentState> {
        let skip_confirmed = self.plan.skip_confirmed;
        let endpoints = &self.plan.endpoints;
        Ok(self.store.update(|s| {
            let carried = green_count(s, endpoints).min(s.required_endpoint_count);
            if !skip_confirmed {
                s.restart_validation();
            } else if carried != s.tested_endpoint_count {
                // Recorded results no longer match the counter, e.g. after
                // the endpoint list changed.
                warn!(
                    recorded = carried,
                    counter = s.tested_endpoint_count,
                    "recorded endpoint results out of step, starting a fresh pass"
                );
                s.restart_validation();
            }
            Ok(())
        })?)
    }

    /// `Ok(outcome)` for pass/fail; `Err` only when probing cannot work at all.
    async fn check_endpoint(&self, path: &str) -> HealthResult<EndpointOutcome> {
        let operation = format!("GET {path}");
        let result = retry_until(
            &self.plan.endpoint_budget,
            &operation,
            || self.probe.get(path),
            ProbeResponse::is_success,
        )
        .await;
        match result {
            Ok(response) => {
                info!(%path, status = response.status, "endpoint passed");
                Ok(EndpointOutcome::Passed)
            }
            Err(RetryError::Exhausted(e)) => {
                let reason = describe_last(&e.last);
                warn!(%path, attempts = e.attempts, %reason, "endpoint failed");
                Ok(EndpointOutcome::Failed { reason })
            }
            Err(RetryError::Fatal(e)) => Err(e.into()),
        }
    }

    async fn check_database(&self) -> HealthResult<Result<(), String>> {
        let path = self.plan.database_endpoint.as_str();
        let field = self.plan.database_field.as_str();
        let operation = format!("database check via GET {path}");
        let result = retry_until(
            &self.plan.database_budget,
            &operation,
            || self.probe.get(path),
            |response| response.is_success() && response.json_flag(field) == Some(true),
        )
        .await;
        match result {
            Ok(_) => {
                info!(%path, %field, "database connected");
                Ok(Ok(()))
            }
            Err(RetryError::Exhausted(e)) => {
                let reason = match &e.last {
                    Observed::Value(r) if r.is_success() => match r.json_flag(field) {
                        Some(false) => format!("{field} is false"),
                        _ => format!("{path} has no boolean {field}"),
                    },
                    other => describe_last(other),
                };
                warn!(%path, attempts = e.attempts, %reason, "database not connected");
                Ok(Err(reason))
            }
            Err(RetryError::Fatal(e)) => Err(e.into()),
        }
    }
}

/// Configured endpoints recorded green in the state.
fn green_count(state: &DeploymentState, endpoints: &[String]) -> u32 {
    endpoints
        .iter()
        .filter(|p| state.outputs.get(&endpoint_key(p)).and_then(StateValue::as_bool) == Some(true))
        .count() as u32
}

fn describe_last(last: &Observed<ProbeResponse>) -> String {
    match last {
        Observed::Value(response) => format!("HTTP {}", response.status),
        Observed::Error(e) => e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use landfall_state::{StateStore, TESTED_ENDPOINT_COUNT};

    use super::*;
    use crate::fake::FakeProbe;

    const ENDPOINTS: [&str; 6] = ["/", "/health", "/status", "/db-test", "/config", "/environment"];

    fn plan(skip_confirmed: bool) -> ValidationPlan {
        ValidationPlan {
            endpoints: ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            database_endpoint: "/status".to_string(),
            database_field: "database_connected".to_string(),
            skip_confirmed,
            endpoint_budget: RetryBudget::new(3, Duration::from_secs(5)),
            database_budget: RetryBudget::new(3, Duration::from_secs(5)),
        }
    }

    fn store() -> StateStore {
        let store = StateStore::open_in_memory();
        store.initialize("demo", 6).unwrap();
        store
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_service_completes_state() {
        let probe = FakeProbe::healthy(true);
        let store = store();

        let report = HealthValidator::new(&probe, &store, plan(false)).run().await.unwrap();

        assert!(report.success(), "{}", report.summary());
        assert_eq!(report.tested, 6);
        let state = store.load().unwrap();
        assert_eq!(state.tested_endpoint_count, 6);
        assert!(state.database_connected);
        assert!(state.is_complete());
        assert_eq!(state.get("endpoint:/health"), Some(StateValue::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_endpoint_leaves_count_short() {
        let probe = FakeProbe::healthy(true);
        probe.respond("/db-test", 500, "boom");
        let store = store();

        let report = HealthValidator::new(&probe, &store, plan(false)).run().await.unwrap();

        assert!(!report.success());
        assert_eq!(report.failed_endpoints(), vec!["/db-test"]);
        assert_eq!(probe.calls("/db-test"), 3);
        let state = store.load().unwrap();
        assert_eq!(state.tested_endpoint_count, 5);
        assert!(state.database_connected);
        assert!(!state.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn database_flag_false_is_reported() {
        let probe = FakeProbe::healthy(false);
        let store = store();

        let report = HealthValidator::new(&probe, &store, plan(false)).run().await.unwrap();

        assert!(!report.success());
        assert_eq!(report.tested, 6);
        assert_eq!(report.database_error.as_deref(), Some("database_connected is false"));
        assert!(!store.load().unwrap().database_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_budget() {
        let probe = FakeProbe::healthy(true);
        probe.respond("/config", 503, "warming up");
        probe.then_respond("/config", 200, "ok");
        let store = store();

        let report = HealthValidator::new(&probe, &store, plan(false)).run().await.unwrap();

        assert!(report.success());
        assert_eq!(probe.calls("/config"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn default_pass_retests_everything() {
        let probe = FakeProbe::healthy(true);
        let store = store();
        HealthValidator::new(&probe, &store, plan(false)).run().await.unwrap();
        HealthValidator::new(&probe, &store, plan(false)).run().await.unwrap();

        assert_eq!(probe.calls("/health"), 2);
        let state = store.load().unwrap();
        assert_eq!(state.validation_pass, 2);
        assert_eq!(state.tested_endpoint_count, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_confirmed_only_probes_failures() {
        let probe = FakeProbe::healthy(true);
        probe.respond("/db-test", 500, "boom");
        let store = store();
        HealthValidator::new(&probe, &store, plan(true)).run().await.unwrap();
        assert_eq!(store.get(TESTED_ENDPOINT_COUNT).unwrap(), StateValue::Int(5));

        probe.respond("/db-test", 200, "ok");
        let report = HealthValidator::new(&probe, &store, plan(true)).run().await.unwrap();

        assert!(report.success(), "{}", report.summary());
        assert_eq!(probe.calls("/health"), 1);
        assert_eq!(
            report
                .endpoints
                .iter()
                .filter(|e| e.outcome == EndpointOutcome::Skipped)
                .count(),
            5
        );
        assert!(store.is_complete().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_target_fails_every_endpoint() {
        let probe = FakeProbe::new();
        let store = store();

        let report = HealthValidator::new(&probe, &store, plan(false)).run().await.unwrap();

        assert_eq!(report.failed_endpoints().len(), 6);
        assert_eq!(report.tested, 0);
        assert!(!report.database_connected);
        assert_eq!(store.load().unwrap().tested_endpoint_count, 0);
    }
}
