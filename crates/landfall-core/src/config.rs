//! landfall.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::cidr::AllocationRequest;
use crate::retry::RetryBudget;

/// Endpoints served by the backend workload, probed in this order.
pub const DEFAULT_ENDPOINTS: [&str; 6] = ["/", "/health", "/status", "/db-test", "/config", "/environment"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LandfallConfig {
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub registries: Vec<RegistryConfig>,
    #[serde(default)]
    pub workloads: Vec<WorkloadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub region: String,
    /// Domain the TLS certificate is requested for. No certificate is
    /// requested when unset.
    pub domain: Option<String>,
    /// Directory holding `<deployment>.state.json`.
    pub state_dir: String,
    pub namespace: String,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            domain: None,
            state_dir: ".landfall".to_string(),
            namespace: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub first_octet: u8,
    pub preferred_octet: u8,
    pub subnet_prefix: u8,
    /// Availability-zone suffixes for zone index 0 and 1.
    pub zones: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let request = AllocationRequest::default();
        Self {
            first_octet: request.first_octet,
            preferred_octet: request.preferred_octet,
            subnet_prefix: request.subnet_prefix,
            zones: vec!["a".to_string(), "b".to_string()],
        }
    }
}

impl NetworkConfig {
    pub fn allocation_request(&self) -> AllocationRequest {
        AllocationRequest {
            first_octet: self.first_octet,
            preferred_octet: self.preferred_octet,
            subnet_prefix: self.subnet_prefix,
        }
    }
}

/// Attempt count and delay, e.g. `{ attempts = 60, delay = "10s" }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BudgetConfig {
    pub attempts: u32,
    pub delay: String,
}

impl BudgetConfig {
    fn new(attempts: u32, delay: &str) -> Self {
        Self {
            attempts,
            delay: delay.to_string(),
        }
    }

    pub fn to_budget(&self) -> RetryBudget {
        let delay = parse_duration(&self.delay).unwrap_or(Duration::from_secs(5));
        RetryBudget::new(self.attempts, delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Generic create/update stabilization (network, database, registry).
    pub resource: BudgetConfig,
    pub cluster: BudgetConfig,
    pub certificate: BudgetConfig,
    pub rollout: BudgetConfig,
    /// Per-endpoint budget used by the health validator.
    pub endpoint: BudgetConfig,
    pub database: BudgetConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            resource: BudgetConfig::new(60, "10s"),
            cluster: BudgetConfig::new(60, "30s"),
            certificate: BudgetConfig::new(60, "30s"),
            rollout: BudgetConfig::new(30, "10s"),
            endpoint: BudgetConfig::new(10, "15s"),
            database: BudgetConfig::new(10, "15s"),
        }
    }
}

impl RetryConfig {
    fn all(&self) -> [(&'static str, &BudgetConfig); 6] {
        [
            ("resource", &self.resource),
            ("cluster", &self.cluster),
            ("certificate", &self.certificate),
            ("rollout", &self.rollout),
            ("endpoint", &self.endpoint),
            ("database", &self.database),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub endpoints: Vec<String>,
    /// Endpoint whose JSON body carries the database indicator.
    pub database_endpoint: String,
    pub database_field: String,
    /// Skip endpoints already recorded green by an earlier run.
    pub skip_confirmed_endpoints: bool,
    /// Per-request timeout.
    pub timeout: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            database_endpoint: "/status".to_string(),
            database_field: "database_connected".to_string(),
            skip_confirmed_endpoints: false,
            timeout: "10s".to_string(),
        }
    }
}

impl ValidationConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: String,
    pub engine_version: String,
    pub instance_class: String,
    pub allocated_storage: u32,
    pub db_name: String,
    pub port: u16,
    pub username: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "postgres".to_string(),
            engine_version: "15".to_string(),
            instance_class: "db.t3.micro".to_string(),
            allocated_storage: 20,
            db_name: "postgres".to_string(),
            port: 5432,
            username: "postgres".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub version: String,
    /// IAM role the control plane assumes.
    pub role_arn: Option<String>,
    /// Manifest installing the load-balancer controller.
    pub load_balancer_manifest: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            version: "1.29".to_string(),
            role_arn: None,
            load_balancer_manifest: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub name: String,
    #[serde(default)]
    pub scan_on_push: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub name: String,
    pub namespace: Option<String>,
    /// Path to the manifest template. `{{key}}` placeholders are filled from
    /// the deployment outputs.
    pub manifest: String,
    /// Registry whose URI the `{{image}}` placeholder resolves to.
    pub registry: Option<String>,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

impl LandfallConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: LandfallConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, budget) in self.retry.all() {
            if parse_duration(&budget.delay).is_none() {
                bail!("retry.{name}.delay: cannot parse duration {:?}", budget.delay);
            }
        }
        if parse_duration(&self.validation.timeout).is_none() {
            bail!("validation.timeout: cannot parse duration {:?}", self.validation.timeout);
        }
        if self.validation.endpoints.is_empty() {
            bail!("validation.endpoints must name at least one endpoint");
        }
        if self.network.zones.len() < 2 {
            bail!("network.zones must list two zones");
        }
        for workload in &self.workloads {
            if let Some(registry) = &workload.registry {
                if !self.registries.iter().any(|r| &r.name == registry) {
                    bail!("workload {:?} references unknown registry {:?}", workload.name, registry);
                }
            }
        }
        Ok(())
    }

    /// Scaffold a landfall.toml with one registry and one backend workload.
    pub fn scaffold(domain: Option<&str>) -> Self {
        LandfallConfig {
            deployment: DeploymentConfig {
                domain: domain.map(str::to_string),
                ..Default::default()
            },
            registries: vec![RegistryConfig {
                name: "backend".to_string(),
                scan_on_push: true,
            }],
            workloads: vec![WorkloadConfig {
                name: "backend".to_string(),
                namespace: None,
                manifest: "k8s/backend.yaml".to_string(),
                registry: Some("backend".to_string()),
                tag: default_tag(),
            }],
            ..Default::default()
        }
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = LandfallConfig::from_toml("").unwrap();
        assert_eq!(config.validation.endpoints.len(), 6);
        assert_eq!(config.validation.database_endpoint, "/status");
        assert_eq!(config.network.preferred_octet, 1);
        assert_eq!(
            config.retry.cluster.to_budget(),
            RetryBudget::new(60, Duration::from_secs(30))
        );
    }

    #[test]
    fn scaffold_round_trips_through_toml() {
        let config = LandfallConfig::scaffold(Some("app.example.com"));
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("app.example.com"));
        let parsed = LandfallConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.workloads[0].registry.as_deref(), Some("backend"));
    }

    #[test]
    fn partial_sections_override_defaults() {
        let config = LandfallConfig::from_toml(
            r#"
[network]
first_octet = 10
preferred_octet = 40
subnet_prefix = 24
zones = ["a", "c"]

[retry.endpoint]
attempts = 3
delay = "500ms"
"#,
        )
        .unwrap();
        assert_eq!(config.network.allocation_request().preferred_octet, 40);
        assert_eq!(
            config.retry.endpoint.to_budget(),
            RetryBudget::new(3, Duration::from_millis(500))
        );
        // Untouched budgets keep their defaults.
        assert_eq!(config.retry.rollout.attempts, 30);
    }

    #[test]
    fn bad_delay_is_rejected() {
        let err = LandfallConfig::from_toml(
            r#"
[retry.rollout]
attempts = 3
delay = "soon"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("retry.rollout.delay"));
    }

    #[test]
    fn overflowing_minute_delay_is_rejected() {
        let err = LandfallConfig::from_toml(
            r#"
[retry.cluster]
attempts = 3
delay = "18446744073709551615m"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("retry.cluster.delay"));
    }

    #[test]
    fn unknown_registry_reference_is_rejected() {
        let err = LandfallConfig::from_toml(
            r#"
[[workloads]]
name = "api"
manifest = "k8s/api.yaml"
registry = "missing"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown registry"));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration(&format!("{}m", u64::MAX)), None);
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)),
            Some(Duration::from_secs(u64::MAX / 60 * 60))
        );
        assert_eq!(parse_duration("later"), None);
    }
}
