//! Phase bodies.
//!
//! Each step reads what earlier phases recorded, reconciles its resources,
//! and returns the outputs the sequencer persists when the phase completes.
//! The one exception is the address allocation, which is written as soon as
//! it is chosen so a crash between allocation and VPC creation cannot lead
//! to a second, different allocation.

use std::collections::{BTreeMap, BTreeSet};

use landfall_core::cidr::{self, CidrAllocation, CidrBlock, SubnetTier};
use landfall_core::config::WorkloadConfig;
use landfall_core::{retry_until, wait_for};
use landfall_health::{HealthValidator, ValidationPlan};
use landfall_provider::{ClusterResources, Reconciled, Reconciler, ResourceKind, ResourceSpec};
use landfall_state::{DeploymentState, Phase, StateValue};
use serde::Deserialize;
use tracing::{debug, info};

use crate::deployment::Deployment;
use crate::error::{DeployError, DeployResult};
use crate::template;

/// Outputs a phase hands back for persisting.
pub type Outputs = BTreeMap<String, StateValue>;

// ── Output keys ────────────────────────────────────────────────────

pub const CERTIFICATE_ARN: &str = "certificateArn";
pub const CIDR_ALLOCATION: &str = "cidrAllocation";
pub const VPC_CIDR: &str = "vpcCidr";
pub const VPC_ID: &str = "vpcId";
pub const PUBLIC_SUBNET_IDS: &str = "publicSubnetIds";
pub const PRIVATE_SUBNET_IDS: &str = "privateSubnetIds";
pub const DATABASE_SUBNET_IDS: &str = "databaseSubnetIds";
pub const DB_SUBNET_GROUP: &str = "dbSubnetGroup";
pub const DATABASE_ENDPOINT: &str = "databaseEndpoint";
pub const DATABASE_PORT: &str = "databasePort";
pub const DATABASE_NAME: &str = "databaseName";
pub const DATABASE_SECRET_ARN: &str = "databaseSecretArn";
pub const CLUSTER_NAME: &str = "clusterName";
pub const CLUSTER_ENDPOINT: &str = "clusterEndpoint";
pub const CREDENTIALS_SECRET: &str = "credentialsSecret";
/// `registry:<name>` holds the repository URI.
pub const REGISTRY_PREFIX: &str = "registry:";
/// `workload:<name>` holds the deployed image.
pub const WORKLOAD_PREFIX: &str = "workload:";

pub const LOAD_BALANCER_NAMESPACE: &str = "kube-system";
pub const LOAD_BALANCER_NAME: &str = "aws-load-balancer-controller";

/// Run the body of `phase`.
pub async fn run(deployment: &Deployment<'_>, phase: Phase) -> DeployResult<Outputs> {
    match phase {
        Phase::CertRequested => request_certificate(deployment).await,
        Phase::NetworkDbRegistryProvisioned => provision_network(deployment).await,
        Phase::ClusterConfigured => configure_cluster(deployment).await,
        Phase::WorkloadsDeployed => deploy_workloads(deployment).await,
        Phase::Validated => validate(deployment).await,
        Phase::Complete => Ok(Outputs::new()),
    }
}

// ── CERT_REQUESTED ─────────────────────────────────────────────────

/// Request the certificate without waiting for it.
///
/// DNS validation runs while everything else is provisioned; the workload
/// phase waits for issuance.
pub async fn request_certificate(d: &Deployment<'_>) -> DeployResult<Outputs> {
    let mut outputs = Outputs::new();
    let Some(domain) = d.config.deployment.domain.as_deref() else {
        info!("no domain configured, no certificate requested");
        return Ok(outputs);
    };

    let reconciler = Reconciler::new(d.backends.cloud, d.config.retry.certificate.to_budget());
    let cert = reconciler.apply(&certificate_spec(domain)).await?;
    let arn = attribute_or_id(&cert, "arn");
    info!(%domain, %arn, action = ?cert.action, "certificate requested");
    outputs.insert(CERTIFICATE_ARN.to_string(), arn.into());
    Ok(outputs)
}

fn certificate_spec(domain: &str) -> ResourceSpec {
    ResourceSpec::new(ResourceKind::Certificate, domain)
}

// ── NETWORK_DB_REGISTRY_PROVISIONED ────────────────────────────────

pub async fn provision_network(d: &Deployment<'_>) -> DeployResult<Outputs> {
    let allocation = allocation(d).await?;
    let reconciler = Reconciler::new(d.backends.cloud, d.config.retry.resource.to_budget());
    let mut outputs = Outputs::new();

    let vpc_spec = ResourceSpec::new(ResourceKind::Network, vpc_name(d))
        .immutable("cidr", allocation.vpc.to_string());
    let vpc = reconciler.reconcile(&vpc_spec).await?;
    let vpc_id = attribute_or_id(&vpc, "vpc_id");
    outputs.insert(VPC_ID.to_string(), vpc_id.clone().into());

    let mut tiers: BTreeMap<SubnetTier, Vec<String>> = BTreeMap::new();
    for subnet in &allocation.subnets {
        let zone = zone_name(d, subnet.zone)?;
        let spec = ResourceSpec::new(ResourceKind::Subnet, format!("{}-{}", d.name, subnet.label()))
            .immutable("vpc", &vpc_id)
            .immutable("cidr", subnet.block.to_string())
            .immutable("zone", zone);
        let reconciled = reconciler.reconcile(&spec).await?;
        tiers
            .entry(subnet.tier)
            .or_default()
            .push(attribute_or_id(&reconciled, "subnet_id"));
    }
    for (tier, key) in [
        (SubnetTier::Public, PUBLIC_SUBNET_IDS),
        (SubnetTier::Private, PRIVATE_SUBNET_IDS),
        (SubnetTier::Database, DATABASE_SUBNET_IDS),
    ] {
        let ids = tiers.get(&tier).map(|ids| ids.join(",")).unwrap_or_default();
        outputs.insert(key.to_string(), ids.into());
    }

    for registry in &d.config.registries {
        let spec = ResourceSpec::new(ResourceKind::Registry, &registry.name)
            .mutable("scan_on_push", registry.scan_on_push.to_string());
        let reconciled = reconciler.reconcile(&spec).await?;
        let uri = required_attribute(&reconciled, "uri")?;
        outputs.insert(format!("{REGISTRY_PREFIX}{}", registry.name), uri.into());
    }

    let group_name = format!("{}-db-subnets", d.name);
    let database_subnets = tiers.get(&SubnetTier::Database).cloned().unwrap_or_default();
    let group_spec =
        ResourceSpec::new(ResourceKind::DbSubnetGroup, &group_name).mutable_set("subnets", database_subnets);
    reconciler.reconcile(&group_spec).await?;
    outputs.insert(DB_SUBNET_GROUP.to_string(), group_name.clone().into());

    let db = &d.config.database;
    let db_spec = ResourceSpec::new(ResourceKind::Database, format!("{}-db", d.name))
        .immutable("engine", &db.engine)
        .immutable("engine_version", &db.engine_version)
        .immutable("db_name", &db.db_name)
        .immutable("username", &db.username)
        .immutable("port", db.port.to_string())
        .immutable("subnet_group", &group_name)
        .mutable("instance_class", &db.instance_class)
        .mutable("allocated_storage", db.allocated_storage.to_string());
    let database = reconciler.reconcile(&db_spec).await?;
    outputs.insert(DATABASE_ENDPOINT.to_string(), required_attribute(&database, "endpoint")?.into());
    outputs.insert(
        DATABASE_PORT.to_string(),
        database
            .handle
            .attribute("port")
            .map(str::to_string)
            .unwrap_or_else(|| db.port.to_string())
            .into(),
    );
    outputs.insert(
        DATABASE_NAME.to_string(),
        database.handle.attribute("db_name").unwrap_or(&db.db_name).into(),
    );
    outputs.insert(
        DATABASE_SECRET_ARN.to_string(),
        required_attribute(&database, "secret_arn")?.into(),
    );
    info!(vpc = %allocation.vpc, database = %database.handle.name, "network, registries and database provisioned");
    Ok(outputs)
}

/// The persisted allocation, or a fresh one that is persisted immediately.
async fn allocation(d: &Deployment<'_>) -> DeployResult<CidrAllocation> {
    let state = d.store.load()?;
    if let Some(saved) = state.output(CIDR_ALLOCATION) {
        let allocation: CidrAllocation = serde_json::from_str(saved)
            .map_err(|e| DeployError::Configuration(format!("persisted {CIDR_ALLOCATION} is unreadable: {e}")))?;
        info!(vpc = %allocation.vpc, "reusing persisted address allocation");
        return Ok(allocation);
    }

    let budget = d.config.retry.resource.to_budget();
    let request = d.config.network.allocation_request();
    let vpc_name = vpc_name(d);
    let existing = retry_until(
        &budget,
        "look up existing network",
        || d.backends.cloud.describe(ResourceKind::Network, &vpc_name),
        |_| true,
    )
    .await?;

    let allocation = match existing.as_ref().and_then(|vpc| vpc.fields.get("cidr")) {
        // No record but the network exists, e.g. after a reset: adopt its
        // block so the subnets line up with it again.
        Some(cidr) => {
            let block: CidrBlock = cidr.parse()?;
            info!(vpc = %block, "adopting existing network block");
            cidr::derive(request.first_octet, block.second_octet(), request.subnet_prefix)?
        }
        None => {
            let in_use = retry_until(
                &budget,
                "list network blocks in use",
                || d.backends.cloud.list_cidr_blocks(),
                |_| true,
            )
            .await?;
            debug!(in_use = in_use.len(), "network blocks in use");
            cidr::allocate(&request, &in_use)?
        }
    };
    let encoded = serde_json::to_string(&allocation)
        .map_err(|e| DeployError::Configuration(format!("encoding address allocation: {e}")))?;
    d.store.update(|s| {
        s.apply(CIDR_ALLOCATION, encoded.into())?;
        s.apply(VPC_CIDR, allocation.vpc.to_string().into())
    })?;
    info!(vpc = %allocation.vpc, subnets = allocation.subnets.len(), "address block allocated");
    Ok(allocation)
}

fn vpc_name(d: &Deployment<'_>) -> String {
    format!("{}-vpc", d.name)
}

fn zone_name(d: &Deployment<'_>, index: u8) -> DeployResult<String> {
    let suffix = d
        .config
        .network
        .zones
        .get(usize::from(index))
        .ok_or_else(|| DeployError::Configuration(format!("network.zones has no entry for zone {}", index + 1)))?;
    Ok(format!("{}{suffix}", d.config.deployment.region))
}

// ── CLUSTER_CONFIGURED ─────────────────────────────────────────────

pub async fn configure_cluster(d: &Deployment<'_>) -> DeployResult<Outputs> {
    let state = d.store.load()?;
    let role_arn = d
        .config
        .cluster
        .role_arn
        .as_deref()
        .ok_or_else(|| DeployError::Configuration("cluster.role_arn is required to create the cluster".to_string()))?;
    let subnets = required_output(&state, PRIVATE_SUBNET_IDS)?;
    let budget = d.config.retry.cluster.to_budget();

    let cluster_name = format!("{}-cluster", d.name);
    let spec = ResourceSpec::new(ResourceKind::Cluster, &cluster_name)
        .immutable("role_arn", role_arn)
        .immutable("subnets", subnets)
        .mutable("version", &d.config.cluster.version);
    let cluster = Reconciler::new(d.backends.cloud, budget).reconcile(&spec).await?;

    let mut outputs = Outputs::new();
    outputs.insert(CLUSTER_NAME.to_string(), cluster_name.clone().into());
    outputs.insert(CLUSTER_ENDPOINT.to_string(), required_attribute(&cluster, "endpoint")?.into());

    retry_until(
        &budget,
        "connect to cluster",
        || d.backends.cloud.connect_cluster(&cluster_name),
        |_| true,
    )
    .await?;
    wait_for(&budget, "cluster API reachable", || d.backends.orchestrator.ping()).await?;
    info!(cluster = %cluster_name, "cluster reachable");

    if let Some(path) = &d.config.cluster.load_balancer_manifest {
        let mut vars = template_vars(d, &state);
        vars.extend(outputs.iter().map(|(k, v)| (k.clone(), v.to_string())));
        vars.insert("namespace".to_string(), LOAD_BALANCER_NAMESPACE.to_string());
        let document = template::render(&d.read_manifest(path).await?, &vars)?;

        let resources = ClusterResources::new(d.backends.orchestrator);
        let spec = ResourceSpec::new(
            ResourceKind::LoadBalancerController,
            ClusterResources::resource_name(LOAD_BALANCER_NAMESPACE, LOAD_BALANCER_NAME),
        )
        .immutable("namespace", LOAD_BALANCER_NAMESPACE)
        .document(document);
        let controller = Reconciler::new(&resources, d.config.retry.rollout.to_budget())
            .reconcile(&spec)
            .await?;
        info!(action = ?controller.action, "load-balancer controller ready");
    }

    Ok(outputs)
}

// ── WORKLOADS_DEPLOYED ─────────────────────────────────────────────

/// Credentials held by the managed database secret.
#[derive(Debug, Deserialize)]
struct DatabaseSecret {
    username: Option<String>,
    password: Option<String>,
}

pub async fn deploy_workloads(d: &Deployment<'_>) -> DeployResult<Outputs> {
    let mut outputs = Outputs::new();

    if let Some(domain) = d.config.deployment.domain.as_deref() {
        let reconciler = Reconciler::new(d.backends.cloud, d.config.retry.certificate.to_budget());
        let cert = reconciler.apply(&certificate_spec(domain)).await?;
        reconciler.wait_stable(&cert.handle).await?;
        info!(%domain, "certificate issued");
        outputs.insert(CERTIFICATE_ARN.to_string(), attribute_or_id(&cert, "arn").into());
    }

    let state = d.store.load()?;
    let secret_name = format!("{}-db-credentials", d.name);
    let credentials = credentials(d, &state).await?;
    let mut namespaces: BTreeSet<&str> = d.config.workloads.iter().map(|w| d.namespace_of(w)).collect();
    namespaces.insert(d.config.deployment.namespace.as_str());
    for namespace in namespaces {
        let manifest = credentials_manifest(&secret_name, namespace, &credentials);
        retry_until(
            &d.config.retry.resource.to_budget(),
            "apply database credentials",
            || d.backends.orchestrator.apply(&manifest),
            |_| true,
        )
        .await?;
        info!(secret = %secret_name, %namespace, "database credentials applied");
    }
    outputs.insert(CREDENTIALS_SECRET.to_string(), secret_name.into());

    let mut vars = template_vars(d, &state);
    vars.extend(outputs.iter().map(|(k, v)| (k.clone(), v.to_string())));
    let resources = ClusterResources::new(d.backends.orchestrator);
    let reconciler = Reconciler::new(&resources, d.config.retry.rollout.to_budget());
    for workload in &d.config.workloads {
        let image = deploy_workload(d, &reconciler, &vars, &state, workload).await?;
        outputs.insert(format!("{WORKLOAD_PREFIX}{}", workload.name), image.into());
    }
    Ok(outputs)
}

async fn credentials(d: &Deployment<'_>, state: &DeploymentState) -> DeployResult<Vec<(&'static str, String)>> {
    let secret_arn = required_output(state, DATABASE_SECRET_ARN)?;
    let raw = retry_until(
        &d.config.retry.resource.to_budget(),
        "read database secret",
        || d.backends.secrets.get_secret(secret_arn),
        |_| true,
    )
    .await?;
    let secret: DatabaseSecret = serde_json::from_str(&raw)
        .map_err(|e| DeployError::Configuration(format!("database secret {secret_arn} is not JSON: {e}")))?;
    let missing = |field: &str| DeployError::Configuration(format!("database secret {secret_arn} has no {field}"));
    let username = secret.username.ok_or_else(|| missing("username"))?;
    let password = secret.password.ok_or_else(|| missing("password"))?;

    // The backend reads the connection target from DATABASE_HOST/PORT/NAME
    // and the login pair from DATABASE_URL as a JSON object.
    let login = serde_json::json!({"username": username, "password": password}).to_string();
    Ok(vec![
        ("DATABASE_HOST", required_output(state, DATABASE_ENDPOINT)?.to_string()),
        ("DATABASE_PORT", required_output(state, DATABASE_PORT)?.to_string()),
        ("DATABASE_NAME", required_output(state, DATABASE_NAME)?.to_string()),
        ("DATABASE_URL", login),
    ])
}

/// Secret manifest with JSON-quoted values, which YAML reads verbatim.
fn credentials_manifest(name: &str, namespace: &str, entries: &[(&'static str, String)]) -> String {
    let mut manifest = format!(
        "apiVersion: v1\nkind: Secret\nmetadata:\n  name: {name}\n  namespace: {namespace}\ntype: Opaque\nstringData:\n"
    );
    for (key, value) in entries {
        manifest.push_str(&format!("  {key}: {}\n", serde_json::Value::from(value.as_str())));
    }
    manifest
}

async fn deploy_workload(
    d: &Deployment<'_>,
    reconciler: &Reconciler<'_>,
    vars: &BTreeMap<String, String>,
    state: &DeploymentState,
    workload: &WorkloadConfig,
) -> DeployResult<String> {
    let namespace = d.namespace_of(workload);
    let mut vars = vars.clone();
    vars.insert("workload".to_string(), workload.name.clone());
    vars.insert("namespace".to_string(), namespace.to_string());
    let image = match &workload.registry {
        Some(registry) => {
            let uri = required_output(state, &format!("{REGISTRY_PREFIX}{registry}"))?;
            let image = format!("{uri}:{}", workload.tag);
            vars.insert("image".to_string(), image.clone());
            Some(image)
        }
        None => None,
    };

    let document = template::render(&d.read_manifest(&workload.manifest).await?, &vars)?;
    let mut spec = ResourceSpec::new(
        ResourceKind::Workload,
        ClusterResources::resource_name(namespace, &workload.name),
    )
    .immutable("namespace", namespace)
    .document(document);
    if let Some(image) = &image {
        spec = spec.mutable("image", image);
    }

    let reconciled = reconciler.reconcile(&spec).await?;
    info!(workload = %workload.name, %namespace, action = ?reconciled.action, "workload rolled out");
    Ok(image.unwrap_or_else(|| workload.tag.clone()))
}

// ── VALIDATED ──────────────────────────────────────────────────────

pub async fn validate(d: &Deployment<'_>) -> DeployResult<Outputs> {
    let plan = ValidationPlan::from_config(d.config);
    let report = HealthValidator::new(d.backends.probe, d.store, plan).run().await?;
    if !report.success() {
        return Err(DeployError::ValidationFailed(report.summary()));
    }
    Ok(Outputs::new())
}

// ── Helpers ────────────────────────────────────────────────────────

/// Placeholder values: every recorded output plus the deployment name.
fn template_vars(d: &Deployment<'_>, state: &DeploymentState) -> BTreeMap<String, String> {
    let mut vars: BTreeMap<String, String> = state
        .outputs
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect();
    vars.insert("name".to_string(), d.name.clone());
    vars.insert("region".to_string(), d.config.deployment.region.clone());
    vars.insert("namespace".to_string(), d.config.deployment.namespace.clone());
    vars
}

fn required_output<'s>(state: &'s DeploymentState, key: &str) -> DeployResult<&'s str> {
    state
        .output(key)
        .ok_or_else(|| DeployError::Configuration(format!("{key} was not recorded by an earlier phase")))
}

fn required_attribute(reconciled: &Reconciled, key: &str) -> DeployResult<String> {
    reconciled
        .handle
        .attribute(key)
        .map(str::to_string)
        .ok_or_else(|| {
            DeployError::Configuration(format!(
                "{} {} reported no {key}",
                reconciled.handle.kind, reconciled.handle.name
            ))
        })
}

fn attribute_or_id(reconciled: &Reconciled, key: &str) -> String {
    reconciled
        .handle
        .attribute(key)
        .unwrap_or(&reconciled.handle.id)
        .to_string()
}
