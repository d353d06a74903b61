//! `aws` CLI adapter.
//!
//! Every call asks for `--output json` and deserializes into a typed
//! response struct; nothing is scraped from human-oriented text. Error
//! classification reads the service error code that the CLI prints on
//! stderr (`An error occurred (Code) when calling ...`).
//!
//! Resource lookup is by logical name:
//!
//! | Kind | Looked up by |
//! |---|---|
//! | certificate | domain name among pending/issued certificates |
//! | network, subnet | `Name` tag |
//! | db-subnet-group, database, registry, cluster | service identifier |

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::api::{CloudProvider, ProviderFuture, SecretStore};
use crate::command::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
use crate::error::{ProviderError, ProviderResult};
use crate::platform::{HostPlatform, Platform};
use crate::types::{Fields, ObservedResource, ResourceHandle, ResourceKind, ResourceSpec, ResourceStatus};

/// Service error codes that mean "retrying will not help".
const FATAL_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "InvalidParameterValue",
    "InvalidParameterCombination",
    "InvalidParameterException",
    "ValidationException",
    "InvalidClientTokenId",
];

/// Number of recent database events fetched on a status call.
const EVENT_WINDOW_MINUTES: &str = "60";

#[derive(Clone)]
pub struct AwsCli {
    runner: Arc<dyn CommandRunner>,
    platform: Arc<dyn Platform>,
    region: String,
}

impl AwsCli {
    /// Adapter over the real `aws` executable.
    pub fn new(region: impl Into<String>) -> Self {
        Self::with_runner(Arc::new(ProcessRunner), Arc::new(HostPlatform::detect()), region)
    }

    pub fn with_runner(
        runner: Arc<dyn CommandRunner>,
        platform: Arc<dyn Platform>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            platform,
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn invocation(&self, args: &[&str]) -> Invocation {
        Invocation::new(self.platform.executable("aws"))
            .args(args.iter().copied())
            .args(["--region", self.region.as_str(), "--output", "json"])
    }

    async fn run(&self, args: &[&str]) -> ProviderResult<CommandOutput> {
        let invocation = self.invocation(args);
        let mut output = self.runner.run(&invocation).await?;
        output.stdout = self.platform.normalize_output(&output.stdout);
        output.stderr = self.platform.normalize_output(&output.stderr);
        if output.success() {
            Ok(output)
        } else {
            Err(classify(&invocation, output))
        }
    }

    /// Run and deserialize stdout.
    async fn call<T: DeserializeOwned>(&self, args: &[&str]) -> ProviderResult<T> {
        let output = self.run(args).await?;
        parse(&output.stdout)
    }

    /// Like [`call`](Self::call), but a not-found service error is `None`.
    async fn call_opt<T: DeserializeOwned>(&self, args: &[&str]) -> ProviderResult<Option<T>> {
        match self.call(args).await {
            Ok(value) => Ok(Some(value)),
            Err(ProviderError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── describe ───────────────────────────────────────────────────

    async fn describe_certificate(&self, domain: &str) -> ProviderResult<Option<ObservedResource>> {
        let list: CertificateList = self
            .call(&[
                "acm",
                "list-certificates",
                "--certificate-statuses",
                "PENDING_VALIDATION",
                "ISSUED",
            ])
            .await?;
        Ok(list
            .certificate_summary_list
            .into_iter()
            .find(|c| c.domain_name == domain)
            .map(|c| ObservedResource {
                id: c.certificate_arn.clone(),
                fields: fields([("domain", c.domain_name)]),
                attributes: fields([("arn", c.certificate_arn)]),
            }))
    }

    async fn describe_vpc(&self, name: &str) -> ProviderResult<Option<ObservedResource>> {
        let filter = format!("Name=tag:Name,Values={name}");
        let vpcs: Vpcs = self.call(&["ec2", "describe-vpcs", "--filters", &filter]).await?;
        Ok(vpcs.vpcs.into_iter().next().map(Vpc::observed))
    }

    async fn describe_subnet(&self, name: &str) -> ProviderResult<Option<ObservedResource>> {
        let filter = format!("Name=tag:Name,Values={name}");
        let subnets: Subnets = self.call(&["ec2", "describe-subnets", "--filters", &filter]).await?;
        Ok(subnets.subnets.into_iter().next().map(Subnet::observed))
    }

    async fn describe_db_subnet_group(&self, name: &str) -> ProviderResult<Option<ObservedResource>> {
        let groups: Option<DbSubnetGroups> = self
            .call_opt(&["rds", "describe-db-subnet-groups", "--db-subnet-group-name", name])
            .await?;
        Ok(groups
            .and_then(|g| g.db_subnet_groups.into_iter().next())
            .map(DbSubnetGroup::observed))
    }

    async fn describe_database(&self, name: &str) -> ProviderResult<Option<ObservedResource>> {
        let instances: Option<DbInstances> = self
            .call_opt(&["rds", "describe-db-instances", "--db-instance-identifier", name])
            .await?;
        Ok(instances
            .and_then(|i| i.db_instances.into_iter().next())
            .map(DbInstance::observed))
    }

    async fn describe_registry(&self, name: &str) -> ProviderResult<Option<ObservedResource>> {
        let repos: Option<Repositories> = self
            .call_opt(&["ecr", "describe-repositories", "--repository-names", name])
            .await?;
        Ok(repos
            .and_then(|r| r.repositories.into_iter().next())
            .map(Repository::observed))
    }

    async fn describe_cluster(&self, name: &str) -> ProviderResult<Option<ObservedResource>> {
        let cluster: Option<ClusterEnvelope> = self.call_opt(&["eks", "describe-cluster", "--name", name]).await?;
        Ok(cluster.map(|c| c.cluster.observed()))
    }

    // ── create ─────────────────────────────────────────────────────

    async fn create_resource(&self, spec: &ResourceSpec) -> ProviderResult<ObservedResource> {
        match spec.kind {
            ResourceKind::Certificate => {
                let token = idempotency_token(&spec.fingerprint());
                let created: CertificateCreated = self
                    .call(&[
                        "acm",
                        "request-certificate",
                        "--domain-name",
                        &spec.name,
                        "--validation-method",
                        "DNS",
                        "--idempotency-token",
                        &token,
                    ])
                    .await?;
                Ok(ObservedResource {
                    id: created.certificate_arn.clone(),
                    fields: fields([("domain", spec.name.clone())]),
                    attributes: fields([("arn", created.certificate_arn)]),
                })
            }
            ResourceKind::Network => {
                let tags = name_tags("vpc", &spec.name);
                let created: VpcEnvelope = self
                    .call(&[
                        "ec2",
                        "create-vpc",
                        "--cidr-block",
                        required(spec, "cidr")?,
                        "--tag-specifications",
                        &tags,
                    ])
                    .await?;
                Ok(created.vpc.observed())
            }
            ResourceKind::Subnet => {
                let tags = name_tags("subnet", &spec.name);
                let created: SubnetEnvelope = self
                    .call(&[
                        "ec2",
                        "create-subnet",
                        "--vpc-id",
                        required(spec, "vpc")?,
                        "--cidr-block",
                        required(spec, "cidr")?,
                        "--availability-zone",
                        required(spec, "zone")?,
                        "--tag-specifications",
                        &tags,
                    ])
                    .await?;
                Ok(created.subnet.observed())
            }
            ResourceKind::DbSubnetGroup => {
                let description = format!("Subnets for {}", spec.name);
                let mut args = vec![
                    "rds",
                    "create-db-subnet-group",
                    "--db-subnet-group-name",
                    spec.name.as_str(),
                    "--db-subnet-group-description",
                    description.as_str(),
                    "--subnet-ids",
                ];
                let subnets = required(spec, "subnets")?;
                args.extend(subnets.split(','));
                let created: DbSubnetGroupEnvelope = self.call(&args).await?;
                Ok(created.db_subnet_group.observed())
            }
            ResourceKind::Database => {
                let created: DbInstanceEnvelope = self
                    .call(&[
                        "rds",
                        "create-db-instance",
                        "--db-instance-identifier",
                        &spec.name,
                        "--engine",
                        required(spec, "engine")?,
                        "--engine-version",
                        required(spec, "engine_version")?,
                        "--db-instance-class",
                        required(spec, "instance_class")?,
                        "--allocated-storage",
                        required(spec, "allocated_storage")?,
                        "--db-name",
                        required(spec, "db_name")?,
                        "--master-username",
                        required(spec, "username")?,
                        "--port",
                        required(spec, "port")?,
                        "--db-subnet-group-name",
                        required(spec, "subnet_group")?,
                        "--manage-master-user-password",
                        "--no-publicly-accessible",
                    ])
                    .await?;
                Ok(created.db_instance.observed())
            }
            ResourceKind::Registry => {
                let scanning = format!("scanOnPush={}", spec.field("scan_on_push").unwrap_or("false"));
                let created: RepositoryEnvelope = self
                    .call(&[
                        "ecr",
                        "create-repository",
                        "--repository-name",
                        &spec.name,
                        "--image-scanning-configuration",
                        &scanning,
                    ])
                    .await?;
                Ok(created.repository.observed())
            }
            ResourceKind::Cluster => {
                let vpc_config = format!("subnetIds={}", required(spec, "subnets")?);
                let created: ClusterEnvelope = self
                    .call(&[
                        "eks",
                        "create-cluster",
                        "--name",
                        &spec.name,
                        "--role-arn",
                        required(spec, "role_arn")?,
                        "--kubernetes-version",
                        required(spec, "version")?,
                        "--resources-vpc-config",
                        &vpc_config,
                    ])
                    .await?;
                Ok(created.cluster.observed())
            }
            kind => Err(ProviderError::NotSupported {
                kind,
                operation: "create".to_string(),
            }),
        }
    }

    // ── update ─────────────────────────────────────────────────────

    async fn update_resource(&self, handle: &ResourceHandle, changes: &Fields) -> ProviderResult<ObservedResource> {
        let change = |key: &str| changes.get(key).map(String::as_str);
        match handle.kind {
            ResourceKind::DbSubnetGroup => {
                let mut args = vec![
                    "rds",
                    "modify-db-subnet-group",
                    "--db-subnet-group-name",
                    handle.name.as_str(),
                    "--subnet-ids",
                ];
                let subnets = change("subnets").unwrap_or_default();
                args.extend(subnets.split(','));
                let updated: DbSubnetGroupEnvelope = self.call(&args).await?;
                Ok(updated.db_subnet_group.observed())
            }
            ResourceKind::Database => {
                let mut args = vec!["rds", "modify-db-instance", "--db-instance-identifier", handle.name.as_str()];
                if let Some(class) = change("instance_class") {
                    args.extend(["--db-instance-class", class]);
                }
                if let Some(storage) = change("allocated_storage") {
                    args.extend(["--allocated-storage", storage]);
                }
                args.push("--apply-immediately");
                let updated: DbInstanceEnvelope = self.call(&args).await?;
                Ok(updated.db_instance.observed())
            }
            ResourceKind::Registry => {
                let scanning = format!("scanOnPush={}", change("scan_on_push").unwrap_or("false"));
                self.run(&[
                    "ecr",
                    "put-image-scanning-configuration",
                    "--repository-name",
                    &handle.name,
                    "--image-scanning-configuration",
                    &scanning,
                ])
                .await?;
                self.describe_registry(&handle.name)
                    .await?
                    .ok_or_else(|| not_found(handle.kind, &handle.name))
            }
            ResourceKind::Cluster => {
                let version = change("version").ok_or_else(|| ProviderError::NotSupported {
                    kind: handle.kind,
                    operation: format!("update of {:?}", changes.keys().collect::<Vec<_>>()),
                })?;
                self.run(&["eks", "update-cluster-version", "--name", &handle.name, "--kubernetes-version", version])
                    .await?;
                self.describe_cluster(&handle.name)
                    .await?
                    .ok_or_else(|| not_found(handle.kind, &handle.name))
            }
            kind => Err(ProviderError::NotSupported {
                kind,
                operation: "update".to_string(),
            }),
        }
    }

    // ── status ─────────────────────────────────────────────────────

    async fn resource_status(&self, handle: &ResourceHandle) -> ProviderResult<ResourceStatus> {
        match handle.kind {
            ResourceKind::Certificate => {
                let described: CertificateDetailEnvelope = self
                    .call(&["acm", "describe-certificate", "--certificate-arn", &handle.id])
                    .await?;
                Ok(described.certificate.status())
            }
            ResourceKind::Network => {
                let vpcs: Vpcs = self.call(&["ec2", "describe-vpcs", "--vpc-ids", &handle.id]).await?;
                let vpc = vpcs.vpcs.into_iter().next().ok_or_else(|| not_found(handle.kind, &handle.name))?;
                Ok(state_status(&vpc.state, "available"))
            }
            ResourceKind::Subnet => {
                let subnets: Subnets = self
                    .call(&["ec2", "describe-subnets", "--subnet-ids", &handle.id])
                    .await?;
                let subnet = subnets
                    .subnets
                    .into_iter()
                    .next()
                    .ok_or_else(|| not_found(handle.kind, &handle.name))?;
                Ok(state_status(&subnet.state, "available"))
            }
            ResourceKind::DbSubnetGroup => {
                let group = self
                    .describe_db_subnet_group(&handle.name)
                    .await?
                    .ok_or_else(|| not_found(handle.kind, &handle.name))?;
                let state = group.attributes.get("status").cloned().unwrap_or_default();
                Ok(state_status(&state, "Complete"))
            }
            ResourceKind::Database => {
                let instances: DbInstances = self
                    .call(&["rds", "describe-db-instances", "--db-instance-identifier", &handle.name])
                    .await?;
                let instance = instances
                    .db_instances
                    .into_iter()
                    .next()
                    .ok_or_else(|| not_found(handle.kind, &handle.name))?;
                let mut status = state_status(&instance.db_instance_status, "available");
                status.attributes = instance.observed().attributes;
                if !status.ready {
                    status.events = self.database_events(&handle.name).await;
                }
                Ok(status)
            }
            ResourceKind::Registry => {
                let repo = self
                    .describe_registry(&handle.name)
                    .await?
                    .ok_or_else(|| not_found(handle.kind, &handle.name))?;
                let mut status = ResourceStatus::ready("available");
                status.attributes = repo.attributes;
                Ok(status)
            }
            ResourceKind::Cluster => {
                let envelope: ClusterEnvelope = self.call(&["eks", "describe-cluster", "--name", &handle.name]).await?;
                let cluster = envelope.cluster;
                let mut status = state_status(&cluster.status, "ACTIVE");
                status.events = cluster
                    .health
                    .as_ref()
                    .map(|h| h.issues.iter().map(|i| format!("{}: {}", i.code, i.message)).collect())
                    .unwrap_or_default();
                status.attributes = cluster.observed().attributes;
                Ok(status)
            }
            kind => Err(ProviderError::NotSupported {
                kind,
                operation: "status".to_string(),
            }),
        }
    }

    /// Recent database events, oldest first. Event lookup failures only
    /// cost diagnostics, so they are logged and dropped.
    async fn database_events(&self, name: &str) -> Vec<String> {
        let result: ProviderResult<DbEvents> = self
            .call(&[
                "rds",
                "describe-events",
                "--source-type",
                "db-instance",
                "--source-identifier",
                name,
                "--duration",
                EVENT_WINDOW_MINUTES,
            ])
            .await;
        match result {
            Ok(events) => events.events.into_iter().map(|e| e.message).collect(),
            Err(e) => {
                warn!(database = %name, error = %e, "could not fetch database events");
                Vec::new()
            }
        }
    }
}

impl CloudProvider for AwsCli {
    fn describe<'a>(&'a self, kind: ResourceKind, name: &'a str) -> ProviderFuture<'a, Option<ObservedResource>> {
        Box::pin(async move {
            let observed = match kind {
                ResourceKind::Certificate => self.describe_certificate(name).await?,
                ResourceKind::Network => self.describe_vpc(name).await?,
                ResourceKind::Subnet => self.describe_subnet(name).await?,
                ResourceKind::DbSubnetGroup => self.describe_db_subnet_group(name).await?,
                ResourceKind::Database => self.describe_database(name).await?,
                ResourceKind::Registry => self.describe_registry(name).await?,
                ResourceKind::Cluster => self.describe_cluster(name).await?,
                kind => {
                    return Err(ProviderError::NotSupported {
                        kind,
                        operation: "describe".to_string(),
                    });
                }
            };
            debug!(%kind, %name, found = observed.is_some(), "described");
            Ok(observed)
        })
    }

    fn create<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, ObservedResource> {
        Box::pin(self.create_resource(spec))
    }

    fn update<'a>(
        &'a self,
        handle: &'a ResourceHandle,
        _spec: &'a ResourceSpec,
        changes: &'a Fields,
    ) -> ProviderFuture<'a, ObservedResource> {
        Box::pin(self.update_resource(handle, changes))
    }

    fn status<'a>(&'a self, handle: &'a ResourceHandle) -> ProviderFuture<'a, ResourceStatus> {
        Box::pin(self.resource_status(handle))
    }

    fn list_cidr_blocks(&self) -> ProviderFuture<'_, Vec<String>> {
        Box::pin(async move {
            let vpcs: Vpcs = self.call(&["ec2", "describe-vpcs"]).await?;
            let mut blocks = Vec::new();
            for vpc in vpcs.vpcs {
                blocks.push(vpc.cidr_block);
                blocks.extend(
                    vpc.cidr_block_association_set
                        .into_iter()
                        .map(|a| a.cidr_block),
                );
            }
            blocks.sort();
            blocks.dedup();
            Ok(blocks)
        })
    }

    fn connect_cluster<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.run(&["eks", "update-kubeconfig", "--name", name]).await?;
            Ok(())
        })
    }
}

impl SecretStore for AwsCli {
    fn get_secret<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let secret: SecretValue = self
                .call(&["secretsmanager", "get-secret-value", "--secret-id", id])
                .await?;
            secret
                .secret_string
                .ok_or_else(|| ProviderError::Parse(format!("secret {id} has no string value")))
        })
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn parse<T: DeserializeOwned>(stdout: &str) -> ProviderResult<T> {
    serde_json::from_str(stdout).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Service error code from CLI stderr, e.g. `DBInstanceNotFound`.
pub fn error_code(stderr: &str) -> Option<&str> {
    let start = stderr.find("An error occurred (")? + "An error occurred (".len();
    let len = stderr[start..].find(')')?;
    Some(&stderr[start..start + len])
}

fn classify(invocation: &Invocation, output: CommandOutput) -> ProviderError {
    let stderr = output.stderr.trim().to_string();
    match error_code(&stderr) {
        Some(code) if code.contains("NotFound") => ProviderError::NotFound {
            kind: code.to_string(),
            name: invocation.display(),
        },
        Some(code) if FATAL_CODES.contains(&code) => ProviderError::Configuration(stderr),
        _ => ProviderError::Command {
            program: invocation.program.clone(),
            status: output.status,
            stderr,
        },
    }
}

fn not_found(kind: ResourceKind, name: &str) -> ProviderError {
    ProviderError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

fn required<'a>(spec: &'a ResourceSpec, key: &str) -> ProviderResult<&'a str> {
    spec.field(key)
        .ok_or_else(|| ProviderError::Configuration(format!("{} {} has no {key}", spec.kind, spec.name)))
}

fn fields<const N: usize>(pairs: [(&str, String); N]) -> Fields {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn name_tags(resource_type: &str, name: &str) -> String {
    format!("ResourceType={resource_type},Tags=[{{Key=Name,Value={name}}}]")
}

/// ACM tokens are at most 32 word characters.
fn idempotency_token(fingerprint: &str) -> String {
    fingerprint.chars().filter(char::is_ascii_alphanumeric).take(32).collect()
}

fn state_status(state: &str, ready_state: &str) -> ResourceStatus {
    if state == ready_state {
        ResourceStatus::ready(state)
    } else {
        ResourceStatus::pending(state)
    }
}

// ── response types ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateList {
    #[serde(default)]
    certificate_summary_list: Vec<CertificateSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateSummary {
    certificate_arn: String,
    domain_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateCreated {
    certificate_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateDetailEnvelope {
    certificate: CertificateDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateDetail {
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    domain_validation_options: Vec<DomainValidation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainValidation {
    domain_name: String,
    #[serde(default)]
    validation_status: Option<String>,
    #[serde(default)]
    resource_record: Option<ResourceRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceRecord {
    name: String,
    #[serde(rename = "Type")]
    record_type: String,
    value: String,
}

impl CertificateDetail {
    fn status(self) -> ResourceStatus {
        let mut status = state_status(&self.status, "ISSUED");
        for option in self.domain_validation_options {
            let validation = option.validation_status.unwrap_or_default();
            match option.resource_record {
                Some(r) => status.events.push(format!(
                    "{} {validation}: {} {} {}",
                    option.domain_name, r.name, r.record_type, r.value
                )),
                None => status.events.push(format!("{} {validation}", option.domain_name)),
            }
        }
        if let Some(reason) = self.failure_reason {
            status.events.push(format!("failure: {reason}"));
        }
        status
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Vpcs {
    #[serde(default)]
    vpcs: Vec<Vpc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VpcEnvelope {
    vpc: Vpc,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Vpc {
    vpc_id: String,
    cidr_block: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    cidr_block_association_set: Vec<CidrAssociation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CidrAssociation {
    cidr_block: String,
}

impl Vpc {
    fn observed(self) -> ObservedResource {
        ObservedResource {
            fields: fields([("cidr", self.cidr_block.clone())]),
            attributes: fields([("vpc_id", self.vpc_id.clone()), ("cidr", self.cidr_block)]),
            id: self.vpc_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Subnets {
    #[serde(default)]
    subnets: Vec<Subnet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SubnetEnvelope {
    subnet: Subnet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Subnet {
    subnet_id: String,
    vpc_id: String,
    cidr_block: String,
    availability_zone: String,
    #[serde(default)]
    state: String,
}

impl Subnet {
    fn observed(self) -> ObservedResource {
        ObservedResource {
            fields: fields([
                ("vpc", self.vpc_id),
                ("cidr", self.cidr_block),
                ("zone", self.availability_zone),
            ]),
            attributes: fields([("subnet_id", self.subnet_id.clone())]),
            id: self.subnet_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DbSubnetGroups {
    #[serde(rename = "DBSubnetGroups", default)]
    db_subnet_groups: Vec<DbSubnetGroup>,
}

#[derive(Debug, Deserialize)]
struct DbSubnetGroupEnvelope {
    #[serde(rename = "DBSubnetGroup")]
    db_subnet_group: DbSubnetGroup,
}

#[derive(Debug, Deserialize)]
struct DbSubnetGroup {
    #[serde(rename = "DBSubnetGroupName")]
    name: String,
    #[serde(rename = "SubnetGroupStatus", default)]
    status: String,
    #[serde(rename = "Subnets", default)]
    subnets: Vec<DbSubnet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DbSubnet {
    subnet_identifier: String,
}

impl DbSubnetGroup {
    fn observed(self) -> ObservedResource {
        let mut subnets: Vec<String> = self.subnets.into_iter().map(|s| s.subnet_identifier).collect();
        subnets.sort();
        ObservedResource {
            fields: fields([("subnets", subnets.join(","))]),
            attributes: fields([("status", self.status)]),
            id: self.name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DbInstances {
    #[serde(rename = "DBInstances", default)]
    db_instances: Vec<DbInstance>,
}

#[derive(Debug, Deserialize)]
struct DbInstanceEnvelope {
    #[serde(rename = "DBInstance")]
    db_instance: DbInstance,
}

#[derive(Debug, Deserialize)]
struct DbInstance {
    #[serde(rename = "DBInstanceIdentifier")]
    identifier: String,
    #[serde(rename = "DBInstanceStatus", default)]
    db_instance_status: String,
    #[serde(rename = "Engine")]
    engine: String,
    #[serde(rename = "DBInstanceClass")]
    instance_class: String,
    #[serde(rename = "AllocatedStorage")]
    allocated_storage: u32,
    #[serde(rename = "DBName", default)]
    db_name: Option<String>,
    #[serde(rename = "MasterUsername", default)]
    username: Option<String>,
    #[serde(rename = "Endpoint", default)]
    endpoint: Option<DbEndpoint>,
    #[serde(rename = "MasterUserSecret", default)]
    master_user_secret: Option<DbSecret>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DbEndpoint {
    address: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DbSecret {
    secret_arn: String,
}

impl DbInstance {
    fn observed(self) -> ObservedResource {
        let mut observed = ObservedResource {
            id: self.identifier,
            fields: fields([
                ("engine", self.engine),
                ("instance_class", self.instance_class),
                ("allocated_storage", self.allocated_storage.to_string()),
            ]),
            attributes: Fields::new(),
        };
        if let Some(db_name) = self.db_name {
            observed.fields.insert("db_name".to_string(), db_name.clone());
            observed.attributes.insert("db_name".to_string(), db_name);
        }
        if let Some(username) = self.username {
            observed.fields.insert("username".to_string(), username);
        }
        if let Some(endpoint) = self.endpoint {
            observed.attributes.insert("endpoint".to_string(), endpoint.address);
            observed.attributes.insert("port".to_string(), endpoint.port.to_string());
        }
        if let Some(secret) = self.master_user_secret {
            observed.attributes.insert("secret_arn".to_string(), secret.secret_arn);
        }
        observed
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DbEvents {
    #[serde(default)]
    events: Vec<DbEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DbEvent {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Repositories {
    #[serde(default)]
    repositories: Vec<Repository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryEnvelope {
    repository: Repository,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Repository {
    repository_name: String,
    repository_uri: String,
    #[serde(default)]
    image_scanning_configuration: Option<ScanningConfiguration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanningConfiguration {
    scan_on_push: bool,
}

impl Repository {
    fn observed(self) -> ObservedResource {
        let scan = self.image_scanning_configuration.is_some_and(|c| c.scan_on_push);
        ObservedResource {
            fields: fields([("scan_on_push", scan.to_string())]),
            attributes: fields([("uri", self.repository_uri)]),
            id: self.repository_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClusterEnvelope {
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cluster {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    role_arn: Option<String>,
    #[serde(default)]
    health: Option<ClusterHealth>,
}

#[derive(Debug, Deserialize)]
struct ClusterHealth {
    #[serde(default)]
    issues: Vec<ClusterIssue>,
}

#[derive(Debug, Deserialize)]
struct ClusterIssue {
    code: String,
    message: String,
}

impl Cluster {
    fn observed(self) -> ObservedResource {
        let mut observed = ObservedResource {
            id: self.name,
            ..Default::default()
        };
        if let Some(version) = self.version {
            observed.fields.insert("version".to_string(), version);
        }
        if let Some(role_arn) = self.role_arn {
            observed.fields.insert("role_arn".to_string(), role_arn);
        }
        if let Some(endpoint) = self.endpoint {
            observed.attributes.insert("endpoint".to_string(), endpoint);
        }
        observed
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecretValue {
    #[serde(default)]
    secret_string: Option<String>,
}
