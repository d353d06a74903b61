//! End-to-end deployment scenarios against in-memory backends.

use std::fs;

use landfall_core::LandfallConfig;
use landfall_core::config::{BudgetConfig, RegistryConfig, WorkloadConfig};
use landfall_health::fake::FakeProbe;
use landfall_orchestrator::steps::{self, CREDENTIALS_SECRET, VPC_CIDR};
use landfall_orchestrator::{Backends, DeployError, Deployment, Sequencer, open_state};
use landfall_provider::ResourceKind;
use landfall_provider::fake::{FakeCloud, FakeOrchestrator, FakeSecrets};
use landfall_state::{DeploymentStatus, Phase, StateStore};
use tempfile::TempDir;

const WEB_MANIFEST: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{workload}}
  namespace: {{namespace}}
spec:
  template:
    spec:
      containers:
        - image: {{image}}
          envFrom:
            - secretRef:
                name: {{credentialsSecret}}
";

fn budget(attempts: u32) -> BudgetConfig {
    BudgetConfig {
        attempts,
        delay: "1s".to_string(),
    }
}

struct Env {
    dir: TempDir,
    config: LandfallConfig,
    store: StateStore,
    cloud: FakeCloud,
    orchestrator: FakeOrchestrator,
    secrets: FakeSecrets,
    probe: FakeProbe,
}

impl Env {
    fn new() -> Self {
        Self::with_cloud(FakeCloud::new())
    }

    fn with_cloud(cloud: FakeCloud) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("web.yaml"), WEB_MANIFEST).unwrap();

        let mut config = LandfallConfig::default();
        config.deployment.domain = Some("demo.example.com".to_string());
        config.cluster.role_arn = Some("arn:aws:iam::123456789012:role/eks-cluster".to_string());
        config.registries = vec![RegistryConfig {
            name: "demo-backend".to_string(),
            scan_on_push: true,
        }];
        config.workloads = vec![WorkloadConfig {
            name: "web".to_string(),
            namespace: None,
            manifest: "web.yaml".to_string(),
            registry: Some("demo-backend".to_string()),
            tag: "v1".to_string(),
        }];
        config.retry.resource = budget(5);
        config.retry.cluster = budget(5);
        config.retry.certificate = budget(5);
        config.retry.rollout = budget(5);
        config.retry.endpoint = budget(3);
        config.retry.database = budget(3);

        let store = StateStore::open_file(&dir.path().join("demo.state.json"));
        let secrets = FakeSecrets::new();
        secrets.insert(
            "arn:aws:secretsmanager:fake:secret:demo-db",
            r#"{"username":"postgres","password":"s3cret"}"#,
        );

        Self {
            dir,
            config,
            store,
            cloud,
            orchestrator: FakeOrchestrator::new(),
            secrets,
            probe: FakeProbe::healthy(true),
        }
    }

    fn sequencer(&self) -> Sequencer<'_> {
        open_state(&self.store, "demo", 6, false).unwrap();
        let backends = Backends {
            cloud: &self.cloud,
            orchestrator: &self.orchestrator,
            secrets: &self.secrets,
            probe: &self.probe,
        };
        let deployment = Deployment::new("demo", &self.config, &self.store, backends).with_manifest_root(self.dir.path());
        Sequencer::new(deployment)
    }

    fn state_file(&self) -> String {
        fs::read_to_string(self.dir.path().join("demo.state.json")).unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn healthy_environment_reaches_complete() {
    let env = Env::new();
    let state = env.sequencer().run().await.unwrap();

    assert_eq!(state.status, DeploymentStatus::Complete);
    assert_eq!(state.required_endpoint_count, 6);
    assert_eq!(state.tested_endpoint_count, 6);
    assert!(state.database_connected);
    assert!(env.store.is_complete().unwrap());

    assert_eq!(env.cloud.creates(ResourceKind::Certificate), 1);
    assert_eq!(env.cloud.creates(ResourceKind::Network), 1);
    assert_eq!(env.cloud.creates(ResourceKind::Subnet), 6);
    assert_eq!(env.cloud.creates(ResourceKind::Registry), 1);
    assert_eq!(env.cloud.creates(ResourceKind::Database), 1);
    assert_eq!(env.cloud.creates(ResourceKind::Cluster), 1);
    assert_eq!(env.cloud.connected_clusters(), vec!["demo-cluster".to_string()]);

    let secret = env
        .orchestrator
        .object("secret", "default", "demo-db-credentials")
        .expect("credentials secret applied");
    assert_eq!(secret["metadata"]["name"], "demo-db-credentials");
    let secret_manifest = env
        .orchestrator
        .applied()
        .into_iter()
        .find(|m| m.contains("kind: Secret"))
        .unwrap();
    for key in ["DATABASE_HOST", "DATABASE_PORT", "DATABASE_NAME", "DATABASE_URL"] {
        assert!(secret_manifest.contains(&format!("  {key}: ")), "{key} missing");
    }
    let web = env.orchestrator.object("deployment", "default", "web").expect("workload applied");
    assert_eq!(
        web["spec"]["template"]["spec"]["containers"][0]["image"],
        "123456789012.dkr.ecr.fake.amazonaws.com/demo-backend:v1"
    );
    assert_eq!(state.output(CREDENTIALS_SECRET), Some("demo-db-credentials"));

    // The record on disk is plain JSON an operator can read.
    let on_disk: serde_json::Value = serde_json::from_str(&env.state_file()).unwrap();
    assert_eq!(on_disk["status"], "COMPLETE");
}

#[tokio::test(start_paused = true)]
async fn one_failing_endpoint_blocks_completion() {
    let env = Env::new();
    env.probe.respond("/environment", 503, "unavailable");

    let err = env.sequencer().run().await.unwrap_err();

    assert_eq!(err.phase(), Some(Phase::Validated));
    assert!(matches!(err.root(), DeployError::ValidationFailed(_)));
    let state = env.store.load().unwrap();
    assert_eq!(state.tested_endpoint_count, 5);
    assert_ne!(state.status, DeploymentStatus::Complete);
    assert_eq!(state.current_phase, Some(Phase::Validated));
    assert!(!state.phase_done(Phase::Validated));
    assert_eq!(env.probe.calls("/environment"), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_validation_resumes_at_validation_only() {
    let env = Env::new();
    env.probe.respond("/environment", 503, "unavailable");
    env.sequencer().run().await.unwrap_err();
    let mutations = env.cloud.mutations();

    env.probe.respond("/environment", 200, "ok");
    let state = env.sequencer().run().await.unwrap();

    assert_eq!(state.status, DeploymentStatus::Complete);
    assert_eq!(state.tested_endpoint_count, 6);
    assert_eq!(env.cloud.mutations(), mutations);
}

#[tokio::test(start_paused = true)]
async fn resume_after_cluster_skips_earlier_phase_bodies() {
    let env = Env::new();
    let state = env.sequencer().run_until(Phase::ClusterConfigured).await.unwrap();
    assert_eq!(state.current_phase, Some(Phase::ClusterConfigured));
    assert!(env.orchestrator.object("deployment", "default", "web").is_none());

    let network_describes = env.cloud.describes(ResourceKind::Network);
    let database_describes = env.cloud.describes(ResourceKind::Database);
    let cert_creates = env.cloud.creates(ResourceKind::Certificate);
    let listings = env.cloud.cidr_listings();

    let state = env.sequencer().run().await.unwrap();

    assert_eq!(state.status, DeploymentStatus::Complete);
    assert_eq!(env.cloud.describes(ResourceKind::Network), network_describes);
    assert_eq!(env.cloud.describes(ResourceKind::Database), database_describes);
    assert_eq!(env.cloud.creates(ResourceKind::Certificate), cert_creates);
    assert_eq!(env.cloud.creates(ResourceKind::Network), 1);
    assert_eq!(env.cloud.creates(ResourceKind::Cluster), 1);
    assert_eq!(env.cloud.cidr_listings(), listings);
    assert!(env.orchestrator.object("deployment", "default", "web").is_some());
}

#[tokio::test(start_paused = true)]
async fn allocation_skips_used_octets() {
    let cloud = FakeCloud::new().with_cidr_blocks(["10.1.0.0/16", "10.2.0.0/16", "10.3.0.0/16"]);
    let mut env = Env::with_cloud(cloud);
    env.config.network.preferred_octet = 1;

    let state = env
        .sequencer()
        .run_until(Phase::NetworkDbRegistryProvisioned)
        .await
        .unwrap();

    assert_eq!(state.output(VPC_CIDR), Some("10.4.0.0/16"));
    let expected = [
        ("public-1", "10.4.1.0/24"),
        ("public-2", "10.4.2.0/24"),
        ("private-1", "10.4.3.0/24"),
        ("private-2", "10.4.4.0/24"),
        ("database-1", "10.4.5.0/24"),
        ("database-2", "10.4.6.0/24"),
    ];
    for (label, cidr) in expected {
        let fields = env
            .cloud
            .fields(ResourceKind::Subnet, &format!("demo-{label}"))
            .unwrap_or_else(|| panic!("subnet {label} missing"));
        assert_eq!(fields["cidr"], cidr, "subnet {label}");
    }
    let zone = &env.cloud.fields(ResourceKind::Subnet, "demo-private-2").unwrap()["zone"];
    assert_eq!(zone, "us-east-1b");
}

#[tokio::test(start_paused = true)]
async fn allocation_is_persisted_before_resources_and_reused() {
    let env = Env::new();
    env.cloud.fail_creates(ResourceKind::Database);

    let err = env.sequencer().run().await.unwrap_err();
    assert_eq!(err.phase(), Some(Phase::NetworkDbRegistryProvisioned));
    let first = env.store.load().unwrap();
    assert!(first.output(steps::CIDR_ALLOCATION).is_some());

    // The VPC created by the failed run now shows up as in use; a second
    // allocation would pick a different block.
    env.sequencer().run().await.unwrap_err();
    let second = env.store.load().unwrap();
    assert_eq!(second.output(VPC_CIDR), first.output(VPC_CIDR));
    assert_eq!(env.cloud.cidr_listings(), 1);
    assert_eq!(env.cloud.creates(ResourceKind::Network), 1);
    assert_eq!(env.cloud.creates(ResourceKind::Subnet), 6);
}

#[tokio::test(start_paused = true)]
async fn exhausted_address_space_is_fatal() {
    let used: Vec<String> = (0..=254).map(|octet| format!("10.{octet}.0.0/16")).collect();
    let env = Env::with_cloud(FakeCloud::new().with_cidr_blocks(used));

    let err = env.sequencer().run().await.unwrap_err();

    assert_eq!(err.phase(), Some(Phase::NetworkDbRegistryProvisioned));
    assert!(matches!(err.root(), DeployError::ResourceExhausted(_)));
    assert_eq!(env.cloud.creates(ResourceKind::Network), 0);
}

#[tokio::test(start_paused = true)]
async fn cluster_that_never_stabilizes_reports_events() {
    let env = Env::new();
    env.cloud.never_ready(ResourceKind::Cluster);

    let err = env.sequencer().run().await.unwrap_err();

    assert_eq!(err.phase(), Some(Phase::ClusterConfigured));
    match err.root() {
        DeployError::StabilizationTimeout { kind, attempts, events, .. } => {
            assert_eq!(*kind, ResourceKind::Cluster);
            assert_eq!(*attempts, 5);
            assert!(events.iter().any(|e| e == "state: creating"));
        }
        other => panic!("expected a stabilization timeout, got {other}"),
    }
    assert!(!env.store.load().unwrap().phase_done(Phase::ClusterConfigured));
}

#[tokio::test(start_paused = true)]
async fn secret_without_password_is_a_configuration_error() {
    let env = Env::new();
    env.secrets
        .insert("arn:aws:secretsmanager:fake:secret:demo-db", r#"{"username":"postgres"}"#);

    let err = env.sequencer().run().await.unwrap_err();

    assert_eq!(err.phase(), Some(Phase::WorkloadsDeployed));
    assert!(matches!(err.root(), DeployError::Configuration(msg) if msg.contains("password")));
}

#[tokio::test(start_paused = true)]
async fn workload_image_change_updates_in_place() {
    let mut env = Env::new();
    env.sequencer().run().await.unwrap();
    let applied = env.orchestrator.applied().len();

    // A reset drops the recorded allocation; the existing network is
    // adopted rather than a new block chosen.
    env.config.workloads[0].tag = "v2".to_string();
    env.store.reset("demo", 6).unwrap();
    env.sequencer().run().await.unwrap();

    let web = env.orchestrator.object("deployment", "default", "web").unwrap();
    assert_eq!(
        web["spec"]["template"]["spec"]["containers"][0]["image"],
        "123456789012.dkr.ecr.fake.amazonaws.com/demo-backend:v2"
    );
    assert!(env.orchestrator.applied().len() > applied);
    assert_eq!(env.cloud.creates(ResourceKind::Network), 1);
    assert_eq!(env.cloud.creates(ResourceKind::Subnet), 6);
    assert_eq!(env.cloud.cidr_listings(), 1);
}
