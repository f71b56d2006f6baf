//! End-to-end runs of the provisioning pipeline against the scripted network.

use std::fs;
use std::path::{Path, PathBuf};

use stark_provision::artifact::ArtifactStore;
use stark_provision::errors::{NetworkError, PipelineError, RetryError, StepError};
use stark_provision::journal::Journal;
use stark_provision::manifest::{Manifest, ManifestWriter};
use stark_provision::network::MockNetwork;
use stark_provision::network::mock::MockOp;
use stark_provision::orchestrator::{ComponentState, Orchestrator, RunReport, Timings};
use stark_provision::plan::{Chain, DeploymentPlan};
use stark_provision::signer::{Secret, SignerSession};
use stark_provision::types::{ContractAddress, Felt};
use tempfile::TempDir;

const PACKAGE: &str = "btcvault";
const CONTRACTS: [&str; 4] = ["BTCVault", "VesuStrategy", "EkuboStrategy", "Router"];
const ONE_STRK: u128 = 1_000_000_000_000_000_000;

const CASM: &str = r#"{"prime":"0x800000000000011000000000000000000000000000000000000000000000001","compiler_version":"2.6.3","bytecode":["0x1"],"bytecode_segment_lengths":[1],"hints":[],"pythonic_hints":[],"entry_points_by_type":{"EXTERNAL":[],"L1_HANDLER":[],"CONSTRUCTOR":[]}}"#;

/// A minimal Sierra class whose program (and so its class hash) depends on `build`.
fn sierra_class(build: u32) -> String {
    format!(
        r#"{{"sierra_program":["0x1","{build:#x}"],"sierra_program_debug_info":{{"type_names":[],"libfunc_names":[],"user_func_names":[]}},"contract_class_version":"0.1.0","entry_points_by_type":{{"EXTERNAL":[],"L1_HANDLER":[],"CONSTRUCTOR":[]}},"abi":[]}}"#
    )
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let workspace = Self { dir };
        fs::create_dir_all(workspace.artifacts_dir()).unwrap();
        for (build, name) in (1u32..).zip(CONTRACTS) {
            workspace.write_artifact(name, build);
        }
        workspace
    }

    fn artifacts_dir(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }

    /// Write (or rebuild) one contract's artifacts.
    fn write_artifact(&self, name: &str, build: u32) {
        let store = self.store();
        fs::write(store.contract_class_path(name), sierra_class(build)).unwrap();
        fs::write(store.compiled_class_path(name), CASM).unwrap();
    }

    fn store(&self) -> ArtifactStore {
        ArtifactStore::new(self.artifacts_dir(), PACKAGE)
    }

    fn manifest_path(&self, chain: Chain) -> PathBuf {
        self.dir.path().join(format!("deployment-{chain}.json"))
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    fn journal(&self, chain: Chain) -> Journal {
        Journal::open(&self.state_dir().join(chain.as_str())).unwrap()
    }

    fn orchestrator_for<'a>(&self, network: &'a MockNetwork, chain: Chain) -> Orchestrator<'a> {
        Orchestrator::new(
            network,
            self.store(),
            DeploymentPlan::btc_vault(chain).unwrap(),
            ManifestWriter::new(self.manifest_path(chain)),
            self.state_dir(),
            Timings::immediate(),
        )
    }

    fn orchestrator<'a>(&self, network: &'a MockNetwork) -> Orchestrator<'a> {
        self.orchestrator_for(network, Chain::Sepolia)
    }
}

fn session() -> SignerSession {
    SignerSession::new(ContractAddress(Felt::from_u128(0xde9107)), Secret::new("0x5ec2e7"))
}

fn read_manifest(path: &Path) -> Manifest {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn assert_all(report: &RunReport, expected: ComponentState) {
    for (name, state) in &report.states {
        assert_eq!(*state, expected, "{name}");
    }
}

#[tokio::test]
async fn fresh_run_declares_deploys_and_configures_everything() {
    let workspace = Workspace::new();
    let network = MockNetwork::new().with_balance(50 * ONE_STRK, ONE_STRK / 10);
    let mut session = session();

    let report = workspace
        .orchestrator(&network)
        .run(&mut session)
        .await
        .unwrap();

    assert_eq!(network.declare_calls().len(), 4);
    assert_eq!(network.deploy_calls().len(), 4);
    assert_eq!(network.invoke_calls().len(), 1);
    assert_eq!(report.submissions, 9);
    assert_all(&report, ComponentState::Configured);

    let manifest = read_manifest(&workspace.manifest_path(Chain::Sepolia));
    assert_eq!(manifest.network, "sepolia");
    assert_eq!(manifest.contracts.len(), 4);
    assert_eq!(manifest.external_addresses.len(), 3);
    for deployment in &report.deployments {
        assert_eq!(manifest.contracts[&deployment.name].address, deployment.address);
    }

    let delta = report.balance_delta().unwrap();
    assert!(delta.negative);
    assert_eq!(delta.amount, 9 * (ONE_STRK / 10));

    assert_eq!(workspace.journal(Chain::Sepolia).lookup("deploy:BTCVault"), None);
}

#[tokio::test]
async fn rerun_with_declared_classes_submits_no_declarations() {
    let workspace = Workspace::new();
    let mut network = MockNetwork::new();
    for artifact in workspace.store().load_all(CONTRACTS).unwrap() {
        network = network.with_declared(artifact.class_hash);
    }

    let report = workspace
        .orchestrator(&network)
        .run(&mut session())
        .await
        .unwrap();

    assert!(network.declare_calls().is_empty());
    assert_eq!(network.deploy_calls().len(), 4);
    assert!(report.classes.iter().all(|c| c.already_existed));
    assert_eq!(report.declared_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_declare_failure_is_retried_and_counted() {
    let workspace = Workspace::new();
    let network = MockNetwork::new().fail_on(
        MockOp::Declare,
        1,
        NetworkError::Transient("HTTP 503 Service Unavailable".into()),
    );
    let mut timings = Timings::immediate();
    timings.retry = stark_provision::retry::RetryPolicy::default();
    let mut orchestrator = Orchestrator::new(
        &network,
        workspace.store(),
        DeploymentPlan::btc_vault(Chain::Sepolia).unwrap(),
        ManifestWriter::new(workspace.manifest_path(Chain::Sepolia)),
        workspace.state_dir(),
        timings,
    );

    let report = orchestrator.run(&mut session()).await.unwrap();

    assert_eq!(report.attempts_for("declare:BTCVault"), Some(2));
    assert_eq!(report.attempts_for("declare:Router"), Some(1));
    assert_eq!(network.declare_calls().len(), 4);
    assert!(workspace.manifest_path(Chain::Sepolia).exists());
}

#[tokio::test]
async fn permanent_deploy_failure_aborts_without_manifest() {
    let workspace = Workspace::new();
    let network = MockNetwork::new().fail_on(
        MockOp::Deploy,
        2,
        NetworkError::Permanent("Account balance is smaller than the transaction's maximal fee".into()),
    );
    let mut orchestrator = workspace.orchestrator(&network);

    let err = orchestrator.run(&mut session()).await.unwrap_err();

    match &err {
        PipelineError::DeploymentFailed { component, source } => {
            assert_eq!(component, "VesuStrategy");
            assert!(matches!(source, StepError::Submit(RetryError::Permanent(_))));
        }
        other => panic!("Expected DeploymentFailed, got {other}"),
    }
    assert!(!workspace.manifest_path(Chain::Sepolia).exists());
    assert_eq!(network.deploy_calls().len(), 1);
    assert_eq!(network.call_count(MockOp::Invoke), 0);

    let report = orchestrator.report();
    assert_eq!(report.state("BTCVault"), Some(ComponentState::Deployed));
    assert_eq!(report.state("VesuStrategy"), Some(ComponentState::DeploymentFailed));
    assert_eq!(report.state("Router"), Some(ComponentState::Declared));
}

#[tokio::test]
async fn rerun_after_abort_reuses_journaled_deployment() {
    let workspace = Workspace::new();
    let network = MockNetwork::new().fail_on(
        MockOp::Deploy,
        2,
        NetworkError::Permanent("insufficient balance".into()),
    );

    let first = workspace.orchestrator(&network).run(&mut session()).await;
    assert!(first.is_err());
    let vault_address = {
        match workspace.journal(Chain::Sepolia).lookup("deploy:BTCVault") {
            Some(stark_provision::journal::StepRecord::Confirmed { address, .. }) => address.unwrap(),
            other => panic!("Expected confirmed BTCVault, got {other:?}"),
        }
    };

    let report = workspace
        .orchestrator(&network)
        .run(&mut session())
        .await
        .unwrap();

    assert_eq!(network.declare_calls().len(), 4);
    assert_eq!(network.deploy_calls().len(), 4);
    assert_eq!(
        read_manifest(&workspace.manifest_path(Chain::Sepolia)).contracts["BTCVault"].address,
        vault_address
    );
    assert_eq!(report.deployments[0].address, vault_address);
}

#[tokio::test]
async fn reverted_configuration_applies_nothing() {
    let workspace = Workspace::new();
    let network = MockNetwork::new().reverting_entrypoint("set_vault");
    let mut orchestrator = workspace.orchestrator(&network);

    let err = orchestrator.run(&mut session()).await.unwrap_err();

    assert!(matches!(err, PipelineError::ConfigurationFailed { .. }));
    assert!(network.applied_calls().is_empty());
    assert!(!workspace.manifest_path(Chain::Sepolia).exists());
    assert_all(orchestrator.report(), ComponentState::ConfigurationFailed);
}

#[tokio::test]
async fn missing_artifact_stops_before_any_submission() {
    let workspace = Workspace::new();
    fs::remove_file(workspace.store().compiled_class_path("Router")).unwrap();
    let network = MockNetwork::new();

    let err = workspace
        .orchestrator(&network)
        .run(&mut session())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Artifact(_)));
    assert_eq!(network.call_count(MockOp::Balance), 0);
    assert_eq!(network.call_count(MockOp::ClassExists), 0);
    assert_eq!(network.call_count(MockOp::Declare), 0);
}

#[tokio::test]
async fn balance_failure_is_reported_not_fatal() {
    let workspace = Workspace::new();
    let network = MockNetwork::new().fail_on(
        MockOp::Balance,
        1,
        NetworkError::Permanent("contract not found".into()),
    );

    let report = workspace
        .orchestrator(&network)
        .run(&mut session())
        .await
        .unwrap();

    assert_eq!(report.balance_before, None);
    assert!(report.balance_after.is_some());
    assert!(report.balance_delta().is_none());
}

#[tokio::test]
async fn concurrent_run_on_the_same_state_dir_is_refused() {
    let workspace = Workspace::new();
    let _held = workspace.journal(Chain::Sepolia);
    let network = MockNetwork::new();

    let err = workspace
        .orchestrator(&network)
        .run(&mut session())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Journal(_)));
    assert_eq!(network.call_count(MockOp::Declare), 0);
}

#[tokio::test]
async fn journal_from_another_chain_is_never_reused() {
    let workspace = Workspace::new();
    let sepolia = MockNetwork::new().fail_on(
        MockOp::Deploy,
        2,
        NetworkError::Permanent("insufficient balance".into()),
    );
    assert!(workspace.orchestrator(&sepolia).run(&mut session()).await.is_err());
    assert_eq!(sepolia.deploy_calls().len(), 1);

    let mainnet = MockNetwork::new();
    let report = workspace
        .orchestrator_for(&mainnet, Chain::Mainnet)
        .run(&mut session())
        .await
        .unwrap();

    assert_eq!(mainnet.deploy_calls().len(), 4);
    let manifest = read_manifest(&workspace.manifest_path(Chain::Mainnet));
    assert_eq!(manifest.network, "mainnet");
    assert_eq!(manifest.contracts["BTCVault"].address, report.deployments[0].address);
    assert!(
        workspace
            .journal(Chain::Sepolia)
            .lookup("deploy:BTCVault")
            .is_some()
    );
}

#[tokio::test]
async fn rebuilt_artifact_is_redeployed_instead_of_reusing_the_old_instance() {
    let workspace = Workspace::new();
    let network = MockNetwork::new().fail_on(
        MockOp::Deploy,
        2,
        NetworkError::Permanent("insufficient balance".into()),
    );
    assert!(workspace.orchestrator(&network).run(&mut session()).await.is_err());
    let old_vault = network.deploy_calls()[0].class_hash;

    workspace.write_artifact("BTCVault", 99);
    let report = workspace
        .orchestrator(&network)
        .run(&mut session())
        .await
        .unwrap();

    let deploys = network.deploy_calls();
    let new_vault = report.deployments[0].class_hash;
    assert_ne!(new_vault, old_vault);
    assert_eq!(deploys.len(), 5);
    assert_eq!(deploys[1].class_hash, new_vault);

    let manifest = read_manifest(&workspace.manifest_path(Chain::Sepolia));
    assert_eq!(manifest.contracts["BTCVault"].class_hash, new_vault);
    assert_eq!(manifest.contracts["BTCVault"].address, report.deployments[0].address);
}
