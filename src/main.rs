use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use stark_provision::artifact::ArtifactStore;
use stark_provision::config::{Config, Credentials};
use stark_provision::manifest::ManifestWriter;
use stark_provision::network::RpcNetwork;
use stark_provision::orchestrator::{Orchestrator, RunReport, Timings};
use stark_provision::plan::{Chain, DeploymentPlan};
use stark_provision::signer::SignerSession;
use stark_provision::ui;

#[derive(Parser)]
#[command(name = "stark-provision")]
#[command(version, about = "Declare, deploy and wire the BTC vault contracts on Starknet")]
pub struct Cli {
    /// Target network: mainnet or sepolia
    #[arg(long, env = "NETWORK", default_value = "mainnet")]
    pub network: Chain,

    /// Directory holding the compiled contract artifacts
    #[arg(long, env = "ARTIFACTS_DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Artifact file prefix ({package}_{Contract}.contract_class.json)
    #[arg(long, env = "ARTIFACT_PACKAGE")]
    pub package: Option<String>,

    /// Manifest path (defaults to deployment-{network}.json)
    #[arg(long, env = "MANIFEST_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Directory for the per-network submission journals and run lock
    #[arg(long, env = "STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "stark_provision=debug"
    } else {
        "stark_provision=info"
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env is fine; the variables may come from the shell
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut report = None;
    match run(cli, &mut report).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui::print_failure(report.as_ref(), &describe(&err));
            ExitCode::FAILURE
        }
    }
}

/// The error chain on one line, skipping causes a parent already spelled out.
fn describe(err: &anyhow::Error) -> String {
    let mut message = err.to_string();
    for cause in err.chain().skip(1) {
        let text = cause.to_string();
        if !message.contains(&text) {
            message = format!("{message}: {text}");
        }
    }
    message
}

async fn run(cli: Cli, report_out: &mut Option<RunReport>) -> Result<()> {
    let credentials = Credentials::from_env().context("Invalid deployer configuration")?;
    let config = Config::new(
        cli.network,
        cli.artifacts_dir,
        cli.package,
        cli.output,
        cli.state_dir,
        cli.verbose,
        credentials,
    );

    let network = RpcNetwork::new(config.credentials.rpc_url.clone(), config.chain)
        .context("Failed to create RPC client")?;
    let plan = DeploymentPlan::btc_vault(config.chain)?;
    let store = ArtifactStore::new(&config.artifacts_dir, &config.package);
    let mut session = SignerSession::new(config.credentials.address, config.credentials.secret.clone());

    ui::print_header(config.chain, session.address(), store.dir());

    let mut orchestrator = Orchestrator::new(
        &network,
        store,
        plan,
        ManifestWriter::new(&config.output),
        &config.state_dir,
        Timings::default(),
    );
    let result = orchestrator.run(&mut session).await;
    *report_out = Some(orchestrator.report().clone());
    let report = result?;

    ui::print_success(&report);
    Ok(())
}
