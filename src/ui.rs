//! Terminal summary of a run.

use console::{Emoji, style};
use std::path::Path;

use crate::orchestrator::{ComponentState, RunReport};
use crate::plan::Chain;
use crate::types::ContractAddress;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "");

pub fn print_header(chain: Chain, signer: ContractAddress, artifacts_dir: &Path) {
    println!(
        "{}Provisioning on {} as {}",
        ROCKET,
        style(chain).cyan().bold(),
        style(signer).dim()
    );
    println!("  artifacts: {}", style(artifacts_dir.display()).dim());
}

fn state_label(state: ComponentState) -> String {
    match state {
        ComponentState::Configured | ComponentState::Deployed => style(state).green().to_string(),
        ComponentState::DeclarationFailed
        | ComponentState::DeploymentFailed
        | ComponentState::ConfigurationFailed => style(state).red().bold().to_string(),
        _ => style(state).yellow().to_string(),
    }
}

/// Component table: state, class hash and address where known.
pub fn print_components(report: &RunReport) {
    println!();
    for (name, state) in &report.states {
        let class = report.classes.iter().find(|c| &c.name == name);
        let deployment = report.deployments.iter().find(|d| &d.name == name);
        println!("  {:<16} {}", style(name).bold(), state_label(*state));
        if let Some(class) = class {
            let note = if class.already_existed { " (existing)" } else { "" };
            println!("    class    {}{}", class.class_hash, style(note).dim());
        }
        if let Some(deployment) = deployment {
            println!("    address  {}", style(deployment.address).cyan());
        }
    }
}

pub fn print_success(report: &RunReport) {
    print_components(report);
    println!();
    println!(
        "{}{} declared, {} deployed, {} transactions",
        CHECK,
        style(report.declared_count()).green(),
        style(report.deployments.len()).green(),
        report.submissions
    );
    if let Some(path) = &report.manifest_path {
        println!("  manifest: {}", style(path.display()).cyan());
    }
    match (report.balance_before, report.balance_after, report.balance_delta()) {
        (Some(before), Some(after), Some(delta)) => println!(
            "  STRK: {} -> {} ({})",
            before,
            after,
            style(delta).yellow()
        ),
        (Some(before), _, _) => println!("  STRK before: {before}"),
        _ => {}
    }
}

/// Final error line, on stderr.
pub fn print_failure(report: Option<&RunReport>, message: &str) {
    if let Some(report) = report {
        print_components(report);
    }
    eprintln!("{}{}", CROSS, style(format!("FAILED: {message}")).red().bold());
}
