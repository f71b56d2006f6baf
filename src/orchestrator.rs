//! Sequencing of a provisioning run.
//!
//! Declare every artifact, deploy every component, wire them together,
//! then write the manifest. The first permanent failure aborts the run;
//! nothing already on chain is rolled back.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::errors::PipelineError;
use crate::journal::Journal;
use crate::manifest::{Manifest, ManifestWriter};
use crate::network::{Balance, BalanceDelta, Network};
use crate::phases::{
    ClassRecord, ConfigurationPhase, DeclarationPhase, DeploymentPhase, DeploymentRecord,
    PhaseContext,
};
use crate::plan::DeploymentPlan;
use crate::retry::{self, RetryPolicy};
use crate::signer::SignerSession;
use crate::types::TxHash;

/// Per-component progress through a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    NotDeclared,
    Declaring,
    Declared,
    Deploying,
    Deployed,
    Configured,
    DeclarationFailed,
    DeploymentFailed,
    ConfigurationFailed,
}

impl ComponentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ComponentState::Configured
                | ComponentState::DeclarationFailed
                | ComponentState::DeploymentFailed
                | ComponentState::ConfigurationFailed
        )
    }

    /// Move to `next` if the transition is legal.
    pub fn advance(self, next: ComponentState) -> Result<ComponentState, PipelineError> {
        use ComponentState::*;
        let legal = matches!(
            (self, next),
            (NotDeclared, Declaring)
                | (Declaring, Declared)
                | (Declaring, DeclarationFailed)
                | (Declared, Deploying)
                | (Deploying, Deployed)
                | (Deploying, DeploymentFailed)
                | (Deployed, Configured)
                | (Deployed, ConfigurationFailed)
        );
        if legal {
            Ok(next)
        } else {
            Err(PipelineError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentState::NotDeclared => "not declared",
            ComponentState::Declaring => "declaring",
            ComponentState::Declared => "declared",
            ComponentState::Deploying => "deploying",
            ComponentState::Deployed => "deployed",
            ComponentState::Configured => "configured",
            ComponentState::DeclarationFailed => "declaration failed",
            ComponentState::DeploymentFailed => "deployment failed",
            ComponentState::ConfigurationFailed => "configuration failed",
        };
        f.write_str(s)
    }
}

/// Delays and budgets for a run.
#[derive(Debug, Clone)]
pub struct Timings {
    /// Pause between consecutive declarations.
    pub declare_pacing: Duration,
    /// Pause between consecutive deployments and before configuration.
    pub deploy_pacing: Duration,
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            declare_pacing: Duration::from_secs(20),
            deploy_pacing: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(5),
            max_polls: 120,
        }
    }
}

impl Timings {
    /// No pacing and no backoff. Retry budgets are kept.
    pub fn immediate() -> Self {
        let default = Self::default();
        Self {
            declare_pacing: Duration::ZERO,
            deploy_pacing: Duration::ZERO,
            retry: RetryPolicy::immediate(default.retry.max_attempts),
            poll_interval: Duration::ZERO,
            max_polls: default.max_polls,
        }
    }
}

/// What a run did, kept up to date while it runs.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Component states in plan order.
    pub states: Vec<(String, ComponentState)>,
    /// Submission attempts per step that submitted anything.
    pub attempts: BTreeMap<String, u32>,
    pub classes: Vec<ClassRecord>,
    pub deployments: Vec<DeploymentRecord>,
    pub configuration_tx: Option<TxHash>,
    pub submissions: usize,
    pub balance_before: Option<Balance>,
    pub balance_after: Option<Balance>,
    pub manifest_path: Option<PathBuf>,
}

impl RunReport {
    fn new(plan: &DeploymentPlan) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            states: plan
                .component_names()
                .map(|name| (name.to_string(), ComponentState::NotDeclared))
                .collect(),
            attempts: BTreeMap::new(),
            classes: Vec::new(),
            deployments: Vec::new(),
            configuration_tx: None,
            submissions: 0,
            balance_before: None,
            balance_after: None,
            manifest_path: None,
        }
    }

    pub fn state(&self, component: &str) -> Option<ComponentState> {
        self.states
            .iter()
            .find(|(name, _)| name == component)
            .map(|(_, state)| *state)
    }

    pub fn attempts_for(&self, step: &str) -> Option<u32> {
        self.attempts.get(step).copied()
    }

    /// Fee spent, when both balance queries succeeded.
    pub fn balance_delta(&self) -> Option<BalanceDelta> {
        match (self.balance_before, self.balance_after) {
            (Some(before), Some(after)) => Some(after.delta_since(before)),
            _ => None,
        }
    }

    pub fn declared_count(&self) -> usize {
        self.classes.iter().filter(|c| !c.already_existed).count()
    }

    fn transition(&mut self, component: &str, next: ComponentState) -> Result<(), PipelineError> {
        if let Some((_, state)) = self.states.iter_mut().find(|(name, _)| name == component) {
            *state = state.advance(next)?;
            tracing::debug!(component, state = %next, "state changed");
        }
        Ok(())
    }

    fn transition_all(&mut self, from: ComponentState, next: ComponentState) -> Result<(), PipelineError> {
        for (component, state) in self.states.iter_mut() {
            if *state == from {
                *state = state.advance(next)?;
                tracing::debug!(component = %component, state = %next, "state changed");
            }
        }
        Ok(())
    }
}

pub struct Orchestrator<'a> {
    network: &'a dyn Network,
    store: ArtifactStore,
    plan: DeploymentPlan,
    manifest: ManifestWriter,
    state_dir: PathBuf,
    timings: Timings,
    report: RunReport,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        network: &'a dyn Network,
        store: ArtifactStore,
        plan: DeploymentPlan,
        manifest: ManifestWriter,
        state_dir: impl Into<PathBuf>,
        timings: Timings,
    ) -> Self {
        let report = RunReport::new(&plan);
        Self {
            network,
            store,
            plan,
            manifest,
            state_dir: state_dir.into(),
            timings,
            report,
        }
    }

    /// Journal location for this plan's chain. Each chain resumes only from
    /// its own submissions.
    pub fn journal_dir(&self) -> PathBuf {
        self.state_dir.join(self.plan.chain.as_str())
    }

    /// Progress of the current or last run, also after a failure.
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub async fn run(&mut self, session: &mut SignerSession) -> Result<RunReport, PipelineError> {
        self.report = RunReport::new(&self.plan);
        let result = self.run_phases(session).await;
        self.report.submissions = session.submissions().len();
        match &result {
            Ok(()) => tracing::info!(run_id = %self.report.run_id, "run complete"),
            Err(err) => tracing::error!(run_id = %self.report.run_id, error = %err, "run aborted"),
        }
        result.map(|()| self.report.clone())
    }

    async fn run_phases(&mut self, session: &mut SignerSession) -> Result<(), PipelineError> {
        self.plan.validate()?;
        let artifacts = self.store.load_all(self.plan.component_names())?;
        let mut journal = Journal::open(&self.journal_dir())?;
        tracing::info!(
            run_id = %self.report.run_id,
            network = %self.plan.chain,
            signer = %session.address(),
            "starting run"
        );

        self.report.balance_before = self.query_balance(session, "balance before").await;

        let network = self.network;
        let timings = self.timings.clone();
        let ctx = PhaseContext {
            network,
            retry: &timings.retry,
            poll_interval: timings.poll_interval,
            max_polls: timings.max_polls,
        };

        let mut declaration = DeclarationPhase::new(ctx);
        for (idx, artifact) in artifacts.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(timings.declare_pacing).await;
            }
            self.report.transition(&artifact.name, ComponentState::Declaring)?;
            match declaration.declare(session, artifact).await {
                Ok(outcome) => {
                    self.report.transition(&artifact.name, ComponentState::Declared)?;
                    if outcome.tx.is_some() {
                        self.report
                            .attempts
                            .insert(format!("declare:{}", artifact.name), outcome.attempts);
                    }
                    self.report.classes.push(outcome.record);
                }
                Err(source) => {
                    self.report
                        .transition(&artifact.name, ComponentState::DeclarationFailed)?;
                    return Err(PipelineError::DeclarationFailed {
                        component: artifact.name.clone(),
                        source,
                    });
                }
            }
        }

        let mut deployment = DeploymentPhase::new(ctx, &self.plan.external);
        for (idx, component) in self.plan.components.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(timings.deploy_pacing).await;
            }
            self.report.transition(&component.name, ComponentState::Deploying)?;
            match deployment
                .deploy(session, &mut journal, component, &self.report.classes)
                .await
            {
                Ok(outcome) => {
                    self.report.transition(&component.name, ComponentState::Deployed)?;
                    if outcome.tx.is_some() {
                        self.report.attempts.insert(
                            DeploymentPhase::step_name(&component.name),
                            outcome.attempts,
                        );
                    }
                    self.report.deployments.push(outcome.record);
                }
                Err(source) => {
                    self.report
                        .transition(&component.name, ComponentState::DeploymentFailed)?;
                    return Err(PipelineError::DeploymentFailed {
                        component: component.name.clone(),
                        source,
                    });
                }
            }
        }

        tokio::time::sleep(timings.deploy_pacing).await;
        let configuration = ConfigurationPhase::new(ctx);
        match configuration
            .configure(session, &mut journal, &self.plan, &self.report.deployments)
            .await
        {
            Ok(outcome) => {
                self.report
                    .transition_all(ComponentState::Deployed, ComponentState::Configured)?;
                if outcome.tx.is_some() {
                    self.report
                        .attempts
                        .insert("configure".to_string(), outcome.attempts);
                }
                self.report.configuration_tx = outcome.record;
            }
            Err(source) => {
                self.report.transition_all(
                    ComponentState::Deployed,
                    ComponentState::ConfigurationFailed,
                )?;
                return Err(PipelineError::ConfigurationFailed { source });
            }
        }

        let manifest = Manifest::new(self.plan.chain, &self.report.deployments, &self.plan.external);
        self.manifest.write(&manifest).await?;
        self.report.manifest_path = Some(self.manifest.path().to_path_buf());
        discard_journal(&mut journal);

        self.report.balance_after = self.query_balance(session, "balance after").await;
        if let Some(delta) = self.report.balance_delta() {
            tracing::info!(delta = %delta, "fee balance change");
        }
        Ok(())
    }

    /// Balance is reported, never enforced: a failed query only logs.
    async fn query_balance(&self, session: &SignerSession, label: &str) -> Option<Balance> {
        let network = self.network;
        let account = session.address();
        match retry::run(label, &self.timings.retry, move || network.balance(account)).await {
            Ok(retried) => {
                tracing::info!(account = %account, balance = %retried.value, "{label}");
                Some(retried.value)
            }
            Err(err) => {
                tracing::warn!(account = %account, error = %err, "balance query failed");
                None
            }
        }
    }
}

/// Called once the manifest is written; the run has succeeded either way.
fn discard_journal(journal: &mut Journal) {
    if let Err(err) = journal.clear() {
        tracing::warn!(path = %journal.path().display(), error = %err, "failed to clear journal");
    }
}
