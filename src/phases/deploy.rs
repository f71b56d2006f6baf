use std::collections::{BTreeMap, HashMap};

use super::{ClassRecord, DeploymentRecord, PhaseContext, Resume, StepOutcome, resume};
use crate::errors::StepError;
use crate::journal::Journal;
use crate::plan::{ComponentSpec, ResolveContext, resolve_all};
use crate::retry::{self, RetryExecutor};
use crate::signer::SignerSession;
use crate::types::{ContractAddress, Felt, TxHash};

/// Instantiates declared classes.
///
/// Deploys are not idempotent: every submission creates a new instance, so
/// each step is journaled before its confirmation is awaited.
pub struct DeploymentPhase<'a> {
    ctx: PhaseContext<'a>,
    external: &'a BTreeMap<String, ContractAddress>,
    deployed: HashMap<String, ContractAddress>,
}

impl<'a> DeploymentPhase<'a> {
    pub fn new(ctx: PhaseContext<'a>, external: &'a BTreeMap<String, ContractAddress>) -> Self {
        Self {
            ctx,
            external,
            deployed: HashMap::new(),
        }
    }

    pub fn step_name(component: &str) -> String {
        format!("deploy:{component}")
    }

    pub async fn deploy(
        &mut self,
        session: &mut SignerSession,
        journal: &mut Journal,
        component: &ComponentSpec,
        classes: &[ClassRecord],
    ) -> Result<StepOutcome<DeploymentRecord>, StepError> {
        let name = component.name.as_str();
        let class_hash = classes
            .iter()
            .find(|c| c.name == component.name)
            .map(|c| c.class_hash)
            .ok_or_else(|| StepError::MissingClassRecord(component.name.clone()))?;
        let step = Self::step_name(name);

        if let Resume::Settled {
            tx,
            address,
            recorded,
        } = resume(&self.ctx, journal, &step, Some(class_hash)).await?
        {
            let address = match address {
                Some(address) => address,
                None => self.read_address(&step, tx).await?,
            };
            if !recorded {
                journal.record_confirmed(&step, tx, Some(address), Some(class_hash))?;
            }
            tracing::info!(contract = name, address = %address, "reusing deployment from earlier run");
            self.deployed.insert(component.name.clone(), address);
            return Ok(StepOutcome::skipped(DeploymentRecord {
                name: component.name.clone(),
                class_hash,
                address,
            }));
        }

        let calldata = resolve_all(
            &component.constructor,
            &ResolveContext {
                signer: session.address(),
                external: self.external,
                deployed: &self.deployed,
            },
        )?;
        // a fresh salt per submission; a resubmitted deploy is a new instance anyway
        let salt = Felt::from_u128(uuid::Uuid::new_v4().as_u128());

        let network = self.ctx.network;
        let label = format!("deploy {name}");
        let mut retry = RetryExecutor::new(label.as_str(), self.ctx.retry);
        let tx = loop {
            match network.deploy(session, class_hash, salt, &calldata).await {
                Ok(tx) => break tx,
                Err(err) => retry.on_failure(err).await.map_err(StepError::Submit)?,
            }
        };
        session.record_submission(tx);
        journal.record_submitted(&step, tx, Some(class_hash))?;
        tracing::info!(contract = name, class_hash = %class_hash, tx = %tx, attempts = retry.attempts(), "deploy submitted");

        self.ctx.waiter().wait(&label, tx).await?;
        let address = self.read_address(&step, tx).await?;
        journal.record_confirmed(&step, tx, Some(address), Some(class_hash))?;
        tracing::info!(contract = name, address = %address, "deployed");

        self.deployed.insert(component.name.clone(), address);
        Ok(StepOutcome {
            record: DeploymentRecord {
                name: component.name.clone(),
                class_hash,
                address,
            },
            attempts: retry.attempts(),
            tx: Some(tx),
        })
    }

    async fn read_address(&self, step: &str, tx: TxHash) -> Result<ContractAddress, StepError> {
        let network = self.ctx.network;
        let label = format!("{step} receipt");
        retry::run(&label, self.ctx.retry, move || network.deployed_address(tx))
            .await
            .map(|retried| retried.value)
            .map_err(StepError::Query)
    }
}
