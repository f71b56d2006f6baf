use std::collections::HashMap;

use super::{DeploymentRecord, PhaseContext, Resume, StepOutcome, resume};
use crate::errors::StepError;
use crate::journal::Journal;
use crate::network::Call;
use crate::plan::{DeploymentPlan, ResolveContext, resolve_all};
use crate::retry::RetryExecutor;
use crate::signer::SignerSession;
use crate::types::{ContractAddress, TxHash};

const STEP: &str = "configure";

/// Wires deployed components together in a single atomic invoke.
///
/// A retry resubmits the whole batch. That is only sound because a failed
/// submission never applied any of it.
pub struct ConfigurationPhase<'a> {
    ctx: PhaseContext<'a>,
}

impl<'a> ConfigurationPhase<'a> {
    pub fn new(ctx: PhaseContext<'a>) -> Self {
        Self { ctx }
    }

    /// Build the batch from the plan's configuration calls.
    pub fn build_batch(
        plan: &DeploymentPlan,
        signer: ContractAddress,
        deployments: &[DeploymentRecord],
    ) -> Result<Vec<Call>, StepError> {
        let deployed: HashMap<String, ContractAddress> = deployments
            .iter()
            .map(|d| (d.name.clone(), d.address))
            .collect();
        let ctx = ResolveContext {
            signer,
            external: &plan.external,
            deployed: &deployed,
        };
        plan.configuration
            .iter()
            .map(|call| {
                let to = deployed
                    .get(&call.target)
                    .copied()
                    .ok_or_else(|| StepError::MissingDeployment(call.target.clone()))?;
                let calldata = resolve_all(&call.args, &ctx)?;
                Ok(Call::new(to, call.entrypoint.as_str(), calldata))
            })
            .collect()
    }

    pub async fn configure(
        &self,
        session: &mut SignerSession,
        journal: &mut Journal,
        plan: &DeploymentPlan,
        deployments: &[DeploymentRecord],
    ) -> Result<StepOutcome<Option<TxHash>>, StepError> {
        let calls = Self::build_batch(plan, session.address(), deployments)?;
        if calls.is_empty() {
            tracing::info!("nothing to configure");
            return Ok(StepOutcome::skipped(None));
        }

        if let Resume::Settled { tx, recorded, .. } = resume(&self.ctx, journal, STEP, None).await? {
            if !recorded {
                journal.record_confirmed(STEP, tx, None, None)?;
            }
            tracing::info!(tx = %tx, "configuration already applied in an earlier run");
            return Ok(StepOutcome::skipped(Some(tx)));
        }

        for call in &calls {
            tracing::debug!(to = %call.to, entrypoint = %call.entrypoint, args = call.calldata.len(), "batched call");
        }

        let network = self.ctx.network;
        let mut retry = RetryExecutor::new(STEP, self.ctx.retry);
        let tx = loop {
            match network.invoke(session, &calls).await {
                Ok(tx) => break tx,
                Err(err) => retry.on_failure(err).await.map_err(StepError::Submit)?,
            }
        };
        session.record_submission(tx);
        journal.record_submitted(STEP, tx, None)?;
        tracing::info!(tx = %tx, calls = calls.len(), attempts = retry.attempts(), "configuration batch submitted");

        self.ctx.waiter().wait(STEP, tx).await?;
        journal.record_confirmed(STEP, tx, None, None)?;

        Ok(StepOutcome {
            record: Some(tx),
            attempts: retry.attempts(),
            tx: Some(tx),
        })
    }
}
