use std::collections::HashMap;

use super::{ClassRecord, PhaseContext, StepOutcome};
use crate::artifact::Artifact;
use crate::errors::StepError;
use crate::retry::{self, RetryExecutor};
use crate::signer::SignerSession;
use crate::types::ClassHash;

/// Registers classes by content hash.
///
/// A hash already known to the network, or already declared earlier in
/// this run, is never submitted again.
pub struct DeclarationPhase<'a> {
    ctx: PhaseContext<'a>,
    known: HashMap<ClassHash, String>,
}

impl<'a> DeclarationPhase<'a> {
    pub fn new(ctx: PhaseContext<'a>) -> Self {
        Self {
            ctx,
            known: HashMap::new(),
        }
    }

    pub async fn declare(
        &mut self,
        session: &mut SignerSession,
        artifact: &Artifact,
    ) -> Result<StepOutcome<ClassRecord>, StepError> {
        let class_hash = artifact.class_hash;
        let name = artifact.name.as_str();
        let record = |already_existed| ClassRecord {
            name: name.to_string(),
            class_hash,
            already_existed,
        };

        if let Some(first) = self.known.get(&class_hash) {
            tracing::info!(contract = name, class_hash = %class_hash, same_as = %first, "class already declared in this run");
            return Ok(StepOutcome::skipped(record(true)));
        }

        let network = self.ctx.network;
        let lookup = format!("class lookup {name}");
        let exists = retry::run(&lookup, self.ctx.retry, move || {
            network.class_exists(class_hash)
        })
        .await
        .map_err(StepError::Query)?
        .value;

        if exists {
            tracing::info!(contract = name, class_hash = %class_hash, "class already declared, skipping");
            self.known.insert(class_hash, name.to_string());
            return Ok(StepOutcome::skipped(record(true)));
        }

        let label = format!("declare {name}");
        let mut retry = RetryExecutor::new(label.as_str(), self.ctx.retry);
        let tx = loop {
            match network.declare(session, artifact, class_hash).await {
                Ok(tx) => break tx,
                Err(err) => retry.on_failure(err).await.map_err(StepError::Submit)?,
            }
        };
        session.record_submission(tx);
        tracing::info!(contract = name, class_hash = %class_hash, tx = %tx, attempts = retry.attempts(), "declare submitted");

        self.ctx.waiter().wait(&label, tx).await?;
        self.known.insert(class_hash, name.to_string());

        Ok(StepOutcome {
            record: record(false),
            attempts: retry.attempts(),
            tx: Some(tx),
        })
    }
}
