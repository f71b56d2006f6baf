//! The three on-chain phases of a provisioning run.
//!
//! Each phase works one step at a time; the orchestrator owns ordering,
//! pacing and component state.

pub mod configure;
pub mod declare;
pub mod deploy;

pub use configure::ConfigurationPhase;
pub use declare::DeclarationPhase;
pub use deploy::DeploymentPhase;

use std::time::Duration;

use crate::confirm::ConfirmationWaiter;
use crate::errors::{ConfirmationError, StepError};
use crate::journal::{Journal, StepRecord};
use crate::network::{Network, TxStatus};
use crate::retry::RetryPolicy;
use crate::types::{ClassHash, ContractAddress, TxHash};

/// Result of declaring one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRecord {
    pub name: String,
    pub class_hash: ClassHash,
    pub already_existed: bool,
}

/// Result of deploying one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub name: String,
    pub class_hash: ClassHash,
    pub address: ContractAddress,
}

/// A finished step and what it cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome<T> {
    pub record: T,
    /// Submission attempts made; 0 when nothing was submitted.
    pub attempts: u32,
    pub tx: Option<TxHash>,
}

impl<T> StepOutcome<T> {
    fn skipped(record: T) -> Self {
        Self {
            record,
            attempts: 0,
            tx: None,
        }
    }
}

/// Network handles shared by every phase.
#[derive(Clone, Copy)]
pub struct PhaseContext<'a> {
    pub network: &'a dyn Network,
    pub retry: &'a RetryPolicy,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl<'a> PhaseContext<'a> {
    pub fn waiter(&self) -> ConfirmationWaiter<'a> {
        ConfirmationWaiter::new(self.network, self.retry, self.poll_interval, self.max_polls)
    }
}

/// What the journal says about a step from an earlier run.
enum Resume {
    Fresh,
    Settled {
        tx: TxHash,
        address: Option<ContractAddress>,
        /// Already journaled as confirmed.
        recorded: bool,
    },
}

/// Settle a journaled step before submitting it again.
///
/// A submission whose outcome cannot be determined is an error: blindly
/// resubmitting could deploy twice or apply configuration twice. An entry
/// made for a different class than `class_hash` belongs to an older build
/// and is dropped, so the step starts over.
async fn resume(
    ctx: &PhaseContext<'_>,
    journal: &mut Journal,
    step: &str,
    class_hash: Option<ClassHash>,
) -> Result<Resume, StepError> {
    let Some(record) = journal.lookup(step) else {
        return Ok(Resume::Fresh);
    };
    if let (Some(expected), Some(journaled)) = (class_hash, record.class_hash())
        && expected != journaled
    {
        tracing::warn!(step, tx = %record.tx(), journaled = %journaled, current = %expected, "journaled step used another class, starting over");
        journal.forget(step);
        return Ok(Resume::Fresh);
    }

    match record {
        StepRecord::Confirmed { tx, address, .. } => {
            tracing::info!(step, tx = %tx, "reusing confirmed step from journal");
            Ok(Resume::Settled {
                tx,
                address,
                recorded: true,
            })
        }
        StepRecord::Submitted { tx, .. } => match ctx.waiter().status_once(step, tx).await {
            Ok(TxStatus::Finalized) => {
                tracing::info!(step, tx = %tx, "journaled submission finalized");
                Ok(Resume::Settled {
                    tx,
                    address: None,
                    recorded: false,
                })
            }
            Ok(TxStatus::Rejected(reason)) => {
                tracing::warn!(step, tx = %tx, reason = %reason, "journaled submission was rejected, submitting again");
                journal.forget(step);
                Ok(Resume::Fresh)
            }
            Ok(TxStatus::Pending) => Err(StepError::AmbiguousSubmission {
                step: step.to_string(),
                tx,
            }),
            Err(ConfirmationError::Poll { source, .. }) => {
                tracing::warn!(step, tx = %tx, error = %source, "could not query journaled submission");
                Err(StepError::AmbiguousSubmission {
                    step: step.to_string(),
                    tx,
                })
            }
            Err(other) => Err(other.into()),
        },
    }
}
