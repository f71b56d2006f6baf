//! Polling a submitted transaction until it is final.

use std::time::Duration;

use crate::errors::{ConfirmationError, NetworkError};
use crate::network::{Network, TxStatus};
use crate::retry::{self, RetryPolicy};
use crate::types::TxHash;

/// How a transaction settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmed {
    pub tx: TxHash,
    pub polls: u32,
}

pub struct ConfirmationWaiter<'a> {
    network: &'a dyn Network,
    poll_policy: &'a RetryPolicy<NetworkError>,
    interval: Duration,
    max_polls: u32,
}

impl<'a> ConfirmationWaiter<'a> {
    pub fn new(
        network: &'a dyn Network,
        poll_policy: &'a RetryPolicy<NetworkError>,
        interval: Duration,
        max_polls: u32,
    ) -> Self {
        Self {
            network,
            poll_policy,
            interval,
            max_polls: max_polls.max(1),
        }
    }

    /// Wait until `tx` is finalized.
    ///
    /// Each status query is retried on transient failures. A rejected or
    /// reverted transaction is returned as an error straight away; it is
    /// never resubmitted from here.
    pub async fn wait(&self, label: &str, tx: TxHash) -> Result<Confirmed, ConfirmationError> {
        let op = format!("{label} wait");
        for poll in 1..=self.max_polls {
            let network = self.network;
            let status = retry::run(&op, self.poll_policy, move || network.transaction_status(tx))
                .await
                .map_err(|source| ConfirmationError::Poll { tx, source })?
                .value;

            match status {
                TxStatus::Finalized => {
                    tracing::info!(op = %label, tx = %tx, polls = poll, "transaction finalized");
                    return Ok(Confirmed { tx, polls: poll });
                }
                TxStatus::Rejected(reason) => {
                    tracing::error!(op = %label, tx = %tx, reason = %reason, "transaction rejected");
                    return Err(ConfirmationError::Rejected { tx, reason });
                }
                TxStatus::Pending => {
                    tracing::debug!(op = %label, tx = %tx, poll, "transaction pending");
                    if poll < self.max_polls {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }
        Err(ConfirmationError::TimedOut {
            tx,
            polls: self.max_polls,
        })
    }

    /// One status query, retried on transient failures. Used to settle
    /// journaled submissions from an earlier run.
    pub async fn status_once(&self, label: &str, tx: TxHash) -> Result<TxStatus, ConfirmationError> {
        let network = self.network;
        retry::run(label, self.poll_policy, move || network.transaction_status(tx))
            .await
            .map(|retried| retried.value)
            .map_err(|source| ConfirmationError::Poll { tx, source })
    }
}
