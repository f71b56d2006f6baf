//! Typed error hierarchy for the provisioning pipeline.
//!
//! Failures are tagged where they happen:
//! - `NetworkError`: produced by the network adapter, already classified
//!   as transient or permanent
//! - `RetryError` / `ConfirmationError`: retry budget and finality outcomes
//! - `StepError`: one declare/deploy/configure step
//! - `PipelineError`: the run-level abort, naming the phase that failed

use std::path::PathBuf;
use thiserror::Error;

use crate::orchestrator::ComponentState;
use crate::types::{FeltError, TxHash};

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// A failure reported by the network adapter.
///
/// The adapter decides the variant from the transport/RPC outcome; nothing
/// downstream re-derives it from message text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl NetworkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NetworkError::Transient(_) => ErrorClass::Transient,
            NetworkError::Permanent(_) => ErrorClass::Permanent,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            NetworkError::Transient(reason) | NetworkError::Permanent(reason) => reason,
        }
    }
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError<E> {
    #[error("{0}")]
    Permanent(E),

    #[error("retries exhausted after {attempts} attempts, last error: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Failures while waiting for a submitted transaction to settle.
#[derive(Debug, Error)]
pub enum ConfirmationError {
    #[error("transaction {tx} was rejected: {reason}")]
    Rejected { tx: TxHash, reason: String },

    #[error("transaction {tx} still pending after {polls} polls")]
    TimedOut { tx: TxHash, polls: u32 },

    #[error("polling transaction {tx} failed: {source}")]
    Poll {
        tx: TxHash,
        #[source]
        source: RetryError<NetworkError>,
    },
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact file not found at {path}")]
    Missing { path: PathBuf },

    #[error("failed to read artifact at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact at {path} is not valid JSON: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact at {path} is not a usable contract class: {reason}")]
    InvalidClass { path: PathBuf, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("deployment plan has no components")]
    Empty,

    #[error("component {0} appears more than once in the plan")]
    DuplicateComponent(String),

    #[error("{referenced_by} references unknown component {name}")]
    UnknownComponent { referenced_by: String, name: String },

    #[error("{component} needs the address of {depends_on}, which is deployed later")]
    ForwardReference {
        component: String,
        depends_on: String,
    },

    #[error("{referenced_by} references unknown external address {name}")]
    UnknownExternal { referenced_by: String, name: String },

    #[error("external address {name} is not a valid felt: {source}")]
    InvalidAddress {
        name: String,
        #[source]
        source: FeltError,
    },
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to access journal at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal at {path} is corrupt on line {line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("another run holds the lock at {path}")]
    Locked { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to serialize manifest: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to write manifest at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a single declare, deploy or configure step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("querying the network failed: {0}")]
    Query(#[source] RetryError<NetworkError>),

    #[error("submission failed: {0}")]
    Submit(#[source] RetryError<NetworkError>),

    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),

    #[error("no class record for {0}")]
    MissingClassRecord(String),

    #[error("no deployment record for {0}")]
    MissingDeployment(String),

    #[error("no external address named {0}")]
    MissingExternal(String),

    #[error(
        "{step} was submitted as {tx} in an earlier run and its outcome is still unknown; \
         inspect the transaction before re-running"
    )]
    AmbiguousSubmission { step: String, tx: TxHash },

    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// The run-level abort. Each variant names where the pipeline stopped.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("invalid deployment plan: {0}")]
    Plan(#[from] PlanError),

    #[error("declaration of {component} failed: {source}")]
    DeclarationFailed {
        component: String,
        #[source]
        source: StepError,
    },

    #[error("deployment of {component} failed: {source}")]
    DeploymentFailed {
        component: String,
        #[source]
        source: StepError,
    },

    #[error("configuration failed: {source}")]
    ConfigurationFailed {
        #[source]
        source: StepError,
    },

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("illegal component state change from {from} to {to}")]
    InvalidTransition {
        from: ComponentState,
        to: ComponentState,
    },
}
