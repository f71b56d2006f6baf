//! The single signing identity behind every submitted transaction.
//!
//! The network orders each account's transactions by nonce, so two
//! submissions from the same account must never race. Submitting
//! primitives take `&mut SignerSession`: holding the only mutable borrow is
//! what makes a submission possible.
//!
//! Transactions are signed locally with the session's key. The secret never
//! leaves the process.

use starknet::signers::{LocalWallet, SigningKey};
use std::fmt;
use thiserror::Error;

use crate::types::{ContractAddress, Felt, TxHash};

/// The secret does not parse as a non-zero field element. Deliberately
/// carries no part of the value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("signer secret is not a non-zero 0x-prefixed field element")]
pub struct InvalidSecret;

/// Signer secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// The private scalar behind this secret.
    pub fn scalar(&self) -> Result<Felt, InvalidSecret> {
        match self.0.trim().parse::<Felt>() {
            Ok(scalar) if !scalar.is_zero() => Ok(scalar),
            _ => Err(InvalidSecret),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug)]
pub struct SignerSession {
    address: ContractAddress,
    secret: Secret,
    submitted: Vec<TxHash>,
}

impl SignerSession {
    pub fn new(address: ContractAddress, secret: Secret) -> Self {
        Self {
            address,
            secret,
            submitted: Vec::new(),
        }
    }

    pub fn address(&self) -> ContractAddress {
        self.address
    }

    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Local wallet that signs this session's transactions.
    pub fn wallet(&self) -> Result<LocalWallet, InvalidSecret> {
        let scalar = self.secret.scalar()?;
        Ok(LocalWallet::from_signing_key(SigningKey::from_secret_scalar(
            scalar.into(),
        )))
    }

    /// Note a transaction this session signed and got accepted for submission.
    pub fn record_submission(&mut self, tx: TxHash) {
        tracing::debug!(signer = %self.address, tx = %tx, seq = self.submitted.len() + 1, "submission recorded");
        self.submitted.push(tx);
    }

    /// Transactions submitted through this session, in order.
    pub fn submissions(&self) -> &[TxHash] {
        &self.submitted
    }
}
