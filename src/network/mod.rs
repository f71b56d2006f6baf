//! The network primitives the pipeline consumes.
//!
//! `Network` is the seam between provisioning logic and the chain. The real
//! implementation is [`RpcNetwork`]; tests drive the pipeline through the
//! scripted `MockNetwork`, which only exists in test builds and with the
//! `test-util` feature. Implementations must tag every failure as transient
//! or permanent (see `NetworkError`).

pub mod classify;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod rpc;

use async_trait::async_trait;
use std::fmt;

use crate::artifact::Artifact;
use crate::errors::NetworkError;
use crate::signer::SignerSession;
use crate::types::{ClassHash, ContractAddress, Felt, TxHash};

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockNetwork;
pub use rpc::RpcNetwork;

/// Where a submitted transaction stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Known to the network but not yet final.
    Pending,
    /// Accepted and executed successfully.
    Finalized,
    /// Rejected or reverted; carries the network's reason.
    Rejected(String),
}

/// One contract call inside an invoke transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub to: ContractAddress,
    pub entrypoint: String,
    pub calldata: Vec<Felt>,
}

impl Call {
    pub fn new(to: ContractAddress, entrypoint: impl Into<String>, calldata: Vec<Felt>) -> Self {
        Self {
            to,
            entrypoint: entrypoint.into(),
            calldata,
        }
    }
}

const TOKEN_DECIMALS: u32 = 18;
const DISPLAY_DECIMALS: u32 = 4;

/// Fee-token balance in its smallest unit (18 decimals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Balance(pub u128);

impl Balance {
    /// Signed change from `earlier` to `self`.
    pub fn delta_since(&self, earlier: Balance) -> BalanceDelta {
        if self.0 >= earlier.0 {
            BalanceDelta {
                negative: false,
                amount: self.0 - earlier.0,
            }
        } else {
            BalanceDelta {
                negative: true,
                amount: earlier.0 - self.0,
            }
        }
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_token_amount(self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub negative: bool,
    pub amount: u128,
}

impl fmt::Display for BalanceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.negative && self.amount > 0 { "-" } else { "+" };
        write!(f, "{sign}{}", format_token_amount(self.amount))
    }
}

fn format_token_amount(raw: u128) -> String {
    let unit = 10u128.pow(TOKEN_DECIMALS);
    let whole = raw / unit;
    let frac = (raw % unit) / 10u128.pow(TOKEN_DECIMALS - DISPLAY_DECIMALS);
    format!("{whole}.{frac:0width$}", width = DISPLAY_DECIMALS as usize)
}

/// Abstraction over the chain for testability.
/// Real implementation: `RpcNetwork`. Test double: `MockNetwork`.
#[async_trait]
pub trait Network: Send + Sync {
    /// Whether a class with this hash is already declared.
    async fn class_exists(&self, class_hash: ClassHash) -> Result<bool, NetworkError>;

    async fn declare(
        &self,
        session: &mut SignerSession,
        artifact: &Artifact,
        class_hash: ClassHash,
    ) -> Result<TxHash, NetworkError>;

    /// Instantiate a declared class. Every call yields a new instance.
    async fn deploy(
        &self,
        session: &mut SignerSession,
        class_hash: ClassHash,
        salt: Felt,
        constructor_calldata: &[Felt],
    ) -> Result<TxHash, NetworkError>;

    /// Submit all calls as one transaction: they apply together or not at all.
    async fn invoke(
        &self,
        session: &mut SignerSession,
        calls: &[Call],
    ) -> Result<TxHash, NetworkError>;

    async fn transaction_status(&self, tx: TxHash) -> Result<TxStatus, NetworkError>;

    /// Address created by a finalized deploy transaction.
    async fn deployed_address(&self, tx: TxHash) -> Result<ContractAddress, NetworkError>;

    async fn balance(&self, account: ContractAddress) -> Result<Balance, NetworkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_TOKEN: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn balance_formats_with_four_decimals() {
        assert_eq!(Balance(ONE_TOKEN * 12 + ONE_TOKEN / 4).to_string(), "12.2500");
        assert_eq!(Balance(0).to_string(), "0.0000");
        assert_eq!(Balance(123_456_789).to_string(), "0.0000");
    }

    #[test]
    fn balance_delta_is_signed() {
        let before = Balance(ONE_TOKEN * 10);
        let after = Balance(ONE_TOKEN * 9);
        assert_eq!(after.delta_since(before).to_string(), "-1.0000");
        assert_eq!(before.delta_since(after).to_string(), "+1.0000");
        assert_eq!(before.delta_since(before).to_string(), "+0.0000");
    }
}
