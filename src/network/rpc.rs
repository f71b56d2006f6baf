//! Starknet adapter: local signing plus plain JSON-RPC reads.
//!
//! Reads (`starknet_getClass`, transaction status, receipts, `balanceOf`) are
//! JSON-RPC 2.0 calls over `reqwest`. Submissions are signed in-process by a
//! `SingleOwnerAccount` wrapping the session's `LocalWallet` and sent as
//! ordinary `starknet_add*Transaction` requests; no credential is ever put on
//! the wire. Contract instances are created through the universal deployer
//! contract, whose `ContractDeployed` event carries the new address.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use sha3::{Digest, Keccak256};
use starknet::accounts::{Account, ExecutionEncoding, SingleOwnerAccount};
use starknet::core::chain_id;
use starknet::core::types::contract::SierraClass;
use starknet::providers::jsonrpc::HttpTransport;
use starknet::providers::{JsonRpcClient, Url};
use starknet::signers::LocalWallet;
use std::sync::Arc;
use std::time::Duration;

use super::classify::{
    RpcErrorObject, classify_account_error, classify_rpc_error, classify_status,
    classify_transport, malformed_body,
};
use super::{Balance, Call, Network, TxStatus};
use crate::artifact::Artifact;
use crate::errors::NetworkError;
use crate::plan::Chain;
use crate::signer::SignerSession;
use crate::types::{ClassHash, ContractAddress, Felt, TxHash};

/// Universal deployer contract, same address on mainnet and sepolia.
pub const UDC_ADDRESS: &str = "0x041a78e741e5af2fec34b695679bc6891742439f7afb8484ecd7766661ad02bf";

/// STRK fee token, same address on mainnet and sepolia.
pub const STRK_TOKEN_ADDRESS: &str =
    "0x04718f5a0fc34cc1af16a1cdee98ffb20c31f5cd61d6ab07201858f4287c938d";

const CLASS_HASH_NOT_FOUND: i64 = 28;
const TXN_HASH_NOT_FOUND: i64 = 29;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type SigningAccount = SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>;

/// Entry point selector: keccak-256 of the name, truncated to 250 bits.
pub fn selector(name: &str) -> Felt {
    let digest = Keccak256::digest(name.as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    bytes[0] &= 0x03;
    Felt::from_bytes_be(bytes).unwrap_or(Felt::ZERO)
}

fn starknet_chain_id(chain: Chain) -> starknet::core::types::Felt {
    match chain {
        Chain::Mainnet => chain_id::MAINNET,
        Chain::Sepolia => chain_id::SEPOLIA,
    }
}

/// Failure of a single JSON-RPC exchange, before call-site interpretation.
#[derive(Debug)]
enum RpcFailure {
    Transport(NetworkError),
    Rpc(RpcErrorObject),
}

impl RpcFailure {
    fn into_network_error(self, method: &str) -> NetworkError {
        match self {
            RpcFailure::Transport(err) => err,
            RpcFailure::Rpc(obj) => match classify_rpc_error(&obj) {
                NetworkError::Transient(reason) => {
                    NetworkError::Transient(format!("{method}: {reason}"))
                }
                NetworkError::Permanent(reason) => {
                    NetworkError::Permanent(format!("{method}: {reason}"))
                }
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    finality_status: String,
    #[serde(default)]
    execution_status: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceiptEvent {
    from_address: Felt,
    #[serde(default)]
    keys: Vec<Felt>,
    #[serde(default)]
    data: Vec<Felt>,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    #[serde(default)]
    events: Vec<ReceiptEvent>,
}

pub struct RpcNetwork {
    client: reqwest::Client,
    url: String,
    endpoint: Url,
    chain: Chain,
    udc: ContractAddress,
    fee_token: ContractAddress,
}

impl RpcNetwork {
    pub fn new(url: impl Into<String>, chain: Chain) -> Result<Self, NetworkError> {
        Self::with_timeout(url, chain, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        url: impl Into<String>,
        chain: Chain,
        timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let url = url.into();
        let endpoint = Url::parse(&url)
            .map_err(|e| NetworkError::Permanent(format!("invalid RPC URL {url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError::Permanent(format!("failed to build HTTP client: {e}")))?;
        let udc = UDC_ADDRESS
            .parse()
            .map_err(|e| NetworkError::Permanent(format!("bad deployer address: {e}")))?;
        let fee_token = STRK_TOKEN_ADDRESS
            .parse()
            .map_err(|e| NetworkError::Permanent(format!("bad fee token address: {e}")))?;
        Ok(Self {
            client,
            url,
            endpoint,
            chain,
            udc,
            fee_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Account that signs with the session's key and submits through this endpoint.
    fn account(&self, session: &SignerSession) -> Result<SigningAccount, NetworkError> {
        let wallet = session
            .wallet()
            .map_err(|e| NetworkError::Permanent(e.to_string()))?;
        let provider = JsonRpcClient::new(HttpTransport::new(self.endpoint.clone()));
        Ok(SingleOwnerAccount::new(
            provider,
            wallet,
            session.address().felt().into(),
            starknet_chain_id(self.chain),
            ExecutionEncoding::New,
        ))
    }

    async fn execute(
        &self,
        session: &SignerSession,
        label: &str,
        calls: &[Call],
    ) -> Result<TxHash, NetworkError> {
        let account = self.account(session)?;
        let calls = calls.iter().map(to_starknet_call).collect();
        let result = account
            .execute_v3(calls)
            .send()
            .await
            .map_err(|e| classify_account_error(label, e))?;
        Ok(TxHash(result.transaction_hash.into()))
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        tracing::trace!(method, "rpc request");
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(classify_transport(&e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RpcFailure::Transport(classify_transport(&e)))?;

        let parsed: RpcResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => {
                return Err(RpcFailure::Transport(
                    classify_status(status).unwrap_or_else(|| malformed_body(&text)),
                ));
            }
        };
        if let Some(error) = parsed.error {
            return Err(RpcFailure::Rpc(error));
        }
        if let Some(err) = classify_status(status) {
            return Err(RpcFailure::Transport(err));
        }
        parsed.result.ok_or_else(|| {
            RpcFailure::Transport(malformed_body(&format!("{method} returned no result")))
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T, NetworkError> {
    serde_json::from_value(value)
        .map_err(|e| NetworkError::Transient(format!("{method}: unexpected result shape: {e}")))
}

fn to_starknet_call(call: &Call) -> starknet::core::types::Call {
    starknet::core::types::Call {
        to: call.to.felt().into(),
        selector: selector(&call.entrypoint).into(),
        calldata: call.calldata.iter().copied().map(Into::into).collect(),
    }
}

/// Calldata for the deployer's `deployContract(class_hash, salt, unique, calldata)`.
pub fn udc_calldata(class_hash: ClassHash, salt: Felt, constructor_calldata: &[Felt]) -> Vec<Felt> {
    let mut calldata = Vec::with_capacity(constructor_calldata.len() + 4);
    calldata.push(class_hash.felt());
    calldata.push(salt);
    calldata.push(Felt::from_u128(1));
    calldata.push(Felt::from_u128(constructor_calldata.len() as u128));
    calldata.extend_from_slice(constructor_calldata);
    calldata
}

fn interpret_status(status: StatusResult) -> TxStatus {
    if status.finality_status == "REJECTED" {
        return TxStatus::Rejected(
            status
                .failure_reason
                .unwrap_or_else(|| "rejected by sequencer".to_string()),
        );
    }
    if status.execution_status.as_deref() == Some("REVERTED") {
        return TxStatus::Rejected(
            status
                .failure_reason
                .unwrap_or_else(|| "execution reverted".to_string()),
        );
    }
    match status.finality_status.as_str() {
        "ACCEPTED_ON_L2" | "ACCEPTED_ON_L1" => TxStatus::Finalized,
        _ => TxStatus::Pending,
    }
}

#[async_trait]
impl Network for RpcNetwork {
    async fn class_exists(&self, class_hash: ClassHash) -> Result<bool, NetworkError> {
        let params = json!({ "block_id": "latest", "class_hash": class_hash });
        match self.rpc_call("starknet_getClass", params).await {
            Ok(_) => Ok(true),
            Err(RpcFailure::Rpc(obj)) if obj.code == CLASS_HASH_NOT_FOUND => Ok(false),
            Err(failure) => Err(failure.into_network_error("starknet_getClass")),
        }
    }

    async fn declare(
        &self,
        session: &mut SignerSession,
        artifact: &Artifact,
        class_hash: ClassHash,
    ) -> Result<TxHash, NetworkError> {
        let name = &artifact.name;
        let class: SierraClass = serde_json::from_slice(&artifact.contract_class)
            .map_err(|e| NetworkError::Permanent(format!("{name} is not a Sierra class: {e}")))?;
        let flattened = class
            .flatten()
            .map_err(|e| NetworkError::Permanent(format!("failed to flatten {name}: {e}")))?;

        let account = self.account(session)?;
        let result = account
            .declare_v3(Arc::new(flattened), artifact.compiled_class_hash.into())
            .send()
            .await
            .map_err(|e| classify_account_error("declare", e))?;

        let declared = ClassHash(result.class_hash.into());
        if declared != class_hash {
            tracing::warn!(contract = %artifact.name, expected = %class_hash, declared = %declared, "network reports a different class hash");
        }
        Ok(TxHash(result.transaction_hash.into()))
    }

    async fn deploy(
        &self,
        session: &mut SignerSession,
        class_hash: ClassHash,
        salt: Felt,
        constructor_calldata: &[Felt],
    ) -> Result<TxHash, NetworkError> {
        let call = Call::new(
            self.udc,
            "deployContract",
            udc_calldata(class_hash, salt, constructor_calldata),
        );
        self.execute(session, "deploy", std::slice::from_ref(&call))
            .await
    }

    async fn invoke(
        &self,
        session: &mut SignerSession,
        calls: &[Call],
    ) -> Result<TxHash, NetworkError> {
        self.execute(session, "invoke", calls).await
    }

    async fn transaction_status(&self, tx: TxHash) -> Result<TxStatus, NetworkError> {
        let method = "starknet_getTransactionStatus";
        let params = json!({ "transaction_hash": tx });
        match self.rpc_call(method, params).await {
            Ok(result) => Ok(interpret_status(decode(method, result)?)),
            // Freshly submitted transactions can lag behind on load-balanced nodes.
            Err(RpcFailure::Rpc(obj)) if obj.code == TXN_HASH_NOT_FOUND => Err(
                NetworkError::Transient(format!("{method}: transaction {tx} not known yet")),
            ),
            Err(failure) => Err(failure.into_network_error(method)),
        }
    }

    async fn deployed_address(&self, tx: TxHash) -> Result<ContractAddress, NetworkError> {
        let method = "starknet_getTransactionReceipt";
        let result = self
            .rpc_call(method, json!({ "transaction_hash": tx }))
            .await
            .map_err(|f| f.into_network_error(method))?;
        let receipt: Receipt = decode(method, result)?;
        let deployed_key = selector("ContractDeployed");
        receipt
            .events
            .iter()
            .find(|event| {
                event.from_address == self.udc.felt() && event.keys.first() == Some(&deployed_key)
            })
            .and_then(|event| event.data.first())
            .map(|address| ContractAddress(*address))
            .ok_or_else(|| {
                NetworkError::Permanent(format!("{method}: no ContractDeployed event in {tx}"))
            })
    }

    async fn balance(&self, account: ContractAddress) -> Result<Balance, NetworkError> {
        let method = "starknet_call";
        let params = json!({
            "request": {
                "contract_address": self.fee_token,
                "entry_point_selector": selector("balanceOf"),
                "calldata": [account],
            },
            "block_id": "latest",
        });
        let result = self
            .rpc_call(method, params)
            .await
            .map_err(|f| f.into_network_error(method))?;
        let words: Vec<Felt> = decode(method, result)?;
        let low = words
            .first()
            .and_then(Felt::to_u128)
            .ok_or_else(|| NetworkError::Permanent(format!("{method}: malformed u256 balance")))?;
        let high_is_zero = words.get(1).is_none_or(Felt::is_zero);
        Ok(Balance(if high_is_zero { low } else { u128::MAX }))
    }
}
