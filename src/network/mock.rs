//! Scripted in-memory network for tests.
//!
//! Submissions succeed and finalize unless a failure is scripted for the
//! n-th call of an operation. Invoke batches are all-or-nothing: a call to a
//! reverting entry point rejects the whole transaction and none of its calls
//! become visible through [`MockNetwork::applied_calls`].

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{Balance, Call, Network, TxStatus};
use crate::artifact::Artifact;
use crate::errors::NetworkError;
use crate::signer::SignerSession;
use crate::types::{ClassHash, ContractAddress, Felt, TxHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    ClassExists,
    Declare,
    Deploy,
    Invoke,
    Status,
    DeployedAddress,
    Balance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCall {
    pub class_hash: ClassHash,
    pub salt: Felt,
    pub calldata: Vec<Felt>,
}

#[derive(Debug, Clone)]
struct MockTx {
    status: TxStatus,
    polls: u32,
    address: Option<ContractAddress>,
}

#[derive(Debug, Default)]
struct MockState {
    declared: HashSet<ClassHash>,
    declare_calls: Vec<ClassHash>,
    deploy_calls: Vec<DeployCall>,
    invoke_calls: Vec<Vec<Call>>,
    applied: Vec<Call>,
    txs: HashMap<TxHash, MockTx>,
    call_counts: HashMap<MockOp, u32>,
    scripted: HashMap<(MockOp, u32), NetworkError>,
    reverting_entrypoints: HashSet<String>,
    rejected_deploys: HashSet<u32>,
    unfinalized: HashSet<TxHash>,
    pending_polls: u32,
    next_id: u128,
    balance: u128,
    fee: u128,
}

pub struct MockNetwork {
    state: Mutex<MockState>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 0x1000,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a panicking test thread must not hide the original failure
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a class as already declared on the network.
    pub fn with_declared(self, class_hash: ClassHash) -> Self {
        self.lock().declared.insert(class_hash);
        self
    }

    /// Fail the `nth` (1-based) call of `op` with `error` instead of performing it.
    pub fn fail_on(self, op: MockOp, nth: u32, error: NetworkError) -> Self {
        self.lock().scripted.insert((op, nth), error);
        self
    }

    /// Any invoke batch containing a call to `entrypoint` reverts as a whole.
    pub fn reverting_entrypoint(self, entrypoint: &str) -> Self {
        self.lock()
            .reverting_entrypoints
            .insert(entrypoint.to_string());
        self
    }

    /// The `nth` deploy is accepted but rejected at execution.
    pub fn reject_deploy(self, nth: u32) -> Self {
        self.lock().rejected_deploys.insert(nth);
        self
    }

    /// Transactions report `Pending` this many times before settling.
    pub fn pending_polls(self, polls: u32) -> Self {
        self.lock().pending_polls = polls;
        self
    }

    /// Starting balance and the fee charged per submitted transaction.
    pub fn with_balance(self, balance: u128, fee: u128) -> Self {
        {
            let mut state = self.lock();
            state.balance = balance;
            state.fee = fee;
        }
        self
    }

    /// Register a transaction as if a previous run had submitted it.
    pub fn seed_transaction(
        &self,
        tx: TxHash,
        status: TxStatus,
        address: Option<ContractAddress>,
    ) {
        self.lock().txs.insert(
            tx,
            MockTx {
                status,
                polls: 0,
                address,
            },
        );
    }

    /// Keep a seeded transaction pending forever.
    pub fn never_finalize(&self, tx: TxHash) {
        self.lock().unfinalized.insert(tx);
    }

    pub fn declare_calls(&self) -> Vec<ClassHash> {
        self.lock().declare_calls.clone()
    }

    pub fn deploy_calls(&self) -> Vec<DeployCall> {
        self.lock().deploy_calls.clone()
    }

    pub fn invoke_calls(&self) -> Vec<Vec<Call>> {
        self.lock().invoke_calls.clone()
    }

    /// Calls whose effects are visible on the mock chain.
    pub fn applied_calls(&self) -> Vec<Call> {
        self.lock().applied.clone()
    }

    pub fn is_declared(&self, class_hash: ClassHash) -> bool {
        self.lock().declared.contains(&class_hash)
    }

    pub fn call_count(&self, op: MockOp) -> u32 {
        self.lock().call_counts.get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: MockOp) -> Result<MutexGuard<'_, MockState>, NetworkError> {
        let mut state = self.lock();
        let count = state.call_counts.entry(op).or_insert(0);
        *count += 1;
        let nth = *count;
        match state.scripted.remove(&(op, nth)) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

impl MockState {
    fn fresh_id(&mut self) -> Felt {
        self.next_id += 1;
        Felt::from_u128(self.next_id)
    }

    fn record_tx(&mut self, status: TxStatus, address: Option<ContractAddress>) -> TxHash {
        let tx = TxHash(self.fresh_id());
        self.balance = self.balance.saturating_sub(self.fee);
        self.txs.insert(
            tx,
            MockTx {
                status,
                polls: 0,
                address,
            },
        );
        tx
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn class_exists(&self, class_hash: ClassHash) -> Result<bool, NetworkError> {
        let state = self.enter(MockOp::ClassExists)?;
        Ok(state.declared.contains(&class_hash))
    }

    async fn declare(
        &self,
        _session: &mut SignerSession,
        _artifact: &Artifact,
        class_hash: ClassHash,
    ) -> Result<TxHash, NetworkError> {
        let mut state = self.enter(MockOp::Declare)?;
        if state.declared.contains(&class_hash) {
            return Err(NetworkError::Permanent(format!(
                "class {class_hash} is already declared"
            )));
        }
        state.declare_calls.push(class_hash);
        state.declared.insert(class_hash);
        Ok(state.record_tx(TxStatus::Finalized, None))
    }

    async fn deploy(
        &self,
        _session: &mut SignerSession,
        class_hash: ClassHash,
        salt: Felt,
        constructor_calldata: &[Felt],
    ) -> Result<TxHash, NetworkError> {
        let mut state = self.enter(MockOp::Deploy)?;
        if !state.declared.contains(&class_hash) {
            return Err(NetworkError::Permanent(format!(
                "class {class_hash} is not declared"
            )));
        }
        state.deploy_calls.push(DeployCall {
            class_hash,
            salt,
            calldata: constructor_calldata.to_vec(),
        });
        let nth = state.deploy_calls.len() as u32;
        if state.rejected_deploys.contains(&nth) {
            return Ok(state.record_tx(TxStatus::Rejected("constructor reverted".into()), None));
        }
        let address = ContractAddress(state.fresh_id());
        Ok(state.record_tx(TxStatus::Finalized, Some(address)))
    }

    async fn invoke(
        &self,
        _session: &mut SignerSession,
        calls: &[Call],
    ) -> Result<TxHash, NetworkError> {
        let mut state = self.enter(MockOp::Invoke)?;
        state.invoke_calls.push(calls.to_vec());
        let reverting = calls
            .iter()
            .find(|call| state.reverting_entrypoints.contains(&call.entrypoint))
            .map(|call| call.entrypoint.clone());
        match reverting {
            Some(entrypoint) => Ok(state.record_tx(
                TxStatus::Rejected(format!("{entrypoint} reverted")),
                None,
            )),
            None => {
                state.applied.extend(calls.iter().cloned());
                Ok(state.record_tx(TxStatus::Finalized, None))
            }
        }
    }

    async fn transaction_status(&self, tx: TxHash) -> Result<TxStatus, NetworkError> {
        let mut state = self.enter(MockOp::Status)?;
        let pending_polls = state.pending_polls;
        let never = state.unfinalized.contains(&tx);
        let record = state
            .txs
            .get_mut(&tx)
            .ok_or_else(|| NetworkError::Transient(format!("transaction {tx} not known yet")))?;
        record.polls += 1;
        if never || record.polls <= pending_polls {
            return Ok(TxStatus::Pending);
        }
        Ok(record.status.clone())
    }

    async fn deployed_address(&self, tx: TxHash) -> Result<ContractAddress, NetworkError> {
        let state = self.enter(MockOp::DeployedAddress)?;
        state
            .txs
            .get(&tx)
            .and_then(|record| record.address)
            .ok_or_else(|| NetworkError::Permanent(format!("no deployment in {tx}")))
    }

    async fn balance(&self, _account: ContractAddress) -> Result<Balance, NetworkError> {
        let state = self.enter(MockOp::Balance)?;
        Ok(Balance(state.balance))
    }
}
