//! An in-memory ledger and helpers for driving the connector in tests.
use crate::{
    config::{ChannelConfig, ConnectorConfig, ContractAddresses, RetryConfig, WaiterConfig, WatcherConfig},
    contracts::ContractKind,
    error::GatewayError,
    events::{values_equal, RawEvent},
    gateway::{
        Address, Args, CallRequest, LedgerGateway, LogQuery, Receipt, ReceiptStatus,
        SignedTransaction, TxHash, UnsignedTransaction, Value,
    },
    signer::TransactionSigner,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

pub const ADDR_A: &str = "0x00000000000000000000000000000000000000a1";
pub const ADDR_B: &str = "0x00000000000000000000000000000000000000b2";
pub const ADDR_C: &str = "0x00000000000000000000000000000000000000c3";
pub const NODE_CONTRACT: &str = "0x0000000000000000000000000000000000000c01";
pub const TASK_CONTRACT: &str = "0x0000000000000000000000000000000000000c02";
pub const TOKEN_CONTRACT: &str = "0x0000000000000000000000000000000000000c03";

/// Builds an argument map from a JSON object.
pub fn args(value: Value) -> Args {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A 32-byte hex value derived from `seed`.
pub fn bytes32(seed: u8) -> String {
    format!("0x{}", format!("{:02x}", seed).repeat(32))
}

/// How the mock ledger mines the next submitted transaction.
#[derive(Debug, Clone)]
pub struct ReceiptPlan {
    /// Receipt polls answered with "pending" before the receipt shows up.
    pub pending_polls: u32,
    pub status: ReceiptStatus,
    /// Reason reported when the failed call is replayed. `None` makes the replay succeed.
    pub revert_reason: Option<String>,
}

impl ReceiptPlan {
    pub fn success_after(pending_polls: u32) -> Self {
        Self {
            pending_polls,
            status: ReceiptStatus::Success,
            revert_reason: None,
        }
    }

    pub fn revert(reason: Option<&str>) -> Self {
        Self {
            pending_polls: 0,
            status: ReceiptStatus::Failure,
            revert_reason: reason.map(str::to_string),
        }
    }

    /// Never mined.
    pub fn never() -> Self {
        Self::success_after(u32::MAX)
    }
}

struct Mined {
    remaining: u32,
    receipt: Receipt,
    method: String,
    revert_reason: Option<String>,
}

#[derive(Default)]
struct MockState {
    tip: u64,
    logs: Vec<RawEvent>,
    call_results: HashMap<String, Result<Value, GatewayError>>,
    plans: VecDeque<ReceiptPlan>,
    mined: HashMap<TxHash, Mined>,
    sent: Vec<UnsignedTransaction>,
    nonces: HashMap<Address, u64>,
    nonces_frozen: bool,
    send_rejections: VecDeque<GatewayError>,
    lost_send_responses: u32,
    estimate_revert: Option<String>,
    call_failures: u32,
    log_failures: u32,
    block_failures: u32,
    requests: u64,
    receipt_polls: HashMap<TxHash, u32>,
    log_queries: Vec<LogQuery>,
}

/// A scriptable, in-memory [`LedgerGateway`].
#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub const GAS_ESTIMATE: u64 = 21_000;
    pub const GAS_PRICE: u128 = 1_000_000_000;

    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration matching the mock's contract addresses, with fast timings.
    pub fn config() -> ConnectorConfig {
        ConnectorConfig {
            contracts: ContractAddresses {
                node: NODE_CONTRACT.to_string(),
                task: TASK_CONTRACT.to_string(),
                token: TOKEN_CONTRACT.to_string(),
            },
            retry: RetryConfig {
                initial_interval_ms: 1,
                max_interval_ms: 2,
                multiplier: 2.0,
                max_attempts: 3,
            },
            waiter: WaiterConfig {
                poll_interval_ms: 10,
                max_wait_secs: 1,
            },
            watcher: WatcherConfig {
                poll_interval_ms: 10,
                confirmation_depth: 0,
                start_block: None,
                max_block_range: 1_000,
                max_fetch_attempts: 3,
            },
            channels: ChannelConfig::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_tip(&self, tip: u64) {
        self.state().tip = tip;
    }

    pub fn tip(&self) -> u64 {
        self.state().tip
    }

    pub fn mine(&self, blocks: u64) -> u64 {
        let mut state = self.state();
        state.tip += blocks;
        state.tip
    }

    /// Appends a log emitted by `contract` at the given position.
    pub fn emit_at(
        &self,
        contract: ContractKind,
        name: &str,
        block: u64,
        tx_index: u32,
        log_index: u32,
        event_args: Value,
    ) {
        let address = Self::config().contracts.address_of(contract).clone();
        self.state().logs.push(RawEvent {
            name: name.to_string(),
            contract: address,
            block_number: block,
            tx_index,
            log_index,
            tx_hash: None,
            args: args(event_args),
        });
    }

    pub fn set_call_result(&self, method: &str, result: Result<Value, GatewayError>) {
        self.state().call_results.insert(method.to_string(), result);
    }

    /// Queues the fate of the next submitted transaction.
    pub fn plan_next_receipt(&self, plan: ReceiptPlan) {
        self.state().plans.push_back(plan);
    }

    pub fn set_nonce(&self, address: &str, nonce: u64) {
        self.state().nonces.insert(address.to_string(), nonce);
    }

    /// Stops counting accepted transactions, as a lagging gateway would.
    pub fn freeze_nonces(&self) {
        self.state().nonces_frozen = true;
    }

    pub fn reject_next_send(&self, err: GatewayError) {
        self.state().send_rejections.push_back(err);
    }

    /// The next `n` accepted broadcasts answer with a transport error, as if the
    /// response was lost on the way back.
    pub fn lose_send_responses(&self, n: u32) {
        self.state().lost_send_responses = n;
    }

    pub fn revert_estimates(&self, reason: &str) {
        self.state().estimate_revert = Some(reason.to_string());
    }

    /// The next `n` read calls fail with a transport error.
    pub fn fail_calls(&self, n: u32) {
        self.state().call_failures = n;
    }

    /// The next `n` log fetches fail with a transport error.
    pub fn fail_logs(&self, n: u32) {
        self.state().log_failures = n;
    }

    /// The next `n` tip queries fail with a transport error.
    pub fn fail_block_queries(&self, n: u32) {
        self.state().block_failures = n;
    }

    pub fn sent_transactions(&self) -> Vec<UnsignedTransaction> {
        self.state().sent.clone()
    }

    pub fn receipt_polls(&self, hash: &TxHash) -> u32 {
        self.state().receipt_polls.get(hash).copied().unwrap_or(0)
    }

    pub fn log_queries(&self) -> Vec<LogQuery> {
        self.state().log_queries.clone()
    }

    /// Total requests served, failed ones included.
    pub fn request_count(&self) -> u64 {
        self.state().requests
    }
}

#[async_trait]
impl LedgerGateway for MockGateway {
    async fn call(&self, request: &CallRequest) -> Result<Value, GatewayError> {
        let mut state = self.state();
        state.requests += 1;
        if state.call_failures > 0 {
            state.call_failures -= 1;
            return Err(GatewayError::Transport("connection refused".into()));
        }
        if let Some(block) = request.block {
            let replayed = state.mined.values().find(|m| {
                m.method == request.method
                    && m.receipt.block_number == block
                    && m.receipt.status == ReceiptStatus::Failure
            });
            if let Some(mined) = replayed {
                return match &mined.revert_reason {
                    Some(reason) => Err(GatewayError::Reverted(reason.clone())),
                    None => Ok(Value::Null),
                };
            }
        }
        state
            .call_results
            .get(&request.method)
            .cloned()
            .unwrap_or(Ok(Value::Null))
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash, GatewayError> {
        let mut state = self.state();
        state.requests += 1;
        if let Some(err) = state.send_rejections.pop_front() {
            return Err(err);
        }
        let unsigned: UnsignedTransaction = serde_json::from_slice(&tx.raw)
            .map_err(|e| GatewayError::Rejected(format!("undecodable payload: {e}")))?;
        if state.mined.contains_key(&tx.hash) {
            return Err(GatewayError::AlreadyKnown(tx.hash.to_string()));
        }

        let hash = tx.hash.clone();
        let plan = state
            .plans
            .pop_front()
            .unwrap_or_else(|| ReceiptPlan::success_after(0));
        let receipt = Receipt {
            tx_hash: hash.clone(),
            block_number: state.tip + 1,
            status: plan.status,
            gas_used: Self::GAS_ESTIMATE,
            logs: Vec::new(),
        };
        state.mined.insert(
            hash.clone(),
            Mined {
                remaining: plan.pending_polls,
                receipt,
                method: unsigned.method.clone(),
                revert_reason: plan.revert_reason,
            },
        );
        if !state.nonces_frozen {
            *state.nonces.entry(unsigned.from.clone()).or_insert(0) += 1;
        }
        state.sent.push(unsigned);
        if state.lost_send_responses > 0 {
            state.lost_send_responses -= 1;
            return Err(GatewayError::Transport("response timed out".into()));
        }
        Ok(hash)
    }

    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>, GatewayError> {
        let mut state = self.state();
        state.requests += 1;
        *state.receipt_polls.entry(hash.clone()).or_insert(0) += 1;
        match state.mined.get_mut(hash) {
            Some(mined) if mined.remaining > 0 => {
                mined.remaining -= 1;
                Ok(None)
            }
            Some(mined) => Ok(Some(mined.receipt.clone())),
            None => Ok(None),
        }
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawEvent>, GatewayError> {
        let mut state = self.state();
        state.requests += 1;
        if state.log_failures > 0 {
            state.log_failures -= 1;
            return Err(GatewayError::Transport("gateway timeout".into()));
        }
        state.log_queries.push(query.clone());
        Ok(state
            .logs
            .iter()
            .filter(|e| {
                e.contract.eq_ignore_ascii_case(&query.contract)
                    && e.name == query.event
                    && (query.from_block..=query.to_block).contains(&e.block_number)
                    && query
                        .indexed
                        .iter()
                        .all(|(k, v)| e.args.get(k).is_some_and(|actual| values_equal(v, actual)))
            })
            .cloned()
            .collect())
    }

    async fn current_block(&self) -> Result<u64, GatewayError> {
        let mut state = self.state();
        state.requests += 1;
        if state.block_failures > 0 {
            state.block_failures -= 1;
            return Err(GatewayError::Transport("connection reset".into()));
        }
        Ok(state.tip)
    }

    async fn transaction_count(&self, address: &Address) -> Result<u64, GatewayError> {
        let mut state = self.state();
        state.requests += 1;
        Ok(state.nonces.get(address).copied().unwrap_or(0))
    }

    async fn estimate_gas(&self, _request: &CallRequest) -> Result<u64, GatewayError> {
        let mut state = self.state();
        state.requests += 1;
        match &state.estimate_revert {
            Some(reason) => Err(GatewayError::Reverted(reason.clone())),
            None => Ok(Self::GAS_ESTIMATE),
        }
    }

    async fn gas_price(&self) -> Result<u128, GatewayError> {
        self.state().requests += 1;
        Ok(Self::GAS_PRICE)
    }
}

/// Signs by serializing the transaction as JSON, which [`MockGateway`] decodes. The
/// hash is the SHA-256 of that payload.
pub struct PlainSigner {
    address: Address,
}

impl PlainSigner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
        }
    }
}

impl TransactionSigner for PlainSigner {
    fn address(&self) -> &Address {
        &self.address
    }

    fn sign(&self, tx: &UnsignedTransaction) -> anyhow::Result<SignedTransaction> {
        let raw = serde_json::to_vec(tx)?;
        let hash = TxHash(format!("0x{}", hex::encode(Sha256::digest(&raw))));
        Ok(SignedTransaction { raw, hash })
    }
}
