//! # Ledger Gateway
//!
//! The abstract RPC surface of the remote ledger. Everything the connector knows
//! about the outside world goes through [`LedgerGateway`], which makes the whole
//! runtime drivable by the in-memory gateway used in tests as well as by a real
//! JSON-RPC client.
use crate::{error::GatewayError, events::RawEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Dynamic contract value (arguments, return values, event fields).
pub type Value = serde_json::Value;

/// Named arguments of a method call or an event.
pub type Args = BTreeMap<String, Value>;

/// A ledger account or contract address, hex encoded.
pub type Address = String;

/// Identifier of a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxHash {
    fn from(s: &str) -> Self {
        TxHash(s.to_string())
    }
}

/// A read-only contract call, optionally evaluated against a historical block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub contract: Address,
    pub method: String,
    pub args: Args,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
}

/// A fully resolved transaction, ready to be signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub from: Address,
    pub to: Address,
    pub method: String,
    pub args: Args,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

/// The opaque output of a [`crate::signer::TransactionSigner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    /// The identifier the ledger will assign to `raw`.
    pub hash: TxHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Failure,
}

/// The ledger's record of a mined transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub status: ReceiptStatus,
    pub gas_used: u64,
    #[serde(default)]
    pub logs: Vec<RawEvent>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Log query for a single event of a single contract over a closed block range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub contract: Address,
    pub event: String,
    pub from_block: u64,
    pub to_block: u64,
    /// Indexed-argument constraints the gateway may apply server side.
    #[serde(default)]
    pub indexed: Args,
}

/// The RPC surface of the remote ledger consumed by the connector.
///
/// Implementations should report connection-level problems as
/// [`GatewayError::Transport`] so callers can retry them, and contract rejections
/// as [`GatewayError::Reverted`].
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Evaluates a read-only call against the current state, or against `request.block`.
    async fn call(&self, request: &CallRequest) -> Result<Value, GatewayError>;

    /// Broadcasts a signed transaction and returns its identifier. A payload the
    /// ledger already holds is reported as [`GatewayError::AlreadyKnown`].
    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash, GatewayError>;

    /// Returns the receipt of a mined transaction, or `None` while it is pending.
    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>, GatewayError>;

    /// Returns the logs matching `query`, in ledger order.
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawEvent>, GatewayError>;

    /// Returns the number of the current tip block.
    async fn current_block(&self) -> Result<u64, GatewayError>;

    /// Returns the number of transactions sent from `address`, pending ones included.
    async fn transaction_count(&self, address: &Address) -> Result<u64, GatewayError>;

    /// Estimates the gas a transaction would consume.
    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, GatewayError>;

    /// Returns the gateway's suggested gas price.
    async fn gas_price(&self) -> Result<u128, GatewayError>;
}
