//! A [`LedgerGateway`] speaking JSON-RPC over HTTP.
use crate::config::RpcConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hnet_connector::{
    contracts::parse_uint,
    events::RawEvent,
    gateway::{Address, CallRequest, LedgerGateway, LogQuery, Receipt, SignedTransaction, TxHash, Value},
    GatewayError,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

pub struct JsonRpcGateway {
    http: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl JsonRpcGateway {
    pub fn new(config: &RpcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            url: config.rpc_url.clone(),
            request_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, GatewayError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        tracing::trace!(method, id, "Sending JSON-RPC request");

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Transport(format!("{method}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected(format!("{method}: HTTP {status}")));
        }

        let envelope: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("{method}: unreadable response: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(classify(error));
        }
        let result = envelope.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| GatewayError::Rejected(format!("{method}: unexpected result: {e}")))
    }

    async fn quantity(&self, method: &str, params: Vec<Value>) -> Result<u128, GatewayError> {
        let value: Value = self.request(method, params).await?;
        parse_quantity(&value)
            .ok_or_else(|| GatewayError::Rejected(format!("{method}: expected a quantity, got {value}")))
    }

    async fn quantity_u64(&self, method: &str, params: Vec<Value>) -> Result<u64, GatewayError> {
        let wide = self.quantity(method, params).await?;
        u64::try_from(wide)
            .map_err(|_| GatewayError::Rejected(format!("{method}: {wide} does not fit in 64 bits")))
    }
}

#[async_trait]
impl LedgerGateway for JsonRpcGateway {
    async fn call(&self, request: &CallRequest) -> Result<Value, GatewayError> {
        self.request("call", vec![to_param(request)?]).await
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash, GatewayError> {
        self.request("sendTransaction", vec![raw_param(tx)]).await
    }

    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<Receipt>, GatewayError> {
        self.request("getReceipt", vec![json!(hash)]).await
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawEvent>, GatewayError> {
        self.request("getLogs", vec![to_param(query)?]).await
    }

    async fn current_block(&self) -> Result<u64, GatewayError> {
        self.quantity_u64("getCurrentBlock", Vec::new()).await
    }

    async fn transaction_count(&self, address: &Address) -> Result<u64, GatewayError> {
        self.quantity_u64("getTransactionCount", vec![json!(address)])
            .await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, GatewayError> {
        self.quantity_u64("estimateGas", vec![to_param(request)?])
            .await
    }

    async fn gas_price(&self) -> Result<u128, GatewayError> {
        self.quantity("gasPrice", Vec::new()).await
    }
}

fn to_param<T: Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::Rejected(e.to_string()))
}

fn raw_param(tx: &SignedTransaction) -> Value {
    json!(format!("0x{}", hex::encode(&tx.raw)))
}

/// Quantities arrive as JSON numbers, decimal strings or `0x` hex strings.
fn parse_quantity(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => parse_uint(s),
        _ => None,
    }
}

/// Maps a JSON-RPC error object onto the gateway error taxonomy.
fn classify(error: JsonRpcError) -> GatewayError {
    let message = error.message.to_lowercase();
    if message.contains("revert") {
        let reason = match error.message.split_once(": ") {
            Some((_, reason)) if !reason.is_empty() => reason.to_string(),
            _ => match error.data {
                Some(Value::String(data)) => data,
                _ => String::new(),
            },
        };
        GatewayError::Reverted(reason)
    } else if message.contains("already known") || message.contains("known transaction") {
        GatewayError::AlreadyKnown(error.message)
    } else if message.contains("nonce") {
        GatewayError::NonceConflict(error.message)
    } else if message.contains("insufficient funds") {
        GatewayError::InsufficientFunds(error.message)
    } else {
        GatewayError::Rejected(format!("{} (code {})", error.message, error.code))
    }
}
