//! # Contract Bindings
//!
//! Typed wrappers over [`ContractClient`] for the `node`, `task` and `token` contracts.
//! Each method forwards to the generic call path with the arguments named as the
//! contract expects them, and decodes the returned value.

mod node;
mod task;
mod token;

pub use node::{ChainNodeInfo, ChainNodeStatus, GpuInfo, NodeContract};
pub use task::TaskContract;
pub use token::TokenContract;

use crate::{
    client::ContractClient,
    contracts::parse_uint,
    error::{CallError, GatewayError},
    gateway::{Address, Args, Value},
};

/// All contract bindings sharing one client.
#[derive(Clone)]
pub struct Contracts {
    pub node: NodeContract,
    pub task: TaskContract,
    pub token: TokenContract,
}

impl Contracts {
    pub fn new(client: ContractClient) -> Self {
        Self {
            node: NodeContract::new(client.clone()),
            task: TaskContract::new(client.clone()),
            token: TokenContract::new(client),
        }
    }
}

pub(crate) fn named<const N: usize>(pairs: [(&str, Value); N]) -> Args {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Encodes an unsigned integer. Values beyond `u64` travel as decimal strings.
pub(crate) fn uint(value: u128) -> Value {
    match u64::try_from(value) {
        Ok(small) => Value::from(small),
        Err(_) => Value::String(value.to_string()),
    }
}

pub(crate) fn decode_uint(method: &str, value: &Value) -> Result<u128, CallError> {
    let decoded = match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => parse_uint(s),
        _ => None,
    };
    decoded.ok_or_else(|| malformed(method, format!("expected an unsigned integer, got {value}")))
}

pub(crate) fn decode_u64(method: &str, value: &Value) -> Result<u64, CallError> {
    let wide = decode_uint(method, value)?;
    u64::try_from(wide).map_err(|_| malformed(method, format!("{wide} does not fit in 64 bits")))
}

pub(crate) fn decode_string(method: &str, value: &Value) -> Result<String, CallError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed(method, format!("expected a string, got {value}")))
}

pub(crate) fn decode_addresses(method: &str, value: &Value) -> Result<Vec<Address>, CallError> {
    decode_items(method, value)?
        .iter()
        .map(|item| decode_string(method, item))
        .collect()
}

pub(crate) fn decode_items<'a>(method: &str, value: &'a Value) -> Result<&'a [Value], CallError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| malformed(method, format!("expected an array, got {value}")))
}

pub(crate) fn malformed(method: &str, reason: String) -> CallError {
    CallError::Gateway {
        method: method.to_string(),
        source: GatewayError::Rejected(reason),
    }
}
