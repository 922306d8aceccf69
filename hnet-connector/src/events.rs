use crate::{
    contracts::ContractKind,
    gateway::{Address, Args, TxHash, Value},
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Position of a log in the ledger. Dispatch order is ascending by this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventPosition {
    pub block_number: u64,
    pub tx_index: u32,
    pub log_index: u32,
}

/// A decoded contract log as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub name: String,
    pub contract: Address,
    pub block_number: u64,
    pub tx_index: u32,
    pub log_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    #[serde(default)]
    pub args: Args,
}

impl RawEvent {
    pub fn position(&self) -> EventPosition {
        EventPosition {
            block_number: self.block_number,
            tx_index: self.tx_index,
            log_index: self.log_index,
        }
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }
}

/// Orders events by [`EventPosition`].
pub fn cmp_position(a: &RawEvent, b: &RawEvent) -> Ordering {
    a.position().cmp(&b.position())
}

/// Sorts a fetched batch into dispatch order and drops repeated positions.
pub fn sort_and_dedup(events: &mut Vec<RawEvent>) {
    events.sort_by(cmp_position);
    events.dedup_by(|later, earlier| later.position() == earlier.position());
}

/// What a watch is interested in: one event of one contract, narrowed by a subset
/// of its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub contract: ContractKind,
    pub event: String,
    pub args: Args,
}

impl EventFilter {
    pub fn new(contract: ContractKind, event: impl Into<String>) -> Self {
        Self {
            contract,
            event: event.into(),
            args: Args::new(),
        }
    }

    /// Requires `name` to equal `value` on matching events.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: Args) -> Self {
        self.args.extend(args);
        self
    }

    /// Subset match: every constrained argument must be present on the event with an
    /// equal value. Extra event arguments are ignored.
    ///
    /// Declared fields compare by their type, so `"0x1"` matches a `Uint` field of 1.
    pub fn matches(&self, contract: ContractKind, event: &RawEvent) -> bool {
        if contract != self.contract || event.name != self.event {
            return false;
        }
        let descriptor = self.contract.event(&self.event);
        self.args.iter().all(|(name, expected)| {
            let Some(actual) = event.args.get(name) else {
                return false;
            };
            match descriptor.and_then(|d| d.field_type(name)) {
                Some(ty) => ty.same_value(expected, actual),
                None => values_equal(expected, actual),
            }
        })
    }
}

/// Structural equality with hex strings compared case-insensitively, so checksummed
/// and lowercase addresses match.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) if is_hex(x) && is_hex(y) => x.eq_ignore_ascii_case(y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

fn is_hex(s: &str) -> bool {
    s.len() > 2
        && (s.starts_with("0x") || s.starts_with("0X"))
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}
