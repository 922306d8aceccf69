//! Every contract method and event the connector can talk to is declared here as a
//! static descriptor. The call dispatcher consumes the descriptors generically, so a
//! method call is checked against its schema before any network round-trip.
use crate::gateway::{Args, Value};
use std::{fmt, str::FromStr};

/// The contracts known to the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContractKind {
    Node,
    Task,
    Token,
}

impl ContractKind {
    pub const ALL: [ContractKind; 3] = [ContractKind::Node, ContractKind::Task, ContractKind::Token];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Node => "node",
            ContractKind::Task => "task",
            ContractKind::Token => "token",
        }
    }

    pub fn methods(&self) -> &'static [MethodDescriptor] {
        match self {
            ContractKind::Node => NODE_METHODS,
            ContractKind::Task => TASK_METHODS,
            ContractKind::Token => TOKEN_METHODS,
        }
    }

    pub fn events(&self) -> &'static [EventDescriptor] {
        match self {
            ContractKind::Node => &[],
            ContractKind::Task => TASK_EVENTS,
            ContractKind::Token => TOKEN_EVENTS,
        }
    }

    pub fn method(&self, name: &str) -> Option<&'static MethodDescriptor> {
        self.methods().iter().find(|m| m.name == name)
    }

    pub fn event(&self, name: &str) -> Option<&'static EventDescriptor> {
        self.events().iter().find(|e| e.name == name)
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "node" => Ok(ContractKind::Node),
            "task" => Ok(ContractKind::Task),
            "token" => Ok(ContractKind::Token),
            other => Err(format!("unknown contract '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Read-only; served by `call`.
    View,
    /// State-changing; must be signed and submitted.
    Transaction,
}

/// Shape of a contract value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Address,
    /// Unsigned integer, as a JSON number or a decimal / `0x` hex string.
    Uint,
    /// Arbitrary bytes, `0x` hex encoded.
    Bytes,
    /// Exactly 32 bytes, `0x` hex encoded.
    Bytes32,
    Bool,
    String,
    Array(&'static ParamType),
    Tuple(&'static [ParamType]),
}

impl ParamType {
    /// Returns whether `value` has this shape.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ParamType::Address, Value::String(s)) => is_hex_of_len(s, Some(40)),
            (ParamType::Uint, Value::Number(n)) => n.is_u64(),
            (ParamType::Uint, Value::String(s)) => parse_uint(s).is_some(),
            (ParamType::Bytes, Value::String(s)) => is_hex_of_len(s, None),
            (ParamType::Bytes32, Value::String(s)) => is_hex_of_len(s, Some(64)),
            (ParamType::Bool, Value::Bool(_)) => true,
            (ParamType::String, Value::String(_)) => true,
            (ParamType::Array(inner), Value::Array(items)) => items.iter().all(|v| inner.accepts(v)),
            (ParamType::Tuple(fields), Value::Array(items)) => {
                fields.len() == items.len() && fields.iter().zip(items).all(|(t, v)| t.accepts(v))
            }
            _ => false,
        }
    }

    /// Canonical form of a value of this type, so equal values are equal as JSON.
    ///
    /// Unsigned integers become numbers, or decimal strings past 64 bits. Hex strings
    /// are lowercased. Values this type does not accept are returned unchanged.
    pub fn normalize(&self, value: &Value) -> Value {
        match (self, value) {
            (ParamType::Uint, Value::String(s)) => match parse_uint(s) {
                Some(n) => match u64::try_from(n) {
                    Ok(small) => Value::from(small),
                    Err(_) => Value::String(n.to_string()),
                },
                None => value.clone(),
            },
            (ParamType::Address | ParamType::Bytes | ParamType::Bytes32, Value::String(s)) => {
                Value::String(s.to_ascii_lowercase())
            }
            (ParamType::Array(inner), Value::Array(items)) => {
                Value::Array(items.iter().map(|v| inner.normalize(v)).collect())
            }
            (ParamType::Tuple(fields), Value::Array(items)) if fields.len() == items.len() => {
                Value::Array(fields.iter().zip(items).map(|(t, v)| t.normalize(v)).collect())
            }
            _ => value.clone(),
        }
    }

    /// Compares two values as this type: `"0x1"`, `"1"` and `1` are the same `Uint`.
    pub fn same_value(&self, a: &Value, b: &Value) -> bool {
        self.normalize(a) == self.normalize(b)
    }
}

/// Parses an unsigned integer given as decimal or `0x` hex.
pub fn parse_uint(s: &str) -> Option<u128> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u128::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u128>().ok()
    }
}

fn is_hex_of_len(s: &str, digits: Option<usize>) -> bool {
    let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) else {
        return false;
    };
    let len_ok = match digits {
        Some(n) => hex.len() == n,
        None => hex.len() % 2 == 0,
    };
    len_ok && hex.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub ty: ParamType,
}

macro_rules! param {
    ($name:literal, $ty:expr) => {
        Param {
            name: $name,
            ty: $ty,
        }
    };
}

/// Name, argument schema and return schema of a contract method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub contract: ContractKind,
    pub name: &'static str,
    pub kind: MethodKind,
    pub inputs: &'static [Param],
    pub output: Option<ParamType>,
}

impl MethodDescriptor {
    /// Checks that `args` carries exactly the declared parameters, each well typed.
    pub fn validate_args(&self, args: &Args) -> Result<(), String> {
        for p in self.inputs {
            match args.get(p.name) {
                None => return Err(format!("missing argument '{}'", p.name)),
                Some(v) if !p.ty.accepts(v) => {
                    return Err(format!("argument '{}' is not a valid {:?}: {}", p.name, p.ty, v))
                }
                Some(_) => {}
            }
        }
        if let Some(extra) = args.keys().find(|k| !self.inputs.iter().any(|p| p.name == k.as_str())) {
            return Err(format!("unexpected argument '{}'", extra));
        }
        Ok(())
    }

    /// Checks a returned value against the declared output type.
    pub fn validate_output(&self, value: &Value) -> Result<(), String> {
        match self.output {
            Some(ty) if !ty.accepts(value) => {
                Err(format!("{} returned a value that is not a {:?}: {}", self.name, ty, value))
            }
            _ => Ok(()),
        }
    }
}

/// Name and indexed arguments of a contract event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDescriptor {
    pub contract: ContractKind,
    pub name: &'static str,
    pub fields: &'static [Param],
    /// Fields the gateway can filter on directly.
    pub indexed: &'static [&'static str],
}

impl EventDescriptor {
    pub fn is_indexed(&self, field: &str) -> bool {
        self.indexed.contains(&field)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.name == field)
    }

    pub fn field_type(&self, field: &str) -> Option<ParamType> {
        self.fields.iter().find(|f| f.name == field).map(|f| f.ty)
    }

    /// Checks a filter against the event's fields and returns it in canonical form.
    pub fn normalize_filter(&self, filter: &Args) -> Result<Args, FilterFault> {
        filter
            .iter()
            .map(|(name, value)| {
                let ty = self
                    .field_type(name)
                    .ok_or_else(|| FilterFault::UnknownField(name.clone()))?;
                if !ty.accepts(value) {
                    return Err(FilterFault::InvalidValue {
                        field: name.clone(),
                        reason: format!("expected {:?}, got {}", ty, value),
                    });
                }
                Ok((name.clone(), ty.normalize(value)))
            })
            .collect()
    }
}

/// Why an event filter was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterFault {
    UnknownField(String),
    InvalidValue { field: String, reason: String },
}

impl fmt::Display for FilterFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterFault::UnknownField(field) => write!(f, "event has no field '{}'", field),
            FilterFault::InvalidValue { field, reason } => {
                write!(f, "filter value for '{}' is invalid: {}", field, reason)
            }
        }
    }
}

const fn view(
    contract: ContractKind,
    name: &'static str,
    inputs: &'static [Param],
    output: ParamType,
) -> MethodDescriptor {
    MethodDescriptor {
        contract,
        name,
        kind: MethodKind::View,
        inputs,
        output: Some(output),
    }
}

const fn transaction(
    contract: ContractKind,
    name: &'static str,
    inputs: &'static [Param],
) -> MethodDescriptor {
    MethodDescriptor {
        contract,
        name,
        kind: MethodKind::Transaction,
        inputs,
        output: None,
    }
}

use ContractKind::{Node, Task, Token};
use ParamType::{Address, Bytes, Bytes32, Uint};

const GPU_INFO: ParamType = ParamType::Tuple(&[ParamType::String, Uint]);

pub static NODE_METHODS: &[MethodDescriptor] = &[
    transaction(Node, "join", &[]),
    transaction(Node, "quit", &[]),
    transaction(Node, "pause", &[]),
    transaction(Node, "resume", &[]),
    transaction(Node, "updateTaskContractAddress", &[param!("taskContract", Address)]),
    view(Node, "totalNodes", &[], Uint),
    view(Node, "availableNodes", &[], Uint),
    view(Node, "getNodeStatus", &[param!("nodeAddress", Address)], Uint),
    view(
        Node,
        "getNodeInfo",
        &[param!("nodeAddress", Address)],
        ParamType::Tuple(&[Uint, ParamType::String, GPU_INFO]),
    ),
    view(Node, "getAllNodeAddresses", &[], ParamType::Array(&Address)),
    view(Node, "getAvailableNodes", &[], ParamType::Array(&Address)),
    view(Node, "getAvailableGPUs", &[], ParamType::Array(&GPU_INFO)),
];

pub static TASK_METHODS: &[MethodDescriptor] = &[
    transaction(
        Task,
        "createTask",
        &[param!("taskHash", Bytes32), param!("dataHash", Bytes32)],
    ),
    transaction(
        Task,
        "submitTaskResultCommitment",
        &[
            param!("taskId", Uint),
            param!("round", Uint),
            param!("commitment", Bytes32),
            param!("nonce", Bytes32),
        ],
    ),
    transaction(
        Task,
        "discloseTaskResult",
        &[param!("taskId", Uint), param!("round", Uint), param!("result", Bytes)],
    ),
    transaction(
        Task,
        "reportTaskSuccess",
        &[param!("taskId", Uint), param!("round", Uint)],
    ),
    view(Task, "getNodeTask", &[param!("nodeAddress", Address)], Uint),
];

pub static TOKEN_METHODS: &[MethodDescriptor] = &[
    transaction(Token, "approve", &[param!("spender", Address), param!("amount", Uint)]),
    transaction(Token, "transfer", &[param!("to", Address), param!("amount", Uint)]),
    view(
        Token,
        "allowance",
        &[param!("owner", Address), param!("spender", Address)],
        Uint,
    ),
    view(Token, "balanceOf", &[param!("account", Address)], Uint),
];

pub static TASK_EVENTS: &[EventDescriptor] = &[
    EventDescriptor {
        contract: Task,
        name: "TaskCreated",
        fields: &[
            param!("taskId", Uint),
            param!("creator", Address),
            param!("selectedNode", Address),
            param!("taskHash", Bytes32),
            param!("dataHash", Bytes32),
            param!("round", Uint),
        ],
        indexed: &["taskId", "creator", "selectedNode"],
    },
    EventDescriptor {
        contract: Task,
        name: "TaskResultCommitmentsReady",
        fields: &[param!("taskId", Uint)],
        indexed: &["taskId"],
    },
    EventDescriptor {
        contract: Task,
        name: "TaskSuccess",
        fields: &[
            param!("taskId", Uint),
            param!("result", Bytes),
            param!("resultNode", Address),
        ],
        indexed: &["taskId", "resultNode"],
    },
];

pub static TOKEN_EVENTS: &[EventDescriptor] = &[
    EventDescriptor {
        contract: Token,
        name: "Transfer",
        fields: &[param!("from", Address), param!("to", Address), param!("value", Uint)],
        indexed: &["from", "to"],
    },
    EventDescriptor {
        contract: Token,
        name: "Approval",
        fields: &[
            param!("owner", Address),
            param!("spender", Address),
            param!("value", Uint),
        ],
        indexed: &["owner", "spender"],
    },
];

/// Looks up a method, checking that it exists with the expected kind.
pub fn resolve_method(
    contract: ContractKind,
    name: &str,
    kind: MethodKind,
) -> Result<&'static MethodDescriptor, String> {
    let method = contract
        .method(name)
        .ok_or_else(|| format!("{} has no method '{}'", contract, name))?;
    if method.kind != kind {
        return Err(format!("{}.{} is a {:?} method", contract, name, method.kind));
    }
    Ok(method)
}
