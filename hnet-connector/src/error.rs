//! Error taxonomy for the connector.
//!
//! Transient gateway faults are retried locally and only surface once the retry
//! budget is spent. Everything that means "a decision could not be made" is
//! returned to the immediate caller as one of the typed errors below.
use crate::{contracts::ContractKind, gateway::TxHash};
use thiserror::Error;

/// Errors reported by a [`crate::gateway::LedgerGateway`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The request never got a usable answer (connection, timeout, 5xx, ...).
    #[error("gateway unreachable: {0}")]
    Transport(String),

    /// The contract rejected the call.
    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("nonce conflict: {0}")]
    NonceConflict(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The broadcast payload is already in the ledger's pool or chain.
    #[error("transaction already known: {0}")]
    AlreadyKnown(String),

    /// The gateway understood the request and refused it.
    #[error("rejected by gateway: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Returns `true` for faults worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }
}

/// Errors of the read path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The gateway could not be reached within the retry budget.
    #[error("gateway unreachable after {attempts} attempts: {source}")]
    Unreachable { attempts: u32, source: GatewayError },

    /// The contract reverted the read call.
    #[error("call to {method} reverted: {reason}")]
    Reverted { method: String, reason: String },

    /// The call does not fit any known method descriptor.
    #[error("invalid call to {method}: {reason}")]
    InvalidCall { method: String, reason: String },

    /// The gateway refused the call or returned something the descriptor does not allow.
    #[error("gateway error on {method}: {source}")]
    Gateway { method: String, source: GatewayError },
}

/// Errors of the write path. No [`crate::waiter::PendingTransaction`] exists when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("nonce conflict: {0}")]
    NonceConflict(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("malformed arguments for {method}: {reason}")]
    MalformedArguments { method: String, reason: String },

    /// Gas estimation shows the transaction would revert.
    #[error("{method} would revert: {reason}")]
    WouldRevert { method: String, reason: String },

    #[error("no signer configured for transaction submission")]
    NoSigner,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("gateway unreachable after {attempts} attempts: {source}")]
    Unreachable { attempts: u32, source: GatewayError },

    #[error("transaction rejected: {0}")]
    Rejected(GatewayError),

    /// The broadcast may have reached the ledger before the connection failed.
    /// `hash` is what the transaction is known by if it did.
    #[error("broadcast of {hash} unconfirmed after {attempts} attempts: {source}")]
    Unconfirmed {
        hash: TxHash,
        attempts: u32,
        source: GatewayError,
    },
}

impl From<GatewayError> for SubmitError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NonceConflict(msg) => SubmitError::NonceConflict(msg),
            GatewayError::InsufficientFunds(msg) => SubmitError::InsufficientFunds(msg),
            other => SubmitError::Rejected(other),
        }
    }
}

/// Returned when a non-confirmed outcome is turned into a `Result`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutcomeError {
    #[error("transaction {hash} reverted: {reason}")]
    Reverted { hash: TxHash, reason: String },

    /// The outcome is unknown. The transaction may still be mined.
    #[error("timed out waiting for transaction {hash}")]
    TimedOut { hash: TxHash },
}

/// Errors that stop the event poll loop. The watcher must be restarted by its owner.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("watcher stuck at cursor {cursor:?} after {attempts} attempts: {source}")]
    Fatal {
        cursor: Option<u64>,
        attempts: u32,
        source: GatewayError,
    },

    #[error("cursor store failure: {0}")]
    CursorStore(#[source] anyhow::Error),
}

/// Errors of watch registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("{contract} has no event '{event}'")]
    UnknownEvent {
        contract: ContractKind,
        event: String,
    },

    #[error("event {event} has no field '{field}'")]
    UnknownField { event: String, field: String },

    #[error("event {event} cannot be filtered on '{field}': {reason}")]
    InvalidFilterValue {
        event: String,
        field: String,
        reason: String,
    },

    /// The poll loop is no longer running.
    #[error("event watcher has stopped")]
    Stopped,
}
