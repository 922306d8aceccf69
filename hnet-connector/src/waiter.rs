//! # Transaction Confirmation Tracker
//!
//! A submitted transaction is only a promise. [`TransactionWaiter::wait`] polls the
//! gateway for its receipt until one of three terminal outcomes is reached:
//!
//! - `Confirmed`: a receipt with a success status.
//! - `Reverted`: a receipt with a failure status. The call is replayed read-only at
//!   the failing block to recover the contract's revert reason.
//! - `TimedOut`: no receipt within `max_wait`. The transaction may still be mined.
//!
//! The outcome is memoized on the [`PendingTransaction`] (and shared by its clones),
//! so waiting twice never re-polls and never yields a different answer.
use crate::{
    config::{RetryConfig, WaiterConfig},
    contracts::ContractKind,
    error::{GatewayError, OutcomeError},
    gateway::{Address, Args, CallRequest, LedgerGateway, Receipt, TxHash},
    retry::{with_backoff, RetryFailure},
};
use chrono::{DateTime, Utc};
use std::{fmt, sync::Arc, time::Duration};
use tokio::{sync::OnceCell, time::Instant};

/// A broadcast transaction whose outcome is not known yet.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    hash: TxHash,
    submitted_block: u64,
    submitted_at: DateTime<Utc>,
    sender: Address,
    contract: ContractKind,
    contract_address: Address,
    method: &'static str,
    args: Args,
    nonce: u64,
    outcome: Arc<OnceCell<TransactionOutcome>>,
}

/// Everything the tracker needs to know about a freshly broadcast transaction.
#[derive(Debug, Clone)]
pub struct Submission {
    pub hash: TxHash,
    pub submitted_block: u64,
    pub sender: Address,
    pub contract: ContractKind,
    pub contract_address: Address,
    pub method: &'static str,
    pub args: Args,
    pub nonce: u64,
}

impl PendingTransaction {
    pub fn new(submission: Submission) -> Self {
        Self {
            hash: submission.hash,
            submitted_block: submission.submitted_block,
            submitted_at: Utc::now(),
            sender: submission.sender,
            contract: submission.contract,
            contract_address: submission.contract_address,
            method: submission.method,
            args: submission.args,
            nonce: submission.nonce,
            outcome: Arc::new(OnceCell::new()),
        }
    }

    pub fn hash(&self) -> &TxHash {
        &self.hash
    }

    /// The gateway's tip when the transaction was broadcast.
    pub fn submitted_block(&self) -> u64 {
        self.submitted_block
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn contract(&self) -> ContractKind {
        self.contract
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The memoized outcome, if a wait already completed.
    pub fn outcome(&self) -> Option<&TransactionOutcome> {
        self.outcome.get()
    }
}

/// Why a mined transaction was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    Message(String),
    /// The diagnostic replay could not recover a reason.
    Unknown,
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertReason::Message(msg) => f.write_str(msg),
            RevertReason::Unknown => f.write_str("unknown reason"),
        }
    }
}

/// Terminal result of waiting on a [`PendingTransaction`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    Confirmed(Receipt),
    Reverted { receipt: Receipt, reason: RevertReason },
    /// Outcome unknown; do not assume failure.
    TimedOut,
}

impl TransactionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransactionOutcome::Confirmed(_))
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            TransactionOutcome::Confirmed(receipt) | TransactionOutcome::Reverted { receipt, .. } => {
                Some(receipt)
            }
            TransactionOutcome::TimedOut => None,
        }
    }

    /// Returns the receipt of a confirmed transaction, or an error that keeps
    /// `Reverted` and `TimedOut` apart.
    pub fn into_receipt(self, hash: &TxHash) -> Result<Receipt, OutcomeError> {
        match self {
            TransactionOutcome::Confirmed(receipt) => Ok(receipt),
            TransactionOutcome::Reverted { reason, .. } => Err(OutcomeError::Reverted {
                hash: hash.clone(),
                reason: reason.to_string(),
            }),
            TransactionOutcome::TimedOut => Err(OutcomeError::TimedOut { hash: hash.clone() }),
        }
    }
}

/// Resolves pending transactions against a gateway. Cheap to clone; every wait is an
/// independent poll loop.
#[derive(Clone)]
pub struct TransactionWaiter {
    gateway: Arc<dyn LedgerGateway>,
    config: WaiterConfig,
    /// Applied to the diagnostic replay of a reverted call.
    retry: RetryConfig,
}

impl TransactionWaiter {
    pub fn new(gateway: Arc<dyn LedgerGateway>, config: WaiterConfig, retry: RetryConfig) -> Self {
        Self {
            gateway,
            config,
            retry,
        }
    }

    /// Waits with the configured poll interval and maximum wait.
    pub async fn wait_default(&self, tx: &PendingTransaction) -> TransactionOutcome {
        self.wait(tx, self.config.poll_interval(), self.config.max_wait())
            .await
    }

    /// Polls for the receipt of `tx` until a terminal outcome is reached.
    ///
    /// Dropping the returned future abandons the poll loop without recording an
    /// outcome; a later call starts over.
    pub async fn wait(
        &self,
        tx: &PendingTransaction,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> TransactionOutcome {
        tx.outcome
            .get_or_init(|| self.poll(tx, poll_interval, max_wait))
            .await
            .clone()
    }

    async fn poll(
        &self,
        tx: &PendingTransaction,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> TransactionOutcome {
        let deadline = Instant::now() + max_wait;
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.gateway.get_receipt(&tx.hash).await {
                Ok(Some(receipt)) if receipt.is_success() => {
                    tracing::info!(tx_hash = %tx.hash, block = receipt.block_number, polls, "Transaction confirmed");
                    return TransactionOutcome::Confirmed(receipt);
                }
                Ok(Some(receipt)) => {
                    let reason = self.diagnose(tx, &receipt).await;
                    tracing::warn!(tx_hash = %tx.hash, block = receipt.block_number, %reason, "Transaction reverted");
                    return TransactionOutcome::Reverted { receipt, reason };
                }
                Ok(None) => {
                    tracing::trace!(tx_hash = %tx.hash, polls, "No receipt yet");
                }
                Err(e) => {
                    tracing::debug!(tx_hash = %tx.hash, polls, "Receipt poll failed: {}", e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(tx_hash = %tx.hash, polls, "Gave up waiting for receipt");
                return TransactionOutcome::TimedOut;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Replays the failed call read-only at the block it was mined in.
    async fn diagnose(&self, tx: &PendingTransaction, receipt: &Receipt) -> RevertReason {
        let replay = CallRequest {
            contract: tx.contract_address.clone(),
            method: tx.method.to_string(),
            args: tx.args.clone(),
            from: Some(tx.sender.clone()),
            block: Some(receipt.block_number),
        };
        let gateway = &self.gateway;
        let replay = &replay;
        match with_backoff(&self.retry, "call", move || gateway.call(replay)).await {
            Err(RetryFailure {
                error: GatewayError::Reverted(reason),
                ..
            }) if !reason.is_empty() => RevertReason::Message(reason),
            Err(failure) => {
                tracing::debug!(tx_hash = %tx.hash, attempts = failure.attempts, "Revert replay inconclusive: {}", failure.error);
                RevertReason::Unknown
            }
            Ok(_) => {
                tracing::debug!(tx_hash = %tx.hash, "Revert replay succeeded; reason unknown");
                RevertReason::Unknown
            }
        }
    }
}
