//! # Call Dispatcher
//!
//! [`ContractClient`] turns a named contract method plus named arguments into a
//! gateway round-trip. The method is looked up in the static descriptor tables of
//! [`crate::contracts`] and its arguments are checked before anything goes over the
//! wire.
//!
//! - Read calls ([`ContractClient::call`]) are a single round-trip against the
//!   gateway's current view, retried with backoff only on transient faults.
//! - Writes ([`ContractClient::submit`]) resolve the nonce and gas parameters that the
//!   caller left unset, sign, and broadcast. A successful submit returns a
//!   [`PendingTransaction`]; it says nothing yet about the outcome.
use crate::{
    config::ConnectorConfig,
    contracts::{resolve_method, ContractKind, MethodDescriptor, MethodKind},
    error::{CallError, GatewayError, SubmitError},
    events::{sort_and_dedup, EventFilter, RawEvent},
    gateway::{Address, Args, CallRequest, LedgerGateway, LogQuery, UnsignedTransaction, Value},
    retry::{with_backoff, RetryFailure},
    signer::TransactionSigner,
    waiter::{PendingTransaction, Submission, TransactionOutcome, TransactionWaiter},
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-transaction overrides. Unset fields are resolved against the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct TxOptions {
    /// Gas ceiling. Estimated when unset.
    #[cfg_attr(feature = "serde", serde(default))]
    pub gas_limit: Option<u64>,
    /// Gas price (fee cap). Taken from the gateway when unset.
    #[cfg_attr(feature = "serde", serde(default, alias = "fee-cap"))]
    pub gas_price: Option<u128>,
    /// Sequence number. Tracked locally when unset.
    #[cfg_attr(feature = "serde", serde(default))]
    pub nonce: Option<u64>,
}

/// The call dispatcher. Cheap to clone; clones share the nonce tracker.
#[derive(Clone)]
pub struct ContractClient {
    gateway: Arc<dyn LedgerGateway>,
    signer: Option<Arc<dyn TransactionSigner>>,
    config: Arc<ConnectorConfig>,
    next_nonce: Arc<Mutex<Option<u64>>>,
    waiter: TransactionWaiter,
}

impl ContractClient {
    /// Creates a read-only client. Use [`ContractClient::with_signer`] to enable submissions.
    pub fn new(gateway: Arc<dyn LedgerGateway>, config: Arc<ConnectorConfig>) -> Self {
        let waiter = TransactionWaiter::new(
            gateway.clone(),
            config.waiter.clone(),
            config.retry.clone(),
        );
        Self {
            gateway,
            signer: None,
            config,
            next_nonce: Arc::new(Mutex::new(None)),
            waiter,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self.next_nonce = Arc::new(Mutex::new(None));
        self
    }

    pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.gateway
    }

    pub fn config(&self) -> &Arc<ConnectorConfig> {
        &self.config
    }

    /// The signing account, if any.
    pub fn account(&self) -> Option<&Address> {
        self.signer.as_ref().map(|s| s.address())
    }

    pub fn address_of(&self, contract: ContractKind) -> &Address {
        self.config.contracts.address_of(contract)
    }

    pub fn waiter(&self) -> &TransactionWaiter {
        &self.waiter
    }

    /// Evaluates a view method against the gateway's current state.
    pub async fn call(
        &self,
        contract: ContractKind,
        method: &str,
        args: Args,
    ) -> Result<Value, CallError> {
        let descriptor = resolve_method(contract, method, MethodKind::View).map_err(|reason| {
            CallError::InvalidCall {
                method: method.to_string(),
                reason,
            }
        })?;
        descriptor
            .validate_args(&args)
            .map_err(|reason| CallError::InvalidCall {
                method: method.to_string(),
                reason,
            })?;

        let request = CallRequest {
            contract: self.address_of(contract).clone(),
            method: descriptor.name.to_string(),
            args,
            from: self.account().cloned(),
            block: None,
        };
        let request = &request;
        let gateway = &self.gateway;
        let value = with_backoff(&self.config.retry, descriptor.name, move || gateway.call(request))
            .await
            .map_err(|failure| call_error(descriptor.name, failure))?;

        descriptor
            .validate_output(&value)
            .map_err(|reason| CallError::Gateway {
                method: descriptor.name.to_string(),
                source: GatewayError::Rejected(reason),
            })?;
        Ok(value)
    }

    /// Resolves, signs and broadcasts a transaction method.
    ///
    /// Submissions from one client are serialized so that locally tracked nonces never
    /// collide. The broadcast is retried on transient faults; a payload the gateway
    /// reports as already known counts as broadcast. When a retried broadcast still
    /// fails, the transaction may have landed anyway and [`SubmitError::Unconfirmed`]
    /// carries its hash. Any other error means nothing was broadcast.
    pub async fn submit(
        &self,
        contract: ContractKind,
        method: &str,
        args: Args,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        let signer = self.signer.as_ref().ok_or(SubmitError::NoSigner)?;
        let descriptor =
            resolve_method(contract, method, MethodKind::Transaction).map_err(|reason| {
                SubmitError::MalformedArguments {
                    method: method.to_string(),
                    reason,
                }
            })?;
        descriptor
            .validate_args(&args)
            .map_err(|reason| SubmitError::MalformedArguments {
                method: method.to_string(),
                reason,
            })?;

        let from = signer.address().clone();
        let to = self.address_of(contract).clone();
        let retry = &self.config.retry;
        let gateway = &self.gateway;

        let gas_limit = match options.gas_limit {
            Some(limit) => limit,
            None => {
                let estimate_request = CallRequest {
                    contract: to.clone(),
                    method: descriptor.name.to_string(),
                    args: args.clone(),
                    from: Some(from.clone()),
                    block: None,
                };
                self.estimate_gas(descriptor, &estimate_request).await?
            }
        };
        let gas_price = match options.gas_price {
            Some(price) => price,
            None => with_backoff(retry, "gasPrice", move || gateway.gas_price())
                .await
                .map_err(submit_error)?,
        };
        let submitted_block = with_backoff(retry, "currentBlock", move || gateway.current_block())
            .await
            .map_err(submit_error)?;

        let mut next_nonce = self.next_nonce.lock().await;
        let nonce = match options.nonce {
            Some(nonce) => nonce,
            None => {
                let sender = &from;
                let remote = with_backoff(retry, "transactionCount", move || {
                    gateway.transaction_count(sender)
                })
                .await
                .map_err(submit_error)?;
                next_nonce.map_or(remote, |local| local.max(remote))
            }
        };

        let unsigned = UnsignedTransaction {
            from: from.clone(),
            to: to.clone(),
            method: descriptor.name.to_string(),
            args: args.clone(),
            nonce,
            gas_limit,
            gas_price,
        };
        let signed = signer
            .sign(&unsigned)
            .map_err(|e| SubmitError::Signing(e.to_string()))?;

        let signed = &signed;
        let hash = match with_backoff(retry, "sendTransaction", move || {
            gateway.send_transaction(signed)
        })
        .await
        {
            Ok(hash) => hash,
            Err(RetryFailure {
                error: GatewayError::AlreadyKnown(_),
                attempts,
            }) => {
                tracing::info!(tx_hash = %signed.hash, attempts, "Gateway already holds the transaction");
                signed.hash.clone()
            }
            // Only transient faults are retried, so an earlier attempt may have landed.
            Err(failure) if failure.attempts > 1 || failure.exhausted() => {
                *next_nonce = None;
                tracing::warn!(tx_hash = %signed.hash, method = descriptor.name, nonce, attempts = failure.attempts, "Broadcast outcome unknown: {}", failure.error);
                return Err(SubmitError::Unconfirmed {
                    hash: signed.hash.clone(),
                    attempts: failure.attempts,
                    source: failure.error,
                });
            }
            Err(failure) => {
                if matches!(failure.error, GatewayError::NonceConflict(_)) {
                    *next_nonce = None;
                }
                tracing::warn!(method = descriptor.name, nonce, "Submission failed: {}", failure.error);
                return Err(submit_error(failure));
            }
        };
        if options.nonce.is_none() {
            *next_nonce = Some(nonce + 1);
        }
        drop(next_nonce);

        tracing::info!(tx_hash = %hash, contract = %contract, method = descriptor.name, nonce, gas_limit, "Transaction submitted");
        Ok(PendingTransaction::new(Submission {
            hash,
            submitted_block,
            sender: from,
            contract,
            contract_address: to,
            method: descriptor.name,
            args,
            nonce,
        }))
    }

    /// Waits for `tx` with the configured waiter defaults.
    pub async fn wait(&self, tx: &PendingTransaction) -> TransactionOutcome {
        self.waiter.wait_default(tx).await
    }

    /// Fetches the logs of one event over `[from_block, to_block]` (`None` = current tip),
    /// keeps those matching `filter`, and returns them in ledger order.
    pub async fn get_events(
        &self,
        contract: ContractKind,
        event: &str,
        from_block: u64,
        to_block: Option<u64>,
        filter: Args,
    ) -> Result<Vec<RawEvent>, CallError> {
        let descriptor = contract.event(event).ok_or_else(|| CallError::InvalidCall {
            method: event.to_string(),
            reason: format!("{} has no event '{}'", contract, event),
        })?;
        let filter = descriptor
            .normalize_filter(&filter)
            .map_err(|fault| CallError::InvalidCall {
                method: event.to_string(),
                reason: fault.to_string(),
            })?;

        let retry = &self.config.retry;
        let gateway = &self.gateway;
        let to_block = match to_block {
            Some(block) => block,
            None => with_backoff(retry, "currentBlock", move || gateway.current_block())
                .await
                .map_err(|failure| call_error(event, failure))?,
        };
        if from_block > to_block {
            return Ok(Vec::new());
        }

        let query = LogQuery {
            contract: self.address_of(contract).clone(),
            event: descriptor.name.to_string(),
            from_block,
            to_block,
            indexed: filter
                .iter()
                .filter(|(k, _)| descriptor.is_indexed(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let query = &query;
        let mut logs = with_backoff(retry, "getLogs", move || gateway.get_logs(query))
            .await
            .map_err(|failure| call_error(event, failure))?;

        let filter = EventFilter::new(contract, descriptor.name).with_args(filter);
        logs.retain(|e| filter.matches(contract, e));
        sort_and_dedup(&mut logs);
        Ok(logs)
    }

    async fn estimate_gas(
        &self,
        descriptor: &MethodDescriptor,
        estimate_request: &CallRequest,
    ) -> Result<u64, SubmitError> {
        let gateway = &self.gateway;
        with_backoff(&self.config.retry, "estimateGas", move || {
            gateway.estimate_gas(estimate_request)
        })
        .await
        .map_err(|failure| match failure.error {
            GatewayError::Reverted(reason) => SubmitError::WouldRevert {
                method: descriptor.name.to_string(),
                reason,
            },
            _ => submit_error(failure),
        })
    }
}

fn call_error(method: &str, failure: RetryFailure) -> CallError {
    if failure.exhausted() {
        return CallError::Unreachable {
            attempts: failure.attempts,
            source: failure.error,
        };
    }
    match failure.error {
        GatewayError::Reverted(reason) => CallError::Reverted {
            method: method.to_string(),
            reason,
        },
        other => CallError::Gateway {
            method: method.to_string(),
            source: other,
        },
    }
}

fn submit_error(failure: RetryFailure) -> SubmitError {
    if failure.exhausted() {
        SubmitError::Unreachable {
            attempts: failure.attempts,
            source: failure.error,
        }
    } else {
        SubmitError::from(failure.error)
    }
}
