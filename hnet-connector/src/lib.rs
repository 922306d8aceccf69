//! A client-side runtime for contracts deployed on a remote, ledger-backed service.
//!
//! The crate covers the two parts of talking to the ledger that have to survive an
//! unreliable, eventually-consistent remote: submitting state-changing calls and
//! finding out what became of them, and watching the ordered stream of contract
//! events so that every interested consumer sees each matching event once.
//!
//! # Key Components
//!
//! *   [`gateway::LedgerGateway`]: the abstract RPC surface of the remote ledger.
//! *   [`client::ContractClient`]: the call dispatcher. Read calls, transaction
//!     submission (nonce and gas resolution, signing, broadcast) and one-shot event queries.
//! *   [`waiter::TransactionWaiter`]: resolves a [`waiter::PendingTransaction`] to a
//!     terminal [`waiter::TransactionOutcome`].
//! *   [`workers::EventWatcher`]: the background poll loop that advances a block cursor,
//!     fetches logs and fans them out to registered watches.
//! *   [`listener`]: watch handles and self-unregistering event listeners.
//! *   [`bindings`]: typed wrappers for the `node`, `task` and `token` contracts.
pub mod bindings;
pub mod client;
/// Defines configuration structures for the connector.
pub mod config;
/// Method and event descriptors for the supported contracts.
pub mod contracts;
/// The watch registry and event fan-out used by the poll loop.
mod dispatcher;
pub mod error;
/// Raw contract events, filters and their ordering.
pub mod events;
pub mod gateway;
/// Watch handles and event listeners handed out by the watcher.
pub mod listener;
mod retry;
/// Transaction signing seam.
pub mod signer;
/// A trait and in-memory implementation for persisting the watcher cursor.
pub mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod waiter;
/// The background event poll loop.
pub mod workers;

pub use error::{CallError, GatewayError, OutcomeError, SubmitError, WatchError, WatcherError};
