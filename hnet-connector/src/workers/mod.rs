//! # Event Watcher
//!
//! This module defines the [`EventWatcher`], the single background task that advances a
//! block cursor, fetches contract logs and fans them out to registered watches.
//!
//! ## Core Components
//!
//! - [`EventWatcher`]: The runner. It owns the watch registry and the cursor and is
//!   consumed when [`EventWatcher::start`] is called.
//! - [`EventWatcherHandle`]: A clonable handle that provides the public API for the
//!   running loop (registering watches, creating listeners, stopping, reading the cursor).
//!
//! Registrations and unregistrations travel to the loop as commands and are applied
//! between batches, so a batch is always dispatched against a fixed set of watches.
//! Stopping is cooperative: a batch that has started is fully dispatched, and the cursor
//! saved, before the loop checks for a stop request.

mod cycle;

use crate::{
    config::ConnectorConfig,
    contracts::{ContractKind, FilterFault},
    dispatcher::{WatchId, WatchRegistry, WatcherCommand},
    error::{WatchError, WatcherError},
    events::{EventFilter, RawEvent},
    gateway::{Args, LedgerGateway},
    listener::{EventListener, WatchHandle},
    storage::CursorStore,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A clonable handle for interacting with a running [`EventWatcher`].
#[derive(Debug, Clone)]
pub struct EventWatcherHandle {
    command_tx: mpsc::Sender<WatcherCommand>,
    stop: CancellationToken,
    config: Arc<ConnectorConfig>,
    next_id: Arc<AtomicU64>,
}

impl EventWatcherHandle {
    /// Registers `target` as the delivery channel for events matching `filter`.
    ///
    /// The watch becomes effective at the next poll cycle and only sees blocks processed
    /// from then on. A full `target` channel makes the loop wait, so the consumer
    /// controls the pace of the watcher.
    pub async fn register_watch(
        &self,
        filter: EventFilter,
        target: mpsc::Sender<RawEvent>,
    ) -> Result<WatchHandle, WatchError> {
        let filter = validate_filter(filter)?;
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.command_tx
            .send(WatcherCommand::Register { id, filter, target })
            .await
            .map_err(|_| WatchError::Stopped)?;
        Ok(WatchHandle::new(id, self.command_tx.clone()))
    }

    /// Creates a listener for `event` of `contract`, narrowed by `filter`.
    ///
    /// The listener's channel capacity is `channels.listener-event-buffer`.
    pub async fn watch_event(
        &self,
        contract: ContractKind,
        event: &str,
        filter: Args,
    ) -> Result<EventListener, WatchError> {
        let (tx, rx) = mpsc::channel(self.config.channels.listener_event_buffer.max(1));
        let filter = EventFilter::new(contract, event).with_args(filter);
        let handle = self.register_watch(filter, tx).await?;
        Ok(EventListener::new(rx, handle))
    }

    pub async fn unregister_watch(&self, handle: WatchHandle) {
        handle.unregister().await;
    }

    /// Requests a stop. The loop finishes the batch in progress, then returns.
    pub fn stop(&self) {
        tracing::info!("Stop requested for event watcher");
        self.stop.cancel();
    }

    /// The block the loop resumed from or last advanced to. `None` before the loop has
    /// initialized its cursor, when it starts at block 0, or once the watcher is gone.
    pub async fn cursor(&self) -> Option<u64> {
        let (tx, rx) = oneshot::channel();
        if self.command_tx.send(WatcherCommand::Cursor(tx)).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }
}

fn validate_filter(filter: EventFilter) -> Result<EventFilter, WatchError> {
    let descriptor =
        filter
            .contract
            .event(&filter.event)
            .ok_or_else(|| WatchError::UnknownEvent {
                contract: filter.contract,
                event: filter.event.clone(),
            })?;
    let args = descriptor
        .normalize_filter(&filter.args)
        .map_err(|fault| match fault {
            FilterFault::UnknownField(field) => WatchError::UnknownField {
                event: descriptor.name.to_string(),
                field,
            },
            FilterFault::InvalidValue { field, reason } => WatchError::InvalidFilterValue {
                event: descriptor.name.to_string(),
                field,
                reason,
            },
        })?;
    Ok(EventFilter { args, ..filter })
}

/// The event poll loop.
///
/// Created together with its [`EventWatcherHandle`]; spawn [`EventWatcher::start`] as a
/// long-running task and keep the handle.
pub struct EventWatcher {
    gateway: Arc<dyn LedgerGateway>,
    config: Arc<ConnectorConfig>,
    store: Option<Arc<dyn CursorStore>>,
    resume_from: Option<u64>,
    registry: WatchRegistry,
    command_rx: mpsc::Receiver<WatcherCommand>,
    stop: CancellationToken,
    shutdown: Option<CancellationToken>,
    /// First block not processed yet. Set once the loop has started.
    next_block: Option<u64>,
}

impl EventWatcher {
    /// Creates a new watcher and its associated handle. Nothing runs until
    /// [`EventWatcher::start`] is awaited.
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        config: Arc<ConnectorConfig>,
    ) -> (Self, EventWatcherHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.channels.watcher_command_buffer.max(1));
        let stop = CancellationToken::new();

        let handle = EventWatcherHandle {
            command_tx,
            stop: stop.clone(),
            config: config.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let watcher = Self {
            gateway,
            config,
            store: None,
            resume_from: None,
            registry: WatchRegistry::new(),
            command_rx,
            stop,
            shutdown: None,
            next_block: None,
        };
        (watcher, handle)
    }

    /// Loads the cursor from `store` at start and saves it after every batch.
    pub fn with_cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Resumes after `cursor`, the last block a previous run fully processed.
    /// Takes precedence over the cursor store and `watcher.start-block`.
    pub fn resume_from(mut self, cursor: u64) -> Self {
        self.resume_from = Some(cursor);
        self
    }

    /// Also stops the loop when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Runs the poll loop until a stop is requested, every handle is dropped, or a
    /// fatal error occurs.
    ///
    /// Returns the last fully processed block. A [`WatcherError`] means the loop could
    /// not make progress; restart it, from the persisted cursor if there is one.
    pub async fn start(mut self) -> Result<Option<u64>, WatcherError> {
        tracing::info!(
            confirmation_depth = self.config.watcher.confirmation_depth,
            poll_interval_ms = self.config.watcher.poll_interval_ms,
            "Event watcher is running"
        );
        let result = self.run().await;
        match &result {
            Ok(cursor) => tracing::info!(cursor = ?cursor, "Event watcher has shut down"),
            Err(e) => tracing::error!("Event watcher exited with an error: {}", e),
        }
        result
    }
}
