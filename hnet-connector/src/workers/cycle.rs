use super::EventWatcher;
use crate::{
    config::RetryConfig,
    contracts::ContractKind,
    dispatcher::WatcherCommand,
    error::{GatewayError, WatcherError},
    events::{cmp_position, RawEvent},
    gateway::LogQuery,
    retry::with_backoff,
};
use std::future::Future;
use tokio::sync::mpsc::error::TryRecvError;

/// Why the loop left its cycle.
enum Exit {
    Stopped,
    Disconnected,
}

impl EventWatcher {
    pub(super) async fn run(&mut self) -> Result<Option<u64>, WatcherError> {
        let mut next = self.initial_block().await?;
        self.next_block = Some(next);
        tracing::info!(from_block = next, "Event watcher cursor initialized");

        loop {
            // Batch boundary: the only place where the watch set changes or a stop is honored.
            if let Some(exit) = self.apply_pending_commands() {
                self.log_exit(exit);
                return Ok(last_processed(next));
            }
            if self.stop_requested() {
                self.log_exit(Exit::Stopped);
                return Ok(last_processed(next));
            }

            let safe_tip = self.safe_tip(next).await?;
            let Some(safe_tip) = safe_tip.filter(|tip| *tip >= next) else {
                if let Some(exit) = self.idle().await {
                    self.log_exit(exit);
                    return Ok(last_processed(next));
                }
                continue;
            };

            let range = self.config.watcher.max_block_range.max(1);
            let to_block = safe_tip.min(next.saturating_add(range - 1));
            self.process_batch(next, to_block).await?;

            next = to_block + 1;
            self.next_block = Some(next);
            if let Some(store) = &self.store {
                store.save(to_block).await.map_err(WatcherError::CursorStore)?;
            }
            if to_block < safe_tip {
                tracing::debug!(cursor = to_block, safe_tip, "Catching up");
            }
        }
    }

    /// Explicit resume cursor, then the stored cursor, then `start-block`, then the
    /// current safe tip.
    async fn initial_block(&self) -> Result<u64, WatcherError> {
        if let Some(cursor) = self.resume_from {
            tracing::info!(cursor, "Resuming from explicit cursor");
            return Ok(cursor + 1);
        }
        if let Some(store) = &self.store {
            if let Some(cursor) = store.load().await.map_err(WatcherError::CursorStore)? {
                tracing::info!(cursor, "Resuming from stored cursor");
                return Ok(cursor + 1);
            }
        }
        if let Some(start) = self.config.watcher.start_block {
            return Ok(start);
        }
        let gateway = &self.gateway;
        let tip = fetch(&self.fetch_policy(), None, "currentBlock", move || {
            gateway.current_block()
        })
        .await?;
        Ok(tip.saturating_sub(self.config.watcher.confirmation_depth) + 1)
    }

    /// The newest block old enough to be processed, if any.
    async fn safe_tip(&self, next: u64) -> Result<Option<u64>, WatcherError> {
        let gateway = &self.gateway;
        let tip = fetch(
            &self.fetch_policy(),
            last_processed(next),
            "currentBlock",
            move || gateway.current_block(),
        )
        .await?;
        Ok(tip.checked_sub(self.config.watcher.confirmation_depth))
    }

    /// Fetches, orders and dispatches every subscribed log in `[from_block, to_block]`.
    async fn process_batch(&mut self, from_block: u64, to_block: u64) -> Result<(), WatcherError> {
        let subscriptions = self.registry.subscriptions();
        if subscriptions.is_empty() {
            tracing::debug!(from_block, to_block, "No active watches; skipping blocks");
            return Ok(());
        }

        let policy = self.fetch_policy();
        let cursor = last_processed(from_block);
        let mut batch: Vec<(ContractKind, RawEvent)> = Vec::new();
        for (contract, event) in subscriptions {
            let Some(descriptor) = contract.event(&event) else {
                continue;
            };
            let query = LogQuery {
                contract: self.config.contracts.address_of(contract).clone(),
                event: descriptor.name.to_string(),
                from_block,
                to_block,
                indexed: self
                    .registry
                    .common_filter(contract, &event, |field| descriptor.is_indexed(field)),
            };
            let gateway = &self.gateway;
            let query = &query;
            let logs = fetch(&policy, cursor, "getLogs", move || gateway.get_logs(query)).await?;
            batch.extend(logs.into_iter().map(|log| (contract, log)));
        }

        batch.sort_by(|(_, a), (_, b)| cmp_position(a, b));
        batch.dedup_by(|(_, later), (_, earlier)| later.position() == earlier.position());

        let mut deliveries = 0;
        for (contract, event) in &batch {
            deliveries += self.registry.dispatch(*contract, event).await;
        }
        let purged = self.registry.purge();
        if purged > 0 {
            tracing::info!(purged, "Removed watches with disconnected consumers");
        }
        tracing::debug!(
            from_block,
            to_block,
            events = batch.len(),
            deliveries,
            "Batch dispatched"
        );
        Ok(())
    }

    /// Applies queued commands. Returns an exit reason once every handle is gone.
    fn apply_pending_commands(&mut self) -> Option<Exit> {
        loop {
            match self.command_rx.try_recv() {
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => return Some(Exit::Disconnected),
            }
        }
    }

    fn apply(&mut self, command: WatcherCommand) {
        match command {
            WatcherCommand::Register { id, filter, target } => {
                self.registry.register(id, filter, target);
            }
            WatcherCommand::Unregister(id) => {
                self.registry.unregister(id);
            }
            WatcherCommand::Cursor(reply) => {
                reply.send(self.next_block.and_then(last_processed)).ok();
            }
        }
    }

    /// Sleeps for one poll interval, serving commands as they arrive.
    async fn idle(&mut self) -> Option<Exit> {
        let sleep = tokio::time::sleep(self.config.watcher.poll_interval());
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return None,
                _ = self.stop.cancelled() => return Some(Exit::Stopped),
                _ = cancelled(self.shutdown.as_ref()) => return Some(Exit::Stopped),
                command = self.command_rx.recv() => match command {
                    Some(command) => self.apply(command),
                    None => return Some(Exit::Disconnected),
                },
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_cancelled() || self.shutdown.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn fetch_policy(&self) -> RetryConfig {
        self.config
            .retry
            .with_max_attempts(self.config.watcher.max_fetch_attempts)
    }

    fn log_exit(&self, exit: Exit) {
        match exit {
            Exit::Stopped => tracing::info!(watches = self.registry.len(), "Stopping at batch boundary"),
            Exit::Disconnected => {
                tracing::info!("All watcher handles dropped; stopping")
            }
        }
    }
}

fn last_processed(next_block: u64) -> Option<u64> {
    next_block.checked_sub(1)
}

async fn cancelled(token: Option<&tokio_util::sync::CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn fetch<T, F, Fut>(
    policy: &RetryConfig,
    cursor: Option<u64>,
    what: &str,
    op: F,
) -> Result<T, WatcherError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    with_backoff(policy, what, op).await.map_err(|failure| {
        tracing::warn!(
            cursor = ?cursor,
            attempts = failure.attempts,
            "{} failed: {}",
            what,
            failure.error
        );
        WatcherError::Fatal {
            cursor,
            attempts: failure.attempts,
            source: failure.error,
        }
    })
}
