//! # Watch Registry
//!
//! The registry is owned by the event poll loop and is only ever mutated from the
//! loop's own task. Other tasks reach it through [`WatcherCommand`]s, which the loop
//! applies between batches, so a batch is always dispatched against a fixed set of
//! watches.
use crate::{
    contracts::ContractKind,
    events::{values_equal, EventFilter, RawEvent},
    gateway::{Args, Value},
};
use futures::future;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{mpsc, oneshot};

/// Identifies a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Defines commands that can be sent to the poll loop.
#[derive(Debug)]
pub enum WatcherCommand {
    Register {
        id: WatchId,
        filter: EventFilter,
        target: mpsc::Sender<RawEvent>,
    },
    Unregister(WatchId),
    /// Reports the last fully processed block.
    Cursor(oneshot::Sender<Option<u64>>),
}

#[derive(Debug)]
struct Watch {
    filter: EventFilter,
    target: mpsc::Sender<RawEvent>,
    /// Cleared when the consumer turns out to be gone.
    alive: bool,
}

/// The set of active watches and the fan-out of events to them.
#[derive(Debug, Default)]
pub(crate) struct WatchRegistry {
    watches: BTreeMap<WatchId, Watch>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: WatchId, filter: EventFilter, target: mpsc::Sender<RawEvent>) {
        tracing::info!(watch = %id, contract = %filter.contract, event = %filter.event, "Registering watch");
        self.watches.insert(
            id,
            Watch {
                filter,
                target,
                alive: true,
            },
        );
    }

    pub fn unregister(&mut self, id: WatchId) -> bool {
        let removed = self.watches.remove(&id).is_some();
        if removed {
            tracing::info!(watch = %id, "Unregistered watch");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Distinct `(contract, event)` pairs with at least one live watch.
    pub fn subscriptions(&self) -> BTreeSet<(ContractKind, String)> {
        self.watches
            .values()
            .filter(|w| w.alive)
            .map(|w| (w.filter.contract, w.filter.event.clone()))
            .collect()
    }

    /// Argument constraints shared by every live watch on `(contract, event)`,
    /// restricted to the fields accepted by `keep`, in canonical form. Safe to push
    /// down to the gateway.
    pub fn common_filter(
        &self,
        contract: ContractKind,
        event: &str,
        keep: impl Fn(&str) -> bool,
    ) -> Args {
        let mut filters = self
            .watches
            .values()
            .filter(|w| w.alive && w.filter.contract == contract && w.filter.event == event)
            .map(|w| &w.filter.args);
        let Some(first) = filters.next() else {
            return Args::new();
        };
        let descriptor = contract.event(event);
        let normalize = |name: &str, value: &Value| {
            match descriptor.and_then(|d| d.field_type(name)) {
                Some(ty) => ty.normalize(value),
                None => value.clone(),
            }
        };
        let mut common: Args = first
            .iter()
            .filter(|(k, _)| keep(k))
            .map(|(k, v)| (k.clone(), normalize(k.as_str(), v)))
            .collect();
        for args in filters {
            common.retain(|k, v| {
                args.get(k)
                    .is_some_and(|other| values_equal(&normalize(k.as_str(), other), v))
            });
        }
        common
    }

    /// Delivers `event` to every live watch whose filter matches, waiting on full
    /// channels. Returns the number of deliveries. Watches whose consumer went away
    /// are marked dead and skipped from then on.
    pub async fn dispatch(&mut self, contract: ContractKind, event: &RawEvent) -> usize {
        let sends = self
            .watches
            .iter()
            .filter(|(_, w)| w.alive && w.filter.matches(contract, event))
            .map(|(id, w)| {
                let target = w.target.clone();
                let event = event.clone();
                let id = *id;
                async move {
                    match target.send(event).await {
                        Ok(()) => Ok(id),
                        Err(_) => Err(id),
                    }
                }
            });

        let results = future::join_all(sends).await;
        let mut delivered = 0;
        for result in results {
            match result {
                Ok(_) => delivered += 1,
                Err(id) => {
                    tracing::warn!(watch = %id, "Watch consumer disconnected. It will be removed.");
                    if let Some(w) = self.watches.get_mut(&id) {
                        w.alive = false;
                    }
                }
            }
        }
        delivered
    }

    /// Drops watches marked dead during the last batch.
    pub fn purge(&mut self) -> usize {
        let before = self.watches.len();
        self.watches.retain(|_, w| w.alive);
        before - self.watches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::args;
    use serde_json::json;

    fn created(block: u64, log: u32, round: u64) -> RawEvent {
        RawEvent {
            name: "TaskCreated".into(),
            contract: "0xtask".into(),
            block_number: block,
            tx_index: 0,
            log_index: log,
            tx_hash: None,
            args: args(json!({"taskId": 1, "round": round})),
        }
    }

    #[tokio::test]
    async fn independent_watches_get_only_their_matches() {
        let mut registry = WatchRegistry::new();
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        registry.register(
            WatchId(1),
            EventFilter::new(ContractKind::Task, "TaskCreated").with_arg("round", 1),
            a_tx,
        );
        registry.register(
            WatchId(2),
            EventFilter::new(ContractKind::Task, "TaskCreated").with_arg("round", 2),
            b_tx,
        );

        for (i, round) in [1, 2, 1].into_iter().enumerate() {
            registry.dispatch(ContractKind::Task, &created(10, i as u32, round)).await;
        }

        assert_eq!(a_rx.recv().await.unwrap().log_index, 0);
        assert_eq!(a_rx.recv().await.unwrap().log_index, 2);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.recv().await.unwrap().log_index, 1);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn identical_filters_each_get_a_copy() {
        let mut registry = WatchRegistry::new();
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let filter = EventFilter::new(ContractKind::Task, "TaskCreated");
        registry.register(WatchId(1), filter.clone(), a_tx);
        registry.register(WatchId(2), filter, b_tx);

        let delivered = registry.dispatch(ContractKind::Task, &created(3, 0, 1)).await;
        assert_eq!(delivered, 2);
        assert!(a_rx.recv().await.is_some());
        assert!(b_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn dropped_consumers_are_marked_and_purged() {
        let mut registry = WatchRegistry::new();
        let (a_tx, a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        let filter = EventFilter::new(ContractKind::Task, "TaskCreated");
        registry.register(WatchId(1), filter.clone(), a_tx);
        registry.register(WatchId(2), filter, b_tx);
        drop(a_rx);

        assert_eq!(registry.dispatch(ContractKind::Task, &created(3, 0, 1)).await, 1);
        assert_eq!(registry.subscriptions().len(), 1);
        assert_eq!(registry.purge(), 1);
        assert_eq!(registry.len(), 1);
        assert!(b_rx.recv().await.is_some());
    }

    #[test]
    fn common_filter_keeps_only_shared_constraints() {
        let mut registry = WatchRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.register(
            WatchId(1),
            EventFilter::new(ContractKind::Task, "TaskCreated")
                .with_arg("taskId", 9)
                .with_arg("round", 1),
            tx.clone(),
        );
        registry.register(
            WatchId(2),
            EventFilter::new(ContractKind::Task, "TaskCreated")
                .with_arg("taskId", 9)
                .with_arg("round", 2),
            tx.clone(),
        );
        let common = registry.common_filter(ContractKind::Task, "TaskCreated", |_| true);
        assert_eq!(common, args(json!({"taskId": 9})));

        registry.register(
            WatchId(3),
            EventFilter::new(ContractKind::Task, "TaskCreated").with_arg("taskId", "0x9"),
            tx.clone(),
        );
        let common = registry.common_filter(ContractKind::Task, "TaskCreated", |_| true);
        assert_eq!(common, args(json!({"taskId": 9})));

        registry.register(WatchId(4), EventFilter::new(ContractKind::Task, "TaskCreated"), tx);
        assert!(registry
            .common_filter(ContractKind::Task, "TaskCreated", |_| true)
            .is_empty());
    }
}
