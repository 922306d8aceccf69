use async_trait::async_trait;
use hnet_connector::{
    config::ConnectorConfig,
    contracts::ContractKind,
    events::{EventFilter, RawEvent},
    gateway::Args,
    storage::{CursorStore, MemoryCursorStore},
    test_utils::{args, MockGateway, ADDR_A, ADDR_B},
    workers::{EventWatcher, EventWatcherHandle},
    WatchError, WatcherError,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

type WatcherTask = JoinHandle<Result<Option<u64>, WatcherError>>;

/// Spawns the watcher and waits until its cursor is initialized.
async fn spawn(watcher: EventWatcher, handle: &EventWatcherHandle) -> WatcherTask {
    let task = tokio::spawn(watcher.start());
    handle.cursor().await;
    task
}

async fn start(
    gateway: &Arc<MockGateway>,
    config: ConnectorConfig,
) -> (EventWatcherHandle, WatcherTask) {
    let (watcher, handle) = EventWatcher::new(gateway.clone(), Arc::new(config));
    let task = spawn(watcher, &handle).await;
    (handle, task)
}

fn no_filter() -> Args {
    Args::new()
}

fn created(gateway: &MockGateway, block: u64, log_index: u32, round: u64) {
    gateway.emit_at(
        ContractKind::Task,
        "TaskCreated",
        block,
        0,
        log_index,
        json!({"taskId": 1, "creator": ADDR_A, "selectedNode": ADDR_B, "round": round}),
    );
}

fn position(event: &RawEvent) -> (u64, u32, u32) {
    (event.block_number, event.tx_index, event.log_index)
}

#[tokio::test(start_paused = true)]
async fn watches_with_disjoint_filters_get_only_their_events() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, _task) = start(&gateway, MockGateway::config()).await;

    let mut round_one = handle
        .watch_event(ContractKind::Task, "TaskCreated", args(json!({"round": 1})))
        .await
        .unwrap();
    let mut round_two = handle
        .watch_event(ContractKind::Task, "TaskCreated", args(json!({"round": 2})))
        .await
        .unwrap();

    for (log_index, round) in [1, 2, 1].into_iter().enumerate() {
        created(&gateway, 11, log_index as u32, round);
    }
    gateway.mine(1);

    assert_eq!(round_one.next_event().await.unwrap().log_index, 0);
    assert_eq!(round_one.next_event().await.unwrap().log_index, 2);
    assert_eq!(round_two.next_event().await.unwrap().log_index, 1);

    assert_eq!(handle.cursor().await, Some(11));
    assert!(round_one.try_next_event().is_none());
    assert!(round_two.try_next_event().is_none());
}

#[tokio::test(start_paused = true)]
async fn events_arrive_in_ledger_order() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, _task) = start(&gateway, MockGateway::config()).await;
    let mut listener = handle
        .watch_event(ContractKind::Token, "Transfer", no_filter())
        .await
        .unwrap();

    let transfer = json!({"from": ADDR_A, "to": ADDR_B, "value": 5});
    gateway.emit_at(ContractKind::Token, "Transfer", 13, 0, 0, transfer.clone());
    gateway.emit_at(ContractKind::Token, "Transfer", 12, 1, 0, transfer.clone());
    gateway.emit_at(ContractKind::Token, "Transfer", 12, 0, 5, transfer.clone());
    gateway.emit_at(ContractKind::Token, "Transfer", 11, 2, 1, transfer);
    gateway.set_tip(13);

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(position(&listener.next_event().await.unwrap()));
    }
    assert_eq!(seen, vec![(11, 2, 1), (12, 0, 5), (12, 1, 0), (13, 0, 0)]);
}

#[tokio::test(start_paused = true)]
async fn events_of_different_contracts_are_interleaved_by_position() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, _task) = start(&gateway, MockGateway::config()).await;
    let (tx, mut rx) = mpsc::channel(16);
    handle
        .register_watch(EventFilter::new(ContractKind::Token, "Approval"), tx.clone())
        .await
        .unwrap();
    handle
        .register_watch(EventFilter::new(ContractKind::Task, "TaskCreated"), tx)
        .await
        .unwrap();

    gateway.emit_at(
        ContractKind::Token,
        "Approval",
        11,
        1,
        3,
        json!({"owner": ADDR_A, "spender": ADDR_B, "value": 1}),
    );
    created(&gateway, 11, 0, 1);
    gateway.mine(1);

    assert_eq!(rx.recv().await.unwrap().name, "TaskCreated");
    assert_eq!(rx.recv().await.unwrap().name, "Approval");
}

#[tokio::test(start_paused = true)]
async fn unregistering_stops_deliveries_without_affecting_others() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, _task) = start(&gateway, MockGateway::config()).await;

    let (tx, mut leaving) = mpsc::channel(8);
    let watch = handle
        .register_watch(EventFilter::new(ContractKind::Task, "TaskCreated"), tx)
        .await
        .unwrap();
    let mut staying = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();

    created(&gateway, 11, 0, 1);
    gateway.mine(1);
    assert_eq!(leaving.recv().await.unwrap().block_number, 11);
    assert_eq!(staying.next_event().await.unwrap().block_number, 11);

    handle.unregister_watch(watch).await;
    created(&gateway, 12, 0, 1);
    created(&gateway, 13, 0, 1);
    gateway.mine(2);

    assert_eq!(staying.next_event().await.unwrap().block_number, 12);
    assert_eq!(staying.next_event().await.unwrap().block_number, 13);
    assert_eq!(handle.cursor().await, Some(13));
    // The watcher dropped its sender along with the watch.
    assert!(leaving.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn dropped_listeners_unsubscribe_themselves() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, _task) = start(&gateway, MockGateway::config()).await;

    let dropped = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();
    let mut kept = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();
    drop(dropped);

    created(&gateway, 11, 0, 1);
    gateway.mine(1);
    assert_eq!(kept.next_event().await.unwrap().block_number, 11);
    assert_eq!(handle.cursor().await, Some(11));
}

#[tokio::test(start_paused = true)]
async fn registration_is_not_retroactive() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, _task) = start(&gateway, MockGateway::config()).await;

    created(&gateway, 11, 0, 1);
    gateway.mine(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.cursor().await, Some(11));

    let mut late = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();
    created(&gateway, 12, 0, 2);
    gateway.mine(1);

    let first = late.next_event().await.unwrap();
    assert_eq!(first.block_number, 12);
}

#[tokio::test(start_paused = true)]
async fn blocks_within_the_confirmation_depth_are_held_back() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let mut config = MockGateway::config();
    config.watcher.confirmation_depth = 2;
    let (handle, _task) = start(&gateway, config).await;
    assert_eq!(handle.cursor().await, Some(8));

    let mut listener = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();
    created(&gateway, 11, 0, 1);
    gateway.mine(1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.cursor().await, Some(9));
    assert!(listener.try_next_event().is_none());

    gateway.mine(2);
    assert_eq!(listener.next_event().await.unwrap().block_number, 11);
}

#[tokio::test(start_paused = true)]
async fn long_gaps_are_fetched_in_bounded_chunks() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(20);
    let mut config = MockGateway::config();
    config.watcher.start_block = Some(1);
    config.watcher.max_block_range = 5;
    let (watcher, handle) = EventWatcher::new(gateway.clone(), Arc::new(config));

    // Registered before start, so the very first batch already sees it.
    let mut listener = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();
    for block in [3, 8, 17] {
        created(&gateway, block, 0, 1);
    }
    let _task = spawn(watcher, &handle).await;

    for block in [3, 8, 17] {
        assert_eq!(listener.next_event().await.unwrap().block_number, block);
    }
    assert_eq!(handle.cursor().await, Some(20));
    let ranges: Vec<_> = gateway
        .log_queries()
        .iter()
        .map(|q| (q.from_block, q.to_block))
        .collect();
    assert_eq!(ranges, vec![(1, 5), (6, 10), (11, 15), (16, 20)]);
}

#[tokio::test(start_paused = true)]
async fn only_shared_indexed_constraints_are_pushed_to_the_gateway() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, _task) = start(&gateway, MockGateway::config()).await;

    let mut first = handle
        .watch_event(
            ContractKind::Task,
            "TaskCreated",
            args(json!({"creator": ADDR_A, "round": 1})),
        )
        .await
        .unwrap();
    let _second = handle
        .watch_event(
            ContractKind::Task,
            "TaskCreated",
            args(json!({"creator": ADDR_A, "round": 2})),
        )
        .await
        .unwrap();
    created(&gateway, 11, 0, 1);
    gateway.mine(1);
    first.next_event().await.unwrap();

    let query = gateway.log_queries().pop().unwrap();
    assert_eq!(query.indexed, args(json!({"creator": ADDR_A})));
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_failures_are_retried_without_loss_or_duplication() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, task) = start(&gateway, MockGateway::config()).await;
    let mut listener = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();

    gateway.fail_logs(2);
    created(&gateway, 11, 0, 1);
    gateway.mine(1);

    assert_eq!(listener.next_event().await.unwrap().block_number, 11);
    assert_eq!(handle.cursor().await, Some(11));
    assert!(listener.try_next_event().is_none());
    assert!(!task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn persistent_failures_stop_the_watcher_with_a_fatal_error() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, task) = start(&gateway, MockGateway::config()).await;
    let mut listener = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();

    gateway.fail_logs(100);
    created(&gateway, 11, 0, 1);
    gateway.mine(1);

    let err = task.await.unwrap().unwrap_err();
    match err {
        WatcherError::Fatal {
            cursor, attempts, ..
        } => {
            assert_eq!(cursor, Some(10));
            assert_eq!(attempts, 3);
        }
        other => panic!("expected a fatal error, got {other}"),
    }
    assert!(listener.next_event().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_the_batch_in_progress() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let mut config = MockGateway::config();
    config.channels.listener_event_buffer = 1;
    let (handle, task) = start(&gateway, config).await;
    let mut slow = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();

    for log_index in 0..3 {
        created(&gateway, 11, log_index, 1);
    }
    gateway.mine(1);

    // The loop is now blocked on the full channel, in the middle of block 11.
    assert_eq!(slow.next_event().await.unwrap().log_index, 0);
    handle.stop();

    assert_eq!(slow.next_event().await.unwrap().log_index, 1);
    assert_eq!(slow.next_event().await.unwrap().log_index, 2);
    assert!(slow.next_event().await.is_none());
    assert_eq!(task.await.unwrap().unwrap(), Some(11));
}

#[tokio::test(start_paused = true)]
async fn cursor_store_is_loaded_and_saved() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(20);
    let store = Arc::new(MemoryCursorStore::new(Some(14)));
    let (watcher, handle) = EventWatcher::new(gateway.clone(), Arc::new(MockGateway::config()));
    let watcher = watcher.with_cursor_store(store.clone());

    let mut listener = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();
    created(&gateway, 14, 0, 1);
    created(&gateway, 15, 0, 1);
    let _task = spawn(watcher, &handle).await;

    assert_eq!(listener.next_event().await.unwrap().block_number, 15);
    assert_eq!(handle.cursor().await, Some(20));
    assert_eq!(store.get(), Some(20));
}

#[tokio::test(start_paused = true)]
async fn explicit_resume_cursor_wins_over_the_store() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(20);
    let store = Arc::new(MemoryCursorStore::new(Some(14)));
    let (watcher, handle) = EventWatcher::new(gateway.clone(), Arc::new(MockGateway::config()));
    let watcher = watcher.with_cursor_store(store).resume_from(11);

    let mut listener = handle
        .watch_event(ContractKind::Task, "TaskCreated", no_filter())
        .await
        .unwrap();
    created(&gateway, 12, 0, 1);
    let _task = spawn(watcher, &handle).await;

    assert_eq!(listener.next_event().await.unwrap().block_number, 12);
}

#[tokio::test(start_paused = true)]
async fn cursor_reports_the_resume_point_before_any_batch() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(20);
    let (watcher, handle) = EventWatcher::new(gateway.clone(), Arc::new(MockGateway::config()));
    let _task = spawn(watcher.resume_from(20), &handle).await;
    assert_eq!(handle.cursor().await, Some(20));
    assert!(gateway.log_queries().is_empty());

    let (handle, _task) = start(&gateway, MockGateway::config()).await;
    assert_eq!(handle.cursor().await, Some(20));
    assert!(gateway.log_queries().is_empty());
}

struct BrokenStore;

#[async_trait]
impl CursorStore for BrokenStore {
    async fn load(&self) -> anyhow::Result<Option<u64>> {
        Ok(None)
    }

    async fn save(&self, _cursor: u64) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}

#[tokio::test(start_paused = true)]
async fn cursor_store_failures_are_fatal() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (watcher, handle) = EventWatcher::new(gateway.clone(), Arc::new(MockGateway::config()));
    let task = spawn(watcher.with_cursor_store(Arc::new(BrokenStore)), &handle).await;

    gateway.mine(1);
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, WatcherError::CursorStore(_)));
}

#[tokio::test(start_paused = true)]
async fn external_cancellation_and_dropped_handles_stop_the_loop() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);

    let token = CancellationToken::new();
    let (watcher, handle) = EventWatcher::new(gateway.clone(), Arc::new(MockGateway::config()));
    let task = spawn(watcher.with_cancellation(token.clone()), &handle).await;
    token.cancel();
    assert_eq!(task.await.unwrap().unwrap(), Some(10));

    let (handle, task) = start(&gateway, MockGateway::config()).await;
    drop(handle);
    assert_eq!(task.await.unwrap().unwrap(), Some(10));
}

#[tokio::test(start_paused = true)]
async fn undeclared_events_and_fields_are_rejected_at_registration() {
    let gateway = Arc::new(MockGateway::new());
    let (handle, _task) = start(&gateway, MockGateway::config()).await;

    let err = handle
        .watch_event(ContractKind::Token, "TaskCreated", no_filter())
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::UnknownEvent { .. }));

    let err = handle
        .watch_event(ContractKind::Task, "TaskSuccess", args(json!({"round": 1})))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        WatchError::UnknownField {
            event: "TaskSuccess".into(),
            field: "round".into()
        }
    );

    let err = handle
        .watch_event(ContractKind::Task, "TaskCreated", args(json!({"round": "first"})))
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::InvalidFilterValue { field, .. } if field == "round"));
}

#[tokio::test(start_paused = true)]
async fn uint_filters_given_as_strings_match_numeric_event_values() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, _task) = start(&gateway, MockGateway::config()).await;

    let mut decimal = handle
        .watch_event(
            ContractKind::Task,
            "TaskCreated",
            args(json!({"taskId": "1", "round": "1"})),
        )
        .await
        .unwrap();
    let mut hex = handle
        .watch_event(
            ContractKind::Task,
            "TaskCreated",
            args(json!({"taskId": "0x1", "round": "0x1"})),
        )
        .await
        .unwrap();
    created(&gateway, 11, 0, 2);
    created(&gateway, 11, 1, 1);
    gateway.mine(1);

    assert_eq!(decimal.next_event().await.unwrap().log_index, 1);
    assert_eq!(hex.next_event().await.unwrap().log_index, 1);
    assert_eq!(handle.cursor().await, Some(11));
    assert!(decimal.try_next_event().is_none());

    let query = gateway.log_queries().pop().unwrap();
    assert_eq!(query.indexed, args(json!({"taskId": 1})));
}

#[tokio::test(start_paused = true)]
async fn listeners_can_be_consumed_as_streams() {
    use futures::StreamExt;

    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(10);
    let (handle, _task) = start(&gateway, MockGateway::config()).await;
    let stream = handle
        .watch_event(ContractKind::Task, "TaskCreated", args(json!({"taskId": 1})))
        .await
        .unwrap()
        .into_stream();

    created(&gateway, 11, 0, 1);
    created(&gateway, 12, 0, 2);
    gateway.mine(2);

    let rounds: Vec<_> = stream
        .take(2)
        .map(|event| event.args["round"].clone())
        .collect()
        .await;
    assert_eq!(rounds, vec![json!(1), json!(2)]);
}
