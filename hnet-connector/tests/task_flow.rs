//! A full task round driven through the typed bindings, the waiter and the watcher,
//! with the mock ledger standing in for the contracts' own logic.
use anyhow::Result;
use hnet_connector::{
    bindings::{ChainNodeStatus, Contracts},
    client::{ContractClient, TxOptions},
    config::ConnectorConfig,
    contracts::ContractKind,
    gateway::Value,
    test_utils::{args, bytes32, MockGateway, PlainSigner, ReceiptPlan, ADDR_A, ADDR_B, ADDR_C},
    workers::EventWatcher,
    OutcomeError,
};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};

fn contracts_for(
    gateway: &Arc<MockGateway>,
    config: &Arc<ConnectorConfig>,
    account: &str,
) -> Contracts {
    let client = ContractClient::new(gateway.clone(), config.clone())
        .with_signer(Arc::new(PlainSigner::new(account)));
    Contracts::new(client)
}

#[tokio::test(start_paused = true)]
async fn task_round_with_event_watcher() -> Result<()> {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_tip(100);
    let config = Arc::new(MockGateway::config());
    let nodes = [ADDR_A, ADDR_B, ADDR_C];
    let contracts: HashMap<&str, Contracts> = nodes
        .iter()
        .map(|account| (*account, contracts_for(&gateway, &config, account)))
        .collect();
    let creator = &contracts[ADDR_A];

    let (watcher, handle) = EventWatcher::new(gateway.clone(), config.clone());
    let watcher_task = tokio::spawn(watcher.start());
    assert_eq!(handle.cursor().await, Some(100));
    let mut created = handle
        .watch_event(ContractKind::Task, "TaskCreated", args(json!({"creator": ADDR_A})))
        .await?;

    // Task creation selects all three nodes.
    let tx = creator
        .task
        .create_task(&bytes32(1), &bytes32(2), &TxOptions::default())
        .await?;
    let block = gateway.tip() + 1;
    for (log_index, node) in nodes.iter().enumerate() {
        gateway.emit_at(
            ContractKind::Task,
            "TaskCreated",
            block,
            0,
            log_index as u32,
            json!({
                "taskId": 1,
                "creator": ADDR_A,
                "selectedNode": node,
                "taskHash": bytes32(1),
                "dataHash": bytes32(2),
                "round": log_index,
            }),
        );
    }
    gateway.mine(1);
    let receipt = creator.task.client().wait(&tx).await.into_receipt(tx.hash())?;
    assert_eq!(receipt.block_number, block);

    let mut rounds = HashMap::new();
    for _ in 0..nodes.len() {
        let event = created.next_event().await.expect("watcher stopped");
        assert_eq!(event.args["taskId"], json!(1));
        let node = event.args["selectedNode"].as_str().unwrap_or_default().to_string();
        let round = event.args["round"].as_u64().unwrap_or_default();
        rounds.insert(node, round);
    }
    assert!(nodes.iter().all(|node| rounds.contains_key(*node)));

    let queried = creator
        .task
        .get_events("TaskCreated", receipt.block_number, None, Default::default())
        .await?;
    assert_eq!(queried.len(), 3);

    // Commit phase.
    let mut ready = handle
        .watch_event(
            ContractKind::Task,
            "TaskResultCommitmentsReady",
            args(json!({"taskId": 1})),
        )
        .await?;
    for node in nodes {
        let tx = contracts[node]
            .task
            .submit_task_result_commitment(
                1,
                rounds[node],
                &bytes32(3),
                &bytes32(4),
                &TxOptions::default(),
            )
            .await?;
        gateway.mine(1);
        contracts[node].task.client().wait(&tx).await.into_receipt(tx.hash())?;
    }
    gateway.emit_at(
        ContractKind::Task,
        "TaskResultCommitmentsReady",
        gateway.tip() + 1,
        0,
        0,
        json!({"taskId": 1}),
    );
    gateway.mine(1);
    let event = ready.next_event().await.expect("watcher stopped");
    assert_eq!(event.args["taskId"], json!(1));

    // Disclosure picks a result node.
    let from_block = gateway.tip() + 1;
    for node in nodes {
        let tx = contracts[node]
            .task
            .disclose_task_result(1, rounds[node], "0x0102030405060708", &TxOptions::default())
            .await?;
        gateway.mine(1);
        contracts[node].task.client().wait(&tx).await.into_receipt(tx.hash())?;
    }
    gateway.emit_at(
        ContractKind::Task,
        "TaskSuccess",
        gateway.tip() + 1,
        0,
        0,
        json!({"taskId": 1, "result": "0x0102030405060708", "resultNode": ADDR_B}),
    );
    gateway.mine(1);
    let success = creator
        .task
        .get_events("TaskSuccess", from_block, Some(gateway.tip()), Default::default())
        .await?;
    assert_eq!(success.len(), 1);
    let result_node = success[0].args["resultNode"].as_str().unwrap_or_default();
    assert_eq!(result_node, ADDR_B);

    // Only the result node may report; anyone else is reverted.
    gateway.plan_next_receipt(ReceiptPlan::revert(Some("Not selected node")));
    let tx = contracts[ADDR_C]
        .task
        .report_task_success(1, rounds[ADDR_C], &TxOptions::default())
        .await?;
    gateway.mine(1);
    let err = contracts[ADDR_C]
        .task
        .client()
        .wait(&tx)
        .await
        .into_receipt(tx.hash())
        .unwrap_err();
    assert_eq!(
        err,
        OutcomeError::Reverted {
            hash: tx.hash().clone(),
            reason: "Not selected node".into()
        }
    );

    let tx = contracts[result_node]
        .task
        .report_task_success(1, rounds[result_node], &TxOptions::default())
        .await?;
    gateway.mine(1);
    contracts[result_node].task.client().wait(&tx).await.into_receipt(tx.hash())?;

    gateway.set_call_result("getNodeTask", Ok(json!(0)));
    gateway.set_call_result("getNodeStatus", Ok(Value::from(1)));
    for node in nodes {
        assert_eq!(contracts[node].task.get_node_task(node).await?, 0);
        assert_eq!(
            contracts[node].node.get_node_status(node).await?,
            ChainNodeStatus::Available
        );
    }

    handle.stop();
    let cursor = watcher_task.await??;
    assert!(cursor.is_some());
    Ok(())
}
