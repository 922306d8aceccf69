use super::{decode_uint, named, uint};
use crate::{
    client::{ContractClient, TxOptions},
    contracts::ContractKind,
    error::{CallError, SubmitError},
    events::RawEvent,
    gateway::{Args, Value},
    waiter::PendingTransaction,
};

/// The task contract: creation, commit-reveal of results and success reporting.
///
/// Hash, commitment and result arguments are `0x` hex strings.
#[derive(Clone)]
pub struct TaskContract {
    client: ContractClient,
}

impl TaskContract {
    pub fn new(client: ContractClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ContractClient {
        &self.client
    }

    pub async fn create_task(
        &self,
        task_hash: &str,
        data_hash: &str,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        let args = named([
            ("taskHash", Value::from(task_hash)),
            ("dataHash", Value::from(data_hash)),
        ]);
        self.transact("createTask", args, options).await
    }

    pub async fn submit_task_result_commitment(
        &self,
        task_id: u128,
        round: u64,
        commitment: &str,
        nonce: &str,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        let args = named([
            ("taskId", uint(task_id)),
            ("round", Value::from(round)),
            ("commitment", Value::from(commitment)),
            ("nonce", Value::from(nonce)),
        ]);
        self.transact("submitTaskResultCommitment", args, options).await
    }

    pub async fn disclose_task_result(
        &self,
        task_id: u128,
        round: u64,
        result: &str,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        let args = named([
            ("taskId", uint(task_id)),
            ("round", Value::from(round)),
            ("result", Value::from(result)),
        ]);
        self.transact("discloseTaskResult", args, options).await
    }

    pub async fn report_task_success(
        &self,
        task_id: u128,
        round: u64,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        let args = named([("taskId", uint(task_id)), ("round", Value::from(round))]);
        self.transact("reportTaskSuccess", args, options).await
    }

    /// The task currently assigned to `node`, `0` if none.
    pub async fn get_node_task(&self, node: &str) -> Result<u128, CallError> {
        let value = self
            .client
            .call(
                ContractKind::Task,
                "getNodeTask",
                named([("nodeAddress", Value::from(node))]),
            )
            .await?;
        decode_uint("getNodeTask", &value)
    }

    /// Task events in `[from_block, to_block]` (open end = current tip).
    pub async fn get_events(
        &self,
        event: &str,
        from_block: u64,
        to_block: Option<u64>,
        filter: Args,
    ) -> Result<Vec<RawEvent>, CallError> {
        self.client
            .get_events(ContractKind::Task, event, from_block, to_block, filter)
            .await
    }

    async fn transact(
        &self,
        method: &str,
        args: Args,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        self.client.submit(ContractKind::Task, method, args, options).await
    }
}
