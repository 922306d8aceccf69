use super::{decode_addresses, decode_items, decode_string, decode_u64, decode_uint, malformed, named};
use crate::{
    client::{ContractClient, TxOptions},
    contracts::ContractKind,
    error::{CallError, SubmitError},
    gateway::{Args, Value},
    waiter::PendingTransaction,
};
use std::fmt;

/// Registration state of a node as recorded by the node contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainNodeStatus {
    Quit,
    Available,
    Busy,
    PendingPause,
    PendingQuit,
    Paused,
}

impl TryFrom<u128> for ChainNodeStatus {
    type Error = u128;

    fn try_from(code: u128) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(ChainNodeStatus::Quit),
            1 => Ok(ChainNodeStatus::Available),
            2 => Ok(ChainNodeStatus::Busy),
            3 => Ok(ChainNodeStatus::PendingPause),
            4 => Ok(ChainNodeStatus::PendingQuit),
            5 => Ok(ChainNodeStatus::Paused),
            other => Err(other),
        }
    }
}

impl fmt::Display for ChainNodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainNodeStatus::Quit => "quit",
            ChainNodeStatus::Available => "available",
            ChainNodeStatus::Busy => "busy",
            ChainNodeStatus::PendingPause => "pending-pause",
            ChainNodeStatus::PendingQuit => "pending-quit",
            ChainNodeStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuInfo {
    pub name: String,
    pub vram: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNodeInfo {
    pub status: ChainNodeStatus,
    pub gpu_id: String,
    pub gpu: GpuInfo,
}

/// The node registry contract.
#[derive(Clone)]
pub struct NodeContract {
    client: ContractClient,
}

impl NodeContract {
    pub fn new(client: ContractClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ContractClient {
        &self.client
    }

    pub async fn join(&self, options: &TxOptions) -> Result<PendingTransaction, SubmitError> {
        self.transact("join", Args::new(), options).await
    }

    pub async fn quit(&self, options: &TxOptions) -> Result<PendingTransaction, SubmitError> {
        self.transact("quit", Args::new(), options).await
    }

    pub async fn pause(&self, options: &TxOptions) -> Result<PendingTransaction, SubmitError> {
        self.transact("pause", Args::new(), options).await
    }

    pub async fn resume(&self, options: &TxOptions) -> Result<PendingTransaction, SubmitError> {
        self.transact("resume", Args::new(), options).await
    }

    pub async fn update_task_contract_address(
        &self,
        task_contract: &str,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        let args = named([("taskContract", Value::from(task_contract))]);
        self.transact("updateTaskContractAddress", args, options).await
    }

    pub async fn total_nodes(&self) -> Result<u64, CallError> {
        let value = self.view("totalNodes", Args::new()).await?;
        decode_u64("totalNodes", &value)
    }

    pub async fn available_nodes(&self) -> Result<u64, CallError> {
        let value = self.view("availableNodes", Args::new()).await?;
        decode_u64("availableNodes", &value)
    }

    pub async fn get_node_status(&self, node: &str) -> Result<ChainNodeStatus, CallError> {
        let value = self
            .view("getNodeStatus", named([("nodeAddress", Value::from(node))]))
            .await?;
        decode_status("getNodeStatus", &value)
    }

    pub async fn get_node_info(&self, node: &str) -> Result<ChainNodeInfo, CallError> {
        const METHOD: &str = "getNodeInfo";
        let value = self
            .view(METHOD, named([("nodeAddress", Value::from(node))]))
            .await?;
        let [status, gpu_id, gpu] = decode_items(METHOD, &value)? else {
            return Err(malformed(METHOD, format!("expected a 3-tuple, got {value}")));
        };
        Ok(ChainNodeInfo {
            status: decode_status(METHOD, status)?,
            gpu_id: decode_string(METHOD, gpu_id)?,
            gpu: decode_gpu(METHOD, gpu)?,
        })
    }

    pub async fn get_all_node_addresses(&self) -> Result<Vec<String>, CallError> {
        let value = self.view("getAllNodeAddresses", Args::new()).await?;
        decode_addresses("getAllNodeAddresses", &value)
    }

    pub async fn get_available_nodes(&self) -> Result<Vec<String>, CallError> {
        let value = self.view("getAvailableNodes", Args::new()).await?;
        decode_addresses("getAvailableNodes", &value)
    }

    pub async fn get_available_gpus(&self) -> Result<Vec<GpuInfo>, CallError> {
        let value = self.view("getAvailableGPUs", Args::new()).await?;
        decode_items("getAvailableGPUs", &value)?
            .iter()
            .map(|item| decode_gpu("getAvailableGPUs", item))
            .collect()
    }

    async fn view(&self, method: &str, args: Args) -> Result<Value, CallError> {
        self.client.call(ContractKind::Node, method, args).await
    }

    async fn transact(
        &self,
        method: &str,
        args: Args,
        options: &TxOptions,
    ) -> Result<PendingTransaction, SubmitError> {
        self.client.submit(ContractKind::Node, method, args, options).await
    }
}

fn decode_status(method: &str, value: &Value) -> Result<ChainNodeStatus, CallError> {
    let code = decode_uint(method, value)?;
    ChainNodeStatus::try_from(code)
        .map_err(|code| malformed(method, format!("unknown node status {code}")))
}

fn decode_gpu(method: &str, value: &Value) -> Result<GpuInfo, CallError> {
    let [name, vram] = decode_items(method, value)? else {
        return Err(malformed(method, format!("expected a (name, vram) pair, got {value}")));
    };
    Ok(GpuInfo {
        name: decode_string(method, name)?,
        vram: decode_u64(method, vram)?,
    })
}
