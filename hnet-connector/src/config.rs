#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{contracts::ContractKind, gateway::Address};
use std::time::Duration;

/// The top-level configuration for the `hnet-connector` library.
///
/// This struct aggregates the contract addresses, the retry policy for gateway
/// round-trips, and the behavior of the transaction waiter and the event watcher.
/// It is typically deserialized from a configuration file and shared as an
/// `Arc<ConnectorConfig>` between the client and the watcher.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct ConnectorConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub contracts: ContractAddresses,
    #[cfg_attr(feature = "serde", serde(default))]
    pub retry: RetryConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub waiter: WaiterConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub watcher: WatcherConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub channels: ChannelConfig,
}

/// Deployed addresses of the supported contracts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct ContractAddresses {
    #[cfg_attr(feature = "serde", serde(default))]
    pub node: Address,
    #[cfg_attr(feature = "serde", serde(default))]
    pub task: Address,
    #[cfg_attr(feature = "serde", serde(default))]
    pub token: Address,
}

impl ContractAddresses {
    pub fn address_of(&self, contract: ContractKind) -> &Address {
        match contract {
            ContractKind::Node => &self.node,
            ContractKind::Task => &self.task,
            ContractKind::Token => &self.token,
        }
    }
}

/// Exponential backoff applied to transient gateway failures.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct RetryConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    /// Total attempts, the first one included.
    pub max_attempts: u32,
}

/// Defaults for [`crate::waiter::TransactionWaiter`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct WaiterConfig {
    /// The interval in milliseconds between two receipt polls.
    pub poll_interval_ms: u64,
    /// How long to wait for a receipt before reporting `TimedOut`.
    pub max_wait_secs: u64,
}

/// Defines behavior for the event poll loop.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct WatcherConfig {
    /// The interval in milliseconds at which the watcher polls for a new tip.
    pub poll_interval_ms: u64,
    /// Blocks newer than `tip - confirmation_depth` are not processed yet.
    pub confirmation_depth: u64,
    /// First block to process when there is no stored or explicit cursor. `None` starts at the tip.
    pub start_block: Option<u64>,
    /// The maximum number of blocks covered by a single batch.
    pub max_block_range: u64,
    /// Attempts per gateway round-trip before the watcher gives up.
    pub max_fetch_attempts: u32,
}

/// Defines capacities for the MPSC channels used by the watcher.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct ChannelConfig {
    /// The buffer capacity for register/unregister commands sent to the watcher.
    pub watcher_command_buffer: usize,
    /// The default buffer capacity for individual listener channels.
    pub listener_event_buffer: usize,
}

impl RetryConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// The same policy with a different attempt budget.
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self.clone()
        }
    }
}

impl WaiterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 200,
            max_interval_ms: 5_000,
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_wait_secs: 120,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            confirmation_depth: 2,
            start_block: None,
            max_block_range: 1_000,
            max_fetch_attempts: 8,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            watcher_command_buffer: 128,
            listener_event_buffer: 128,
        }
    }
}
