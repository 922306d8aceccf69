use anyhow::{Context, Result};
use hnet_connector::config::ConnectorConfig;
use hnet_logger::LogConfig;
use serde::Deserialize;
use std::time::Duration;

/// The top-level configuration for the hnet command line client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CliConfig {
    pub connector: ConnectorConfig,
    pub gateway: RpcConfig,
    /// Location of the sled database holding watcher cursors.
    pub db_path: String,
    pub log: LogConfig,
}

/// Connection settings for the ledger gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RpcConfig {
    pub rpc_url: String,
    pub request_timeout_secs: u64,
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            gateway: RpcConfig::default(),
            db_path: "./hnet.db".to_string(),
            log: LogConfig::default(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Loads the configuration from an optional TOML file, then applies `HNET__`
/// environment overrides (e.g. `HNET__LOG__LEVEL=debug`).
pub fn load_config(path: Option<&str>) -> Result<CliConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path));
    }
    builder = builder.add_source(config::Environment::with_prefix("HNET").separator("__"));

    let settings: CliConfig = builder
        .build()
        .with_context(|| format!("Failed to build configuration from {:?}", path))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hnet_connector::contracts::ContractKind;
    use std::io::Write;

    #[test]
    fn defaults_apply_without_a_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.db_path, "./hnet.db");
        assert_eq!(config.connector.watcher.confirmation_depth, 2);
        assert_eq!(config.connector.retry.max_attempts, 5);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
db-path = "/var/lib/hnet/db"

[gateway]
rpc-url = "http://ledger.internal:8545"

[connector.contracts]
task = "0x0000000000000000000000000000000000000c02"

[connector.watcher]
confirmation-depth = 6
start-block = 1200

[log]
format = "json"
"#
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.db_path, "/var/lib/hnet/db");
        assert_eq!(config.gateway.rpc_url, "http://ledger.internal:8545");
        assert_eq!(config.gateway.request_timeout_secs, 30);
        assert_eq!(
            config.connector.contracts.address_of(ContractKind::Task),
            "0x0000000000000000000000000000000000000c02"
        );
        assert_eq!(config.connector.watcher.confirmation_depth, 6);
        assert_eq!(config.connector.watcher.start_block, Some(1200));
        assert_eq!(config.connector.watcher.poll_interval_ms, 2_000);
        assert_eq!(config.log.format, hnet_logger::LogFormat::Json);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config(Some("/nonexistent/hnet.toml")).is_err());
    }
}
