//! `tracing` setup shared by the hnet binaries.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs::File, str::FromStr};
use tracing::{Level, Subscriber};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter, Layer, Registry};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Plain,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogConfig {
    /// Log level, e.g. "info", "debug", "trace".
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Path to the log file, required if output is "file".
    pub file_path: Option<String>,
    /// `RUST_LOG`-style directives, e.g. "hnet_connector=debug,warn". Replaces `level`
    /// as the event filter when set.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Plain,
            output: LogOutput::Stdout,
            file_path: None,
            filter: None,
        }
    }
}

impl LogConfig {
    /// The configured level; unparsable values fall back to `INFO`.
    pub fn level(&self) -> Level {
        Level::from_str(&self.level).unwrap_or(Level::INFO)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        match &self.filter {
            Some(directives) => EnvFilter::try_new(directives)
                .with_context(|| format!("Invalid log filter '{}'", directives)),
            None => {
                let level = LevelFilter::from_level(self.level());
                Ok(EnvFilter::default().add_directive(level.into()))
            }
        }
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    subscriber(config)?
        .try_init()
        .context("Failed to install the tracing subscriber")
}

/// Builds the subscriber described by `config` without installing it.
pub fn subscriber(config: &LogConfig) -> Result<impl Subscriber + Send + Sync + 'static> {
    let filter = config.env_filter()?;
    Ok(Registry::default().with(output_layer(config)?.with_filter(filter)))
}

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn output_layer(config: &LogConfig) -> Result<OutputLayer> {
    let layer = match config.output {
        LogOutput::File => {
            let file_path = config
                .file_path
                .as_deref()
                .ok_or_else(|| {
                    anyhow::anyhow!("Log output is 'file' but 'file_path' is not specified")
                })?;
            let log_file = File::create(file_path)
                .with_context(|| format!("Failed to create log file '{}'", file_path))?;

            match config.format {
                LogFormat::Json => fmt::layer().with_writer(log_file).json().boxed(),
                LogFormat::Plain => fmt::layer().with_writer(log_file).with_ansi(false).boxed(),
            }
        }
        LogOutput::Stdout => match config.format {
            LogFormat::Json => fmt::layer().with_writer(std::io::stdout).json().boxed(),
            LogFormat::Plain => fmt::layer().with_writer(std::io::stdout).pretty().boxed(),
        },
    };
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        let config = LogConfig {
            level: "loud".into(),
            ..Default::default()
        };
        assert_eq!(config.level(), Level::INFO);
    }

    #[test]
    fn file_output_requires_a_path() {
        let config = LogConfig {
            output: LogOutput::File,
            ..Default::default()
        };
        let err = init(&config).unwrap_err();
        assert!(err.to_string().contains("file_path"));
    }

    #[test]
    fn invalid_filter_directives_are_rejected() {
        let config = LogConfig {
            filter: Some("hnet_connector=notalevel".into()),
            ..Default::default()
        };
        assert!(init(&config).is_err());
    }

    #[test]
    fn filter_directives_are_not_capped_by_the_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filtered.log");
        let config = LogConfig {
            level: "info".into(),
            format: LogFormat::Json,
            output: LogOutput::File,
            file_path: Some(path.to_string_lossy().into_owned()),
            filter: Some("debug".into()),
        };

        let subscriber = subscriber(&config).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(block = 7, "fetching logs");
            tracing::trace!("too verbose");
        });

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("fetching logs"));
        assert!(!written.contains("too verbose"));
    }

    #[test]
    fn level_applies_without_a_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.log");
        let config = LogConfig {
            level: "info".into(),
            output: LogOutput::File,
            file_path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };

        tracing::subscriber::with_default(subscriber(&config).unwrap(), || {
            tracing::debug!("fetching logs");
            tracing::info!("cursor advanced");
        });

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("cursor advanced"));
        assert!(!written.contains("fetching logs"));
    }

    #[test]
    fn json_file_output_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hnet.log");
        let config = LogConfig {
            level: "debug".into(),
            format: LogFormat::Json,
            output: LogOutput::File,
            file_path: Some(path.to_string_lossy().into_owned()),
            filter: None,
        };

        init(&config).unwrap();
        tracing::info!(block = 42, "cursor advanced");

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("cursor advanced"));
        assert!(written.contains("\"block\":42"));
    }
}
