pub mod cli;
pub mod config;
pub mod rpc;
pub mod storage;

use crate::{
    cli::{CallCmd, Cli, Commands, EventsCmd, ReceiptCmd, WatchCmd},
    config::{load_config, CliConfig},
    rpc::JsonRpcGateway,
    storage::SledCursorStore,
};
use anyhow::{Context, Result};
use clap::Parser;
use hnet_connector::{
    client::ContractClient,
    gateway::{Args, LedgerGateway, TxHash},
    workers::EventWatcher,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// The main entry point of the command line client.
/// Parses the arguments, loads the configuration and runs the requested command.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    hnet_logger::init(&config.log)?;
    tracing::debug!("Configuration loaded: {:#?}", &config);

    let gateway: Arc<dyn LedgerGateway> = Arc::new(JsonRpcGateway::new(&config.gateway)?);
    match cli.command {
        Commands::Call(cmd) => call(gateway, &config, cmd).await,
        Commands::Events(cmd) => events(gateway, &config, cmd).await,
        Commands::Watch(cmd) => watch(gateway, &config, cmd).await,
        Commands::Receipt(cmd) => receipt(gateway, cmd).await,
    }
}

fn client(gateway: Arc<dyn LedgerGateway>, config: &CliConfig) -> ContractClient {
    ContractClient::new(gateway, Arc::new(config.connector.clone()))
}

fn parse_args(json: &str) -> Result<Args> {
    serde_json::from_str(json).with_context(|| format!("Expected a JSON object, got '{json}'"))
}

async fn call(gateway: Arc<dyn LedgerGateway>, config: &CliConfig, cmd: CallCmd) -> Result<()> {
    let args = parse_args(&cmd.args)?;
    let value = client(gateway, config)
        .call(cmd.contract, &cmd.method, args)
        .await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn events(
    gateway: Arc<dyn LedgerGateway>,
    config: &CliConfig,
    cmd: EventsCmd,
) -> Result<()> {
    let filter = parse_args(&cmd.filter)?;
    let events = client(gateway, config)
        .get_events(cmd.contract, &cmd.event, cmd.from_block, cmd.to_block, filter)
        .await?;
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    tracing::info!(count = events.len(), "Event query finished");
    Ok(())
}

async fn receipt(gateway: Arc<dyn LedgerGateway>, cmd: ReceiptCmd) -> Result<()> {
    let hash = TxHash(cmd.hash);
    match gateway.get_receipt(&hash).await? {
        Some(receipt) => println!("{}", serde_json::to_string_pretty(&receipt)?),
        None => println!("Transaction {hash} is pending or unknown"),
    }
    Ok(())
}

/// Follows one event until Ctrl+C, printing each match as a JSON line.
async fn watch(gateway: Arc<dyn LedgerGateway>, config: &CliConfig, cmd: WatchCmd) -> Result<()> {
    let filter = parse_args(&cmd.filter)?;
    let db = sled::open(&config.db_path)
        .with_context(|| format!("Failed to open database at '{}'", config.db_path))?;
    let store = Arc::new(SledCursorStore::new(db, &cmd.name));
    let shutdown = CancellationToken::new();

    let (mut watcher, handle) = EventWatcher::new(gateway, Arc::new(config.connector.clone()));
    watcher = watcher
        .with_cursor_store(store)
        .with_cancellation(shutdown.clone());
    if let Some(cursor) = cmd.resume_from {
        watcher = watcher.resume_from(cursor);
    }
    let worker = tokio::spawn(watcher.start());

    let mut listener = handle.watch_event(cmd.contract, &cmd.event, filter).await?;
    loop {
        tokio::select! {
            event = listener.next_event() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
            result = signal::ctrl_c() => {
                result.context("Failed to listen for the shutdown signal")?;
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                break;
            }
        }
    }

    shutdown.cancel();
    drop(listener);
    let cursor = worker.await.context("Event watcher task panicked")??;
    tracing::info!(cursor = ?cursor, watcher = %cmd.name, "Shutdown complete.");
    Ok(())
}
