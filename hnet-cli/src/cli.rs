use clap::{Args, Parser, Subcommand};
use hnet_connector::contracts::ContractKind;

/// Command line client for the hnet contracts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted;
    /// `HNET__*` environment variables override both.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate a view method and print the result as JSON.
    Call(CallCmd),
    /// Print the events of a closed block range, one JSON object per line.
    Events(EventsCmd),
    /// Follow an event until interrupted, resuming from the stored cursor.
    Watch(WatchCmd),
    /// Look up the receipt of a transaction.
    Receipt(ReceiptCmd),
}

#[derive(Args, Debug)]
pub struct CallCmd {
    #[arg(long, value_parser = parse_contract)]
    pub contract: ContractKind,
    #[arg(long)]
    pub method: String,
    /// Named arguments as a JSON object.
    #[arg(long, default_value = "{}")]
    pub args: String,
}

#[derive(Args, Debug)]
pub struct EventsCmd {
    #[arg(long, value_parser = parse_contract)]
    pub contract: ContractKind,
    #[arg(long)]
    pub event: String,
    #[arg(long)]
    pub from_block: u64,
    /// Last block to include. Defaults to the current tip.
    #[arg(long)]
    pub to_block: Option<u64>,
    /// Argument filter as a JSON object.
    #[arg(long, default_value = "{}")]
    pub filter: String,
}

#[derive(Args, Debug)]
pub struct WatchCmd {
    #[arg(long, value_parser = parse_contract)]
    pub contract: ContractKind,
    #[arg(long)]
    pub event: String,
    /// Argument filter as a JSON object.
    #[arg(long, default_value = "{}")]
    pub filter: String,
    /// Resume after this block instead of the stored cursor.
    #[arg(long)]
    pub resume_from: Option<u64>,
    /// Cursor namespace in the database, one per independent watcher.
    #[arg(long, default_value = "default")]
    pub name: String,
}

#[derive(Args, Debug)]
pub struct ReceiptCmd {
    #[arg(long)]
    pub hash: String,
}

fn parse_contract(s: &str) -> Result<ContractKind, String> {
    s.parse()
}
