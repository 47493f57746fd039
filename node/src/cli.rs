//! # CLI Interface
//!
//! Defines the command-line argument structure for `pod-node` using
//! `clap` derive. Supports three subcommands: `demo`, `inspect`, and
//! `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use pod_protocol::trade::TradeMode;

use crate::logging::LogFormat;

/// Fair-exchange data trading node.
///
/// Runs a complete buyer/seller trade over loopback TCP against the
/// in-memory settlement contract, and inspects the durable trade records
/// either side left behind.
#[derive(Parser, Debug)]
#[command(
    name = "pod-node",
    about = "Fair-exchange data trading node",
    version,
    propagate_version = true
)]
pub struct PodNodeCli {
    /// Log output format.
    #[arg(long, global = true, env = "POD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one trade between a local seller and a local buyer.
    Demo(DemoArgs),
    /// Print the trade records stored in a data directory.
    Inspect(InspectArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `demo` subcommand.
#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Trade mode, by name (`plain-complaint`, `TableOtVrfQuery`, ...) or
    /// wire code (0-13).
    #[arg(long, short = 'm', value_parser = parse_mode, default_value = "plain-complaint")]
    pub mode: TradeMode,

    /// Data to sell. Raw bytes for plain modes, CSV with a header row for
    /// table modes. A generated sample is used when omitted.
    #[arg(long, short = 'i')]
    pub input: Option<PathBuf>,

    /// Block size for plain data.
    #[arg(long, default_value_t = 64)]
    pub block_size: u64,

    /// First demanded block or row.
    #[arg(long, default_value_t = 0)]
    pub start: u64,

    /// Number of demanded blocks or rows.
    #[arg(long, default_value_t = 10)]
    pub count: u64,

    /// Phantom range as `START:COUNT` for OT modes. Defaults to the whole
    /// dataset.
    #[arg(long, value_parser = parse_range)]
    pub phantom: Option<(u64, u64)>,

    /// Key column for VRF queries.
    #[arg(long, default_value = "city")]
    pub key: String,

    /// Queried value for VRF queries. Repeat for several.
    #[arg(long = "value")]
    pub values: Vec<String>,

    /// Decoy value mixed into an OT VRF query. Repeat for several.
    #[arg(long = "decoy")]
    pub decoys: Vec<String>,

    /// Price the buyer offers per demanded item.
    #[arg(long, env = "POD_UNIT_PRICE", default_value_t = 2)]
    pub unit_price: u64,

    /// Minimum price the seller accepts per item.
    #[arg(long, default_value_t = 1)]
    pub seller_unit_price: u64,

    /// Buyer deposit towards the seller before the trade.
    #[arg(long, default_value_t = 1_000)]
    pub deposit: u64,

    /// Make the seller deliver a corrupted block, to walk the claim path.
    #[arg(long)]
    pub faulty: bool,

    /// Where trade records and the decrypted output are written.
    #[arg(long, short = 'd', env = "POD_DATA_DIR", default_value = "pod-data")]
    pub data_dir: PathBuf,

    /// Loopback port for the seller. 0 picks a free one.
    #[arg(long, env = "POD_PORT", default_value_t = 0)]
    pub port: u16,
}

/// Which side's records to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleFilter {
    Buyer,
    Seller,
}

/// Arguments for the `inspect` subcommand.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Data directory of a previous `demo` run.
    #[arg(long, short = 'd', env = "POD_DATA_DIR", default_value = "pod-data")]
    pub data_dir: PathBuf,

    /// Only print one side's records.
    #[arg(long, value_enum)]
    pub role: Option<RoleFilter>,

    /// Only print records whose flow never finished.
    #[arg(long)]
    pub unfinished: bool,
}

/// Parse a trade mode by wire code or name. Names match case-insensitively
/// and ignore `-` and `_`.
pub fn parse_mode(s: &str) -> Result<TradeMode, String> {
    if let Ok(code) = s.parse::<u8>() {
        return TradeMode::try_from(code).map_err(|code| format!("unknown mode code {code}"));
    }
    let wanted: String = s
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    TradeMode::ALL
        .into_iter()
        .find(|mode| mode.to_string().to_lowercase() == wanted)
        .ok_or_else(|| format!("unknown mode {s:?}"))
}

fn parse_range(s: &str) -> Result<(u64, u64), String> {
    let (start, count) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:COUNT, got {s:?}"))?;
    let start = start.parse().map_err(|e| format!("bad start: {e}"))?;
    let count = count.parse().map_err(|e| format!("bad count: {e}"))?;
    Ok((start, count))
}
