//! # CLI Interface
//!
//! Command-line structure for `concord-node` using `clap` derive. Every
//! option has a `CONCORD_*` environment fallback.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Concord participant node.
///
/// Runs a set of participant nodes, an observer and a notary on an
/// in-process network, and either serves the HTTP API over them or runs a
/// single simulated flow.
#[derive(Parser, Debug)]
#[command(
    name = "concord-node",
    about = "Concord co-signed state transition node",
    version,
    propagate_version = true
)]
pub struct ConcordNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the in-process network and serve the HTTP API.
    Serve(ServeArgs),
    /// Run one flow (or a race between two) and print the outcome as JSON.
    Simulate(SimulateArgs),
    /// Print version information and exit.
    Version,
}

/// Options shared by `serve` and `simulate`.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// JSON file with flow settings (pinned notary, timeouts in ms).
    #[arg(long, short = 'c', env = "CONCORD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name of the notary every node pins. Overrides the config file.
    #[arg(long, env = "CONCORD_NOTARY")]
    pub notary: Option<String>,

    /// Keep vaults and notary state on disk under this directory.
    ///
    /// When omitted, all storage is temporary.
    #[arg(long, short = 'd', env = "CONCORD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, value_enum, env = "CONCORD_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Address for the HTTP API.
    #[arg(long, env = "CONCORD_API_ADDR", default_value = "127.0.0.1:9741")]
    pub api_addr: String,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Source account. Its host initiates the flow.
    #[arg(long, default_value = "alice")]
    pub source: String,

    /// Target account.
    #[arg(long, default_value = "bob")]
    pub target: String,

    /// Skip the compliance copy to the regulator.
    #[arg(long)]
    pub no_report: bool,

    /// Race two initiators for the same target account instead.
    #[arg(long)]
    pub race: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        ConcordNodeCli::command().debug_assert();
    }

    #[test]
    fn simulate_defaults() {
        let cli = ConcordNodeCli::try_parse_from(["concord-node", "simulate", "--race"]).unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert!(args.race);
                assert_eq!(args.source, "alice");
                assert_eq!(args.target, "bob");
                assert!(args.common.notary.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
