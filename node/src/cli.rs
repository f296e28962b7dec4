//! # CLI Interface
//!
//! Defines the command-line argument structure for `escrow-node` using
//! `clap` derive. Supports three subcommands: `run`, `status`, and
//! `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use escrow_protocol::config::{DEFAULT_DATA_DIR, DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT};

use crate::logging::LogFormat;

/// Escrow custody ledger node.
///
/// Hosts a two-party escrow ledger behind a REST and JSON-RPC API, streams
/// ledger events over WebSocket, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "escrow-node",
    about = "Escrow custody ledger node",
    version,
    propagate_version = true
)]
pub struct EscrowNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the escrow node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Query the status of a running node via its API endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the ledger database. Created on first run.
    #[arg(long, short = 'd', env = "ESCROW_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Port for the REST and JSON-RPC API.
    #[arg(long, env = "ESCROW_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "ESCROW_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(long, env = "ESCROW_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Keep the ledger in memory only. Nothing is written to `data_dir`.
    #[arg(long)]
    pub ephemeral: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// `host:port` of the running node's API.
    #[arg(long, env = "ESCROW_RPC_ADDR", default_value = "127.0.0.1:9841")]
    pub rpc_addr: String,
}

/// Expands a leading `~` to `$HOME`. Other paths are returned unchanged.
pub fn expand_home(path: &std::path::Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        EscrowNodeCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = EscrowNodeCli::try_parse_from(["escrow-node", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(args.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(args.log_format, LogFormat::Pretty);
        assert!(!args.ephemeral);
    }

    #[test]
    fn run_accepts_json_logs_and_ephemeral() {
        let cli = EscrowNodeCli::try_parse_from([
            "escrow-node",
            "run",
            "--log-format",
            "json",
            "--ephemeral",
            "--rpc-port",
            "18000",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(args.ephemeral);
        assert_eq!(args.rpc_port, 18000);
    }

    #[test]
    fn home_prefix_is_expanded() {
        let plain = std::path::Path::new("/var/lib/escrow");
        assert_eq!(expand_home(plain), plain);

        if let Some(home) = std::env::var_os("HOME") {
            let expanded = expand_home(std::path::Path::new("~/.escrow"));
            assert_eq!(expanded, PathBuf::from(home).join(".escrow"));
        }
    }
}
