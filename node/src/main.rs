// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Escrow Node
//!
//! Entry point for the `escrow-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the ledger, and serves the
//! HTTP/WS API.
//!
//! The binary supports three subcommands:
//!
//! - `run`: open the ledger and serve the API
//! - `status`: query a running node's status endpoint
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal;

use escrow_contracts::{EscrowLedger, MemorySettlement, SettlementBackend, SledSettlement};
use escrow_protocol::storage::LedgerDb;

use cli::{Commands, EscrowNodeCli};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = EscrowNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens the ledger and serves the API and metrics endpoints until a
/// shutdown signal arrives.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format)?;

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        ephemeral = args.ephemeral,
        "starting escrow-node"
    );

    // --- Settlement backend ---
    let (backend, backend_name): (Box<dyn SettlementBackend>, &'static str) = if args.ephemeral {
        tracing::warn!("ephemeral mode: ledger state is lost on exit");
        (Box::new(MemorySettlement::new()), "memory")
    } else {
        let db_path = cli::expand_home(&args.data_dir).join("ledger");
        std::fs::create_dir_all(&db_path).with_context(|| {
            format!("failed to create database directory: {}", db_path.display())
        })?;
        let db = LedgerDb::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;
        tracing::info!(path = %db_path.display(), "database opened");
        (Box::new(SledSettlement::new(db)), "sled")
    };

    // --- Ledger ---
    // `open` refuses records that disagree with the backend's totals or
    // payee balances.
    let ledger = Arc::new(EscrowLedger::open(backend).context("failed to restore escrow ledger")?);
    let custody = ledger.custody();

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    node_metrics
        .escrows_awaiting_delivery
        .set(custody.awaiting_delivery as i64);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            escrow_protocol::config::PROTOCOL_VERSION,
        ),
        backend: backend_name,
        ledger: Arc::clone(&ledger),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!(addr = %api_addr, "API server listening");

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!(addr = %metrics_addr, "metrics server listening");

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown signal received");
        }
    }

    let custody = ledger.custody();
    tracing::info!(
        escrows = custody.escrow_count,
        in_custody = %custody.in_custody,
        "escrow-node stopped"
    );
    Ok(())
}

/// Queries a running node's `/status` endpoint and prints the body.
///
/// Speaks just enough HTTP/1.1 for one GET, so the binary needs no HTTP
/// client crate.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let mut stream = tokio::net::TcpStream::connect(&args.rpc_addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.rpc_addr))?;

    let request = format!(
        "GET /status HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        args.rpc_addr,
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let (head, body) = response
        .split_once("\r\n\r\n")
        .context("malformed HTTP response")?;
    if !head.starts_with("HTTP/1.1 200") {
        let status_line = head.lines().next().unwrap_or_default();
        anyhow::bail!("status request failed: {status_line}");
    }

    let status: api::StatusResponse =
        serde_json::from_str(body).context("unexpected /status payload")?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("escrow-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", escrow_protocol::config::PROTOCOL_VERSION);
    println!("schema      {}", escrow_protocol::config::LEDGER_SCHEMA_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = ctrl_c => res.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await.context("failed to listen for Ctrl+C")?;

    Ok(())
}
