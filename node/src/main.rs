// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # POD Node
//!
//! Entry point for the `pod-node` binary. Parses CLI arguments, initializes
//! logging, and runs one of three subcommands:
//!
//! - `demo`    — list a dataset, then buy from it over loopback TCP
//! - `inspect` — print the trade records kept in a data directory
//! - `version` — print build version information
//!
//! Trade records go to stdout as JSON; logs go to stderr.

mod cli;
mod demo;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;

use pod_contracts::SettlementContract;
use pod_protocol::engine::sim::{SimEngine, SimFaults};
use pod_protocol::storage::TxStore;
use pod_protocol::trade::{
    BuyOrder, Buyer, BuyerConfig, Cancellation, Role, Seller, SellerConfig, TradeBook, TradeId,
    Transaction,
};

use cli::{Commands, DemoArgs, InspectArgs, PodNodeCli, RoleFilter};
use logging::{LogFormat, Logging};

const DEFAULT_LOG_DIRECTIVE: &str = "pod_node=info,pod_protocol=info,pod_contracts=info";

/// How long the seller gets to finish after the buyer returns.
const SELLER_DRAIN: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = PodNodeCli::parse();

    match cli.command {
        Commands::Demo(args) => run_demo(args, cli.log_format).await,
        Commands::Inspect(args) => inspect(args, cli.log_format),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// What `demo` prints once both sides are done.
#[derive(Serialize)]
struct DemoReport {
    buyer: Transaction,
    seller: Option<Transaction>,
    deposit_left: U256,
    seller_balance: U256,
}

/// Lists a dataset with a local seller and buys from it with a local
/// buyer, both settling against one in-memory contract.
async fn run_demo(args: DemoArgs, format: LogFormat) -> Result<()> {
    Logging::new(DEFAULT_LOG_DIRECTIVE, format).install()?;

    let mode = args.mode;
    tracing::info!(
        %mode,
        data_dir = %args.data_dir.display(),
        "starting pod-node demo"
    );

    // --- Persistent storage ---
    let buyer_book = TradeBook::new(open_store(&args.data_dir, Role::Buyer)?);
    let seller_book = TradeBook::new(open_store(&args.data_dir, Role::Seller)?);

    // --- Settlement and proofs ---
    let contract = Arc::new(SettlementContract::default());
    let engine = Arc::new(SimEngine::with_faults(SimFaults {
        corrupt_block: args.faulty,
        wrong_secret: false,
    }));

    // --- Listing ---
    let seller_address = PrivateKeySigner::random().address();
    let dataset = demo::load_dataset(mode, args.input.as_deref())?;
    let bulletin = engine
        .publish(dataset, mode, args.block_size)
        .context("failed to load dataset")?;
    contract
        .publish(seller_address, &bulletin)
        .context("failed to publish bulletin")?;
    tracing::info!(
        root = %bulletin.sigma_merkle_root,
        n = bulletin.n,
        size = bulletin.size,
        "bulletin published"
    );

    let seller = Arc::new(Seller::new(
        SellerConfig {
            unit_price: U256::from(args.seller_unit_price),
            ..SellerConfig::default()
        },
        seller_address,
        engine.clone(),
        contract.clone(),
        seller_book,
    ));
    seller.offer(bulletin.clone());

    let listener = TcpListener::bind(("127.0.0.1", args.port))
        .await
        .with_context(|| format!("failed to bind seller listener on port {}", args.port))?;
    let addr = listener.local_addr()?;
    tracing::info!("seller listening on {addr}");

    let (stop_seller, seller_cancel) = Cancellation::new();
    let server = tokio::spawn(seller.clone().serve(listener, seller_cancel));

    // --- Buyer ---
    let buyer = Buyer::new(
        BuyerConfig {
            output_dir: args.data_dir.join("output"),
            ..BuyerConfig::default()
        },
        PrivateKeySigner::random(),
        engine.clone(),
        contract.clone(),
        buyer_book,
    );
    contract
        .deposit(buyer.address(), seller_address, U256::from(args.deposit))
        .context("failed to deposit")?;

    let order = BuyOrder {
        seller: seller_address,
        selection: demo::selection(&args, bulletin.n)?,
        bulletin,
        unit_price: U256::from(args.unit_price),
    };

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to seller at {addr}"))?;
    let (stop_buyer, buyer_cancel) = Cancellation::new();
    let trade = buyer.trade(stream, order, buyer_cancel);
    tokio::pin!(trade);

    let bought = tokio::select! {
        res = &mut trade => res,
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, cancelling trade");
            stop_buyer.cancel();
            trade.await
        }
    };

    // The seller's flow may still be confirming its reveal.
    let seller_record = match &bought {
        Ok(tx) => wait_for_seller(&seller, tx.session_id, seller_address, buyer.address()).await,
        Err(_) => None,
    };
    stop_seller.cancel();
    server.await.context("seller task panicked")??;

    let bought = match bought {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!(error = %e, status = ?e.status(), "trade failed");
            bail!("trade failed: {e}");
        }
    };

    let report = DemoReport {
        deposit_left: contract.deposit_of(seller_address, buyer.address()),
        seller_balance: contract.balance_of(seller_address),
        seller: seller_record,
        buyer: bought,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!("pod-node demo finished");
    Ok(())
}

/// Opens the record store for one side under `data_dir`.
fn open_store(data_dir: &Path, role: Role) -> Result<TxStore> {
    let path = data_dir.join(store_dir(role));
    std::fs::create_dir_all(&path)
        .with_context(|| format!("failed to create store directory: {}", path.display()))?;
    let store = TxStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    tracing::debug!(path = %path.display(), records = store.len(), "store opened");
    Ok(store)
}

fn store_dir(role: Role) -> &'static str {
    match role {
        Role::Buyer => "buyer",
        Role::Seller => "seller",
    }
}

/// Waits until the seller's side of `session_id` is no longer live and
/// returns its stored record.
async fn wait_for_seller(
    seller: &Seller,
    session_id: u64,
    seller_address: Address,
    buyer: Address,
) -> Option<Transaction> {
    let id = TradeId {
        role: Role::Seller,
        session_id,
        seller: seller_address,
        buyer,
    };
    let drained = tokio::time::timeout(SELLER_DRAIN, async {
        while seller.book().is_live(&id) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(session_id, "seller still busy, reporting its last stored state");
    }
    match seller.book().store().get(&id) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read seller record");
            None
        }
    }
}

/// Prints the stored trade records of a previous `demo` run.
fn inspect(args: InspectArgs, format: LogFormat) -> Result<()> {
    Logging::new(DEFAULT_LOG_DIRECTIVE, format).install()?;

    let roles: &[Role] = match args.role {
        Some(RoleFilter::Buyer) => &[Role::Buyer],
        Some(RoleFilter::Seller) => &[Role::Seller],
        None => &[Role::Buyer, Role::Seller],
    };

    let mut records = Vec::new();
    for &role in roles {
        let path = args.data_dir.join(store_dir(role));
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no store");
            continue;
        }
        let store = TxStore::open(&path)
            .with_context(|| format!("failed to open store at {}", path.display()))?;
        let found = if args.unfinished {
            store.unfinished()?
        } else {
            store.list_role(role)?
        };
        tracing::info!(?role, count = found.len(), "records loaded");
        records.extend(found);
    }

    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("pod-node  {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", pod_protocol::config::PROTOCOL_VERSION);
    println!("rustc     {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first. If a
/// handler cannot be installed, that signal is never reported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
