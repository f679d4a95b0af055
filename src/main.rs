//! Liquidation agent for Aave v2 on Polygon.
//!
//! Tracks at-risk borrowers against the protocol's liquidation boundary,
//! races competing liquidators in the mempool, and settles each attempt
//! through an on-chain flash-loan liquidation wrapper.
//!
//! Configuration comes from a TOML deployment file (CONFIG_FILE, defaults
//! to config/polygon.toml) with secrets pulled from the environment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liquidator_api::{RedisStore, SubgraphClient};
use liquidator_chain::{
    LiquidatorContract, MarketCatalog, MempoolListener, PoolAccountOracle, TransactionSender,
};
use liquidator_core::{artifacts, AgentConfig, AttemptOutcome, Liquidator, Tracker};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,liquidator_core=debug,liquidator_chain=debug")
        }))
        .init();

    info!("Starting liquidation agent");

    let config = AgentConfig::load().context("configuration error")?;
    info!(
        chain_id = config.chain_id,
        lending_pool = %config.lending_pool,
        liquidator = %config.liquidator,
        max_tracked = config.tracker.max_tracked,
        "Configuration loaded"
    );

    let workdir = PathBuf::from(".");

    // Sender doubles as the startup RPC connectivity check.
    let sender = Arc::new(
        TransactionSender::new(&config.private_key, &config.rpc_url, config.chain_id).await?,
    );

    let catalog = Arc::new(MarketCatalog::new(
        &config.rpc_url,
        config.lending_pool,
        config.data_provider,
        config.price_oracle,
    ));
    catalog
        .refresh()
        .await
        .context("initial market catalog load failed")?;
    artifacts::write_markets(&workdir, &catalog.snapshot())?;

    let store = Arc::new(RedisStore::connect(&config.store_url).await?);
    let oracle = Arc::new(PoolAccountOracle::new(
        &config.rpc_url,
        config.lending_pool,
        config.data_provider,
    ));
    let subgraph = SubgraphClient::new(&config.subgraph_url);

    // Single-worker dispatch: at most one liquidation attempt in flight,
    // and the tracker keeps iterating while it runs.
    let (dispatch, mut attempts) = tokio::sync::mpsc::channel(1);

    let liquidator = Liquidator::new(
        catalog.clone(),
        oracle.clone(),
        LiquidatorContract::new(config.liquidator, sender.clone()),
        sender.clone(),
        MempoolListener::new(&config.ws_url),
        config.liquidation.clone(),
        workdir.clone(),
    );

    tokio::spawn(async move {
        if let Some(request) = attempts.recv().await {
            let result = liquidator.attempt(request).await;

            // Exit code 1 reports a broadcast attempt, 0 a failed send; the
            // operator restarts the process to resume on a fresh view.
            let code = match result {
                Ok(AttemptOutcome::Submitted(_)) => 1,
                Ok(AttemptOutcome::SendFailed) => 0,
                Err(e) => {
                    error!(error = %e, "Liquidation attempt aborted");
                    0
                }
            };
            std::process::exit(code);
        }
    });

    let mut tracker = Tracker::new(oracle, store, subgraph, dispatch, config.tracker.clone());

    info!("Bootstrapping watchlist");
    let candidates = tracker.bootstrap().await?;
    if !candidates.is_empty() {
        artifacts::write_candidates(&workdir, &candidates)?;
        info!(selected = candidates.len(), "Bootstrap candidates recorded");
    }

    info!("Entering tracking loop");
    tracker.run().await
}
