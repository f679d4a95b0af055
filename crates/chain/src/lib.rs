//! Chain interaction layer for the liquidation agent.
//!
//! This crate provides:
//! - Typed Alloy contract bindings for the lending pool, protocol data
//!   provider, price oracle and on-chain liquidator wrapper
//! - The market catalog (cached, refresh-on-demand reserve parameters)
//! - Single-call account reads behind the [`AccountReader`] seam
//! - Transaction signing with a locally cached nonce, built for same-nonce
//!   gas bump rebroadcasts
//! - The pending-transaction WebSocket stream used by the mempool watchdog

mod accounts;
mod contracts;
mod markets;
mod mempool;
mod sender;

pub use accounts::{AccountReader, AccountSummary, PoolAccountOracle, PositionLeg};
pub use contracts::LiquidatorContract;
pub use markets::{Market, MarketCatalog};
pub use mempool::{MempoolListener, PendingTx};
pub use sender::{NonceManager, SubmittedTx, TransactionSender};
