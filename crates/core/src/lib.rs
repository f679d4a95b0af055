//! Core control loop of the liquidation agent.
//!
//! This crate provides:
//! - Configuration loading (TOML deployment file + environment)
//! - Fixed-point math helpers for health-factor arithmetic
//! - The tracker: bounded risk-ranked watchlist and per-account state machine
//! - The planner: leg selection, repay sizing, reward estimate, gas bidding
//! - The mempool watchdog that out-bids competing liquidators
//! - Liquidation execution and sidecar artifact writers

pub mod artifacts;
mod config;
mod liquidator;
pub mod math;
pub mod planner;
mod tracker;
pub mod watchdog;

pub use config::{AgentConfig, LiquidationSettings, TrackerSettings};
pub use liquidator::{AttemptOutcome, Liquidator};
pub use planner::{LiquidationPlan, MarketPosition};
pub use tracker::{
    CandidateReport, EntryState, LiquidationRequest, TickReport, TrackedEntry, Tracker,
};
pub use watchdog::{bump_gas_price, Assessment, GasWar, WatchdogOutcome};
