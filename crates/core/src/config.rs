//! Agent configuration.
//!
//! A TOML deployment file carries the chain-specific surface (contract
//! addresses, tracker tuning, swap-fee allow-lists) with `${VAR}` expansion
//! for values that live in the environment. Secrets are environment-only.
//! Missing values are fatal at startup, with the offending variable named.

use alloy::primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::math::{BPS, WAD};

/// Environment variable selecting the config file path.
const CONFIG_FILE_ENV: &str = "CONFIG_FILE";
/// Default config file path.
const DEFAULT_CONFIG_FILE: &str = "config/polygon.toml";
/// Environment variable for the submitter private key (never in the file).
const PRIVATE_KEY_ENV: &str = "PRIVATE_KEY";

#[derive(Debug, Deserialize)]
struct RawConfig {
    chain: RawChain,
    contracts: RawContracts,
    subgraph: RawSubgraph,
    store: RawStore,
    #[serde(default)]
    tracker: RawTracker,
    #[serde(default)]
    liquidation: RawLiquidation,
}

#[derive(Debug, Deserialize)]
struct RawChain {
    #[serde(default = "default_chain_id")]
    chain_id: u64,
    rpc_url: String,
    ws_url: String,
}

fn default_chain_id() -> u64 {
    137
}

#[derive(Debug, Deserialize)]
struct RawContracts {
    lending_pool: String,
    data_provider: String,
    price_oracle: String,
    liquidator: String,
}

#[derive(Debug, Deserialize)]
struct RawSubgraph {
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawStore {
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawTracker {
    #[serde(default = "default_max_tracked")]
    max_tracked: usize,
    /// Hysteresis bound in basis points of the health factor; entries above
    /// it are untracked. 10100 = 1.01.
    #[serde(default = "default_untrack_hf_bps")]
    untrack_hf_bps: u64,
    /// Dust floor on total debt, in wei of the numeraire.
    #[serde(default = "default_min_debt_wei")]
    min_debt_wei: u64,
    #[serde(default = "default_bootstrap_concurrency")]
    bootstrap_concurrency: usize,
    #[serde(default)]
    pause_ms: u64,
}

fn default_max_tracked() -> usize {
    200
}
fn default_untrack_hf_bps() -> u64 {
    10_100
}
fn default_min_debt_wei() -> u64 {
    100_000_000_000_000
}
fn default_bootstrap_concurrency() -> usize {
    500
}

impl Default for RawTracker {
    fn default() -> Self {
        Self {
            max_tracked: default_max_tracked(),
            untrack_hf_bps: default_untrack_hf_bps(),
            min_debt_wei: default_min_debt_wei(),
            bootstrap_concurrency: default_bootstrap_concurrency(),
            pause_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLiquidation {
    #[serde(default = "default_gas_limit")]
    gas_limit: u64,
    #[serde(default = "default_watchdog_timeout_secs")]
    watchdog_timeout_secs: u64,
    #[serde(default)]
    stable_a_tokens: Vec<String>,
    #[serde(default)]
    exotic_a_tokens: Vec<String>,
}

fn default_gas_limit() -> u64 {
    28_000_000
}
fn default_watchdog_timeout_secs() -> u64 {
    30
}

impl Default for RawLiquidation {
    fn default() -> Self {
        Self {
            gas_limit: default_gas_limit(),
            watchdog_timeout_secs: default_watchdog_timeout_secs(),
            stable_a_tokens: Vec::new(),
            exotic_a_tokens: Vec::new(),
        }
    }
}

/// Tracker tuning.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Bound K on the tracked set.
    pub max_tracked: usize,
    /// Entries with a health factor above this are untracked.
    pub untrack_health_factor: U256,
    /// Accounts with less total debt than this are never tracked.
    pub min_debt: U256,
    /// Fan-out width for the bootstrap summary sweep.
    pub bootstrap_concurrency: usize,
    /// Pause between iterations; zero by default, the loop is latency-critical.
    pub pause: Duration,
}

/// Liquidation execution tuning.
#[derive(Debug, Clone)]
pub struct LiquidationSettings {
    pub gas_limit: u64,
    pub watchdog_timeout: Duration,
    /// aTokens treated as stablecoins for the swap-fee tier.
    pub stable_a_tokens: HashSet<Address>,
    /// aTokens with thin liquidity, forcing the highest swap-fee tier.
    pub exotic_a_tokens: HashSet<Address>,
}

/// Fully resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub ws_url: String,
    pub private_key: String,
    pub lending_pool: Address,
    pub data_provider: Address,
    pub price_oracle: Address,
    pub liquidator: Address,
    pub subgraph_url: String,
    pub store_url: String,
    pub tracker: TrackerSettings,
    pub liquidation: LiquidationSettings,
}

impl AgentConfig {
    /// Load from `$CONFIG_FILE` (default `config/polygon.toml`) plus the
    /// environment.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let private_key = std::env::var(PRIVATE_KEY_ENV)
            .map_err(|_| anyhow::anyhow!("missing env var: {PRIVATE_KEY_ENV}"))?;
        Self::parse(&content, private_key)
    }

    fn parse(content: &str, private_key: String) -> Result<Self> {
        let expanded = expand_env(content)?;
        let raw: RawConfig = toml::from_str(&expanded).context("malformed config file")?;

        let parse_addr = |s: &str, field: &str| -> Result<Address> {
            s.parse()
                .with_context(|| format!("invalid address for {field}: {s}"))
        };

        let parse_addr_set = |items: &[String], field: &str| -> Result<HashSet<Address>> {
            items.iter().map(|s| parse_addr(s, field)).collect()
        };

        Ok(Self {
            chain_id: raw.chain.chain_id,
            rpc_url: raw.chain.rpc_url,
            ws_url: raw.chain.ws_url,
            private_key,
            lending_pool: parse_addr(&raw.contracts.lending_pool, "contracts.lending_pool")?,
            data_provider: parse_addr(&raw.contracts.data_provider, "contracts.data_provider")?,
            price_oracle: parse_addr(&raw.contracts.price_oracle, "contracts.price_oracle")?,
            liquidator: parse_addr(&raw.contracts.liquidator, "contracts.liquidator")?,
            subgraph_url: raw.subgraph.url,
            store_url: raw.store.url,
            tracker: TrackerSettings {
                max_tracked: raw.tracker.max_tracked,
                untrack_health_factor: WAD * U256::from(raw.tracker.untrack_hf_bps) / BPS,
                min_debt: U256::from(raw.tracker.min_debt_wei),
                bootstrap_concurrency: raw.tracker.bootstrap_concurrency,
                pause: Duration::from_millis(raw.tracker.pause_ms),
            },
            liquidation: LiquidationSettings {
                gas_limit: raw.liquidation.gas_limit,
                watchdog_timeout: Duration::from_secs(raw.liquidation.watchdog_timeout_secs),
                stable_a_tokens: parse_addr_set(
                    &raw.liquidation.stable_a_tokens,
                    "liquidation.stable_a_tokens",
                )?,
                exotic_a_tokens: parse_addr_set(
                    &raw.liquidation.exotic_a_tokens,
                    "liquidation.exotic_a_tokens",
                )?,
            },
        })
    }
}

/// Expand `${VAR_NAME}` patterns from the environment. A referenced but
/// unset variable is a configuration error, not a silent passthrough.
fn expand_env(s: &str) -> Result<String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    let mut result = s.to_string();

    for cap in re.captures_iter(s) {
        let (Some(full), Some(var)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let name = var.as_str();
        match std::env::var(name) {
            Ok(value) => result = result.replace(full.as_str(), &value),
            Err(_) => bail!("missing env var: {name}"),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[chain]
chain_id = 137
rpc_url = "${LIQ_TEST_RPC}"
ws_url = "wss://example.invalid/ws"

[contracts]
lending_pool = "0x8dff5e27ea6b7ac08ebfdf9eb090f32ee9a30fcf"
data_provider = "0x7551b5d2763519d4e37e8b81929d336de671d46d"
price_oracle = "0x0229f777b0fab107f9591a41d5f02e4e98db6f2d"
liquidator = "0x0000000000000000000000000000000000000099"

[subgraph]
url = "https://api.thegraph.com/subgraphs/name/aave/aave-v2-matic"

[store]
url = "redis://127.0.0.1/"

[liquidation]
stable_a_tokens = ["0x1a13f4ca1d028320a707d99520abfefca3998b7f"]
exotic_a_tokens = ["0x080b5bf8f360f624628e0fb961f4e67c9e3c7cf1"]
"#;

    #[test]
    fn expansion_resolves_set_vars() {
        std::env::set_var("LIQ_EXPAND_TEST", "expanded");
        assert_eq!(
            expand_env("a ${LIQ_EXPAND_TEST} b").unwrap(),
            "a expanded b"
        );
        assert_eq!(expand_env("no vars").unwrap(), "no vars");
        std::env::remove_var("LIQ_EXPAND_TEST");
    }

    #[test]
    fn expansion_fails_on_missing_var() {
        let err = expand_env("${LIQ_DEFINITELY_UNSET_VAR}").unwrap_err();
        assert!(err.to_string().contains("LIQ_DEFINITELY_UNSET_VAR"));
    }

    #[test]
    fn parse_sample_config() {
        std::env::set_var("LIQ_TEST_RPC", "https://polygon-rpc.com");
        let config = AgentConfig::parse(SAMPLE, "0xkey".to_string()).unwrap();
        std::env::remove_var("LIQ_TEST_RPC");

        assert_eq!(config.chain_id, 137);
        assert_eq!(config.rpc_url, "https://polygon-rpc.com");
        assert_eq!(config.tracker.max_tracked, 200);
        assert_eq!(config.liquidation.gas_limit, 28_000_000);
        assert_eq!(config.liquidation.watchdog_timeout, Duration::from_secs(30));
        assert_eq!(config.liquidation.stable_a_tokens.len(), 1);
        assert_eq!(config.liquidation.exotic_a_tokens.len(), 1);

        // 1.01e18 exactly, expressed in basis points to avoid float drift.
        assert_eq!(
            config.tracker.untrack_health_factor,
            U256::from(1_010_000_000_000_000_000u128)
        );
        assert_eq!(config.tracker.min_debt, U256::from(100_000_000_000_000u64));
    }
}
