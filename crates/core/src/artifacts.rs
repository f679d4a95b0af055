//! Sidecar diagnostic files written to the working directory.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::planner::LiquidationPlan;
use crate::tracker::CandidateReport;
use liquidator_chain::Market;

/// Bootstrap candidate selection.
pub const CANDIDATE_DUMP: &str = "dump.json";
/// Market catalog snapshot.
pub const MARKET_DUMP: &str = "dump-markets.json";
/// One file per liquidation attempt, named by unix milliseconds.
pub const ATTEMPT_DIR: &str = "liquidations";

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

/// Write the top-K candidates selected at bootstrap.
pub fn write_candidates(dir: &Path, candidates: &[CandidateReport]) -> Result<()> {
    write_json(&dir.join(CANDIDATE_DUMP), &candidates)
}

/// Write the current market catalog.
pub fn write_markets(dir: &Path, markets: &[Market]) -> Result<()> {
    write_json(&dir.join(MARKET_DUMP), &markets)
}

/// Record an attempt's plan before submission. Returns the file path.
pub fn write_attempt(dir: &Path, plan: &LiquidationPlan) -> Result<PathBuf> {
    let attempts = dir.join(ATTEMPT_DIR);
    std::fs::create_dir_all(&attempts)
        .with_context(|| format!("failed to create {}", attempts.display()))?;

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis();
    let path = attempts.join(format!("{millis}.json"));
    write_json(&path, plan)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("liquidator-artifacts-{label}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn candidate_dump_round_trip() {
        let dir = temp_dir("candidates");
        let candidates = vec![CandidateReport {
            address: "0xaa".into(),
            health_factor: 1.004,
            total_debt: 12.5,
            total_collateral: 20.0,
        }];

        write_candidates(&dir, &candidates).unwrap();

        let raw = std::fs::read_to_string(dir.join(CANDIDATE_DUMP)).unwrap();
        assert!(raw.contains("1.004"));
        assert!(raw.contains("0xaa"));
    }

    #[test]
    fn attempt_file_lands_in_directory() {
        let dir = temp_dir("attempts");
        let plan = LiquidationPlan {
            borrower: Address::repeat_byte(1),
            debt_asset: Address::repeat_byte(2),
            debt_symbol: "USDC".into(),
            debt_a_token: Address::repeat_byte(3),
            collateral_asset: Address::repeat_byte(4),
            collateral_symbol: "WETH".into(),
            collateral_a_token: Address::repeat_byte(5),
            repay_amount: U256::from(500u64),
            swap_fee: 3000,
            gas_price_wei: 29_000_000_000,
            estimated_reward: U256::from(537u64),
            debt_value: 0.0005,
        };

        let path = write_attempt(&dir, &plan).unwrap();

        assert!(path.starts_with(dir.join(ATTEMPT_DIR)));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("USDC"));
        assert!(raw.contains("3000"));
    }
}
