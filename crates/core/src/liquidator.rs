//! Liquidation execution.
//!
//! Takes a dispatched borrower, re-reads market data, sizes the repay,
//! submits through the on-chain wrapper and hands the race to the mempool
//! watchdog. Exactly one attempt per process run; the operator restarts on
//! a fresh view afterwards.

use alloy::primitives::Address;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::artifacts;
use crate::config::LiquidationSettings;
use crate::math::wad_to_f64;
use crate::planner::{self, MarketPosition};
use crate::tracker::LiquidationRequest;
use crate::watchdog::{run_watchdog, WatchdogOutcome};
use liquidator_chain::{
    AccountReader, LiquidatorContract, Market, MarketCatalog, MempoolListener, TransactionSender,
};

/// Terminal result of one attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The liquidation call never reached the chain.
    SendFailed,
    /// The call was broadcast; the watchdog saw the race to its end.
    Submitted(WatchdogOutcome),
}

/// Executes liquidation attempts against the on-chain wrapper.
pub struct Liquidator {
    catalog: Arc<MarketCatalog>,
    oracle: Arc<dyn AccountReader>,
    contract: LiquidatorContract,
    sender: Arc<TransactionSender>,
    mempool: MempoolListener,
    settings: LiquidationSettings,
    workdir: PathBuf,
}

impl Liquidator {
    pub fn new(
        catalog: Arc<MarketCatalog>,
        oracle: Arc<dyn AccountReader>,
        contract: LiquidatorContract,
        sender: Arc<TransactionSender>,
        mempool: MempoolListener,
        settings: LiquidationSettings,
        workdir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            oracle,
            contract,
            sender,
            mempool,
            settings,
            workdir,
        }
    }

    /// Run one liquidation attempt end to end.
    pub async fn attempt(&self, request: LiquidationRequest) -> Result<AttemptOutcome> {
        let borrower = request.borrower;
        let tag = format!("liquidation#{borrower:#x}");
        let started = Instant::now();

        info!(
            attempt = %tag,
            hf = wad_to_f64(request.health_factor),
            "Starting liquidation attempt"
        );

        // Prices move between the tracker's observation and now; the catalog
        // must be re-read before any write transaction.
        self.catalog
            .refresh()
            .await
            .context("market catalog refresh failed")?;
        let markets = self.catalog.snapshot();

        let positions = collect_positions(self.oracle.as_ref(), markets, borrower).await;
        let plan = planner::build_plan(
            borrower,
            &positions,
            &self.settings.stable_a_tokens,
            &self.settings.exotic_a_tokens,
        )
        .context("no viable debt or collateral leg for borrower")?;

        info!(
            attempt = %tag,
            debt = %plan.debt_symbol,
            collateral = %plan.collateral_symbol,
            repay = %plan.repay_amount,
            debt_value = plan.debt_value,
            reward = %plan.estimated_reward,
            gas_gwei = plan.gas_price_wei / 1_000_000_000,
            swap_fee = plan.swap_fee,
            "Plan selected"
        );

        match artifacts::write_attempt(&self.workdir, &plan) {
            Ok(path) => info!(attempt = %tag, path = %path.display(), "Attempt plan recorded"),
            Err(e) => warn!(attempt = %tag, error = %e, "Failed to record attempt plan"),
        }

        let submitted = match self
            .contract
            .liquidate(
                borrower,
                plan.debt_a_token,
                plan.collateral_a_token,
                plan.repay_amount,
                plan.swap_fee,
                plan.gas_price_wei,
                self.settings.gas_limit,
            )
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    attempt = %tag,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis(),
                    "Liquidation send failed"
                );
                return Ok(AttemptOutcome::SendFailed);
            }
        };

        info!(attempt = %tag, tx_hash = %submitted.hash, "Liquidation broadcast, watchdog engaged");

        let outcome = run_watchdog(
            &self.mempool,
            &self.sender,
            borrower,
            submitted,
            self.settings.watchdog_timeout,
        )
        .await?;

        info!(
            attempt = %tag,
            outcome = ?outcome,
            elapsed_ms = started.elapsed().as_millis(),
            "Liquidation attempt finished"
        );

        Ok(AttemptOutcome::Submitted(outcome))
    }
}

/// Join every market with the borrower's balances in it. Legs that fail to
/// read are skipped; the planner works on what is available.
async fn collect_positions(
    oracle: &dyn AccountReader,
    markets: Vec<Market>,
    borrower: Address,
) -> Vec<MarketPosition> {
    let width = markets.len().max(1);
    stream::iter(markets)
        .map(|market| async move {
            let leg = oracle.position_leg(market.asset, borrower).await;
            leg.map(|leg| MarketPosition { market, leg })
        })
        .buffer_unordered(width)
        .filter_map(|position| async move { position })
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;
    use alloy::primitives::U256;
    use liquidator_chain::{AccountSummary, PositionLeg};
    use std::collections::HashMap;

    struct LegOracle {
        legs: HashMap<Address, PositionLeg>,
    }

    #[async_trait::async_trait]
    impl AccountReader for LegOracle {
        async fn account_summary(&self, _user: Address) -> Option<AccountSummary> {
            None
        }

        async fn position_leg(&self, asset: Address, _user: Address) -> Option<PositionLeg> {
            self.legs.get(&asset).cloned()
        }
    }

    fn market(asset_byte: u8, symbol: &str) -> Market {
        Market {
            asset: Address::repeat_byte(asset_byte),
            symbol: symbol.to_string(),
            decimals: 18,
            liquidation_threshold_bps: 8000,
            liquidation_bonus_bps: 10_500,
            a_token: Address::repeat_byte(asset_byte + 1),
            variable_debt_token: Address::repeat_byte(asset_byte + 2),
            price: WAD,
            variable_debt_index: WAD,
        }
    }

    #[tokio::test]
    async fn failed_legs_are_skipped() {
        let m1 = market(0x10, "WETH");
        let m2 = market(0x20, "USDC");
        let oracle = LegOracle {
            // Only the first market has a readable leg.
            legs: HashMap::from([(
                m1.asset,
                PositionLeg {
                    a_token_balance: U256::from(5u64),
                    stable_debt: U256::ZERO,
                    variable_debt: U256::from(9u64),
                    used_as_collateral: true,
                },
            )]),
        };

        let positions =
            collect_positions(&oracle, vec![m1.clone(), m2], Address::repeat_byte(0xAA)).await;

        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].market.asset, m1.asset);
        assert_eq!(positions[0].leg.variable_debt, U256::from(9u64));
    }
}
