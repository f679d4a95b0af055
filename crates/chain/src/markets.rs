//! Market catalog: a typed, cached view over every reserve of the pool.
//!
//! The catalog performs no arithmetic. Prices are captured per market, not
//! atomically across markets; callers that need freshness re-run
//! [`MarketCatalog::refresh`] before acting, which the liquidator does at
//! the top of every attempt.

use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::contracts::{ILendingPool, IPriceOracle, IProtocolDataProvider};

/// Per-reserve fetch fan-out width during a catalog load.
const LOAD_CONCURRENCY: usize = 10;

/// Static and priced parameters of one reserve.
#[derive(Debug, Clone, Serialize)]
pub struct Market {
    pub asset: Address,
    pub symbol: String,
    pub decimals: u8,
    /// Liquidation threshold in basis points, at most 10000.
    pub liquidation_threshold_bps: u64,
    /// Liquidation bonus as a multiplier in basis points; 10750 = 7.5% bonus.
    pub liquidation_bonus_bps: u64,
    pub a_token: Address,
    pub variable_debt_token: Address,
    /// Price in 1e18 units of the oracle numeraire.
    pub price: U256,
    /// Normalized variable debt index.
    pub variable_debt_index: U256,
}

/// Read-through cache over the protocol data provider and price oracle.
pub struct MarketCatalog {
    rpc_url: String,
    pool: Address,
    data_provider: Address,
    price_oracle: Address,
    cache: RwLock<Vec<Market>>,
}

impl MarketCatalog {
    pub fn new(
        rpc_url: impl Into<String>,
        pool: Address,
        data_provider: Address,
        price_oracle: Address,
    ) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            pool,
            data_provider,
            price_oracle,
            cache: RwLock::new(Vec::new()),
        }
    }

    /// Enumerate every reserve and fetch its configuration, token addresses,
    /// current price and variable debt index. Any single failed RPC fails the
    /// whole load; the previous cache is left intact so the caller may decide
    /// to keep working with stale data.
    pub async fn load_all(&self) -> Result<Vec<Market>> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let data_provider = IProtocolDataProvider::new(self.data_provider, &provider);

        let reserves = data_provider
            .getAllReservesTokens()
            .call()
            .await
            .context("upstream unavailable: getAllReservesTokens")?
            ._0;

        let markets: Vec<Result<Market>> = stream::iter(reserves)
            .map(|reserve| {
                let provider = &provider;
                async move {
                    let data_provider = IProtocolDataProvider::new(self.data_provider, provider);
                    let oracle = IPriceOracle::new(self.price_oracle, provider);
                    let pool = ILendingPool::new(self.pool, provider);
                    let asset = reserve.tokenAddress;

                    let config = data_provider
                        .getReserveConfigurationData(asset)
                        .call()
                        .await
                        .context("upstream unavailable: getReserveConfigurationData")?;
                    let tokens = data_provider
                        .getReserveTokensAddresses(asset)
                        .call()
                        .await
                        .context("upstream unavailable: getReserveTokensAddresses")?;
                    let price = oracle
                        .getAssetPrice(asset)
                        .call()
                        .await
                        .context("upstream unavailable: getAssetPrice")?
                        ._0;
                    let index = pool
                        .getReserveNormalizedVariableDebt(asset)
                        .call()
                        .await
                        .context("upstream unavailable: getReserveNormalizedVariableDebt")?
                        ._0;

                    Ok(Market {
                        asset,
                        symbol: reserve.symbol,
                        decimals: config.decimals.to::<u8>(),
                        liquidation_threshold_bps: config.liquidationThreshold.to::<u64>(),
                        liquidation_bonus_bps: config.liquidationBonus.to::<u64>(),
                        a_token: tokens.aTokenAddress,
                        variable_debt_token: tokens.variableDebtTokenAddress,
                        price,
                        variable_debt_index: index,
                    })
                }
            })
            .buffer_unordered(LOAD_CONCURRENCY)
            .collect()
            .await;

        let markets: Vec<Market> = markets.into_iter().collect::<Result<_>>()?;

        for market in &markets {
            if market.liquidation_threshold_bps > 10_000 {
                warn!(symbol = %market.symbol, lt_bps = market.liquidation_threshold_bps, "Reserve reports liquidation threshold above 100%");
            }
            if market.liquidation_bonus_bps != 0 && market.liquidation_bonus_bps < 10_000 {
                warn!(symbol = %market.symbol, bonus_bps = market.liquidation_bonus_bps, "Reserve reports liquidation bonus below par");
            }
        }

        info!(markets = markets.len(), "Market catalog loaded");
        Ok(markets)
    }

    /// Reload every market and replace the cache.
    pub async fn refresh(&self) -> Result<()> {
        let markets = self.load_all().await?;
        *self.cache.write() = markets;
        Ok(())
    }

    /// Clone of the cached markets.
    pub fn snapshot(&self) -> Vec<Market> {
        self.cache.read().clone()
    }

    /// Number of cached markets.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Replace the cache directly. Used by tests and dry runs.
    pub fn install(&self, markets: Vec<Market>) {
        *self.cache.write() = markets;
    }
}
