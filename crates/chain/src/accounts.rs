//! Single-call account reads against the lending pool.
//!
//! All reads are idempotent and retry-free: an RPC failure maps to `None`
//! and the tracker decides what to do with the gap.

use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use async_trait::async_trait;
use tracing::debug;

use crate::contracts::{ILendingPool, IProtocolDataProvider};

/// Aggregate position summary, all values in 1e18 fixed point of the
/// oracle numeraire. `health_factor <= 1e18` marks a liquidatable account.
#[derive(Debug, Clone)]
pub struct AccountSummary {
    pub total_collateral: U256,
    pub total_debt: U256,
    pub available_borrow: U256,
    pub current_liquidation_threshold: U256,
    pub health_factor: U256,
}

/// Per-market balance breakdown for one account.
#[derive(Debug, Clone, Default)]
pub struct PositionLeg {
    pub a_token_balance: U256,
    pub stable_debt: U256,
    pub variable_debt: U256,
    pub used_as_collateral: bool,
}

/// Read-only oracle over a borrower's position.
#[async_trait]
pub trait AccountReader: Send + Sync {
    /// Aggregate summary for one account, or `None` on any upstream failure.
    async fn account_summary(&self, user: Address) -> Option<AccountSummary>;

    /// Balance breakdown for one account in one market, or `None` on failure.
    async fn position_leg(&self, asset: Address, user: Address) -> Option<PositionLeg>;
}

/// [`AccountReader`] backed by LendingPool and ProtocolDataProvider calls.
pub struct PoolAccountOracle {
    rpc_url: String,
    pool: Address,
    data_provider: Address,
}

impl PoolAccountOracle {
    pub fn new(rpc_url: impl Into<String>, pool: Address, data_provider: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            pool,
            data_provider,
        }
    }
}

#[async_trait]
impl AccountReader for PoolAccountOracle {
    async fn account_summary(&self, user: Address) -> Option<AccountSummary> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse().ok()?);
        let pool = ILendingPool::new(self.pool, &provider);

        match pool.getUserAccountData(user).call().await {
            Ok(data) => Some(AccountSummary {
                total_collateral: data.totalCollateralETH,
                total_debt: data.totalDebtETH,
                available_borrow: data.availableBorrowsETH,
                current_liquidation_threshold: data.currentLiquidationThreshold,
                health_factor: data.healthFactor,
            }),
            Err(e) => {
                debug!(user = %user, error = %e, "getUserAccountData failed");
                None
            }
        }
    }

    async fn position_leg(&self, asset: Address, user: Address) -> Option<PositionLeg> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse().ok()?);
        let data_provider = IProtocolDataProvider::new(self.data_provider, &provider);

        match data_provider.getUserReserveData(asset, user).call().await {
            Ok(data) => Some(PositionLeg {
                a_token_balance: data.currentATokenBalance,
                stable_debt: data.currentStableDebt,
                variable_debt: data.currentVariableDebt,
                used_as_collateral: data.usageAsCollateralEnabled,
            }),
            Err(e) => {
                debug!(asset = %asset, user = %user, error = %e, "getUserReserveData failed");
                None
            }
        }
    }
}
