//! Typed contract bindings for the Aave v2 deployment and the on-chain
//! liquidator wrapper. Uses Alloy `sol!` macros for type-safe calls.

use alloy::primitives::{aliases::U24, Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::sender::{SubmittedTx, TransactionSender};

sol! {
    /// Reserve listing entry from the protocol data provider.
    #[derive(Debug)]
    struct TokenData {
        string symbol;
        address tokenAddress;
    }

    #[sol(rpc)]
    interface ILendingPool {
        function getUserAccountData(address user) external view returns (
            uint256 totalCollateralETH,
            uint256 totalDebtETH,
            uint256 availableBorrowsETH,
            uint256 currentLiquidationThreshold,
            uint256 ltv,
            uint256 healthFactor
        );

        function getReserveNormalizedVariableDebt(address asset) external view returns (uint256);
    }

    #[sol(rpc)]
    interface IProtocolDataProvider {
        function getAllReservesTokens() external view returns (TokenData[] memory);

        function getReserveConfigurationData(address asset) external view returns (
            uint256 decimals,
            uint256 ltv,
            uint256 liquidationThreshold,
            uint256 liquidationBonus,
            uint256 reserveFactor,
            bool usageAsCollateralEnabled,
            bool borrowingEnabled,
            bool stableBorrowRateEnabled,
            bool isActive,
            bool isFrozen
        );

        function getReserveTokensAddresses(address asset) external view returns (
            address aTokenAddress,
            address stableDebtTokenAddress,
            address variableDebtTokenAddress
        );

        function getUserReserveData(address asset, address user) external view returns (
            uint256 currentATokenBalance,
            uint256 currentStableDebt,
            uint256 currentVariableDebt,
            uint256 principalStableDebt,
            uint256 scaledVariableDebt,
            uint256 stableBorrowRate,
            uint256 liquidityRate,
            uint40 stableRateLastUpdated,
            bool usageAsCollateralEnabled
        );
    }

    #[sol(rpc)]
    interface IPriceOracle {
        function getAssetPrice(address asset) external view returns (uint256);
    }

    /// Flash-loan liquidation wrapper: repays the borrower's variable debt,
    /// seizes discounted collateral, swaps it back and settles the loan in a
    /// single transaction.
    interface ILiquidatorForAave {
        function liquidate(
            address borrower,
            address debtAToken,
            address collateralAToken,
            uint256 repayAmount,
            uint24 swapFee
        ) external;
    }
}

/// Wrapper around the deployed liquidator contract.
///
/// Encodes the liquidation call and submits it through a [`TransactionSender`]
/// with an explicit gas price so the mempool watchdog can later rebroadcast
/// the identical payload at the same nonce.
pub struct LiquidatorContract {
    address: Address,
    sender: Arc<TransactionSender>,
}

impl LiquidatorContract {
    pub fn new(address: Address, sender: Arc<TransactionSender>) -> Self {
        Self { address, sender }
    }

    /// Address of the wrapper contract.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Submit a liquidation call. Returns the submitted transaction parts,
    /// including the allocated nonce, without waiting for confirmation.
    pub async fn liquidate(
        &self,
        borrower: Address,
        debt_a_token: Address,
        collateral_a_token: Address,
        repay_amount: U256,
        swap_fee: u32,
        gas_price_wei: u128,
        gas_limit: u64,
    ) -> Result<SubmittedTx> {
        let call = ILiquidatorForAave::liquidateCall {
            borrower,
            debtAToken: debt_a_token,
            collateralAToken: collateral_a_token,
            repayAmount: repay_amount,
            swapFee: U24::from(swap_fee),
        };
        let calldata = Bytes::from(call.abi_encode());

        info!(
            borrower = %borrower,
            debt_a_token = %debt_a_token,
            collateral_a_token = %collateral_a_token,
            repay = %repay_amount,
            swap_fee = swap_fee,
            gas_price_gwei = gas_price_wei / 1_000_000_000,
            "Submitting liquidation call"
        );

        self.sender
            .submit(self.address, calldata, gas_price_wei, gas_limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidate_calldata_embeds_borrower() {
        let borrower = Address::repeat_byte(0xAB);
        let call = ILiquidatorForAave::liquidateCall {
            borrower,
            debtAToken: Address::repeat_byte(1),
            collateralAToken: Address::repeat_byte(2),
            repayAmount: U256::from(500u64),
            swapFee: U24::from(3000u32),
        };
        let encoded = alloy::primitives::hex::encode(call.abi_encode());

        // Competitor detection scans calldata for the borrower address hex.
        let needle = alloy::primitives::hex::encode(borrower.as_slice());
        assert!(encoded.contains(&needle));
    }
}
