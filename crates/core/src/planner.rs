//! Liquidation planning: leg selection, repay sizing, reward estimation,
//! gas bidding and swap-fee classification.
//!
//! All selection arithmetic is pure over a snapshot of markets and position
//! legs, so the choices are deterministic and order-independent.

use alloy::primitives::{Address, U256};
use serde::Serialize;
use std::collections::HashSet;

use crate::math::{pow10, wad_to_f64, BPS};
use liquidator_chain::{Market, PositionLeg};

/// Base coefficient of the exponential gas bid.
const GAS_BID_BASE: f64 = 29.9895;
/// Exponent slope of the gas bid per numeraire unit of repaid debt.
const GAS_BID_SLOPE: f64 = 3.50691;
/// Hard cap on the gas bid, in gwei.
const GAS_BID_CAP_GWEI: u64 = 10_000;

/// Uniswap fee tiers consumed by the on-chain wrapper.
const FEE_STABLE_PAIR: u32 = 500;
const FEE_DEFAULT: u32 = 3_000;
const FEE_EXOTIC: u32 = 10_000;

/// One market joined with the borrower's balances in it.
#[derive(Debug, Clone)]
pub struct MarketPosition {
    pub market: Market,
    pub leg: PositionLeg,
}

/// A fully sized liquidation, ready for submission.
#[derive(Debug, Clone, Serialize)]
pub struct LiquidationPlan {
    pub borrower: Address,
    pub debt_asset: Address,
    pub debt_symbol: String,
    pub debt_a_token: Address,
    pub collateral_asset: Address,
    pub collateral_symbol: String,
    pub collateral_a_token: Address,
    /// Amount of variable debt repaid; half the outstanding debt, the
    /// protocol's close factor.
    pub repay_amount: U256,
    pub swap_fee: u32,
    pub gas_price_wei: u128,
    /// Collateral-token units expected from the bonus. Diagnostic only, the
    /// on-chain accounting is authoritative.
    pub estimated_reward: U256,
    /// Value of the repaid debt in the numeraire, for the log line.
    pub debt_value: f64,
}

/// Pick the market where the borrower owes the most, by
/// `variable_debt * price / 10^decimals`. Ties break to the
/// lexicographically smallest asset address.
pub fn select_debt_market(positions: &[MarketPosition]) -> Option<&MarketPosition> {
    select_max(positions, |p| {
        p.leg.variable_debt * p.market.price / pow10(p.market.decimals)
    })
}

/// Pick the market with the most bonus-weighted collateral, by
/// `a_token_balance * price * liquidation_bonus / 10^decimals`.
/// Same tie-break as the debt leg.
pub fn select_collateral_market(positions: &[MarketPosition]) -> Option<&MarketPosition> {
    select_max(positions, |p| {
        p.leg.a_token_balance * p.market.price * U256::from(p.market.liquidation_bonus_bps)
            / pow10(p.market.decimals)
    })
}

fn select_max<F>(positions: &[MarketPosition], score: F) -> Option<&MarketPosition>
where
    F: Fn(&MarketPosition) -> U256,
{
    let mut best: Option<(&MarketPosition, U256)> = None;

    for position in positions {
        let value = score(position);
        if value.is_zero() {
            continue;
        }
        best = match best {
            None => Some((position, value)),
            Some((current, current_value)) => {
                if value > current_value
                    || (value == current_value && position.market.asset < current.market.asset)
                {
                    Some((position, value))
                } else {
                    Some((current, current_value))
                }
            }
        };
    }

    best.map(|(position, _)| position)
}

/// Half the outstanding variable debt, rounded down: the 50% close factor.
pub fn size_repay(variable_debt: U256) -> U256 {
    variable_debt / U256::from(2u64)
}

/// Closed-form bonus estimate in collateral-token units:
/// `repay * price(debt) * 10^dec(coll) / 10^dec(debt) / price(coll) * bonus / 10000`.
pub fn estimate_reward(repay_amount: U256, debt: &Market, collateral: &Market) -> U256 {
    if collateral.price.is_zero() {
        return U256::ZERO;
    }
    repay_amount * debt.price * pow10(collateral.decimals)
        / pow10(debt.decimals)
        / collateral.price
        * U256::from(collateral.liquidation_bonus_bps)
        / BPS
}

/// Value of the repaid debt in 1e18 numeraire units.
pub fn repay_value_wad(repay_amount: U256, debt: &Market) -> U256 {
    repay_amount * debt.price / pow10(debt.decimals)
}

/// Exponential gas bid: `min(10000, floor(29.9895 * e^(3.50691 * debt_eth)))`
/// gwei. Scales aggressively with opportunity size; the constants are fixed
/// so bidding behavior is reproducible across deployments.
pub fn opportunity_gas_gwei(debt_eth: f64) -> u64 {
    let bid = (GAS_BID_BASE * (GAS_BID_SLOPE * debt_eth).exp()).floor();
    if bid >= GAS_BID_CAP_GWEI as f64 {
        GAS_BID_CAP_GWEI
    } else {
        bid as u64
    }
}

/// Gas bid in wei.
pub fn opportunity_gas_wei(debt_eth: f64) -> u128 {
    opportunity_gas_gwei(debt_eth) as u128 * 1_000_000_000
}

/// Classify the aToken pair into a Uniswap fee tier: stable pairs route
/// through the tight 0.05% pool, anything touching an exotic token through
/// the 1% pool, everything else through 0.3%.
pub fn swap_fee_tier(
    debt_a_token: Address,
    collateral_a_token: Address,
    stable: &HashSet<Address>,
    exotic: &HashSet<Address>,
) -> u32 {
    if stable.contains(&debt_a_token) && stable.contains(&collateral_a_token) {
        FEE_STABLE_PAIR
    } else if exotic.contains(&debt_a_token) || exotic.contains(&collateral_a_token) {
        FEE_EXOTIC
    } else {
        FEE_DEFAULT
    }
}

/// Build the full plan for one borrower from a position snapshot, or `None`
/// when no leg carries variable debt or bonus-weighted collateral.
pub fn build_plan(
    borrower: Address,
    positions: &[MarketPosition],
    stable: &HashSet<Address>,
    exotic: &HashSet<Address>,
) -> Option<LiquidationPlan> {
    let debt = select_debt_market(positions)?;
    let collateral = select_collateral_market(positions)?;

    let repay_amount = size_repay(debt.leg.variable_debt);
    let estimated_reward = estimate_reward(repay_amount, &debt.market, &collateral.market);
    let debt_value = wad_to_f64(repay_value_wad(repay_amount, &debt.market));
    let gas_price_wei = opportunity_gas_wei(debt_value);
    let swap_fee = swap_fee_tier(
        debt.market.a_token,
        collateral.market.a_token,
        stable,
        exotic,
    );

    Some(LiquidationPlan {
        borrower,
        debt_asset: debt.market.asset,
        debt_symbol: debt.market.symbol.clone(),
        debt_a_token: debt.market.a_token,
        collateral_asset: collateral.market.asset,
        collateral_symbol: collateral.market.symbol.clone(),
        collateral_a_token: collateral.market.a_token,
        repay_amount,
        swap_fee,
        gas_price_wei,
        estimated_reward,
        debt_value,
    })
}
