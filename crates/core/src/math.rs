//! Fixed-point helpers for health-factor and pricing arithmetic.
//!
//! Native U256 operations; f64 conversions exist only for display and for
//! the exponential gas bid, never for on-chain amounts.

use alloy::primitives::U256;

/// 1e18, the fixed-point scale of the oracle numeraire and health factor.
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%).
pub const BPS: U256 = U256::from_limbs([10_000u64, 0, 0, 0]);

/// Pre-computed powers of 10 for decimal scaling.
const POW10: [u128; 39] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
    10_000_000_000_000_000_000,
    100_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000,
    1_000_000_000_000_000_000_000_000_000_000_000_000,
    10_000_000_000_000_000_000_000_000_000_000_000_000,
    100_000_000_000_000_000_000_000_000_000_000_000_000,
];

/// Power of 10 lookup; token decimals are at most 36.
#[inline(always)]
pub fn pow10(exp: u8) -> U256 {
    if exp < 39 {
        U256::from(POW10[exp as usize])
    } else {
        U256::from(10u64).pow(U256::from(exp))
    }
}

/// An account is liquidatable at or below the 1e18 boundary.
#[inline(always)]
pub fn is_liquidatable(health_factor: U256) -> bool {
    health_factor <= WAD
}

/// Convert a WAD value to f64. Display and gas-bid use only.
#[inline(always)]
pub fn wad_to_f64(wad: U256) -> f64 {
    if wad <= U256::from(u128::MAX) {
        let value: u128 = wad.to();
        value as f64 / 1e18
    } else {
        let limbs = wad.as_limbs();
        let high = limbs[1] as f64 * (u64::MAX as f64 + 1.0);
        let low = limbs[0] as f64;
        (high + low) / 1e18
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pow10_lookup() {
        assert_eq!(pow10(0), U256::from(1u64));
        assert_eq!(pow10(6), U256::from(1_000_000u64));
        assert_eq!(pow10(18), WAD);
    }

    #[test]
    fn liquidation_boundary_is_inclusive() {
        assert!(is_liquidatable(WAD));
        assert!(is_liquidatable(WAD - U256::from(1u64)));
        assert!(!is_liquidatable(WAD + U256::from(1u64)));
    }

    #[test]
    fn wad_conversion() {
        let wad = U256::from(1500u64) * WAD / U256::from(1000u64);
        assert!((wad_to_f64(wad) - 1.5).abs() < 1e-12);
        assert_eq!(wad_to_f64(U256::ZERO), 0.0);
    }
}
