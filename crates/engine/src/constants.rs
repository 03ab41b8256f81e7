//! Fixed risk parameters of the position engine.
//!
//! All ratios are integers; USD values, debt and health factors carry 18
//! decimals.

use alloy::primitives::U256;

pub use pegvault_common::config::DEFAULT_ORACLE_TIMEOUT_SECS;

/// Share of collateral value (in percent) that counts towards solvency.
/// 50 means positions must be 200% overcollateralized.
pub const LIQUIDATION_THRESHOLD: U256 = U256::from_limbs([50, 0, 0, 0]);

/// Bonus (in percent of seized collateral) paid to a liquidator.
pub const LIQUIDATION_BONUS: U256 = U256::from_limbs([10, 0, 0, 0]);

pub const LIQUIDATION_PRECISION: U256 = U256::from_limbs([100, 0, 0, 0]);

/// 18-decimal fixed-point unit.
pub const PRECISION: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Scale from an 8-decimal feed answer to 18 decimals.
pub const ADDITIONAL_FEED_PRECISION: U256 = U256::from_limbs([10_000_000_000, 0, 0, 0]);

/// Health factors below this (1.0) are liquidatable.
pub const MIN_HEALTH_FACTOR: U256 = PRECISION;

/// Decimals every price is normalized to before use.
pub const PRICE_DECIMALS: u8 = 18;
