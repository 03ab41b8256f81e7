//! Health factor: how far a position is from liquidation.
//!
//! `HF = (collateral_usd * LIQUIDATION_THRESHOLD / LIQUIDATION_PRECISION) * PRECISION / debt`
//!
//! The two divisions run in exactly that order; changing it changes rounding.
//! A position without debt has `U256::MAX` and can never be liquidated.

use alloy::primitives::U256;

use pegvault_common::error::EngineError;

use crate::constants::{LIQUIDATION_PRECISION, LIQUIDATION_THRESHOLD, MIN_HEALTH_FACTOR, PRECISION};
use crate::ledger::Position;
use crate::valuation::PriceSnapshot;

pub fn calculate_health_factor(
    total_dsc_minted: U256,
    collateral_value_usd: U256,
) -> Result<U256, EngineError> {
    if total_dsc_minted.is_zero() {
        return Ok(U256::MAX);
    }
    let adjusted = collateral_value_usd
        .checked_mul(LIQUIDATION_THRESHOLD)
        .ok_or(EngineError::ArithmeticOverflow)?
        / LIQUIDATION_PRECISION;
    Ok(adjusted
        .checked_mul(PRECISION)
        .ok_or(EngineError::ArithmeticOverflow)?
        / total_dsc_minted)
}

/// Health factor of `position` at the snapshot's prices.
///
/// Collateral is valued even without debt, so an unusable feed fails the
/// check for every position.
pub fn health_factor(prices: &mut PriceSnapshot<'_>, position: &Position) -> Result<U256, EngineError> {
    let collateral_value_usd = prices.account_collateral_value(position)?;
    calculate_health_factor(position.debt_minted(), collateral_value_usd)
}

pub fn ensure_healthy(health_factor: U256) -> Result<(), EngineError> {
    if health_factor < MIN_HEALTH_FACTOR {
        return Err(EngineError::BreaksHealthFactor(health_factor));
    }
    Ok(())
}

pub fn ensure_liquidatable(health_factor: U256) -> Result<(), EngineError> {
    if health_factor >= MIN_HEALTH_FACTOR {
        return Err(EngineError::HealthFactorOk(health_factor));
    }
    Ok(())
}

pub fn ensure_improved(before: U256, after: U256) -> Result<(), EngineError> {
    if after <= before {
        return Err(EngineError::HealthFactorNotImproved { before, after });
    }
    Ok(())
}
