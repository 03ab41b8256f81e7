//! Price feed collaborator and the stale-checking wrapper around it.
//!
//! A feed answers with Chainlink-style round data. The engine only accepts a
//! round that is complete, younger than the configured timeout and strictly
//! positive; everything else aborts the calling action.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{Address, I256, U256};
use thiserror::Error;

use pegvault_common::error::EngineError;

use crate::constants::PRICE_DECIMALS;

/// One round of price data as reported by a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundData {
    pub round_id: u128,
    /// Signed answer with `PriceFeed::decimals()` decimals.
    pub answer: I256,
    pub started_at: u64,
    /// Unix seconds of the last update. Zero means the round never completed.
    pub updated_at: u64,
    pub answered_in_round: u128,
}

/// Failure reported by a feed itself (as opposed to a rejected answer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("Feed unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed round data: {0}")]
    Malformed(String),
}

/// An external price oracle for a single collateral token, quoted in USD.
pub trait PriceFeed: Send + Sync {
    /// Decimals of `RoundData::answer`.
    fn decimals(&self) -> u8;

    /// Pair the feed quotes, e.g. "ETH / USD".
    fn description(&self) -> String {
        String::new()
    }

    fn latest_round_data(&self) -> Result<RoundData, FeedError>;
}

/// Source of the current time in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A validated price sample, normalized to 18 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Price {
    pub price_feed: Address,
    pub value: U256,
    pub updated_at: u64,
}

/// Read the latest round from `feed` and reject it unless it is complete,
/// no older than `timeout_secs` at `now`, and positive.
pub fn stale_checked_price(
    price_feed: Address,
    feed: &dyn PriceFeed,
    now: u64,
    timeout_secs: u64,
) -> Result<Price, EngineError> {
    let round = feed.latest_round_data().map_err(|e| {
        tracing::warn!(price_feed = %price_feed, error = %e, "Price feed read failed");
        EngineError::StaleOracle { price_feed }
    })?;

    if round.updated_at == 0 || round.answered_in_round < round.round_id {
        tracing::warn!(
            price_feed = %price_feed,
            round_id = round.round_id,
            answered_in_round = round.answered_in_round,
            "Incomplete oracle round"
        );
        return Err(EngineError::StaleOracle { price_feed });
    }

    let age = now.saturating_sub(round.updated_at);
    if age > timeout_secs {
        tracing::warn!(
            price_feed = %price_feed,
            description = %feed.description(),
            age,
            timeout_secs,
            "Stale oracle price"
        );
        return Err(EngineError::StaleOracle { price_feed });
    }

    if !round.answer.is_positive() {
        tracing::warn!(price_feed = %price_feed, answer = %round.answer, "Non-positive oracle price");
        return Err(EngineError::InvalidPrice { price_feed });
    }

    let value = normalize(round.answer.into_raw(), feed.decimals())?;
    if value.is_zero() {
        return Err(EngineError::InvalidPrice { price_feed });
    }

    tracing::debug!(price_feed = %price_feed, price = %value, updated_at = round.updated_at, "Oracle price read");

    Ok(Price {
        price_feed,
        value,
        updated_at: round.updated_at,
    })
}

/// Rescale a `decimals`-decimal answer to 18 decimals.
fn normalize(answer: U256, decimals: u8) -> Result<U256, EngineError> {
    if decimals <= PRICE_DECIMALS {
        answer
            .checked_mul(pow10(PRICE_DECIMALS - decimals)?)
            .ok_or(EngineError::ArithmeticOverflow)
    } else {
        Ok(answer / pow10(decimals - PRICE_DECIMALS)?)
    }
}

fn pow10(exp: u8) -> Result<U256, EngineError> {
    (0..exp).try_fold(U256::from(1u64), |acc, _| {
        acc.checked_mul(U256::from(10u64))
            .ok_or(EngineError::ArithmeticOverflow)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ADDITIONAL_FEED_PRECISION;
    use crate::memory::MockPriceFeed;

    const FEED: Address = Address::repeat_byte(0xfe);
    const NOW: u64 = 1_700_000_000;

    fn usd(price: i64) -> I256 {
        I256::try_from(price).unwrap() * I256::try_from(100_000_000i64).unwrap()
    }

    #[test]
    fn test_eight_decimal_feed_scaled_by_feed_precision() {
        let feed = MockPriceFeed::new(8, usd(2000), NOW);
        let price = stale_checked_price(FEED, &feed, NOW, 3600).unwrap();
        assert_eq!(
            price.value,
            U256::from(2000u64) * U256::from(100_000_000u64) * ADDITIONAL_FEED_PRECISION
        );
        assert_eq!(price.updated_at, NOW);
    }

    #[test]
    fn test_high_decimal_feed_scaled_down() {
        // $20 quoted with 20 decimals
        let answer = I256::try_from(2_000_000_000_000_000_000_000i128).unwrap();
        let feed = MockPriceFeed::new(20, answer, NOW);
        let price = stale_checked_price(FEED, &feed, NOW, 3600).unwrap();
        assert_eq!(price.value, U256::from(20_000_000_000_000_000_000u128));
    }

    #[test]
    fn test_stale_price_rejected() {
        let feed = MockPriceFeed::new(8, usd(2000), NOW);
        let err = stale_checked_price(FEED, &feed, NOW + 3601, 3600).unwrap_err();
        assert_eq!(err, EngineError::StaleOracle { price_feed: FEED });
    }

    #[test]
    fn test_price_at_exact_timeout_accepted() {
        let feed = MockPriceFeed::new(8, usd(2000), NOW);
        assert!(stale_checked_price(FEED, &feed, NOW + 3600, 3600).is_ok());
    }

    #[test]
    fn test_incomplete_round_rejected() {
        let feed = MockPriceFeed::new(8, usd(2000), NOW);
        feed.update_round_data(7, usd(2000), NOW, NOW, 6);
        assert_eq!(
            stale_checked_price(FEED, &feed, NOW, 3600).unwrap_err(),
            EngineError::StaleOracle { price_feed: FEED }
        );

        feed.update_round_data(8, usd(2000), 0, NOW, 8);
        assert_eq!(
            stale_checked_price(FEED, &feed, NOW, 3600).unwrap_err(),
            EngineError::StaleOracle { price_feed: FEED }
        );
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let feed = MockPriceFeed::new(8, I256::ZERO, NOW);
        assert_eq!(
            stale_checked_price(FEED, &feed, NOW, 3600).unwrap_err(),
            EngineError::InvalidPrice { price_feed: FEED }
        );

        feed.update_answer(usd(-5), NOW);
        assert_eq!(
            stale_checked_price(FEED, &feed, NOW, 3600).unwrap_err(),
            EngineError::InvalidPrice { price_feed: FEED }
        );
    }

    #[test]
    fn test_feed_failure_is_stale() {
        let feed = MockPriceFeed::new(8, usd(2000), NOW);
        feed.fail_with(Some(FeedError::Unavailable("rpc down".into())));
        assert_eq!(
            stale_checked_price(FEED, &feed, NOW, 3600).unwrap_err(),
            EngineError::StaleOracle { price_feed: FEED }
        );
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
        clock.set(1);
        assert_eq!(clock.now(), 1);
    }
}
