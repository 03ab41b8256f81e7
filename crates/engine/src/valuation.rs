//! USD valuation of collateral.
//!
//! A [`PriceSnapshot`] lives for one engine call. The first conversion for a
//! token reads its feed; every later conversion for that token in the same
//! call reuses the pinned sample, so all checks inside an action agree on the
//! price.

use std::collections::HashMap;

use alloy::primitives::{Address, U256};

use pegvault_common::error::EngineError;

use crate::constants::PRECISION;
use crate::ledger::{CollateralRegistry, Position};
use crate::oracle::{Price, stale_checked_price};

pub struct PriceSnapshot<'a> {
    registry: &'a CollateralRegistry,
    now: u64,
    timeout_secs: u64,
    pinned: HashMap<Address, Price>,
}

impl<'a> PriceSnapshot<'a> {
    pub fn new(registry: &'a CollateralRegistry, now: u64, timeout_secs: u64) -> Self {
        Self {
            registry,
            now,
            timeout_secs,
            pinned: HashMap::new(),
        }
    }

    /// The pinned price of `token`, reading its feed on first use.
    pub fn price(&mut self, token: Address) -> Result<Price, EngineError> {
        if let Some(price) = self.pinned.get(&token) {
            return Ok(*price);
        }

        let entry = self.registry.entry(token)?;
        let price = stale_checked_price(
            entry.asset.price_feed,
            entry.price_feed.as_ref(),
            self.now,
            self.timeout_secs,
        )?;
        self.pinned.insert(token, price);
        Ok(price)
    }

    pub fn usd_value(&mut self, token: Address, amount: U256) -> Result<U256, EngineError> {
        let price = self.price(token)?;
        usd_value_at(price.value, amount)
    }

    pub fn token_amount_from_usd(
        &mut self,
        token: Address,
        usd_amount: U256,
    ) -> Result<U256, EngineError> {
        let price = self.price(token)?;
        token_amount_at(price.value, usd_amount)
    }

    /// Sum of the USD value of every approved token held by `position`.
    ///
    /// Tokens are visited in registry order and every feed is read, including
    /// those of tokens the position does not hold.
    pub fn account_collateral_value(&mut self, position: &Position) -> Result<U256, EngineError> {
        let tokens = self.registry.tokens();
        let mut total = U256::ZERO;
        for token in tokens {
            let value = self.usd_value(token, position.collateral_of(token))?;
            total = total
                .checked_add(value)
                .ok_or(EngineError::ArithmeticOverflow)?;
        }
        Ok(total)
    }
}

/// `price * amount / 1e18`, price with 18 decimals.
pub fn usd_value_at(price: U256, amount: U256) -> Result<U256, EngineError> {
    Ok(price
        .checked_mul(amount)
        .ok_or(EngineError::ArithmeticOverflow)?
        / PRECISION)
}

/// `usd_amount * 1e18 / price`, price with 18 decimals.
pub fn token_amount_at(price: U256, usd_amount: U256) -> Result<U256, EngineError> {
    if price.is_zero() {
        return Err(EngineError::ArithmeticOverflow);
    }
    Ok(usd_amount
        .checked_mul(PRECISION)
        .ok_or(EngineError::ArithmeticOverflow)?
        / price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use alloy::primitives::I256;
    use pegvault_common::types::CollateralAsset;

    use crate::ledger::{CollateralEntry, Ledger};
    use crate::memory::{InMemoryToken, MockPriceFeed};

    const WETH: Address = Address::repeat_byte(0x01);
    const WBTC: Address = Address::repeat_byte(0x02);
    const NOW: u64 = 1_700_000_000;

    fn e18(n: u64) -> U256 {
        U256::from(n) * PRECISION
    }

    fn feed(usd: i64) -> Arc<MockPriceFeed> {
        let answer = I256::try_from(usd).unwrap() * I256::try_from(100_000_000i64).unwrap();
        Arc::new(MockPriceFeed::new(8, answer, NOW))
    }

    fn registry(eth: Arc<MockPriceFeed>, btc: Arc<MockPriceFeed>) -> CollateralRegistry {
        CollateralRegistry::new(vec![
            CollateralEntry {
                asset: CollateralAsset {
                    token: WETH,
                    price_feed: Address::repeat_byte(0xf1),
                },
                token: Arc::new(InMemoryToken::new("WETH")),
                price_feed: eth,
            },
            CollateralEntry {
                asset: CollateralAsset {
                    token: WBTC,
                    price_feed: Address::repeat_byte(0xf2),
                },
                token: Arc::new(InMemoryToken::new("WBTC")),
                price_feed: btc,
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_usd_value() {
        let registry = registry(feed(2000), feed(1000));
        let mut prices = PriceSnapshot::new(&registry, NOW, 3600);
        // 15 ETH * $2000 = $30,000
        assert_eq!(prices.usd_value(WETH, e18(15)).unwrap(), e18(30_000));
    }

    #[test]
    fn test_token_amount_from_usd() {
        let registry = registry(feed(2000), feed(1000));
        let mut prices = PriceSnapshot::new(&registry, NOW, 3600);
        // $100 / $2000 = 0.05 ETH
        assert_eq!(
            prices.token_amount_from_usd(WETH, e18(100)).unwrap(),
            U256::from(50_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_unknown_token_rejected() {
        let registry = registry(feed(2000), feed(1000));
        let mut prices = PriceSnapshot::new(&registry, NOW, 3600);
        let stranger = Address::repeat_byte(0x77);
        assert_eq!(
            prices.usd_value(stranger, e18(1)).unwrap_err(),
            EngineError::NotAllowedToken(stranger)
        );
    }

    #[test]
    fn test_price_pinned_within_snapshot() {
        let eth = feed(2000);
        let registry = registry(eth.clone(), feed(1000));
        let mut prices = PriceSnapshot::new(&registry, NOW, 3600);

        let before = prices.usd_value(WETH, e18(1)).unwrap();
        eth.update_answer(I256::try_from(1_000i64 * 100_000_000).unwrap(), NOW);
        assert_eq!(prices.usd_value(WETH, e18(1)).unwrap(), before);

        let mut fresh = PriceSnapshot::new(&registry, NOW, 3600);
        assert_eq!(fresh.usd_value(WETH, e18(1)).unwrap(), e18(1000));
    }

    #[test]
    fn test_account_value_reads_every_feed() {
        let btc = feed(1000);
        let registry = registry(feed(2000), btc.clone());
        let ledger = Ledger::new();
        let mut tx = ledger.begin();
        tx.deposit_collateral(Address::ZERO, WETH, e18(2)).unwrap();

        let mut prices = PriceSnapshot::new(&registry, NOW, 3600);
        assert_eq!(
            prices.account_collateral_value(tx.position(Address::ZERO)).unwrap(),
            e18(4000)
        );

        // a stale feed fails the valuation even when nothing of it is held
        btc.update_answer(I256::ONE, NOW - 7200);
        let mut prices = PriceSnapshot::new(&registry, NOW, 3600);
        assert_eq!(
            prices
                .account_collateral_value(tx.position(Address::ZERO))
                .unwrap_err(),
            EngineError::StaleOracle {
                price_feed: Address::repeat_byte(0xf2)
            }
        );
    }

    #[test]
    fn test_round_trip_within_one_unit() {
        let price = U256::from(1_234_567_890_123u64) * U256::from(10_000_000_000u64);
        for amount in [1u64, 7, 999_999_999, 123_456_789_123_456_789] {
            let amount = U256::from(amount);
            let usd = usd_value_at(price, amount).unwrap();
            let back = token_amount_at(price, usd).unwrap();
            assert!(back <= amount);
            assert!(amount - back <= U256::from(1u64));
        }
    }
}
