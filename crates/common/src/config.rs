use std::str::FromStr;

use alloy::primitives::Address;
use serde::Deserialize;

use crate::error::EngineError;
use crate::types::CollateralAsset;

/// Default maximum age of an oracle sample, in seconds (3 hours).
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 3 * 60 * 60;

/// Construction-time configuration of a position engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Address the engine holds custody under.
    pub engine_address: Address,

    /// Address of the debt token the engine mints and burns.
    pub dsc_address: Address,

    /// Approved collateral tokens, in valuation order.
    pub collateral_tokens: Vec<Address>,

    /// Price feed for each collateral token, index-aligned with `collateral_tokens`.
    pub price_feeds: Vec<Address>,

    /// Maximum oracle sample age in seconds (default: 10800)
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
}

fn default_oracle_timeout_secs() -> u64 {
    DEFAULT_ORACLE_TIMEOUT_SECS
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| anyhow::anyhow!("{key} environment variable is required"))
        };

        Ok(Self {
            engine_address: parse_address("PEGVAULT_ENGINE_ADDRESS", &required("PEGVAULT_ENGINE_ADDRESS")?)?,
            dsc_address: parse_address("PEGVAULT_DSC_ADDRESS", &required("PEGVAULT_DSC_ADDRESS")?)?,
            collateral_tokens: parse_address_list(
                "PEGVAULT_COLLATERAL_TOKENS",
                &required("PEGVAULT_COLLATERAL_TOKENS")?,
            )?,
            price_feeds: parse_address_list(
                "PEGVAULT_PRICE_FEEDS",
                &required("PEGVAULT_PRICE_FEEDS")?,
            )?,
            oracle_timeout_secs: lookup("PEGVAULT_ORACLE_TIMEOUT_SECS")
                .unwrap_or_else(|| DEFAULT_ORACLE_TIMEOUT_SECS.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PEGVAULT_ORACLE_TIMEOUT_SECS must be a valid u64"))?,
        })
    }

    /// Pair each collateral token with its price feed.
    ///
    /// Fails when the two lists differ in length.
    pub fn collateral_assets(&self) -> Result<Vec<CollateralAsset>, EngineError> {
        if self.collateral_tokens.len() != self.price_feeds.len() {
            return Err(
                EngineError::TokenAddressesAndPriceFeedAddressesMustBeSameLength {
                    tokens: self.collateral_tokens.len(),
                    price_feeds: self.price_feeds.len(),
                },
            );
        }

        Ok(self
            .collateral_tokens
            .iter()
            .zip(&self.price_feeds)
            .map(|(&token, &price_feed)| CollateralAsset { token, price_feed })
            .collect())
    }
}

fn parse_address(key: &str, value: &str) -> anyhow::Result<Address> {
    Address::from_str(value.trim())
        .map_err(|e| anyhow::anyhow!("{key} contains an invalid address '{value}': {e}"))
}

fn parse_address_list(key: &str, value: &str) -> anyhow::Result<Vec<Address>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_address(key, s))
        .collect()
}
