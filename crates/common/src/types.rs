use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Types of events the position engine emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CollateralDeposited,
    CollateralRedeemed,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::CollateralDeposited => write!(f, "collateral_deposited"),
            EventType::CollateralRedeemed => write!(f, "collateral_redeemed"),
        }
    }
}

/// An event committed by a successful engine action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// `amount` of `token` was credited to `user`'s position.
    CollateralDeposited {
        user: Address,
        token: Address,
        amount: U256,
    },
    /// `amount` of `token` left `redeemed_from`'s position and was sent to
    /// `redeemed_to`. The two differ only for liquidations.
    CollateralRedeemed {
        redeemed_from: Address,
        redeemed_to: Address,
        token: Address,
        amount: U256,
    },
}

impl EngineEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            EngineEvent::CollateralDeposited { .. } => EventType::CollateralDeposited,
            EngineEvent::CollateralRedeemed { .. } => EventType::CollateralRedeemed,
        }
    }

    /// Token the event moved.
    pub fn token(&self) -> Address {
        match self {
            EngineEvent::CollateralDeposited { token, .. }
            | EngineEvent::CollateralRedeemed { token, .. } => *token,
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            EngineEvent::CollateralDeposited { amount, .. }
            | EngineEvent::CollateralRedeemed { amount, .. } => *amount,
        }
    }
}

/// An approved collateral token and the price feed that values it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralAsset {
    pub token: Address,
    pub price_feed: Address,
}

/// Snapshot of a user's position, valued at a single price sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInformation {
    /// Debt tokens minted against the position (18 decimals).
    pub total_dsc_minted: U256,
    /// USD value of all deposited collateral (18 decimals).
    pub collateral_value_usd: U256,
}
