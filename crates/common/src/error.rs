use alloy::primitives::{Address, U256};
use thiserror::Error;

/// Every way a position engine call can fail.
///
/// A failed call never leaves partial ledger or collaborator effects behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Amount must be more than zero")]
    NeedsMoreThanZero,

    #[error("Token {0} is not an approved collateral")]
    NotAllowedToken(Address),

    #[error(
        "Token addresses and price feed addresses must be the same length ({tokens} tokens, {price_feeds} feeds)"
    )]
    TokenAddressesAndPriceFeedAddressesMustBeSameLength { tokens: usize, price_feeds: usize },

    #[error("Transfer of token {token} failed")]
    TransferFailed { token: Address },

    #[error("Mint failed")]
    MintFailed,

    #[error("Burn failed")]
    BurnFailed,

    #[error("Health factor {0} is below the minimum")]
    BreaksHealthFactor(U256),

    #[error("Health factor {0} is not below the minimum, position cannot be liquidated")]
    HealthFactorOk(U256),

    #[error("Health factor not improved ({before} -> {after})")]
    HealthFactorNotImproved { before: U256, after: U256 },

    #[error("Price feed {price_feed} returned stale data")]
    StaleOracle { price_feed: Address },

    #[error("Price feed {price_feed} returned a non-positive price")]
    InvalidPrice { price_feed: Address },

    #[error("Insufficient collateral of token {token}: {available} available, {requested} requested")]
    InsufficientCollateral {
        token: Address,
        available: U256,
        requested: U256,
    },

    #[error("Burn of {requested} exceeds minted debt {minted}")]
    BurnExceedsDebt { minted: U256, requested: U256 },

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    #[error("Reentrant call into the position engine")]
    ReentrantCall,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of an [`EngineError`], so callers can tell
/// "rejected for safety" apart from "rejected for malformed input".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Zero amounts, unapproved tokens, bad configuration, bounds violations.
    InvalidInput,
    /// The action would leave a position below the minimum health factor.
    Solvency,
    /// A token, debt token or oracle misbehaved.
    Collaborator,
    /// The liquidation target is healthy, or liquidating it did not help.
    Liquidation,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NeedsMoreThanZero
            | EngineError::NotAllowedToken(_)
            | EngineError::TokenAddressesAndPriceFeedAddressesMustBeSameLength { .. }
            | EngineError::InsufficientCollateral { .. }
            | EngineError::BurnExceedsDebt { .. }
            | EngineError::ArithmeticOverflow
            | EngineError::ReentrantCall
            | EngineError::Config(_) => ErrorKind::InvalidInput,
            EngineError::BreaksHealthFactor(_) => ErrorKind::Solvency,
            EngineError::TransferFailed { .. }
            | EngineError::MintFailed
            | EngineError::BurnFailed
            | EngineError::StaleOracle { .. }
            | EngineError::InvalidPrice { .. } => ErrorKind::Collaborator,
            EngineError::HealthFactorOk(_) | EngineError::HealthFactorNotImproved { .. } => {
                ErrorKind::Liquidation
            }
        }
    }
}
