//! Token collaborators.
//!
//! The engine never moves value itself; it asks these interfaces to. A `false`
//! return is treated exactly like a hard failure.

use alloy::primitives::{Address, U256};

/// Standard fungible-transfer interface of a collateral token.
///
/// `sender` / `spender` identify the account issuing the call.
pub trait FungibleToken: Send + Sync {
    fn transfer(&self, sender: Address, to: Address, amount: U256) -> bool;

    fn transfer_from(&self, spender: Address, from: Address, to: Address, amount: U256) -> bool;

    fn balance_of(&self, account: Address) -> U256;
}

/// The pegged debt token. Only its owner (the engine) may mint and burn.
pub trait DebtToken: FungibleToken {
    fn mint(&self, caller: Address, to: Address, amount: U256) -> bool;

    /// Burn `amount` from the caller's own balance.
    fn burn(&self, caller: Address, amount: U256) -> bool;
}
