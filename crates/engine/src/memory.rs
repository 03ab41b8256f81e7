//! In-memory collaborators.
//!
//! Used by tests and simulations in place of deployed tokens and oracles.

use std::collections::HashMap;

use alloy::primitives::{Address, I256, U256};
use parking_lot::Mutex;

use crate::oracle::{FeedError, PriceFeed, RoundData};
use crate::token::{DebtToken, FungibleToken};

#[derive(Debug, Default)]
struct Book {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    total_supply: U256,
    paused: bool,
}

impl Book {
    fn balance(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: U256) -> bool {
        if self.paused || to == Address::ZERO {
            return false;
        }
        let Some(remaining) = self.balance(from).checked_sub(amount) else {
            return false;
        };
        self.balances.insert(from, remaining);
        *self.balances.entry(to).or_default() += amount;
        true
    }
}

/// ERC-20 style token with balances and allowances.
#[derive(Debug)]
pub struct InMemoryToken {
    symbol: String,
    book: Mutex<Book>,
}

impl InMemoryToken {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            book: Mutex::new(Book::default()),
        }
    }

    /// Credit `amount` to `to` out of thin air.
    pub fn mint_to(&self, to: Address, amount: U256) {
        let mut book = self.book.lock();
        *book.balances.entry(to).or_default() += amount;
        book.total_supply += amount;
    }

    pub fn approve(&self, owner: Address, spender: Address, amount: U256) {
        self.book.lock().allowances.insert((owner, spender), amount);
    }

    pub fn total_supply(&self) -> U256 {
        self.book.lock().total_supply
    }

    /// While paused every transfer returns `false`.
    pub fn set_paused(&self, paused: bool) {
        self.book.lock().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.book.lock().paused
    }

    fn burn_from(&self, account: Address, amount: U256) -> bool {
        let mut book = self.book.lock();
        let Some(remaining) = book.balance(account).checked_sub(amount) else {
            return false;
        };
        book.balances.insert(account, remaining);
        book.total_supply -= amount;
        true
    }
}

impl FungibleToken for InMemoryToken {
    fn transfer(&self, sender: Address, to: Address, amount: U256) -> bool {
        let moved = self.book.lock().move_balance(sender, to, amount);
        if !moved {
            tracing::debug!(
                token = %self.symbol,
                from = %sender,
                to = %to,
                amount = %amount,
                "Transfer rejected"
            );
        }
        moved
    }

    fn transfer_from(&self, spender: Address, from: Address, to: Address, amount: U256) -> bool {
        let mut book = self.book.lock();
        let allowance = book
            .allowances
            .get(&(from, spender))
            .copied()
            .unwrap_or_default();
        if allowance < amount || !book.move_balance(from, to, amount) {
            tracing::debug!(
                token = %self.symbol,
                spender = %spender,
                from = %from,
                amount = %amount,
                allowance = %allowance,
                "Transfer rejected"
            );
            return false;
        }
        book.allowances.insert((from, spender), allowance - amount);
        true
    }

    fn balance_of(&self, account: Address) -> U256 {
        self.book.lock().balance(account)
    }
}

/// The pegged debt token: a fungible token whose owner alone mints and burns.
#[derive(Debug)]
pub struct InMemoryDebtToken {
    owner: Address,
    token: InMemoryToken,
}

impl InMemoryDebtToken {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            token: InMemoryToken::new("DSC"),
        }
    }

    pub fn approve(&self, owner: Address, spender: Address, amount: U256) {
        self.token.approve(owner, spender, amount);
    }

    pub fn total_supply(&self) -> U256 {
        self.token.total_supply()
    }

    pub fn set_paused(&self, paused: bool) {
        self.token.set_paused(paused);
    }
}

impl FungibleToken for InMemoryDebtToken {
    fn transfer(&self, sender: Address, to: Address, amount: U256) -> bool {
        self.token.transfer(sender, to, amount)
    }

    fn transfer_from(&self, spender: Address, from: Address, to: Address, amount: U256) -> bool {
        self.token.transfer_from(spender, from, to, amount)
    }

    fn balance_of(&self, account: Address) -> U256 {
        self.token.balance_of(account)
    }
}

impl DebtToken for InMemoryDebtToken {
    fn mint(&self, caller: Address, to: Address, amount: U256) -> bool {
        if caller != self.owner || to == Address::ZERO || amount.is_zero() || self.token.is_paused() {
            return false;
        }
        self.token.mint_to(to, amount);
        true
    }

    fn burn(&self, caller: Address, amount: U256) -> bool {
        if caller != self.owner || amount.is_zero() || self.token.is_paused() {
            return false;
        }
        self.token.burn_from(caller, amount)
    }
}

#[derive(Debug)]
struct FeedState {
    round: RoundData,
    failure: Option<FeedError>,
}

/// Price feed whose answer is set by hand.
#[derive(Debug)]
pub struct MockPriceFeed {
    decimals: u8,
    state: Mutex<FeedState>,
}

impl MockPriceFeed {
    pub fn new(decimals: u8, answer: I256, updated_at: u64) -> Self {
        Self {
            decimals,
            state: Mutex::new(FeedState {
                round: RoundData {
                    round_id: 1,
                    answer,
                    started_at: updated_at,
                    updated_at,
                    answered_in_round: 1,
                },
                failure: None,
            }),
        }
    }

    /// Publish a new answer in a fresh round.
    pub fn update_answer(&self, answer: I256, updated_at: u64) {
        let mut state = self.state.lock();
        let round_id = state.round.round_id + 1;
        state.round = RoundData {
            round_id,
            answer,
            started_at: updated_at,
            updated_at,
            answered_in_round: round_id,
        };
    }

    pub fn update_round_data(
        &self,
        round_id: u128,
        answer: I256,
        updated_at: u64,
        started_at: u64,
        answered_in_round: u128,
    ) {
        self.state.lock().round = RoundData {
            round_id,
            answer,
            started_at,
            updated_at,
            answered_in_round,
        };
    }

    /// Make every read fail with `failure` until cleared with `None`.
    pub fn fail_with(&self, failure: Option<FeedError>) {
        self.state.lock().failure = failure;
    }

}

impl PriceFeed for MockPriceFeed {
    fn decimals(&self) -> u8 {
        self.decimals
    }

    fn description(&self) -> String {
        "mock / USD".to_string()
    }

    fn latest_round_data(&self) -> Result<RoundData, FeedError> {
        let state = self.state.lock();
        match &state.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(state.round),
        }
    }
}
