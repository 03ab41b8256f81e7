//! Per-user positions, the approved collateral registry, and the staging
//! transaction every action mutates instead of the live ledger.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::{Address, U256};

use pegvault_common::error::EngineError;
use pegvault_common::types::{CollateralAsset, EngineEvent};

use crate::oracle::PriceFeed;
use crate::token::FungibleToken;

/// Collateral and debt of a single user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    collateral: BTreeMap<Address, U256>,
    debt_minted: U256,
}

static EMPTY_POSITION: Position = Position {
    collateral: BTreeMap::new(),
    debt_minted: U256::ZERO,
};

impl Position {
    pub fn collateral_of(&self, token: Address) -> U256 {
        self.collateral.get(&token).copied().unwrap_or_default()
    }

    pub fn debt_minted(&self) -> U256 {
        self.debt_minted
    }

    fn credit_collateral(&mut self, token: Address, amount: U256) -> Result<(), EngineError> {
        let balance = self.collateral.entry(token).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or(EngineError::ArithmeticOverflow)?;
        Ok(())
    }

    fn debit_collateral(&mut self, token: Address, amount: U256) -> Result<(), EngineError> {
        let available = self.collateral_of(token);
        let remaining =
            available
                .checked_sub(amount)
                .ok_or(EngineError::InsufficientCollateral {
                    token,
                    available,
                    requested: amount,
                })?;
        self.collateral.insert(token, remaining);
        Ok(())
    }

    fn add_debt(&mut self, amount: U256) -> Result<(), EngineError> {
        self.debt_minted = self
            .debt_minted
            .checked_add(amount)
            .ok_or(EngineError::ArithmeticOverflow)?;
        Ok(())
    }

    fn sub_debt(&mut self, amount: U256) -> Result<(), EngineError> {
        self.debt_minted =
            self.debt_minted
                .checked_sub(amount)
                .ok_or(EngineError::BurnExceedsDebt {
                    minted: self.debt_minted,
                    requested: amount,
                })?;
        Ok(())
    }
}

/// An approved collateral token with its collaborators attached.
#[derive(Clone)]
pub struct CollateralEntry {
    pub asset: CollateralAsset,
    pub token: Arc<dyn FungibleToken>,
    pub price_feed: Arc<dyn PriceFeed>,
}

/// Approved collateral, in the fixed order used for valuation.
#[derive(Clone)]
pub struct CollateralRegistry {
    entries: Vec<CollateralEntry>,
    index: HashMap<Address, usize>,
}

impl CollateralRegistry {
    /// Build the registry. Every token must appear once.
    pub fn new(entries: Vec<CollateralEntry>) -> Result<Self, EngineError> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.asset.token, i).is_some() {
                return Err(EngineError::Config(format!(
                    "collateral token {} listed more than once",
                    entry.asset.token
                )));
            }
        }
        Ok(Self { entries, index })
    }

    pub fn entry(&self, token: Address) -> Result<&CollateralEntry, EngineError> {
        self.index
            .get(&token)
            .map(|&i| &self.entries[i])
            .ok_or(EngineError::NotAllowedToken(token))
    }

    pub fn ensure_allowed(&self, token: Address) -> Result<(), EngineError> {
        self.entry(token).map(|_| ())
    }

    pub fn entries(&self) -> impl Iterator<Item = &CollateralEntry> {
        self.entries.iter()
    }

    pub fn tokens(&self) -> Vec<Address> {
        self.entries.iter().map(|e| e.asset.token).collect()
    }

    pub fn price_feed_of(&self, token: Address) -> Option<Address> {
        self.entry(token).ok().map(|e| e.asset.price_feed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every position the engine tracks.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    positions: HashMap<Address, Position>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user's position; users who never acted hold an empty one.
    pub fn position(&self, user: Address) -> &Position {
        self.positions.get(&user).unwrap_or(&EMPTY_POSITION)
    }

    /// Start staging changes against the current state.
    pub fn begin(&self) -> LedgerTx<'_> {
        LedgerTx {
            base: self,
            staged: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    fn apply(&mut self, changes: StagedChanges) -> Vec<EngineEvent> {
        self.positions.extend(changes.positions);
        changes.events
    }
}

/// Copy-on-write view of the ledger for one action.
///
/// Nothing reaches the [`Ledger`] until [`LedgerTx::into_changes`] is
/// committed; dropping the transaction discards everything.
pub struct LedgerTx<'a> {
    base: &'a Ledger,
    staged: BTreeMap<Address, Position>,
    events: Vec<EngineEvent>,
}

impl LedgerTx<'_> {
    pub fn position(&self, user: Address) -> &Position {
        self.staged
            .get(&user)
            .unwrap_or_else(|| self.base.position(user))
    }

    fn position_mut(&mut self, user: Address) -> &mut Position {
        let base = self.base;
        self.staged
            .entry(user)
            .or_insert_with(|| base.position(user).clone())
    }

    pub fn deposit_collateral(
        &mut self,
        user: Address,
        token: Address,
        amount: U256,
    ) -> Result<(), EngineError> {
        self.position_mut(user).credit_collateral(token, amount)?;
        self.events.push(EngineEvent::CollateralDeposited {
            user,
            token,
            amount,
        });
        Ok(())
    }

    /// Take `amount` of `token` out of `from`'s position on behalf of `to`.
    pub fn redeem_collateral(
        &mut self,
        from: Address,
        to: Address,
        token: Address,
        amount: U256,
    ) -> Result<(), EngineError> {
        self.position_mut(from).debit_collateral(token, amount)?;
        self.events.push(EngineEvent::CollateralRedeemed {
            redeemed_from: from,
            redeemed_to: to,
            token,
            amount,
        });
        Ok(())
    }

    pub fn mint_debt(&mut self, user: Address, amount: U256) -> Result<(), EngineError> {
        self.position_mut(user).add_debt(amount)
    }

    pub fn burn_debt(&mut self, user: Address, amount: U256) -> Result<(), EngineError> {
        self.position_mut(user).sub_debt(amount)
    }

    pub fn into_changes(self) -> StagedChanges {
        StagedChanges {
            positions: self.staged,
            events: self.events,
        }
    }
}

/// Positions and events produced by a successful action.
#[derive(Debug, Default)]
pub struct StagedChanges {
    positions: BTreeMap<Address, Position>,
    events: Vec<EngineEvent>,
}

impl StagedChanges {
    pub fn touched_users(&self) -> HashSet<Address> {
        self.positions.keys().copied().collect()
    }

    /// Write the changes into `ledger`, returning the events to publish.
    pub fn commit(self, ledger: &mut Ledger) -> Vec<EngineEvent> {
        ledger.apply(self)
    }
}
