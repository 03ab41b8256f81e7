//! The position engine: the only way to change the ledger.
//!
//! Every handler runs under the ledger guard as one transaction:
//! 1. Validate inputs and stage ledger changes on a [`LedgerTx`]
//! 2. Run the post-checks against the staged state at pinned prices
//! 3. Execute the planned collaborator effects
//! 4. Commit the staged positions and publish their events
//!
//! A failure in any step leaves the ledger, the event log and every
//! collaborator as they were before the call.

use std::sync::Arc;

use alloy::primitives::{Address, U256};

use pegvault_common::config::EngineConfig;
use pegvault_common::error::EngineError;
use pegvault_common::types::{AccountInformation, EngineEvent};

use crate::constants::{
    ADDITIONAL_FEED_PRECISION, LIQUIDATION_BONUS, LIQUIDATION_PRECISION, LIQUIDATION_THRESHOLD,
    MIN_HEALTH_FACTOR, PRECISION,
};
use crate::effects::{Effect, EffectPlan, Executor};
use crate::guard::Guarded;
use crate::health;
use crate::ledger::{CollateralEntry, CollateralRegistry, Ledger, LedgerTx, StagedChanges};
use crate::oracle::{Clock, PriceFeed};
use crate::token::{DebtToken, FungibleToken};
use crate::valuation::PriceSnapshot;

/// External systems the engine talks to.
///
/// `tokens` and `price_feeds` are index-aligned with the configured
/// collateral tokens.
pub struct Collaborators {
    pub tokens: Vec<Arc<dyn FungibleToken>>,
    pub price_feeds: Vec<Arc<dyn PriceFeed>>,
    pub dsc: Arc<dyn DebtToken>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct EngineState {
    ledger: Ledger,
    events: Vec<EngineEvent>,
}

pub struct PositionEngine {
    address: Address,
    dsc_address: Address,
    dsc: Arc<dyn DebtToken>,
    registry: CollateralRegistry,
    clock: Arc<dyn Clock>,
    oracle_timeout_secs: u64,
    state: Guarded<EngineState>,
}

impl PositionEngine {
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Result<Self, EngineError> {
        let assets = config.collateral_assets()?;
        if collaborators.tokens.len() != assets.len()
            || collaborators.price_feeds.len() != assets.len()
        {
            return Err(EngineError::Config(format!(
                "expected {} token and price feed collaborators, got {} and {}",
                assets.len(),
                collaborators.tokens.len(),
                collaborators.price_feeds.len()
            )));
        }

        let entries = assets
            .into_iter()
            .zip(collaborators.tokens)
            .zip(collaborators.price_feeds)
            .map(|((asset, token), price_feed)| CollateralEntry {
                asset,
                token,
                price_feed,
            })
            .collect();
        let registry = CollateralRegistry::new(entries)?;

        tracing::info!(
            engine = %config.engine_address,
            dsc = %config.dsc_address,
            collateral_tokens = registry.len(),
            oracle_timeout_secs = config.oracle_timeout_secs,
            "Position engine initialized"
        );

        Ok(Self {
            address: config.engine_address,
            dsc_address: config.dsc_address,
            dsc: collaborators.dsc,
            registry,
            clock: collaborators.clock,
            oracle_timeout_secs: config.oracle_timeout_secs,
            state: Guarded::new(EngineState::default()),
        })
    }

    /// Move `amount` of `token` from the caller into engine custody.
    pub fn deposit_collateral(
        &self,
        caller: Address,
        token: Address,
        amount: U256,
    ) -> Result<(), EngineError> {
        self.transact("deposit_collateral", caller, |action| {
            action.deposit(token, amount)
        })
    }

    /// Mint `amount` of debt token to the caller against their collateral.
    pub fn mint_dsc(&self, caller: Address, amount: U256) -> Result<(), EngineError> {
        self.transact("mint_dsc", caller, |action| {
            action.mint(amount)?;
            action.ensure_healthy(caller)
        })
    }

    pub fn deposit_collateral_and_mint_dsc(
        &self,
        caller: Address,
        token: Address,
        collateral_amount: U256,
        dsc_amount: U256,
    ) -> Result<(), EngineError> {
        self.transact("deposit_collateral_and_mint_dsc", caller, |action| {
            action.deposit(token, collateral_amount)?;
            action.mint(dsc_amount)?;
            action.ensure_healthy(caller)
        })
    }

    /// Return `amount` of `token` from the caller's position to the caller.
    pub fn redeem_collateral(
        &self,
        caller: Address,
        token: Address,
        amount: U256,
    ) -> Result<(), EngineError> {
        self.transact("redeem_collateral", caller, |action| {
            ensure_more_than_zero(amount)?;
            action.redeem(token, amount, caller, caller)?;
            action.ensure_healthy(caller)
        })
    }

    /// Retire `amount` of the caller's debt, paid with their own debt tokens.
    pub fn burn_dsc(&self, caller: Address, amount: U256) -> Result<(), EngineError> {
        self.transact("burn_dsc", caller, |action| {
            ensure_more_than_zero(amount)?;
            action.burn(amount, caller, caller)?;
            action.ensure_healthy(caller)
        })
    }

    pub fn redeem_collateral_for_dsc(
        &self,
        caller: Address,
        token: Address,
        collateral_amount: U256,
        dsc_amount: U256,
    ) -> Result<(), EngineError> {
        self.transact("redeem_collateral_for_dsc", caller, |action| {
            ensure_more_than_zero(dsc_amount)?;
            action.burn(dsc_amount, caller, caller)?;
            ensure_more_than_zero(collateral_amount)?;
            action.redeem(token, collateral_amount, caller, caller)?;
            action.ensure_healthy(caller)
        })
    }

    /// Cover `debt_to_cover` of an undercollateralized `user`'s debt with the
    /// caller's debt tokens, seizing the equivalent `token` collateral plus the
    /// liquidation bonus.
    ///
    /// Fails unless the user is liquidatable, the liquidation strictly improves
    /// their health factor, and the caller stays healthy.
    pub fn liquidate(
        &self,
        caller: Address,
        token: Address,
        user: Address,
        debt_to_cover: U256,
    ) -> Result<(), EngineError> {
        self.transact("liquidate", caller, |action| {
            ensure_more_than_zero(debt_to_cover)?;
            action.registry.ensure_allowed(token)?;

            let starting = action.health_factor(user)?;
            health::ensure_liquidatable(starting)?;

            let seized = action.prices.token_amount_from_usd(token, debt_to_cover)?;
            let bonus = seized
                .checked_mul(LIQUIDATION_BONUS)
                .ok_or(EngineError::ArithmeticOverflow)?
                / LIQUIDATION_PRECISION;
            let total = seized
                .checked_add(bonus)
                .ok_or(EngineError::ArithmeticOverflow)?;

            action.redeem(token, total, user, caller)?;
            action.burn(debt_to_cover, user, caller)?;

            let ending = action.health_factor(user)?;
            health::ensure_improved(starting, ending)?;
            action.ensure_healthy(caller)?;

            tracing::info!(
                liquidator = %caller,
                user = %user,
                token = %token,
                debt_covered = %debt_to_cover,
                seized = %seized,
                bonus = %bonus,
                health_factor_before = %starting,
                health_factor_after = %ending,
                "Position liquidated"
            );
            Ok(())
        })
    }

    /// USD value of everything `user` has deposited.
    pub fn account_collateral_value(&self, user: Address) -> Result<U256, EngineError> {
        self.read(|ledger, prices| prices.account_collateral_value(ledger.position(user)))
    }

    pub fn usd_value(&self, token: Address, amount: U256) -> Result<U256, EngineError> {
        self.read(|_, prices| prices.usd_value(token, amount))
    }

    pub fn token_amount_from_usd(&self, token: Address, usd_amount: U256) -> Result<U256, EngineError> {
        self.read(|_, prices| prices.token_amount_from_usd(token, usd_amount))
    }

    pub fn health_factor(&self, user: Address) -> Result<U256, EngineError> {
        self.read(|ledger, prices| health::health_factor(prices, ledger.position(user)))
    }

    pub fn account_information(&self, user: Address) -> Result<AccountInformation, EngineError> {
        self.read(|ledger, prices| {
            let position = ledger.position(user);
            Ok(AccountInformation {
                total_dsc_minted: position.debt_minted(),
                collateral_value_usd: prices.account_collateral_value(position)?,
            })
        })
    }

    pub fn collateral_balance_of(&self, user: Address, token: Address) -> Result<U256, EngineError> {
        let state = self.state.enter()?;
        Ok(state.ledger.position(user).collateral_of(token))
    }

    /// Events committed at or after position `cursor` of the log, oldest
    /// first. Pass the previous [`PositionEngine::event_count`] to read only
    /// what is new; the log keeps every event for the engine's lifetime.
    pub fn events_since(&self, cursor: usize) -> Result<Vec<EngineEvent>, EngineError> {
        let state = self.state.enter()?;
        Ok(state.events.get(cursor..).unwrap_or_default().to_vec())
    }

    pub fn event_count(&self) -> Result<usize, EngineError> {
        Ok(self.state.enter()?.events.len())
    }

    pub fn calculate_health_factor(
        &self,
        total_dsc_minted: U256,
        collateral_value_usd: U256,
    ) -> Result<U256, EngineError> {
        health::calculate_health_factor(total_dsc_minted, collateral_value_usd)
    }

    /// Approved collateral tokens in valuation order.
    pub fn collateral_tokens(&self) -> Vec<Address> {
        self.registry.tokens()
    }

    pub fn collateral_token_price_feed(&self, token: Address) -> Option<Address> {
        self.registry.price_feed_of(token)
    }

    pub fn dsc(&self) -> Address {
        self.dsc_address
    }

    pub fn engine_address(&self) -> Address {
        self.address
    }

    pub fn oracle_timeout_secs(&self) -> u64 {
        self.oracle_timeout_secs
    }

    pub const fn precision(&self) -> U256 {
        PRECISION
    }

    pub const fn additional_feed_precision(&self) -> U256 {
        ADDITIONAL_FEED_PRECISION
    }

    pub const fn liquidation_threshold(&self) -> U256 {
        LIQUIDATION_THRESHOLD
    }

    pub const fn liquidation_bonus(&self) -> U256 {
        LIQUIDATION_BONUS
    }

    pub const fn liquidation_precision(&self) -> U256 {
        LIQUIDATION_PRECISION
    }

    pub const fn min_health_factor(&self) -> U256 {
        MIN_HEALTH_FACTOR
    }

    fn transact<F>(&self, name: &'static str, caller: Address, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Action<'_>) -> Result<(), EngineError>,
    {
        let mut state = self.state.enter()?;

        let changes = match self.stage(&state.ledger, caller, f) {
            Ok(changes) => changes,
            Err(e) => {
                tracing::warn!(
                    action = name,
                    caller = %caller,
                    error = %e,
                    kind = ?e.kind(),
                    "Action reverted"
                );
                return Err(e);
            }
        };

        let touched = changes.touched_users().len();
        let EngineState { ledger, events } = &mut *state;
        let published = changes.commit(ledger);
        for event in &published {
            tracing::debug!(
                event_type = %event.event_type(),
                token = %event.token(),
                amount = %event.amount(),
                "Event published"
            );
        }
        tracing::info!(
            action = name,
            caller = %caller,
            positions = touched,
            events = published.len(),
            "Action committed"
        );
        events.extend(published);
        Ok(())
    }

    fn stage<F>(&self, ledger: &Ledger, caller: Address, f: F) -> Result<StagedChanges, EngineError>
    where
        F: FnOnce(&mut Action<'_>) -> Result<(), EngineError>,
    {
        let mut action = Action {
            caller,
            registry: &self.registry,
            tx: ledger.begin(),
            prices: self.snapshot(),
            plan: EffectPlan::default(),
        };
        f(&mut action)?;

        Executor {
            engine: self.address,
            dsc_address: self.dsc_address,
            dsc: self.dsc.as_ref(),
            registry: &self.registry,
        }
        .execute(&action.plan)?;

        Ok(action.tx.into_changes())
    }

    fn read<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Ledger, &mut PriceSnapshot<'_>) -> Result<T, EngineError>,
    {
        let state = self.state.enter()?;
        let mut prices = self.snapshot();
        f(&state.ledger, &mut prices)
    }

    fn snapshot(&self) -> PriceSnapshot<'_> {
        PriceSnapshot::new(&self.registry, self.clock.now(), self.oracle_timeout_secs)
    }
}

/// In-flight state of one handler call.
struct Action<'a> {
    caller: Address,
    registry: &'a CollateralRegistry,
    tx: LedgerTx<'a>,
    prices: PriceSnapshot<'a>,
    plan: EffectPlan,
}

impl Action<'_> {
    fn deposit(&mut self, token: Address, amount: U256) -> Result<(), EngineError> {
        ensure_more_than_zero(amount)?;
        self.registry.ensure_allowed(token)?;
        self.tx.deposit_collateral(self.caller, token, amount)?;
        self.plan.push(Effect::PullCollateral {
            token,
            from: self.caller,
            amount,
        });
        Ok(())
    }

    fn mint(&mut self, amount: U256) -> Result<(), EngineError> {
        ensure_more_than_zero(amount)?;
        self.tx.mint_debt(self.caller, amount)?;
        self.plan.push(Effect::MintDsc {
            to: self.caller,
            amount,
        });
        Ok(())
    }

    /// Shared by self-service redeem and liquidation. A zero `amount` is
    /// recorded but moves no tokens; a dust liquidation seizes nothing.
    fn redeem(
        &mut self,
        token: Address,
        amount: U256,
        from: Address,
        to: Address,
    ) -> Result<(), EngineError> {
        self.registry.ensure_allowed(token)?;
        self.tx.redeem_collateral(from, to, token, amount)?;
        if !amount.is_zero() {
            self.plan.push(Effect::PushCollateral { token, to, amount });
        }
        Ok(())
    }

    /// Shared by self-service burn and liquidation.
    fn burn(
        &mut self,
        amount: U256,
        on_behalf_of: Address,
        dsc_from: Address,
    ) -> Result<(), EngineError> {
        self.tx.burn_debt(on_behalf_of, amount)?;
        self.plan.push(Effect::PullDsc {
            from: dsc_from,
            amount,
        });
        self.plan.push(Effect::BurnDsc { amount });
        Ok(())
    }

    fn health_factor(&mut self, user: Address) -> Result<U256, EngineError> {
        health::health_factor(&mut self.prices, self.tx.position(user))
    }

    fn ensure_healthy(&mut self, user: Address) -> Result<(), EngineError> {
        let health_factor = self.health_factor(user)?;
        health::ensure_healthy(health_factor)
    }
}

fn ensure_more_than_zero(amount: U256) -> Result<(), EngineError> {
    if amount.is_zero() {
        return Err(EngineError::NeedsMoreThanZero);
    }
    Ok(())
}
