//! Collaborator effects of an action, planned as data and run after every
//! ledger check has passed.
//!
//! Effects run in phases: pulls, then burns, then the single outgoing effect
//! (collateral push or mint). Everything before the last effect has an
//! inverse, so a failure part-way through is unwound by running the inverses
//! of the executed prefix in reverse.

use alloy::primitives::{Address, U256};

use pegvault_common::error::EngineError;

use crate::ledger::CollateralRegistry;
use crate::token::DebtToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Move collateral from a user into engine custody.
    PullCollateral {
        token: Address,
        from: Address,
        amount: U256,
    },
    /// Move debt tokens from a user into engine custody.
    PullDsc { from: Address, amount: U256 },
    /// Burn debt tokens held by the engine.
    BurnDsc { amount: U256 },
    /// Send collateral out of engine custody.
    PushCollateral {
        token: Address,
        to: Address,
        amount: U256,
    },
    /// Send debt tokens out of engine custody.
    PushDsc { to: Address, amount: U256 },
    MintDsc { to: Address, amount: U256 },
}

impl Effect {
    fn phase(&self) -> u8 {
        match self {
            Effect::PullCollateral { .. } | Effect::PullDsc { .. } => 0,
            Effect::BurnDsc { .. } => 1,
            Effect::PushCollateral { .. } | Effect::PushDsc { .. } | Effect::MintDsc { .. } => 2,
        }
    }

    /// The effect that undoes this one, if there is one.
    pub fn inverse(&self, engine: Address) -> Option<Effect> {
        match *self {
            Effect::PullCollateral {
                token,
                from,
                amount,
            } => Some(Effect::PushCollateral {
                token,
                to: from,
                amount,
            }),
            Effect::PullDsc { from, amount } => Some(Effect::PushDsc { to: from, amount }),
            Effect::BurnDsc { amount } => Some(Effect::MintDsc {
                to: engine,
                amount,
            }),
            Effect::PushCollateral { .. } | Effect::PushDsc { .. } | Effect::MintDsc { .. } => None,
        }
    }
}

/// Ordered effects of one action.
#[derive(Debug, Default, Clone)]
pub struct EffectPlan {
    effects: Vec<Effect>,
}

impl EffectPlan {
    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Effects in execution order.
    pub fn ordered(&self) -> Vec<Effect> {
        let mut effects = self.effects.clone();
        effects.sort_by_key(Effect::phase);
        effects
    }
}

/// Runs effects against the engine's collaborators.
pub struct Executor<'a> {
    pub engine: Address,
    pub dsc_address: Address,
    pub dsc: &'a dyn DebtToken,
    pub registry: &'a CollateralRegistry,
}

impl Executor<'_> {
    /// Run `plan`, unwinding the executed prefix if any effect fails.
    pub fn execute(&self, plan: &EffectPlan) -> Result<(), EngineError> {
        let effects = plan.ordered();
        if let Some((_, prefix)) = effects.split_last()
            && prefix.iter().any(|e| e.inverse(self.engine).is_none())
        {
            return Err(EngineError::Config(
                "effect plan has more than one irreversible effect".to_string(),
            ));
        }

        for (done, effect) in effects.iter().enumerate() {
            if let Err(err) = self.apply(effect) {
                self.unwind(&effects[..done]);
                return Err(err);
            }
        }
        Ok(())
    }

    fn unwind(&self, executed: &[Effect]) {
        for effect in executed.iter().rev() {
            let Some(inverse) = effect.inverse(self.engine) else {
                continue;
            };
            if let Err(e) = self.apply(&inverse) {
                tracing::error!(
                    effect = ?effect,
                    error = %e,
                    "Failed to unwind collaborator effect"
                );
            }
        }
    }

    fn apply(&self, effect: &Effect) -> Result<(), EngineError> {
        let dsc_failed = || EngineError::TransferFailed {
            token: self.dsc_address,
        };
        match *effect {
            Effect::PullCollateral {
                token,
                from,
                amount,
            } => {
                let entry = self.registry.entry(token)?;
                succeeded(
                    entry.token.transfer_from(self.engine, from, self.engine, amount),
                    || EngineError::TransferFailed { token },
                )
            }
            Effect::PushCollateral { token, to, amount } => {
                let entry = self.registry.entry(token)?;
                succeeded(entry.token.transfer(self.engine, to, amount), || {
                    EngineError::TransferFailed { token }
                })
            }
            Effect::PullDsc { from, amount } => succeeded(
                self.dsc
                    .transfer_from(self.engine, from, self.engine, amount),
                dsc_failed,
            ),
            Effect::PushDsc { to, amount } => {
                succeeded(self.dsc.transfer(self.engine, to, amount), dsc_failed)
            }
            Effect::BurnDsc { amount } => {
                succeeded(self.dsc.burn(self.engine, amount), || EngineError::BurnFailed)
            }
            Effect::MintDsc { to, amount } => succeeded(self.dsc.mint(self.engine, to, amount), || {
                EngineError::MintFailed
            }),
        }
    }
}

fn succeeded(ok: bool, err: impl FnOnce() -> EngineError) -> Result<(), EngineError> {
    if ok { Ok(()) } else { Err(err()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use alloy::primitives::I256;
    use pegvault_common::types::CollateralAsset;

    use crate::ledger::CollateralEntry;
    use crate::memory::{InMemoryDebtToken, InMemoryToken, MockPriceFeed};
    use crate::token::FungibleToken;

    const ENGINE: Address = Address::repeat_byte(0xee);
    const DSC: Address = Address::repeat_byte(0xd5);
    const WETH: Address = Address::repeat_byte(0x01);
    const ALICE: Address = Address::repeat_byte(0xa1);
    const BOB: Address = Address::repeat_byte(0xb0);

    struct Fixture {
        weth: Arc<InMemoryToken>,
        dsc: InMemoryDebtToken,
        registry: CollateralRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let weth = Arc::new(InMemoryToken::new("WETH"));
            let registry = CollateralRegistry::new(vec![CollateralEntry {
                asset: CollateralAsset {
                    token: WETH,
                    price_feed: Address::repeat_byte(0xf1),
                },
                token: weth.clone(),
                price_feed: Arc::new(MockPriceFeed::new(8, I256::ONE, 1)),
            }])
            .unwrap();
            Self {
                weth,
                dsc: InMemoryDebtToken::new(ENGINE),
                registry,
            }
        }

        fn executor(&self) -> Executor<'_> {
            Executor {
                engine: ENGINE,
                dsc_address: DSC,
                dsc: &self.dsc,
                registry: &self.registry,
            }
        }
    }

    fn amount(n: u64) -> U256 {
        U256::from(n)
    }

    #[test]
    fn test_plan_orders_by_phase() {
        let mut plan = EffectPlan::default();
        plan.push(Effect::PushCollateral {
            token: WETH,
            to: BOB,
            amount: amount(1),
        });
        plan.push(Effect::PullDsc {
            from: BOB,
            amount: amount(2),
        });
        plan.push(Effect::BurnDsc { amount: amount(2) });

        assert_eq!(
            plan.ordered(),
            vec![
                Effect::PullDsc {
                    from: BOB,
                    amount: amount(2)
                },
                Effect::BurnDsc { amount: amount(2) },
                Effect::PushCollateral {
                    token: WETH,
                    to: BOB,
                    amount: amount(1)
                },
            ]
        );
    }

    #[test]
    fn test_failed_push_unwinds_pull_and_burn() {
        let f = Fixture::new();
        assert!(f.dsc.mint(ENGINE, BOB, amount(100)));
        f.dsc.approve(BOB, ENGINE, amount(100));

        let mut plan = EffectPlan::default();
        plan.push(Effect::PushCollateral {
            token: WETH,
            to: BOB,
            amount: amount(5),
        });
        plan.push(Effect::PullDsc {
            from: BOB,
            amount: amount(40),
        });
        plan.push(Effect::BurnDsc { amount: amount(40) });

        // engine holds no WETH, so the final push fails
        let err = f.executor().execute(&plan).unwrap_err();
        assert_eq!(err, EngineError::TransferFailed { token: WETH });

        assert_eq!(f.dsc.balance_of(BOB), amount(100));
        assert_eq!(f.dsc.balance_of(ENGINE), U256::ZERO);
        assert_eq!(f.dsc.total_supply(), amount(100));
    }

    #[test]
    fn test_failed_mint_returns_collateral() {
        let f = Fixture::new();
        f.weth.mint_to(ALICE, amount(10));
        f.weth.approve(ALICE, ENGINE, amount(10));

        let mut plan = EffectPlan::default();
        plan.push(Effect::PullCollateral {
            token: WETH,
            from: ALICE,
            amount: amount(10),
        });
        plan.push(Effect::MintDsc {
            to: Address::ZERO,
            amount: amount(1),
        });

        assert_eq!(
            f.executor().execute(&plan).unwrap_err(),
            EngineError::MintFailed
        );
        assert_eq!(f.weth.balance_of(ALICE), amount(10));
        assert_eq!(f.weth.balance_of(ENGINE), U256::ZERO);
    }

    #[test]
    fn test_failed_dsc_pull_reports_dsc_token() {
        let f = Fixture::new();
        let mut plan = EffectPlan::default();
        plan.push(Effect::PullDsc {
            from: BOB,
            amount: amount(1),
        });
        assert_eq!(
            f.executor().execute(&plan).unwrap_err(),
            EngineError::TransferFailed { token: DSC }
        );
    }

    #[test]
    fn test_two_irreversible_effects_rejected() {
        let f = Fixture::new();
        let mut plan = EffectPlan::default();
        plan.push(Effect::MintDsc {
            to: ALICE,
            amount: amount(1),
        });
        plan.push(Effect::MintDsc {
            to: BOB,
            amount: amount(1),
        });
        assert!(matches!(
            f.executor().execute(&plan),
            Err(EngineError::Config(_))
        ));
        assert_eq!(f.dsc.total_supply(), U256::ZERO);
    }
}
