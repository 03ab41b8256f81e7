pub mod constants;
pub mod effects;
pub mod engine;
pub mod guard;
pub mod health;
pub mod ledger;
pub mod memory;
pub mod oracle;
pub mod token;
pub mod valuation;

pub use engine::{Collaborators, PositionEngine};
pub use oracle::{Clock, ManualClock, PriceFeed, SystemClock};
pub use token::{DebtToken, FungibleToken};
