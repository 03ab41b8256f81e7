use alloy::primitives::{B256, Log, LogData};
use alloy::sol;
use alloy::sol_types::SolEvent;
use pegvault_common::types::EngineEvent;

use crate::EventDecoder;

sol! {
    /// Emitted when a user moves collateral into engine custody.
    event CollateralDeposited(address indexed user, address indexed token, uint256 indexed amount);

    /// Emitted when collateral leaves a position, either to its owner or to a liquidator.
    event CollateralRedeemed(
        address indexed redeemedFrom,
        address indexed redeemedTo,
        address indexed token,
        uint256 amount
    );
}

pub(crate) fn encode_log_data(event: &EngineEvent) -> LogData {
    match *event {
        EngineEvent::CollateralDeposited {
            user,
            token,
            amount,
        } => CollateralDeposited {
            user,
            token,
            amount,
        }
        .encode_log_data(),
        EngineEvent::CollateralRedeemed {
            redeemed_from,
            redeemed_to,
            token,
            amount,
        } => CollateralRedeemed {
            redeemedFrom: redeemed_from,
            redeemedTo: redeemed_to,
            token,
            amount,
        }
        .encode_log_data(),
    }
}

/// Collateral movement event decoder.
///
/// Handles:
/// - `CollateralDeposited(address indexed user, address indexed token, uint256 indexed amount)`
/// - `CollateralRedeemed(address indexed redeemedFrom, address indexed redeemedTo, address indexed token, uint256 amount)`
pub struct CollateralDecoder;

impl CollateralDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CollateralDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for CollateralDecoder {
    fn event_signatures(&self) -> Vec<B256> {
        vec![
            CollateralDeposited::SIGNATURE_HASH,
            CollateralRedeemed::SIGNATURE_HASH,
        ]
    }

    fn decode(&self, log: &Log) -> Option<EngineEvent> {
        let topic0 = *log.topics().first()?;

        if topic0 == CollateralDeposited::SIGNATURE_HASH {
            let decoded = CollateralDeposited::decode_log_data(&log.data)
                .inspect_err(|e| tracing::warn!(error = %e, "Malformed CollateralDeposited log"))
                .ok()?;
            Some(EngineEvent::CollateralDeposited {
                user: decoded.user,
                token: decoded.token,
                amount: decoded.amount,
            })
        } else if topic0 == CollateralRedeemed::SIGNATURE_HASH {
            let decoded = CollateralRedeemed::decode_log_data(&log.data)
                .inspect_err(|e| tracing::warn!(error = %e, "Malformed CollateralRedeemed log"))
                .ok()?;
            Some(EngineEvent::CollateralRedeemed {
                redeemed_from: decoded.redeemedFrom,
                redeemed_to: decoded.redeemedTo,
                token: decoded.token,
                amount: decoded.amount,
            })
        } else {
            None
        }
    }

    fn name(&self) -> &'static str {
        "Collateral"
    }
}
