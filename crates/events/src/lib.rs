//! EVM log encoding and decoding of position engine events.
//!
//! Logs are ABI-compatible with the events a deployed engine contract emits,
//! so indexers can consume engine output and on-chain logs alike.

pub mod collateral;

use alloy::primitives::{Address, B256, Log};
use pegvault_common::types::EngineEvent;

/// Trait that all engine event decoders must implement.
pub trait EventDecoder: Send + Sync {
    /// Returns the event topic signatures this decoder handles.
    fn event_signatures(&self) -> Vec<B256>;

    /// Attempt to decode a raw log entry into an `EngineEvent`.
    /// Returns `None` if this decoder doesn't handle the log's topic.
    fn decode(&self, log: &Log) -> Option<EngineEvent>;

    /// Human-readable name for this decoder.
    fn name(&self) -> &'static str;
}

/// Encode `event` as the log the engine at `engine` emits for it.
pub fn encode_event(engine: Address, event: &EngineEvent) -> Log {
    Log {
        address: engine,
        data: collateral::encode_log_data(event),
    }
}

/// Encode a committed event log in order.
pub fn encode_events(engine: Address, events: &[EngineEvent]) -> Vec<Log> {
    events.iter().map(|e| encode_event(engine, e)).collect()
}

/// Registry of all available decoders.
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn EventDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self {
            decoders: vec![Box::new(collateral::CollateralDecoder::new())],
        }
    }

    /// Add a decoder after the built-in ones.
    pub fn with_decoder(mut self, decoder: Box<dyn EventDecoder>) -> Self {
        self.decoders.push(decoder);
        self
    }

    /// Try to decode a log using all registered decoders.
    /// Returns the first successful decode, or `None`.
    pub fn decode(&self, log: &Log) -> Option<EngineEvent> {
        for decoder in &self.decoders {
            if let Some(event) = decoder.decode(log) {
                tracing::debug!(
                    decoder = decoder.name(),
                    event_type = %event.event_type(),
                    "Decoded event"
                );
                return Some(event);
            }
        }
        None
    }

    /// Like [`DecoderRegistry::decode`], ignoring logs not emitted by `engine`.
    pub fn decode_from(&self, engine: Address, log: &Log) -> Option<EngineEvent> {
        if log.address != engine {
            return None;
        }
        self.decode(log)
    }

    /// Get all event signatures across all registered decoders.
    pub fn all_signatures(&self) -> Vec<B256> {
        self.decoders
            .iter()
            .flat_map(|d| d.event_signatures())
            .collect()
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
