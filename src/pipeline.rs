//! Gateway pipeline - per-item decode, verify and drop policy
//!
//! Items are JSON objects carrying an optional `packet_hex`. Each is
//! processed in input order; the result is attached to the item as
//! `core_packet` + `verify_result`. When the packet could not be read the
//! item gets `verify_error` and a zero-score `verify_result` instead, so the
//! drop policy filters it like any other low-integrity item. A bad item
//! never aborts the batch.
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::contracts::{CorePacket, VerifyResult};
use crate::decoder::{decode_hex, Decoder};
use crate::errors::{IotivpError, Result};
use crate::layouts::LayoutRegistry;
use crate::replay::{MemoryReplayState, ReplayStore};
use crate::verifier::{unix_now, Verifier};

/// One gateway record
pub type Item = Map<String, Value>;

/// Input key holding the hex-encoded packet
pub const PACKET_HEX_KEY: &str = "packet_hex";
/// Output key for the decoded packet
pub const CORE_PACKET_KEY: &str = "core_packet";
/// Output key for the verdict
pub const VERIFY_RESULT_KEY: &str = "verify_result";
/// Output key for per-item failures
pub const VERIFY_ERROR_KEY: &str = "verify_error";

/// Decoded packet together with its verdict
#[derive(Debug, Clone, PartialEq)]
pub struct Verified {
    pub packet: CorePacket,
    pub result: VerifyResult,
}

/// What happened to one item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// Scored and forwarded with results attached
    Forwarded { item: Item, valid: bool },
    /// Scored below the drop threshold; not forwarded
    Dropped {
        integrity_score: u8,
        /// Set when the packet could not be decoded
        error: Option<IotivpError>,
    },
    /// Could not be decoded; forwarded with `verify_error`
    Failed { item: Item, error: IotivpError },
}

/// Counters for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchMetrics {
    pub received: usize,
    pub forwarded: usize,
    pub dropped: usize,
    /// Forwarded with `verify_error`
    pub errored: usize,
    /// Forwarded with `valid = false`
    pub invalid: usize,
    pub total_us: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Forwarded items, in input order
    pub items: Vec<Item>,
    pub metrics: BatchMetrics,
}

/// Gateway - decoder, verifier and drop policy for a run
pub struct Gateway {
    decoder: Decoder,
    verifier: Verifier,
    drop_low_integrity: bool,
    integrity_threshold: u8,
}

impl Gateway {
    /// Build a gateway with an explicit layout registry and replay store
    ///
    /// # Errors
    /// `Configuration` when `config` is invalid. Nothing is processed.
    pub fn new(config: &GatewayConfig, registry: LayoutRegistry, replay: Arc<dyn ReplayStore>) -> Result<Self> {
        let verifier = Verifier::from_config(config, replay)?;
        let decoder = Decoder::new(config.packet_layout(), registry)?;
        Ok(Self {
            decoder,
            verifier,
            drop_low_integrity: config.drop_low_integrity,
            integrity_threshold: config.integrity_threshold,
        })
    }

    /// Built-in layouts and a fresh in-memory replay store
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Self::new(config, LayoutRegistry::default(), Arc::new(MemoryReplayState::new()))
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Whether the drop policy removes an item with this verdict
    pub fn should_drop(&self, result: &VerifyResult) -> bool {
        self.drop_low_integrity && result.integrity_score < self.integrity_threshold
    }

    /// Hex text -> bytes -> packet -> verdict
    pub fn inspect_at(&self, packet_hex: &str, now: u64) -> Result<Verified> {
        let raw = decode_hex(packet_hex)?;
        self.inspect_bytes_at(&raw, now)
    }

    pub fn inspect_bytes_at(&self, raw: &[u8], now: u64) -> Result<Verified> {
        let packet = self.decoder.decode(raw)?;
        let (signed, _) = self.decoder.split_signed(raw)?;
        let result = self.verifier.verify_at(&packet, signed, now);
        Ok(Verified { packet, result })
    }

    fn read_packet_hex(item: &Item) -> Result<&str> {
        match item.get(PACKET_HEX_KEY) {
            None | Some(Value::Null) => Err(IotivpError::MissingPacket),
            Some(Value::String(text)) => Ok(text.as_str()),
            Some(_) => Err(IotivpError::InvalidHex("packet_hex must be a string".to_string())),
        }
    }

    fn verify_item(&self, item: &Item, now: u64) -> Result<(Verified, Value)> {
        let verified = self.inspect_at(Self::read_packet_hex(item)?, now)?;
        let packet_json = serde_json::to_value(&verified.packet)
            .map_err(|e| IotivpError::SerializationError(e.to_string()))?;
        Ok((verified, packet_json))
    }

    /// Process one item at time `now`
    pub fn process_item_at(&self, mut item: Item, now: u64) -> ItemOutcome {
        match self.verify_item(&item, now) {
            Ok((verified, packet_json)) => {
                if self.should_drop(&verified.result) {
                    return ItemOutcome::Dropped {
                        integrity_score: verified.result.integrity_score,
                        error: None,
                    };
                }
                let valid = verified.result.valid;
                let result_json = match serde_json::to_value(&verified.result) {
                    Ok(value) => value,
                    Err(e) => {
                        let error = IotivpError::SerializationError(e.to_string());
                        return self.reject(item, error);
                    }
                };
                item.insert(CORE_PACKET_KEY.to_string(), packet_json);
                item.insert(VERIFY_RESULT_KEY.to_string(), result_json);
                ItemOutcome::Forwarded { item, valid }
            }
            Err(error) => self.reject(item, error),
        }
    }

    /// Unverifiable items score 0 and go through the drop policy
    fn reject(&self, mut item: Item, error: IotivpError) -> ItemOutcome {
        let result = VerifyResult::unverified();
        if self.should_drop(&result) {
            return ItemOutcome::Dropped {
                integrity_score: result.integrity_score,
                error: Some(error),
            };
        }

        if let Ok(result) = serde_json::to_value(&result) {
            item.insert(VERIFY_RESULT_KEY.to_string(), result);
        }
        item.insert(
            VERIFY_ERROR_KEY.to_string(),
            json!({ "kind": error.kind(), "message": error.to_string() }),
        );
        ItemOutcome::Failed { item, error }
    }

    /// Process a batch against the system clock
    pub fn process_batch(&self, items: Vec<Item>) -> BatchOutcome {
        self.process_batch_at(items, unix_now())
    }

    /// Process a batch in input order; earlier items win replay ties
    pub fn process_batch_at(&self, items: Vec<Item>, now: u64) -> BatchOutcome {
        let start = Instant::now();
        let mut metrics = BatchMetrics {
            received: items.len(),
            ..BatchMetrics::default()
        };
        let mut forwarded = Vec::with_capacity(items.len());

        for (index, item) in items.into_iter().enumerate() {
            match self.process_item_at(item, now) {
                ItemOutcome::Forwarded { item, valid } => {
                    if !valid {
                        warn!(index, "Forwarding packet that failed integrity checks");
                        metrics.invalid += 1;
                    }
                    forwarded.push(item);
                }
                ItemOutcome::Dropped { integrity_score, error: None } => {
                    debug!(index, integrity_score, threshold = self.integrity_threshold, "Dropping low-integrity item");
                    metrics.dropped += 1;
                }
                ItemOutcome::Dropped { error: Some(error), .. } => {
                    warn!(index, kind = error.kind(), error = %error, "Dropping item that could not be verified");
                    metrics.dropped += 1;
                }
                ItemOutcome::Failed { item, error } => {
                    warn!(index, kind = error.kind(), error = %error, "Item could not be verified");
                    metrics.errored += 1;
                    forwarded.push(item);
                }
            }
        }

        metrics.forwarded = forwarded.len();
        metrics.total_us = start.elapsed().as_micros() as u64;

        info!(
            received = metrics.received,
            forwarded = metrics.forwarded,
            dropped = metrics.dropped,
            errored = metrics.errored,
            invalid = metrics.invalid,
            total_us = metrics.total_us,
            "Batch processed"
        );

        BatchOutcome {
            items: forwarded,
            metrics,
        }
    }
}
