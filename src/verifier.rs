//! Integrity verifier
//!
//! Produces a [`VerifyResult`] for a decoded packet:
//! 1. Recompute the truncated keyed digest over the signed bytes and compare
//!    it with the embedded one in constant time
//! 2. Check timestamp freshness (too old and future timestamps both expire)
//! 3. Check and record the `(device_id, nonce)` pair in the replay store
//! 4. Check readings against the plausible-range table
//! 5. Score the flags
//!
//! The replay store is recorded on every attempt, whatever the other checks
//! say, so a rejected packet cannot be replayed later inside the window.
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::config::{GatewayConfig, MAX_INT_FIELD_LEN};
use crate::contracts::{CorePacket, VerifyFlags, VerifyResult};
use crate::errors::Result;
use crate::policy::{RangeTable, ScorePolicy};
use crate::replay::ReplayStore;
use crate::signer::PacketSigner;

/// Current Unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Map a wire timestamp to epoch seconds
///
/// Timestamps narrower than 8 bytes carry only the low-order bits of the
/// epoch time; the result is the value with those low bits that lies
/// closest to `now`.
pub fn resolve_timestamp(wire: u64, width: usize, now: u64) -> i128 {
    if width >= MAX_INT_FIELD_LEN {
        return i128::from(wire);
    }

    let period = 1i128 << (8 * width);
    let half = period / 2;
    let now = i128::from(now);
    let low = i128::from(wire) % period;

    let mut candidate = now - now.rem_euclid(period) + low;
    if candidate - now > half {
        candidate -= period;
    } else if now - candidate > half {
        candidate += period;
    }
    candidate
}

/// Freshness and scoring parameters
#[derive(Debug, Clone, PartialEq)]
pub struct VerifierConfig {
    /// Freshness window, also the replay window
    pub max_age_seconds: u64,
    /// Wire width of the timestamp, needed to resolve narrow timestamps
    pub timestamp_len: usize,
    pub field_ranges: RangeTable,
    pub score_policy: ScorePolicy,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: crate::DEFAULT_MAX_AGE_SECONDS,
            timestamp_len: 2,
            field_ranges: RangeTable::default(),
            score_policy: ScorePolicy::default(),
        }
    }
}

impl From<&GatewayConfig> for VerifierConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_age_seconds: config.max_age_seconds,
            timestamp_len: config.timestamp_len,
            field_ranges: config.field_ranges.clone(),
            score_policy: config.score_policy,
        }
    }
}

/// Verifier - owns the signer, policy tables and replay store
pub struct Verifier {
    signer: PacketSigner,
    config: VerifierConfig,
    replay: Arc<dyn ReplayStore>,
}

impl Verifier {
    pub fn new(signer: PacketSigner, config: VerifierConfig, replay: Arc<dyn ReplayStore>) -> Self {
        Self {
            signer,
            config,
            replay,
        }
    }

    /// Validate `config` and key the signer
    ///
    /// # Errors
    /// `Configuration` for any invalid option; raised before any packet is seen.
    pub fn from_config(config: &GatewayConfig, replay: Arc<dyn ReplayStore>) -> Result<Self> {
        config.validate()?;
        let signer = PacketSigner::new(config.hash_alg, &config.shared_secret, config.hash_len)?;
        Ok(Self::new(signer, VerifierConfig::from(config), replay))
    }

    pub fn signer(&self) -> &PacketSigner {
        &self.signer
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn replay_store(&self) -> &Arc<dyn ReplayStore> {
        &self.replay
    }

    /// Verify against the system clock
    pub fn verify(&self, packet: &CorePacket, raw_before_hash: &[u8]) -> VerifyResult {
        self.verify_at(packet, raw_before_hash, unix_now())
    }

    /// Verify with an explicit `now` (Unix seconds)
    pub fn verify_at(&self, packet: &CorePacket, raw_before_hash: &[u8], now: u64) -> VerifyResult {
        let hash_mismatch = !self.signer.matches(raw_before_hash, &packet.hash);
        let timestamp_expired = self.is_expired(packet.timestamp, now);
        let nonce_reuse = self.replay.check_and_record(
            packet.device_id,
            packet.nonce,
            now,
            self.config.max_age_seconds,
        );
        let value_out_of_range = self.config.field_ranges.out_of_range(&packet.fields);

        let flags = VerifyFlags {
            hash_mismatch,
            timestamp_expired,
            nonce_reuse,
            value_out_of_range,
        };
        let score = self.config.score_policy.score(&flags);
        let result = VerifyResult::from_flags(flags, score);

        debug!(
            device_id = packet.device_id,
            nonce = packet.nonce,
            valid = result.valid,
            integrity_score = result.integrity_score,
            "Packet verified"
        );

        result
    }

    /// `age > max_age` or `age < 0`
    pub fn is_expired(&self, wire_timestamp: u64, now: u64) -> bool {
        let timestamp = resolve_timestamp(wire_timestamp, self.config.timestamp_len, now);
        let age = i128::from(now) - timestamp;
        age < 0 || age > i128::from(self.config.max_age_seconds)
    }
}
