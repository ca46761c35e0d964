//! Core data structures for the IoTIVP protocol
//!
//! `CorePacket` is the decoded form of a wire packet and `VerifyResult` the
//! verdict produced for it. Both are created once per call and never mutated
//! afterwards; they serialize to the JSON records attached to gateway items.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Decoded sensor readings, keyed by field name
///
/// Ordered so that output records and out-of-range lists are deterministic.
pub type Fields = BTreeMap<String, f64>;

/// CorePacket - Structured form of one IoTIVP binary packet
///
/// # Wire Layout (big-endian integers)
/// - header: 1 byte, selects the field layout
/// - timestamp: `timestamp_len` bytes, epoch seconds (low-order bits when narrow)
/// - device_id: `device_id_len` bytes
/// - nonce: `nonce_len` bytes
/// - fields: layout-specific payload
/// - hash: trailing `hash_len` bytes of truncated keyed digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorePacket {
    /// Layout tag of the fields payload
    pub header: u8,

    /// Timestamp exactly as carried on the wire
    pub timestamp: u64,

    /// Sending device identifier
    pub device_id: u64,

    /// Per-packet nonce used for replay detection
    pub nonce: u64,

    /// Sensor readings decoded by the header's layout
    pub fields: Fields,

    /// Embedded truncated digest, rendered as lowercase hex
    #[serde(with = "hex::serde")]
    pub hash: Vec<u8>,
}

impl CorePacket {
    /// Create an unsigned packet (empty hash), as built on the device side
    /// before the encoder appends the digest
    pub fn new(header: u8, timestamp: u64, device_id: u64, nonce: u64, fields: Fields) -> Self {
        Self {
            header,
            timestamp,
            device_id,
            nonce,
            fields,
            hash: Vec::new(),
        }
    }

    /// Builder-style helper to add one reading
    pub fn with_field(mut self, name: &str, value: f64) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Embedded digest as lowercase hex
    pub fn hash_hex(&self) -> String {
        hex::encode(&self.hash)
    }
}

/// Diagnostic bits raised during verification
///
/// These are never errors: they are always produced and summarised by the
/// integrity score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyFlags {
    /// Recomputed digest differs from the embedded one
    pub hash_mismatch: bool,

    /// Packet is older than the freshness window, or from the future
    pub timestamp_expired: bool,

    /// Device/nonce pair was already seen inside the replay window
    pub nonce_reuse: bool,

    /// Names of readings outside their registered plausible range
    pub value_out_of_range: Vec<String>,
}

impl VerifyFlags {
    /// Whether any integrity flag is raised (range anomalies excluded)
    pub fn has_integrity_breach(&self) -> bool {
        self.hash_mismatch || self.timestamp_expired || self.nonce_reuse
    }
}

/// VerifyResult - Verdict for one decoded packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    /// No integrity flag raised
    pub valid: bool,

    /// 0-100 confidence derived from the flags
    pub integrity_score: u8,

    /// Individual diagnostics
    pub flags: VerifyFlags,
}

impl VerifyResult {
    /// Build a result from flags and an already computed score
    ///
    /// Validity ignores out-of-range readings: sensor anomalies are
    /// informational, integrity breaches are not.
    pub fn from_flags(flags: VerifyFlags, integrity_score: u8) -> Self {
        Self {
            valid: !flags.has_integrity_breach(),
            integrity_score: integrity_score.min(100),
            flags,
        }
    }

    /// Verdict for a packet that could not be decoded: invalid, score 0
    pub fn unverified() -> Self {
        Self {
            valid: false,
            integrity_score: 0,
            flags: VerifyFlags::default(),
        }
    }
}
