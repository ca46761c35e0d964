//! Operator-tunable verification policy tables
//!
//! The score penalties and plausible value ranges are policy, not protocol:
//! both ship with defaults and can be replaced from configuration.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::contracts::{Fields, VerifyFlags};
use crate::errors::{IotivpError, Result};

/// Maximum integrity score
pub const MAX_SCORE: u8 = 100;

/// Per-flag penalties subtracted from [`MAX_SCORE`]
///
/// Penalties are unsigned and subtracted with saturation, so raising another
/// flag can never increase the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ScorePolicy {
    pub hash_mismatch: u8,
    pub timestamp_expired: u8,
    pub nonce_reuse: u8,
    /// Charged once per out-of-range field
    pub out_of_range: u8,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self {
            hash_mismatch: 60,
            timestamp_expired: 35,
            nonce_reuse: 30,
            out_of_range: 10,
        }
    }
}

impl ScorePolicy {
    /// Deterministic score for a set of flags, clamped to 0..=100
    pub fn score(&self, flags: &VerifyFlags) -> u8 {
        let mut penalty: u32 = 0;
        if flags.hash_mismatch {
            penalty += u32::from(self.hash_mismatch);
        }
        if flags.timestamp_expired {
            penalty += u32::from(self.timestamp_expired);
        }
        if flags.nonce_reuse {
            penalty += u32::from(self.nonce_reuse);
        }
        let out_of_range = u32::try_from(flags.value_out_of_range.len()).unwrap_or(u32::MAX);
        penalty = penalty.saturating_add(out_of_range.saturating_mul(u32::from(self.out_of_range)));

        u32::from(MAX_SCORE).saturating_sub(penalty) as u8
    }

    /// Penalties must be ordered hash >= timestamp >= nonce >= out-of-range
    pub fn validate(&self) -> Result<()> {
        let ordered = [
            ("hashMismatch", self.hash_mismatch),
            ("timestampExpired", self.timestamp_expired),
            ("nonceReuse", self.nonce_reuse),
            ("outOfRange", self.out_of_range),
        ];
        for pair in ordered.windows(2) {
            let ((heavier, a), (lighter, b)) = (pair[0], pair[1]);
            if a < b {
                return Err(IotivpError::Configuration(format!(
                    "scorePolicy.{} ({}) must not exceed scorePolicy.{} ({})",
                    lighter, b, heavier, a
                )));
            }
        }
        Ok(())
    }
}

/// Inclusive plausible range for one reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRange {
    pub min: f64,
    pub max: f64,
}

impl FieldRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Field name -> plausible range
///
/// Readings with no registered range are not checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeTable {
    ranges: BTreeMap<String, FieldRange>,
}

impl Default for RangeTable {
    fn default() -> Self {
        Self::empty()
            .with_range("temperature", -40.0, 85.0)
            .with_range("humidity", 0.0, 100.0)
            .with_range("battery", 0.0, 100.0)
            .with_range("pressure", 300.0, 1100.0)
    }
}

impl RangeTable {
    /// Table with no ranges at all
    pub fn empty() -> Self {
        Self { ranges: BTreeMap::new() }
    }

    /// Register (or replace) the range for `name`
    pub fn with_range(mut self, name: &str, min: f64, max: f64) -> Self {
        self.ranges.insert(name.to_string(), FieldRange::new(min, max));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldRange> {
        self.ranges.get(name)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Names of readings outside their range, in field order
    ///
    /// NaN readings never satisfy a range and are reported.
    pub fn out_of_range(&self, fields: &Fields) -> Vec<String> {
        fields
            .iter()
            .filter(|(name, value)| {
                self.ranges
                    .get(name.as_str())
                    .is_some_and(|range| !range.contains(**value))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Reject inverted or non-finite bounds
    pub fn validate(&self) -> Result<()> {
        for (name, range) in &self.ranges {
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(IotivpError::Configuration(format!(
                    "invalid range for field {}: [{}, {}]",
                    name, range.min, range.max
                )));
            }
        }
        Ok(())
    }
}
