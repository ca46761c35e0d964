//! Gateway configuration
//!
//! Mirrors the recognised option surface (`sharedSecret`, `maxAgeSeconds`,
//! `hashAlg`, ...) with the same camelCase names and defaults. Everything is
//! validated once, before the first packet is processed.
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{IotivpError, Result};
use crate::policy::{RangeTable, ScorePolicy};

/// Environment variable overriding `sharedSecret` when loading from a file
pub const SHARED_SECRET_ENV: &str = "IOTIVP_SHARED_SECRET";

/// Longest digest any supported algorithm produces
pub const MAX_HASH_LEN: usize = 32;

/// Longest integer field the decoder reads (u64)
pub const MAX_INT_FIELD_LEN: usize = 8;

/// BLAKE2s keyed mode accepts keys of at most 32 bytes
pub const MAX_BLAKE2S_KEY_LEN: usize = 32;

/// Keyed digest used for packet integrity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE2s-256 in keyed mode (fast keyed hash)
    #[default]
    Blake2s,
    /// HMAC-SHA-256 (standard cryptographic hash)
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blake2s => "blake2s",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = IotivpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "blake2s" => Ok(Self::Blake2s),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(IotivpError::Configuration(format!(
                "unsupported hash algorithm: {}",
                other
            ))),
        }
    }
}

/// Shared secret, redacted in debug output and wiped on drop
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SharedSecret(String);

impl SharedSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<{} bytes redacted>)", self.0.len())
    }
}

/// Byte widths of the fixed packet fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketLayoutConfig {
    pub hash_len: usize,
    pub timestamp_len: usize,
    pub device_id_len: usize,
    pub nonce_len: usize,
}

impl Default for PacketLayoutConfig {
    fn default() -> Self {
        Self {
            hash_len: 4,
            timestamp_len: 2,
            device_id_len: 2,
            nonce_len: 1,
        }
    }
}

impl PacketLayoutConfig {
    /// Header + timestamp + device id + nonce
    pub fn prefix_len(&self) -> usize {
        1 + self.timestamp_len + self.device_id_len + self.nonce_len
    }

    /// Smallest valid packet: prefix plus hash, with an empty payload
    pub fn min_packet_len(&self) -> usize {
        self.prefix_len() + self.hash_len
    }

    pub fn validate(&self) -> Result<()> {
        if self.hash_len == 0 || self.hash_len > MAX_HASH_LEN {
            return Err(IotivpError::Configuration(format!(
                "hashLen must be between 1 and {}, got {}",
                MAX_HASH_LEN, self.hash_len
            )));
        }
        for (name, len) in [
            ("timestampLen", self.timestamp_len),
            ("deviceIdLen", self.device_id_len),
            ("nonceLen", self.nonce_len),
        ] {
            if len == 0 || len > MAX_INT_FIELD_LEN {
                return Err(IotivpError::Configuration(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_INT_FIELD_LEN, len
                )));
            }
        }
        Ok(())
    }
}

/// GatewayConfig - complete run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConfig {
    /// Required; serialized verbatim, so never log a serialized config
    pub shared_secret: SharedSecret,

    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,

    #[serde(default)]
    pub hash_alg: HashAlgorithm,

    #[serde(default = "default_hash_len")]
    pub hash_len: usize,

    #[serde(default = "default_timestamp_len")]
    pub timestamp_len: usize,

    #[serde(default = "default_device_id_len")]
    pub device_id_len: usize,

    #[serde(default = "default_nonce_len")]
    pub nonce_len: usize,

    #[serde(default)]
    pub drop_low_integrity: bool,

    /// Only consulted when `drop_low_integrity` is set
    #[serde(default = "default_integrity_threshold")]
    pub integrity_threshold: u8,

    #[serde(default)]
    pub score_policy: ScorePolicy,

    #[serde(default)]
    pub field_ranges: RangeTable,
}

fn default_max_age_seconds() -> u64 {
    crate::DEFAULT_MAX_AGE_SECONDS
}

fn default_hash_len() -> usize {
    PacketLayoutConfig::default().hash_len
}

fn default_timestamp_len() -> usize {
    PacketLayoutConfig::default().timestamp_len
}

fn default_device_id_len() -> usize {
    PacketLayoutConfig::default().device_id_len
}

fn default_nonce_len() -> usize {
    PacketLayoutConfig::default().nonce_len
}

fn default_integrity_threshold() -> u8 {
    crate::DEFAULT_INTEGRITY_THRESHOLD
}

impl GatewayConfig {
    /// Start a builder with every other option at its default
    pub fn builder(shared_secret: impl Into<String>) -> GatewayConfigBuilder {
        GatewayConfigBuilder::new(shared_secret)
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| IotivpError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, applying the `IOTIVP_SHARED_SECRET` override
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&text)
            .map_err(|e| IotivpError::Configuration(e.to_string()))?;
        if let Ok(secret) = std::env::var(SHARED_SECRET_ENV) {
            config.shared_secret = SharedSecret::new(secret);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn packet_layout(&self) -> PacketLayoutConfig {
        PacketLayoutConfig {
            hash_len: self.hash_len,
            timestamp_len: self.timestamp_len,
            device_id_len: self.device_id_len,
            nonce_len: self.nonce_len,
        }
    }

    /// Check every option; any failure is fatal for the run
    pub fn validate(&self) -> Result<()> {
        if self.shared_secret.is_empty() {
            return Err(IotivpError::Configuration("sharedSecret is required".to_string()));
        }
        if self.hash_alg == HashAlgorithm::Blake2s && self.shared_secret.len() > MAX_BLAKE2S_KEY_LEN {
            return Err(IotivpError::Configuration(format!(
                "blake2s keys are limited to {} bytes, sharedSecret has {}",
                MAX_BLAKE2S_KEY_LEN,
                self.shared_secret.len()
            )));
        }

        self.packet_layout().validate()?;

        // Narrow timestamps are resolved against the clock; the window must
        // stay inside half the wrap period to be unambiguous.
        if self.timestamp_len < MAX_INT_FIELD_LEN {
            let half_period = 1u64 << (8 * self.timestamp_len - 1);
            if self.max_age_seconds >= half_period {
                return Err(IotivpError::Configuration(format!(
                    "maxAgeSeconds {} needs more than timestampLen {} bytes (limit {})",
                    self.max_age_seconds,
                    self.timestamp_len,
                    half_period - 1
                )));
            }
        }

        if self.integrity_threshold > crate::policy::MAX_SCORE {
            return Err(IotivpError::Configuration(format!(
                "integrityThreshold must be 0-100, got {}",
                self.integrity_threshold
            )));
        }

        self.score_policy.validate()?;
        self.field_ranges.validate()
    }
}

/// GatewayConfigBuilder - Fluent interface for gateway configuration
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a builder with defaults for everything but the secret
    pub fn new(shared_secret: impl Into<String>) -> Self {
        let layout = PacketLayoutConfig::default();
        Self {
            config: GatewayConfig {
                shared_secret: SharedSecret::new(shared_secret),
                max_age_seconds: crate::DEFAULT_MAX_AGE_SECONDS,
                hash_alg: HashAlgorithm::default(),
                hash_len: layout.hash_len,
                timestamp_len: layout.timestamp_len,
                device_id_len: layout.device_id_len,
                nonce_len: layout.nonce_len,
                drop_low_integrity: false,
                integrity_threshold: crate::DEFAULT_INTEGRITY_THRESHOLD,
                score_policy: ScorePolicy::default(),
                field_ranges: RangeTable::default(),
            },
        }
    }

    pub fn with_max_age_seconds(mut self, seconds: u64) -> Self {
        self.config.max_age_seconds = seconds;
        self
    }

    pub fn with_hash_alg(mut self, alg: HashAlgorithm) -> Self {
        self.config.hash_alg = alg;
        self
    }

    /// Set all four field widths at once
    pub fn with_layout(mut self, layout: PacketLayoutConfig) -> Self {
        self.config.hash_len = layout.hash_len;
        self.config.timestamp_len = layout.timestamp_len;
        self.config.device_id_len = layout.device_id_len;
        self.config.nonce_len = layout.nonce_len;
        self
    }

    pub fn with_hash_len(mut self, len: usize) -> Self {
        self.config.hash_len = len;
        self
    }

    pub fn with_timestamp_len(mut self, len: usize) -> Self {
        self.config.timestamp_len = len;
        self
    }

    /// Enable the drop policy with the given minimum score
    pub fn with_drop_threshold(mut self, threshold: u8) -> Self {
        self.config.drop_low_integrity = true;
        self.config.integrity_threshold = threshold;
        self
    }

    pub fn with_score_policy(mut self, policy: ScorePolicy) -> Self {
        self.config.score_policy = policy;
        self
    }

    pub fn with_field_ranges(mut self, ranges: RangeTable) -> Self {
        self.config.field_ranges = ranges;
        self
    }

    pub fn get_max_age_seconds(&self) -> u64 {
        self.config.max_age_seconds
    }

    pub fn get_hash_alg(&self) -> HashAlgorithm {
        self.config.hash_alg
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<GatewayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
