//! Keyed packet digests
//!
//! `PacketSigner` keys its MAC once at construction; each digest clones the
//! keyed state, so per-packet hashing cannot fail. Comparison against an
//! embedded digest is constant-time.
use blake2::Blake2sMac256;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::{HashAlgorithm, SharedSecret, MAX_BLAKE2S_KEY_LEN, MAX_HASH_LEN};
use crate::errors::{IotivpError, Result};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
enum KeyedMac {
    Blake2s(Blake2sMac256),
    Sha256(HmacSha256),
}

/// Computes and checks truncated keyed digests
#[derive(Clone)]
pub struct PacketSigner {
    mac: KeyedMac,
    algorithm: HashAlgorithm,
    hash_len: usize,
}

impl PacketSigner {
    /// Key the selected algorithm
    ///
    /// # Errors
    /// `Configuration` for an empty secret, a BLAKE2s key over 32 bytes, or a
    /// `hash_len` outside 1..=32.
    pub fn new(algorithm: HashAlgorithm, secret: &SharedSecret, hash_len: usize) -> Result<Self> {
        if secret.is_empty() {
            return Err(IotivpError::Configuration("sharedSecret is required".to_string()));
        }
        if hash_len == 0 || hash_len > MAX_HASH_LEN {
            return Err(IotivpError::Configuration(format!(
                "hashLen must be between 1 and {}, got {}",
                MAX_HASH_LEN, hash_len
            )));
        }

        let mac = match algorithm {
            HashAlgorithm::Blake2s => {
                if secret.len() > MAX_BLAKE2S_KEY_LEN {
                    return Err(IotivpError::Configuration(format!(
                        "blake2s keys are limited to {} bytes",
                        MAX_BLAKE2S_KEY_LEN
                    )));
                }
                let mac = <Blake2sMac256 as KeyInit>::new_from_slice(secret.as_bytes())
                    .map_err(|e| IotivpError::Configuration(format!("blake2s key rejected: {}", e)))?;
                KeyedMac::Blake2s(mac)
            }
            HashAlgorithm::Sha256 => {
                let mac = <HmacSha256 as KeyInit>::new_from_slice(secret.as_bytes())
                    .map_err(|e| IotivpError::Configuration(format!("hmac key rejected: {}", e)))?;
                KeyedMac::Sha256(mac)
            }
        };

        Ok(Self {
            mac,
            algorithm,
            hash_len,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hash_len(&self) -> usize {
        self.hash_len
    }

    /// Full-length digest over `data`
    fn full_digest(&self, data: &[u8]) -> [u8; 32] {
        let mut out = [0u8; 32];
        match &self.mac {
            KeyedMac::Blake2s(keyed) => {
                let mut mac = keyed.clone();
                mac.update(data);
                out.copy_from_slice(&mac.finalize().into_bytes());
            }
            KeyedMac::Sha256(keyed) => {
                let mut mac = keyed.clone();
                mac.update(data);
                out.copy_from_slice(&mac.finalize().into_bytes());
            }
        }
        out
    }

    /// Digest over `data`, truncated to `hash_len` bytes
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.full_digest(data)[..self.hash_len].to_vec()
    }

    /// Constant-time check of an embedded digest
    ///
    /// A wrong-length `embedded` never matches.
    pub fn matches(&self, data: &[u8], embedded: &[u8]) -> bool {
        let full = self.full_digest(data);
        constant_time_eq(&full[..self.hash_len], embedded)
    }
}

/// Fixed-time byte comparison; lengths are public, contents are not
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
