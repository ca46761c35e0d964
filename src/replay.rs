//! Replay state - time-bounded memory of `(device_id, nonce)` pairs
//!
//! The verifier owns a store through the [`ReplayStore`] trait so tests can
//! inject a fresh instance per case and deployments can choose the backing.
//! The in-memory store serializes every lookup/insert through one mutex: the
//! first caller to present a pair wins "first seen".
//!
//! # Eviction
//! - Entries for the queried device older than the window are dropped on
//!   every call
//! - A full sweep over all devices runs at most every `gc_interval_secs`
//!
//! # Persistence
//! [`ReplaySnapshot`] is archived with rkyv so a gateway can carry its replay
//! memory across restarts without reopening the window.
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rkyv::{check_archived_root, to_bytes, AlignedVec, Archive, Deserialize, Serialize};

use crate::errors::{IotivpError, Result};

/// Storage for previously seen nonces
pub trait ReplayStore: Send + Sync {
    /// Record `(device_id, nonce)` seen at `now`
    ///
    /// Returns `true` when the pair was already seen within the last
    /// `window_secs` seconds; otherwise records it and returns `false`.
    fn check_and_record(&self, device_id: u64, nonce: u64, now: u64, window_secs: u64) -> bool;

    /// Number of pairs currently remembered
    fn tracked(&self) -> usize;
}

/// One remembered pair
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct ReplayEntry {
    pub device_id: u64,
    pub nonce: u64,
    /// Gateway time the pair was first seen
    pub seen_at: u64,
}

/// Serializable image of a [`MemoryReplayState`]
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct ReplaySnapshot {
    pub entries: Vec<ReplayEntry>,
}

impl ReplaySnapshot {
    /// Archive with rkyv
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_bytes::<_, 4096>(self)
            .map(|aligned_vec| aligned_vec.to_vec())
            .map_err(|_| IotivpError::SerializationError(
                "Failed to serialize replay snapshot".to_string()
            ))
    }

    /// Validate and load an archived snapshot
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        // Archives must be read from aligned memory
        let mut aligned = AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);

        let archived = check_archived_root::<ReplaySnapshot>(&aligned)
            .map_err(|_| IotivpError::DeserializationError(
                "Failed to validate replay snapshot structure".to_string()
            ))?;

        archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|_| IotivpError::DeserializationError(
                "Failed to restore replay snapshot".to_string()
            ))
    }
}

struct ReplayInner {
    devices: HashMap<u64, HashMap<u64, u64>>,
    last_gc: u64,
}

/// In-memory, mutex-guarded replay store
pub struct MemoryReplayState {
    inner: Mutex<ReplayInner>,
    gc_interval_secs: u64,
}

impl MemoryReplayState {
    /// Default interval between full sweeps
    pub const DEFAULT_GC_INTERVAL: u64 = 10;

    pub fn new() -> Self {
        Self::with_gc_interval(Self::DEFAULT_GC_INTERVAL)
    }

    pub fn with_gc_interval(gc_interval_secs: u64) -> Self {
        Self {
            inner: Mutex::new(ReplayInner {
                devices: HashMap::new(),
                last_gc: 0,
            }),
            gc_interval_secs,
        }
    }

    // The map holds plain data, so a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, ReplayInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a pair is currently remembered (no eviction, no insert)
    pub fn contains(&self, device_id: u64, nonce: u64) -> bool {
        self.lock()
            .devices
            .get(&device_id)
            .is_some_and(|nonces| nonces.contains_key(&nonce))
    }

    /// Copy of all remembered pairs, sorted by device then nonce
    pub fn snapshot(&self) -> ReplaySnapshot {
        let inner = self.lock();
        let mut entries: Vec<ReplayEntry> = inner
            .devices
            .iter()
            .flat_map(|(&device_id, nonces)| {
                nonces.iter().map(move |(&nonce, &seen_at)| ReplayEntry {
                    device_id,
                    nonce,
                    seen_at,
                })
            })
            .collect();
        entries.sort_by_key(|e| (e.device_id, e.nonce));
        ReplaySnapshot { entries }
    }

    /// Rebuild a store from a snapshot
    pub fn restore(snapshot: &ReplaySnapshot) -> Self {
        let state = Self::new();
        {
            let mut inner = state.lock();
            for entry in &snapshot.entries {
                inner
                    .devices
                    .entry(entry.device_id)
                    .or_default()
                    .insert(entry.nonce, entry.seen_at);
            }
        }
        state
    }

    /// Write an archived snapshot to `path`
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.snapshot().to_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Load a store from an archived snapshot at `path`
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self::restore(&ReplaySnapshot::from_bytes(&bytes)?))
    }
}

impl Default for MemoryReplayState {
    fn default() -> Self {
        Self::new()
    }
}

fn is_stale(seen_at: u64, now: u64, window_secs: u64) -> bool {
    now.saturating_sub(seen_at) > window_secs
}

impl ReplayStore for MemoryReplayState {
    fn check_and_record(&self, device_id: u64, nonce: u64, now: u64, window_secs: u64) -> bool {
        let mut inner = self.lock();

        if now.saturating_sub(inner.last_gc) > self.gc_interval_secs {
            inner.devices.retain(|_, nonces| {
                nonces.retain(|_, seen_at| !is_stale(*seen_at, now, window_secs));
                !nonces.is_empty()
            });
            inner.last_gc = now;
        }

        let nonces = inner.devices.entry(device_id).or_default();
        nonces.retain(|_, seen_at| !is_stale(*seen_at, now, window_secs));

        if nonces.contains_key(&nonce) {
            return true;
        }
        nonces.insert(nonce, now);
        false
    }

    fn tracked(&self) -> usize {
        self.lock().devices.values().map(HashMap::len).sum()
    }
}
