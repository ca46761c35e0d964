//! IoTIVP Core - Gateway-side integrity verification for IoT sensor packets
//!
//! **Creator**: Shayan Golmezerji
//! **License**: Creative Commons Attribution 4.0 International (CC BY 4.0)
//!
//! This library decodes compact IoTIVP binary packets sent by sensor devices
//! and verifies them at the gateway: truncated keyed digest, timestamp
//! freshness, nonce replay and plausible sensor ranges, summarised as an
//! integrity score.
//!
//! # Design Principles
//! - Decoding is pure; the replay store is the only shared mutable state
//! - Payload layouts are registered per header byte, never hard-coded
//! - Digests are compared in constant time
//! - A bad packet never aborts a batch; a bad configuration aborts the run

pub mod errors;
pub mod config;
pub mod contracts;
pub mod policy;
pub mod wire;
pub mod layouts;
pub mod signer;
pub mod decoder;
pub mod encoder;
pub mod replay;
pub mod verifier;
pub mod pipeline;

pub use config::{GatewayConfig, HashAlgorithm, PacketLayoutConfig, SharedSecret};
pub use contracts::{CorePacket, Fields, VerifyFlags, VerifyResult};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use errors::{IotivpError, Result};
pub use layouts::{FieldLayout, FieldSpec, FixedLayout, LayoutRegistry};
pub use pipeline::{BatchMetrics, BatchOutcome, Gateway, Item, ItemOutcome};
pub use policy::{RangeTable, ScorePolicy};
pub use replay::{MemoryReplayState, ReplayStore};
pub use signer::PacketSigner;
pub use verifier::{Verifier, VerifierConfig};

/// Protocol version
pub const IOTIVP_VERSION: u16 = 1;

/// Default freshness (and replay) window in seconds
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 60;

/// Default minimum score when the drop policy is enabled
pub const DEFAULT_INTEGRITY_THRESHOLD: u8 = 70;
