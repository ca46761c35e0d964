//! Encoder module - device-side packet construction
//!
//! The inverse of the decoder: lays out the fixed fields, the header's
//! payload and the truncated keyed digest. Used by device simulators, tests
//! and benchmarks.
use rand::Rng;

use crate::config::{GatewayConfig, PacketLayoutConfig};
use crate::contracts::CorePacket;
use crate::errors::Result;
use crate::layouts::LayoutRegistry;
use crate::signer::PacketSigner;
use crate::wire::{max_uint, write_be_uint};

/// Encoder - Serializes and signs CorePackets
pub struct Encoder {
    layout: PacketLayoutConfig,
    registry: LayoutRegistry,
    signer: PacketSigner,
}

impl Encoder {
    /// Create an encoder; the signer's hash length wins over `layout.hash_len`
    pub fn new(layout: PacketLayoutConfig, registry: LayoutRegistry, signer: PacketSigner) -> Result<Self> {
        let layout = PacketLayoutConfig {
            hash_len: signer.hash_len(),
            ..layout
        };
        layout.validate()?;
        Ok(Self {
            layout,
            registry,
            signer,
        })
    }

    /// Encoder matching a gateway's widths, algorithm and secret
    pub fn from_config(config: &GatewayConfig, registry: LayoutRegistry) -> Result<Self> {
        config.validate()?;
        let signer = PacketSigner::new(config.hash_alg, &config.shared_secret, config.hash_len)?;
        Self::new(config.packet_layout(), registry, signer)
    }

    pub fn layout(&self) -> &PacketLayoutConfig {
        &self.layout
    }

    /// Everything the digest covers, without the digest
    ///
    /// Timestamp, device id and nonce are truncated to their widths.
    pub fn encode_unsigned(&self, packet: &CorePacket) -> Result<Vec<u8>> {
        let field_layout = self.registry.get(packet.header)?;
        let payload = field_layout.encode(&packet.fields)?;

        let mut out = Vec::with_capacity(self.layout.min_packet_len() + payload.len());
        out.push(packet.header);
        write_be_uint(&mut out, packet.timestamp, self.layout.timestamp_len);
        write_be_uint(&mut out, packet.device_id, self.layout.device_id_len);
        write_be_uint(&mut out, packet.nonce, self.layout.nonce_len);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Full wire packet; `packet.hash` is ignored and recomputed
    pub fn encode(&self, packet: &CorePacket) -> Result<Vec<u8>> {
        let mut out = self.encode_unsigned(packet)?;
        let digest = self.signer.digest(&out);
        out.extend_from_slice(&digest);
        Ok(out)
    }

    /// Wire packet as lowercase hex, ready for `packet_hex`
    pub fn encode_hex(&self, packet: &CorePacket) -> Result<String> {
        self.encode(packet).map(hex::encode)
    }

    pub fn encode_batch(&self, packets: &[CorePacket]) -> Result<Vec<Vec<u8>>> {
        packets.iter().map(|p| self.encode(p)).collect()
    }

    /// Random nonce that fits the configured nonce width
    pub fn random_nonce(&self) -> u64 {
        rand::thread_rng().gen_range(0..=max_uint(self.layout.nonce_len))
    }
}
