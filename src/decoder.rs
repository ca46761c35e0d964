//! Decoder module - IoTIVP wire packet -> CorePacket
//!
//! Framing is fixed: header byte, big-endian timestamp, device id and nonce
//! of the configured widths, a header-specific payload, then the truncated
//! digest. Decoding is pure; nothing here touches the replay state.
use crate::config::PacketLayoutConfig;
use crate::contracts::CorePacket;
use crate::errors::{IotivpError, Result};
use crate::layouts::LayoutRegistry;
use crate::wire::read_be_uint;

/// Turn `packet_hex` text into bytes
///
/// Whitespace, `:`/`-` separators and a leading `0x` are ignored.
pub fn decode_hex(text: &str) -> Result<Vec<u8>> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let clean: String = body
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    if clean.is_empty() {
        return Err(IotivpError::InvalidHex("empty packet".to_string()));
    }
    Ok(hex::decode(clean)?)
}

/// Decoder - Splits raw packets by a [`PacketLayoutConfig`] and reads the
/// payload with the layout registered for the header
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    layout: PacketLayoutConfig,
    registry: LayoutRegistry,
}

impl Decoder {
    /// Create a decoder
    ///
    /// # Arguments
    /// * `layout` - Widths of the hash and fixed integer fields
    /// * `registry` - Payload layouts by header byte
    ///
    /// # Returns
    /// `Configuration` error when a width is out of range
    pub fn new(layout: PacketLayoutConfig, registry: LayoutRegistry) -> Result<Self> {
        layout.validate()?;
        Ok(Self { layout, registry })
    }

    /// Configured field widths
    pub fn layout(&self) -> &PacketLayoutConfig {
        &self.layout
    }

    /// Layouts this decoder accepts
    pub fn registry(&self) -> &LayoutRegistry {
        &self.registry
    }

    /// Split into the signed bytes and the embedded digest
    pub fn split_signed<'a>(&self, raw: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
        if raw.len() < self.layout.min_packet_len() {
            return Err(IotivpError::MalformedPacket {
                expected: self.layout.min_packet_len(),
                actual: raw.len(),
            });
        }
        Ok(raw.split_at(raw.len() - self.layout.hash_len))
    }

    /// Decode a complete packet
    ///
    /// # Returns
    /// * `MalformedPacket` - `raw` is not exactly prefix + payload + hash
    ///   bytes long; `expected`/`actual` are full packet lengths
    /// * `UnsupportedHeader` - no layout registered for the header byte
    pub fn decode(&self, raw: &[u8]) -> Result<CorePacket> {
        let (signed, hash) = self.split_signed(raw)?;

        let header = signed[0];
        let field_layout = self.registry.get(header)?;

        let expected = self.layout.min_packet_len() + field_layout.payload_len();
        if raw.len() != expected {
            return Err(IotivpError::MalformedPacket {
                expected,
                actual: raw.len(),
            });
        }

        let mut offset = 1;
        let mut take = |width: usize| {
            let bytes = &signed[offset..offset + width];
            offset += width;
            read_be_uint(bytes)
        };
        let timestamp = take(self.layout.timestamp_len);
        let device_id = take(self.layout.device_id_len);
        let nonce = take(self.layout.nonce_len);

        // Layouts report payload lengths; callers see packet lengths
        let overhead = self.layout.min_packet_len();
        let fields = field_layout
            .decode(&signed[self.layout.prefix_len()..])
            .map_err(|e| match e {
                IotivpError::MalformedPacket { expected, actual } => IotivpError::MalformedPacket {
                    expected: expected + overhead,
                    actual: actual + overhead,
                },
                other => other,
            })?;

        Ok(CorePacket {
            header,
            timestamp,
            device_id,
            nonce,
            fields,
            hash: hash.to_vec(),
        })
    }
}
