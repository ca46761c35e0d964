//! Error types for IoTIVP gateway operations
//!
//! One enum covers the whole pipeline. Configuration errors are fatal for a
//! run; every other variant is captured per item and attached to its output.
use std::io;

use thiserror::Error;

/// Result type alias for IoTIVP operations
pub type Result<T> = std::result::Result<T, IotivpError>;

/// IoTIVP error enumeration
///
/// Covers all failure modes of the gateway:
/// - Packet shape and layout violations
/// - Configuration mistakes detected before processing
/// - Input text problems (missing or non-hex packet)
/// - Snapshot persistence failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IotivpError {
    /// Packet length does not match the configured layout
    #[error("Malformed packet: expected {expected} bytes, received {actual}")]
    MalformedPacket { expected: usize, actual: usize },

    /// Header byte names no registered field layout
    #[error("Unsupported header: {0:#04x}")]
    UnsupportedHeader(u8),

    /// Invalid algorithm, field widths or policy values
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `packet_hex` could not be decoded as hexadecimal
    #[error("Invalid packet hex: {0}")]
    InvalidHex(String),

    /// Item carries no `packet_hex` string
    #[error("Item has no packet_hex field")]
    MissingPacket,

    /// A reading is missing or does not fit its wire width
    #[error("Field {field} value {value} does not fit its wire encoding")]
    FieldOutOfBounds { field: String, value: f64 },

    /// Serialization failed (snapshot or output record)
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization failed (corrupted snapshot or input)
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// I/O error while loading configuration or state
    #[error("I/O error: {0}")]
    Io(String),
}

impl IotivpError {
    /// Stable identifier attached to failed items as `verify_error.kind`
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPacket { .. } => "malformed_packet",
            Self::UnsupportedHeader(_) => "unsupported_header",
            Self::Configuration(_) => "configuration",
            Self::InvalidHex(_) => "invalid_hex",
            Self::MissingPacket => "missing_packet",
            Self::FieldOutOfBounds { .. } => "field_out_of_bounds",
            Self::SerializationError(_) => "serialization",
            Self::DeserializationError(_) => "deserialization",
            Self::Io(_) => "io",
        }
    }

    /// Whether this error aborts a whole run rather than a single item
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Io(_))
    }
}

/// Convert from io::Error to IotivpError
impl From<io::Error> for IotivpError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<hex::FromHexError> for IotivpError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidHex(err.to_string())
    }
}
