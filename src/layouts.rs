//! Field layouts - header-tagged payload strategies
//!
//! The bytes between the fixed packet prefix and the trailing hash are
//! interpreted by the layout registered for the packet's header byte. New
//! device profiles are added by registering a layout; the decoder's framing
//! never changes.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::contracts::Fields;
use crate::errors::{IotivpError, Result};
use crate::wire::{read_be_int, read_be_uint, write_be_uint};

/// Header of the empty-payload heartbeat profile
pub const HEADER_HEARTBEAT: u8 = 0x00;

/// Header of the temperature/humidity/battery profile
pub const HEADER_ENVIRONMENT: u8 = 0x01;

/// Header of the extended environment profile (adds pressure)
pub const HEADER_ENVIRONMENT_EXT: u8 = 0x02;

/// Strategy decoding and encoding one payload schema
pub trait FieldLayout: Send + Sync {
    /// Human-readable profile name
    fn name(&self) -> &str;

    /// Exact payload size in bytes
    fn payload_len(&self) -> usize;

    /// Decode a payload of exactly [`payload_len`](Self::payload_len) bytes
    fn decode(&self, payload: &[u8]) -> Result<Fields>;

    /// Encode readings into a payload
    fn encode(&self, fields: &Fields) -> Result<Vec<u8>>;
}

/// One fixed-width reading inside a [`FixedLayout`]
///
/// The wire carries `round(value * divisor)` as a big-endian integer, so a
/// divisor of 100 transports hundredths.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub width: usize,
    pub signed: bool,
    pub divisor: f64,
}

impl FieldSpec {
    pub fn unsigned(name: &str, width: usize, divisor: f64) -> Self {
        Self {
            name: name.to_string(),
            width,
            signed: false,
            divisor,
        }
    }

    pub fn signed(name: &str, width: usize, divisor: f64) -> Self {
        Self {
            name: name.to_string(),
            width,
            signed: true,
            divisor,
        }
    }

    fn decode(&self, bytes: &[u8]) -> f64 {
        let raw = if self.signed {
            read_be_int(bytes) as f64
        } else {
            read_be_uint(bytes) as f64
        };
        raw / self.divisor
    }

    fn encode(&self, value: f64, out: &mut Vec<u8>) -> Result<()> {
        let out_of_bounds = || IotivpError::FieldOutOfBounds {
            field: self.name.clone(),
            value,
        };

        let raw = (value * self.divisor).round();
        if !raw.is_finite() {
            return Err(out_of_bounds());
        }

        // Exclusive powers of two; `2^64 - 1` is not representable as f64
        let bits = 8 * self.width as i32;
        let word = if self.signed {
            let limit = 2f64.powi(bits - 1);
            if raw < -limit || raw >= limit {
                return Err(out_of_bounds());
            }
            (raw as i64) as u64
        } else {
            if raw < 0.0 || raw >= 2f64.powi(bits) {
                return Err(out_of_bounds());
            }
            raw as u64
        };

        write_be_uint(out, word, self.width);
        Ok(())
    }
}

/// Table-driven layout: a sequence of fixed-width readings
#[derive(Debug, Clone)]
pub struct FixedLayout {
    name: String,
    fields: Vec<FieldSpec>,
    payload_len: usize,
}

impl FixedLayout {
    /// Build a layout, rejecting bad widths, divisors and duplicate names
    pub fn new(name: &str, fields: Vec<FieldSpec>) -> Result<Self> {
        for (idx, spec) in fields.iter().enumerate() {
            if spec.width == 0 || spec.width > 8 {
                return Err(IotivpError::Configuration(format!(
                    "layout {}: field {} width must be 1-8 bytes",
                    name, spec.name
                )));
            }
            if !spec.divisor.is_finite() || spec.divisor <= 0.0 {
                return Err(IotivpError::Configuration(format!(
                    "layout {}: field {} needs a finite positive divisor",
                    name, spec.name
                )));
            }
            if fields[..idx].iter().any(|other| other.name == spec.name) {
                return Err(IotivpError::Configuration(format!(
                    "layout {}: duplicate field {}",
                    name, spec.name
                )));
            }
        }

        let payload_len = fields.iter().map(|f| f.width).sum();
        Ok(Self {
            name: name.to_string(),
            fields,
            payload_len,
        })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// `0x00`: no readings
    pub fn heartbeat() -> Self {
        Self {
            name: "heartbeat".to_string(),
            fields: Vec::new(),
            payload_len: 0,
        }
    }

    /// `0x01`: temperature (centi-degrees C), humidity %, battery %
    pub fn environment() -> Self {
        Self {
            name: "environment".to_string(),
            fields: vec![
                FieldSpec::signed("temperature", 2, 100.0),
                FieldSpec::unsigned("humidity", 1, 1.0),
                FieldSpec::unsigned("battery", 1, 1.0),
            ],
            payload_len: 4,
        }
    }

    /// `0x02`: adds finer humidity and pressure in deci-hPa
    pub fn environment_extended() -> Self {
        Self {
            name: "environment-extended".to_string(),
            fields: vec![
                FieldSpec::signed("temperature", 2, 100.0),
                FieldSpec::unsigned("humidity", 2, 100.0),
                FieldSpec::unsigned("pressure", 2, 10.0),
                FieldSpec::unsigned("battery", 1, 1.0),
            ],
            payload_len: 7,
        }
    }
}

impl FieldLayout for FixedLayout {
    fn name(&self) -> &str {
        &self.name
    }

    fn payload_len(&self) -> usize {
        self.payload_len
    }

    fn decode(&self, payload: &[u8]) -> Result<Fields> {
        if payload.len() != self.payload_len {
            return Err(IotivpError::MalformedPacket {
                expected: self.payload_len,
                actual: payload.len(),
            });
        }

        let mut fields = Fields::new();
        let mut offset = 0;
        for spec in &self.fields {
            let value = spec.decode(&payload[offset..offset + spec.width]);
            fields.insert(spec.name.clone(), value);
            offset += spec.width;
        }
        Ok(fields)
    }

    fn encode(&self, fields: &Fields) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.payload_len);
        for spec in &self.fields {
            let value = fields.get(&spec.name).copied().ok_or_else(|| {
                IotivpError::FieldOutOfBounds {
                    field: spec.name.clone(),
                    value: f64::NAN,
                }
            })?;
            spec.encode(value, &mut out)?;
        }
        Ok(out)
    }
}

/// LayoutRegistry - header tag -> payload layout
#[derive(Clone)]
pub struct LayoutRegistry {
    layouts: HashMap<u8, Arc<dyn FieldLayout>>,
}

impl LayoutRegistry {
    /// Registry with no layouts; every header is unsupported
    pub fn empty() -> Self {
        Self {
            layouts: HashMap::new(),
        }
    }

    /// Registry with the built-in device profiles
    pub fn with_builtin_profiles() -> Self {
        let mut registry = Self::empty();
        registry.register(HEADER_HEARTBEAT, Arc::new(FixedLayout::heartbeat()));
        registry.register(HEADER_ENVIRONMENT, Arc::new(FixedLayout::environment()));
        registry.register(HEADER_ENVIRONMENT_EXT, Arc::new(FixedLayout::environment_extended()));
        registry
    }

    /// Register a layout, returning the one it replaces
    pub fn register(&mut self, header: u8, layout: Arc<dyn FieldLayout>) -> Option<Arc<dyn FieldLayout>> {
        self.layouts.insert(header, layout)
    }

    /// Layout for `header`, or `UnsupportedHeader`
    pub fn get(&self, header: u8) -> Result<&Arc<dyn FieldLayout>> {
        self.layouts
            .get(&header)
            .ok_or(IotivpError::UnsupportedHeader(header))
    }

    pub fn contains(&self, header: u8) -> bool {
        self.layouts.contains_key(&header)
    }

    /// Registered header tags, ascending
    pub fn headers(&self) -> Vec<u8> {
        let mut headers: Vec<u8> = self.layouts.keys().copied().collect();
        headers.sort_unstable();
        headers
    }
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        Self::with_builtin_profiles()
    }
}

impl fmt::Debug for LayoutRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for header in self.headers() {
            if let Some(layout) = self.layouts.get(&header) {
                map.entry(&format_args!("{:#04x}", header), &layout.name());
            }
        }
        map.finish()
    }
}
