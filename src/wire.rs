//! Big-endian integer helpers shared by the decoder, encoder and layouts.

/// Read up to 8 bytes as a big-endian unsigned integer
pub fn read_be_uint(bytes: &[u8]) -> u64 {
    debug_assert!(bytes.len() <= 8);
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Read up to 8 bytes as a big-endian two's complement integer
pub fn read_be_int(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let shift = 64 - 8 * bytes.len() as u32;
    ((read_be_uint(bytes) << shift) as i64) >> shift
}

/// Append the low `width` bytes of `value`, big-endian
///
/// Higher bytes are truncated: widths are a protocol contract.
pub fn write_be_uint(out: &mut Vec<u8>, value: u64, width: usize) {
    debug_assert!((1..=8).contains(&width));
    out.extend_from_slice(&value.to_be_bytes()[8 - width..]);
}

/// Largest value representable in `width` bytes
pub fn max_uint(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * width)) - 1
    }
}
