//! Purpose: Packed binary record format: four little-endian f64 per record.
//! Exports: `RECORD_BYTES`, `decode_quad`, `encode_pair`, `record_ranges`, `trailing_bytes`.
//! Role: Alternate input path that skips text scanning entirely.
//! Invariants: Record `i` occupies bytes `32*i .. 32*i+32`, fields in x0, y0, x1, y1 order.
//! Invariants: Shard ranges start and end on record boundaries.
use std::ops::Range;

use crate::core::decode::CoordinatePair;
use crate::core::error::{Error, ErrorKind};

pub const RECORD_BYTES: usize = 32;
const FIELD_BYTES: usize = 8;

/// Decodes one 32-byte chunk whose first byte sits at `offset` in the input.
pub fn decode_quad(chunk: &[u8], offset: usize) -> Result<CoordinatePair, Error> {
    if chunk.len() != RECORD_BYTES {
        return Err(Error::new(ErrorKind::Structural)
            .with_message(format!(
                "binary record is {} bytes, expected {RECORD_BYTES}",
                chunk.len()
            ))
            .with_offset(offset as u64));
    }
    let mut fields = [0.0f64; 4];
    for (slot, raw) in chunk.chunks_exact(FIELD_BYTES).enumerate() {
        let mut bytes = [0u8; FIELD_BYTES];
        bytes.copy_from_slice(raw);
        let value = f64::from_le_bytes(bytes);
        if !value.is_finite() {
            return Err(Error::new(ErrorKind::Decode)
                .with_message(format!("binary field {slot} is not finite: {value}"))
                .with_span(offset as u64, (offset + RECORD_BYTES - 1) as u64));
        }
        fields[slot] = value;
    }
    Ok(CoordinatePair::from_array(fields))
}

pub fn encode_pair(pair: &CoordinatePair) -> [u8; RECORD_BYTES] {
    let mut out = [0u8; RECORD_BYTES];
    for (slot, value) in [pair.x0, pair.y0, pair.x1, pair.y1].into_iter().enumerate() {
        out[slot * FIELD_BYTES..(slot + 1) * FIELD_BYTES].copy_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn trailing_bytes(len: usize) -> usize {
    len % RECORD_BYTES
}

/// Splits the whole-record prefix of a `len`-byte input into at most
/// `shards` contiguous ranges.
pub fn record_ranges(len: usize, shards: usize) -> Vec<Range<usize>> {
    let records = len / RECORD_BYTES;
    let shards = shards.max(1).min(records.max(1));
    let per_shard = records.div_ceil(shards);
    (0..shards)
        .map(|shard| {
            let first = (shard * per_shard).min(records);
            let last = ((shard + 1) * per_shard).min(records);
            first * RECORD_BYTES..last * RECORD_BYTES
        })
        .filter(|range| !range.is_empty() || records == 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{RECORD_BYTES, decode_quad, encode_pair, record_ranges, trailing_bytes};
    use crate::core::decode::CoordinatePair;
    use crate::core::error::ErrorKind;

    #[test]
    fn quad_layout_is_little_endian_in_field_order() {
        let pair = CoordinatePair::new(1.0, -2.5, 180.0, 90.0);
        let bytes = encode_pair(&pair);
        assert_eq!(&bytes[..8], &1.0f64.to_le_bytes());
        assert_eq!(&bytes[24..], &90.0f64.to_le_bytes());
        assert_eq!(decode_quad(&bytes, 0).expect("decode"), pair);
    }

    #[test]
    fn non_finite_field_fails_with_span() {
        let mut bytes = encode_pair(&CoordinatePair::new(1.0, 2.0, 3.0, 4.0));
        bytes[16..24].copy_from_slice(&f64::NAN.to_le_bytes());
        let err = decode_quad(&bytes, 64).expect_err("nan");
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.span(), Some(&(64..=95)));
    }

    #[test]
    fn short_chunk_is_structural() {
        let err = decode_quad(&[0u8; 12], 32).expect_err("short");
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(err.offset(), Some(32));
    }

    #[test]
    fn ranges_cover_whole_records_only() {
        let len = RECORD_BYTES * 10 + 5;
        assert_eq!(trailing_bytes(len), 5);
        let ranges = record_ranges(len, 3);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], 0..RECORD_BYTES * 4);
        assert_eq!(ranges[2].end, RECORD_BYTES * 10);
        for range in &ranges {
            assert_eq!(range.start % RECORD_BYTES, 0);
            assert_eq!(range.end % RECORD_BYTES, 0);
        }
    }

    #[test]
    fn more_shards_than_records() {
        assert_eq!(record_ranges(RECORD_BYTES * 2, 8).len(), 2);
        assert_eq!(record_ranges(0, 8), vec![0..0]);
    }
}
