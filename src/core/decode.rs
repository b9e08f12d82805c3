//! Purpose: Decode one record's bytes into a `CoordinatePair`.
//! Exports: `CoordinatePair`, `decode_record`, `MAX_SNIPPET_BYTES`.
//! Role: Second pipeline stage; the only place field names and number text are interpreted.
//! Invariants: Exactly the four fields x0, y0, x1, y1, each once, in any order.
//! Invariants: Decoded values are finite; failures carry the record's absolute span.
use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};
use crate::core::extract::RecordSpan;

pub const MAX_SNIPPET_BYTES: usize = 96;

/// Two points as (longitude, latitude) degrees: (x0, y0) and (x1, y1).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CoordinatePair {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl CoordinatePair {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn from_array([x0, y0, x1, y1]: [f64; 4]) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

const FIELD_NAMES: [&[u8]; 4] = [b"x0", b"y0", b"x1", b"y1"];

/// Decodes the record at `span` within `buf`. The span must include the
/// open and close delimiters.
pub fn decode_record(buf: &[u8], span: RecordSpan) -> Result<CoordinatePair, Error> {
    let record = span.bytes(buf);
    decode_fields(record).map_err(|message| decode_error(record, span, message))
}

fn decode_fields(record: &[u8]) -> Result<CoordinatePair, String> {
    // Strip the delimiters; the body is `"key": number` members separated by commas.
    let body = match record.len() {
        0 | 1 => &[][..],
        len => &record[1..len - 1],
    };
    let mut values: [Option<f64>; 4] = [None; 4];

    // An all-whitespace body has no members; any other empty member is malformed.
    let members = (!body.trim().is_empty()).then(|| body.split_str(","));
    for member in members.into_iter().flatten() {
        if member.trim().is_empty() {
            return Err("empty member".to_string());
        }
        let (key, value) = split_member(member)?;
        let slot = FIELD_NAMES
            .iter()
            .position(|name| *name == key)
            .ok_or_else(|| format!("unexpected field {:?}", key.as_bstr()))?;
        if values[slot].is_some() {
            return Err(format!("duplicate field {:?}", key.as_bstr()));
        }
        values[slot] = Some(parse_number(key, value)?);
    }

    let mut out = [0.0f64; 4];
    for (slot, value) in values.iter().enumerate() {
        out[slot] = value.ok_or_else(|| {
            format!("missing field {:?}", FIELD_NAMES[slot].as_bstr())
        })?;
    }
    Ok(CoordinatePair::from_array(out))
}

fn split_member(member: &[u8]) -> Result<(&[u8], &[u8]), String> {
    let member = member.trim();
    let rest = member
        .strip_prefix(b"\"")
        .ok_or_else(|| format!("expected quoted field name in {:?}", member.as_bstr()))?;
    let close = rest
        .find_byte(b'"')
        .ok_or_else(|| format!("unterminated field name in {:?}", member.as_bstr()))?;
    let key = &rest[..close];
    let value = rest[close + 1..]
        .trim_start()
        .strip_prefix(b":")
        .ok_or_else(|| format!("expected ':' after field {:?}", key.as_bstr()))?;
    Ok((key, value.trim()))
}

fn parse_number(key: &[u8], text: &[u8]) -> Result<f64, String> {
    let invalid = || format!("field {:?} is not a number: {:?}", key.as_bstr(), text.as_bstr());
    let text = text.to_str().map_err(|_| invalid())?;
    // `f64::from_str` also accepts words like "inf" and "NaN"; only digits count here.
    if !text.bytes().any(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: f64 = text.parse().map_err(|_| invalid())?;
    if !value.is_finite() {
        return Err(format!("field {:?} is not finite: {text}", key.as_bstr()));
    }
    Ok(value)
}

fn decode_error(record: &[u8], span: RecordSpan, message: String) -> Error {
    Error::new(ErrorKind::Decode)
        .with_message(format!("{message} in record {}", snippet(record)))
        .with_span(span.start as u64, span.end as u64)
}

fn snippet(record: &[u8]) -> String {
    let text = record.to_str_lossy();
    if text.len() <= MAX_SNIPPET_BYTES {
        return text.into_owned();
    }
    let mut cut = MAX_SNIPPET_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}
