//! Purpose: Find record boundaries in a delimited byte buffer without parsing it.
//! Exports: `Delimiters`, `RecordSpan`, `Records`, `StrictRecords`, `check_structure`, `shard_ranges`.
//! Role: First pipeline stage; yields byte spans that the decoder turns into coordinates.
//! Invariants: Spans are absolute, inclusive offsets into the scanned buffer.
//! Invariants: Records never nest; delimiter bytes never occur inside field values.
//! Invariants: For balanced input, lenient and strict scans yield identical spans.
use std::ops::Range;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Delimiters {
    pub open: u8,
    pub close: u8,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: b'{',
            close: b'}',
        }
    }
}

impl Delimiters {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.open.is_ascii() || !self.close.is_ascii() {
            return Err(Error::new(ErrorKind::Usage).with_message("delimiters must be ASCII bytes"));
        }
        if self.open == self.close {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("open and close delimiters must differ"));
        }
        Ok(())
    }
}

/// One candidate record: `start` is the open delimiter, `end` the close delimiter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordSpan {
    pub start: usize,
    pub end: usize,
}

impl RecordSpan {
    pub fn bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.start..=self.end]
    }
}

/// Best-effort scan. A close emits the span opened by the most recent
/// unmatched open; a close with nothing pending is skipped. Never fails.
#[derive(Clone, Debug)]
pub struct Records<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
    open: Option<usize>,
    delimiters: Delimiters,
}

impl<'a> Records<'a> {
    pub fn new(buf: &'a [u8], delimiters: Delimiters) -> Self {
        Self::in_range(buf, 0..buf.len(), delimiters)
    }

    /// Scans only `range`, reporting offsets relative to the whole of `buf`.
    pub fn in_range(buf: &'a [u8], range: Range<usize>, delimiters: Delimiters) -> Self {
        let end = range.end.min(buf.len());
        Self {
            buf,
            pos: range.start.min(end),
            end,
            open: None,
            delimiters,
        }
    }
}

impl Iterator for Records<'_> {
    type Item = RecordSpan;

    fn next(&mut self) -> Option<RecordSpan> {
        let Delimiters { open, close } = self.delimiters;
        while self.pos < self.end {
            let index = self.pos;
            let byte = self.buf[index];
            self.pos += 1;
            if byte == open {
                self.open = Some(index);
            } else if byte == close {
                if let Some(start) = self.open.take() {
                    return Some(RecordSpan { start, end: index });
                }
            }
        }
        None
    }
}

/// Depth-tracking scan that rejects unbalanced input. Records are the
/// innermost delimited units, so one enclosing envelope object is allowed.
/// Fuses after the first error.
#[derive(Clone, Debug)]
pub struct StrictRecords<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
    last_open: usize,
    innermost: Option<usize>,
    delimiters: Delimiters,
    done: bool,
}

impl<'a> StrictRecords<'a> {
    pub fn new(buf: &'a [u8], delimiters: Delimiters) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
            last_open: 0,
            innermost: None,
            delimiters,
            done: false,
        }
    }

    fn fail(&mut self, offset: usize, message: &str) -> Option<Result<RecordSpan, Error>> {
        self.done = true;
        Some(Err(Error::new(ErrorKind::Structural)
            .with_message(message)
            .with_offset(offset as u64)))
    }
}

impl Iterator for StrictRecords<'_> {
    type Item = Result<RecordSpan, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Delimiters { open, close } = self.delimiters;
        while self.pos < self.buf.len() {
            let index = self.pos;
            let byte = self.buf[index];
            self.pos += 1;
            if byte == open {
                self.depth += 1;
                self.last_open = index;
                self.innermost = Some(index);
            } else if byte == close {
                if self.depth == 0 {
                    return self.fail(index, "close delimiter without matching open");
                }
                self.depth -= 1;
                if let Some(start) = self.innermost.take() {
                    return Some(Ok(RecordSpan { start, end: index }));
                }
            }
        }
        if self.depth > 0 {
            let offset = self.last_open;
            return self.fail(offset, "input ends inside an unclosed record");
        }
        self.done = true;
        None
    }
}

/// Runs the strict scan to completion and returns the record count.
pub fn check_structure(buf: &[u8], delimiters: Delimiters) -> Result<u64, Error> {
    let mut records = 0u64;
    for span in StrictRecords::new(buf, delimiters) {
        span?;
        records += 1;
    }
    Ok(records)
}

/// Splits `buf` into at most `shards` contiguous ranges, each ending just
/// after a close delimiter (or at the end of the buffer) so no record is split.
pub fn shard_ranges(buf: &[u8], shards: usize, close: u8) -> Vec<Range<usize>> {
    let len = buf.len();
    let shards = shards.max(1);
    let target = len.div_ceil(shards).max(1);
    let mut ranges = Vec::with_capacity(shards.min(len.max(1)));
    let mut start = 0usize;
    while start < len && ranges.len() + 1 < shards {
        let candidate = (start + target).min(len);
        let boundary = buf[candidate..]
            .iter()
            .position(|byte| *byte == close)
            .map(|pos| candidate + pos + 1)
            .unwrap_or(len);
        ranges.push(start..boundary);
        start = boundary;
    }
    if start < len || ranges.is_empty() {
        ranges.push(start..len);
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::{Delimiters, RecordSpan, Records, StrictRecords, check_structure, shard_ranges};
    use crate::core::error::ErrorKind;

    fn spans(input: &[u8]) -> Vec<RecordSpan> {
        Records::new(input, Delimiters::default()).collect()
    }

    #[test]
    fn yields_one_span_per_close() {
        let input = br#"{"x0":0,"y0":0,"x1":0,"y1":90}{"x0":0,"y0":0,"x1":0,"y1":0}"#;
        let found = spans(input);
        let closes = input.iter().filter(|b| **b == b'}').count();
        assert_eq!(found.len(), closes);
        assert_eq!(found[0].start, 0);
        assert_eq!(found[0].bytes(input).last(), Some(&b'}'));
        assert_eq!(found[1].start, found[0].end + 1);
    }

    #[test]
    fn no_delimiters_yields_nothing() {
        assert!(spans(b"").is_empty());
        assert!(spans(b"just some bytes, no records").is_empty());
    }

    #[test]
    fn trailing_bytes_after_last_close_are_ignored() {
        let input = b"{a}{b}\n{unterminated";
        let found = spans(input);
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].bytes(input), b"{b}");
    }

    #[test]
    fn envelope_object_is_skipped() {
        let input = b"{\"pairs\":[\n  {a},\n  {b}\n]}";
        let found = spans(input);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].bytes(input), b"{a}");
        assert_eq!(found[1].bytes(input), b"{b}");
    }

    #[test]
    fn custom_delimiters_are_honored() {
        let delimiters = Delimiters {
            open: b'<',
            close: b'>',
        };
        let found: Vec<_> = Records::new(b"<1>{2}<3>", delimiters).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1], RecordSpan { start: 6, end: 8 });
    }

    #[test]
    fn in_range_reports_absolute_offsets() {
        let input = b"{a}{b}{c}";
        let found: Vec<_> = Records::in_range(input, 3..9, Delimiters::default()).collect();
        assert_eq!(
            found,
            vec![RecordSpan { start: 3, end: 5 }, RecordSpan { start: 6, end: 8 }]
        );
    }

    #[test]
    fn strict_matches_lenient_on_balanced_input() {
        let input = b"{\"pairs\":[{a},{b},{c}]}";
        let lenient = spans(input);
        let strict: Vec<_> = StrictRecords::new(input, Delimiters::default())
            .collect::<Result<_, _>>()
            .expect("balanced");
        assert_eq!(lenient, strict);
        assert_eq!(check_structure(input, Delimiters::default()).expect("check"), 3);
    }

    #[test]
    fn strict_rejects_stray_close() {
        let err = check_structure(b"{a}}{b}", Delimiters::default()).expect_err("stray close");
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(err.offset(), Some(3));
    }

    #[test]
    fn strict_rejects_unclosed_record() {
        let err = check_structure(b"{a}{b", Delimiters::default()).expect_err("unclosed");
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(err.offset(), Some(3));
    }

    #[test]
    fn strict_iterator_fuses_after_error() {
        let mut iter = StrictRecords::new(b"}{a}", Delimiters::default());
        assert!(iter.next().expect("item").is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn shards_never_split_records() {
        let input: Vec<u8> = (0..50)
            .flat_map(|i| format!("{{\"x0\":{i},\"y0\":0,\"x1\":0,\"y1\":0}},\n").into_bytes())
            .collect();
        let whole = spans(&input);
        for shards in [1, 2, 3, 7, 64] {
            let ranges = shard_ranges(&input, shards, b'}');
            assert!(ranges.len() <= shards);
            assert_eq!(ranges.first().map(|r| r.start), Some(0));
            assert_eq!(ranges.last().map(|r| r.end), Some(input.len()));
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            let pieced: Vec<_> = ranges
                .iter()
                .flat_map(|range| Records::in_range(&input, range.clone(), Delimiters::default()))
                .collect();
            assert_eq!(pieced, whole, "shards={shards}");
        }
    }

    #[test]
    fn shard_ranges_of_empty_buffer() {
        assert_eq!(shard_ranges(b"", 4, b'}'), vec![0..0]);
    }
}
