//! Purpose: The finished field-offset index and random access into its fields.
//! Exports: `FieldIndex`.
//! Role: What every indexing path returns; owns the source it points into.
//! Invariants: `starts` and `ends` hold `columns` entries per record, header included,
//!   and both are non-decreasing in row-major order.
//! Invariants: Immutable after assembly; safe to share across threads.
use std::ops::Range;
use std::sync::Arc;

use crate::core::dialect::{Delimiter, Dialect};
use crate::core::field::Field;
use crate::core::source::ByteSource;
use crate::core::table::MalformedRow;

#[derive(Debug)]
pub struct FieldIndex {
    source: Arc<ByteSource>,
    dialect: Dialect,
    starts: Vec<u64>,
    ends: Vec<u64>,
    columns: usize,
    rows: u64,
    has_header: bool,
    malformed: Vec<MalformedRow>,
}

impl FieldIndex {
    pub(crate) fn new(
        source: Arc<ByteSource>,
        dialect: Dialect,
        starts: Vec<u64>,
        ends: Vec<u64>,
        columns: usize,
        has_header: bool,
        malformed: Vec<MalformedRow>,
    ) -> Self {
        let records = if columns == 0 {
            0
        } else {
            (starts.len() / columns) as u64
        };
        Self {
            source,
            dialect,
            starts,
            ends,
            columns,
            rows: records.saturating_sub(has_header as u64),
            has_header,
            malformed,
        }
    }

    /// Data rows, header excluded.
    pub fn row_count(&self) -> u64 {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns
    }

    pub fn has_header(&self) -> bool {
        self.has_header
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn delimiter(&self) -> &Delimiter {
        &self.dialect.delimiter
    }

    pub fn source(&self) -> &Arc<ByteSource> {
        &self.source
    }

    /// Start offsets of every field, header included, in row-major order.
    pub fn offsets(&self) -> &[u64] {
        &self.starts
    }

    /// End offsets parallel to [`FieldIndex::offsets`].
    pub fn end_offsets(&self) -> &[u64] {
        &self.ends
    }

    /// End of the last indexed field; zero for an index without fields.
    pub fn end_offset(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }

    fn slot(&self, record: u64, col: usize) -> Option<usize> {
        if col >= self.columns {
            return None;
        }
        let record = usize::try_from(record).ok()?;
        let slot = record.checked_mul(self.columns)?.checked_add(col)?;
        (slot < self.starts.len()).then_some(slot)
    }

    fn record_of(&self, row: u64) -> Option<u64> {
        (row < self.rows).then(|| row + self.has_header as u64)
    }

    /// Byte span of a data field, surrounding quotes included.
    pub fn field_span(&self, row: u64, col: usize) -> Option<Range<u64>> {
        let slot = self.slot(self.record_of(row)?, col)?;
        Some(self.starts[slot]..self.ends[slot])
    }

    pub fn field_offset(&self, row: u64, col: usize) -> Option<u64> {
        self.field_span(row, col).map(|span| span.start)
    }

    pub fn read_field(&self, row: u64, col: usize) -> Option<&[u8]> {
        self.bytes(self.field_span(row, col)?)
    }

    pub fn field(&self, row: u64, col: usize) -> Option<Field<'_>> {
        self.read_field(row, col)
            .map(|raw| Field::new(raw, &self.dialect))
    }

    /// Header field for `col`, unquoted, when the source has a header row.
    pub fn header(&self, col: usize) -> Option<Field<'_>> {
        if !self.has_header {
            return None;
        }
        let slot = self.slot(0, col)?;
        self.bytes(self.starts[slot]..self.ends[slot])
            .map(|raw| Field::new(raw, &self.dialect))
    }

    pub fn malformed(&self) -> &[MalformedRow] {
        &self.malformed
    }

    /// Data row numbers of malformed records; a malformed header is not listed.
    /// Data-row numbers with at least one issue, ascending and without repeats.
    pub fn malformed_rows(&self) -> Vec<u64> {
        let header = self.has_header as u64;
        let mut rows: Vec<u64> = self
            .malformed
            .iter()
            .filter_map(|row| row.record.checked_sub(header))
            .collect();
        rows.dedup();
        rows
    }

    fn bytes(&self, span: Range<u64>) -> Option<&[u8]> {
        let start = usize::try_from(span.start).ok()?;
        let end = usize::try_from(span.end).ok()?;
        self.source.as_slice().get(start..end)
    }
}
