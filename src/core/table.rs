//! Purpose: Collect field spans for one region into a rectangular offset table.
//! Exports: `ShardIndex`, `MalformedKind`, `MalformedRow`.
//! Role: The `FieldSink` every indexing path writes into; the assembler concatenates them.
//! Invariants: `starts.len() == ends.len() == records * columns` once columns are known.
//! Invariants: Short rows are padded with empty spans at the line end; long rows are
//!   truncated. Both are recorded, never rejected.
use std::fmt;
use std::ops::ControlFlow;

use serde::Serialize;

use crate::core::scan::{FieldSink, RowEnd};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum MalformedKind {
    FieldCount { expected: usize, actual: usize },
    UnterminatedQuote,
    StrayAfterQuote,
}

impl MalformedKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FieldCount { .. } => "field_count",
            Self::UnterminatedQuote => "unterminated_quote",
            Self::StrayAfterQuote => "stray_after_quote",
        }
    }
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldCount { expected, actual } => {
                write!(f, "expected {expected} fields, found {actual}")
            }
            Self::UnterminatedQuote => write!(f, "quoted field not closed before end of input"),
            Self::StrayAfterQuote => write!(f, "unexpected bytes after closing quote"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct MalformedRow {
    /// Record number counted from the first record, header included.
    pub record: u64,
    pub kind: MalformedKind,
    /// Fields actually present before padding or truncation.
    pub fields: usize,
    /// Offset of the first byte of the record.
    pub offset: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ShardIndex {
    starts: Vec<u64>,
    ends: Vec<u64>,
    columns: Option<usize>,
    row_fields: usize,
    records: u64,
    limit: Option<u64>,
    malformed: Vec<MalformedRow>,
}

impl ShardIndex {
    /// `columns` fixes the row width up front; `None` takes it from the first record.
    /// `limit` stops the scanner once that many records are collected.
    pub fn new(columns: Option<usize>, limit: Option<u64>) -> Self {
        Self {
            columns,
            limit,
            ..Self::default()
        }
    }

    pub fn columns(&self) -> Option<usize> {
        self.columns
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn starts(&self) -> &[u64] {
        &self.starts
    }

    pub fn ends(&self) -> &[u64] {
        &self.ends
    }

    pub fn malformed(&self) -> &[MalformedRow] {
        &self.malformed
    }

    pub(crate) fn into_parts(self) -> (Vec<u64>, Vec<u64>, Vec<MalformedRow>) {
        (self.starts, self.ends, self.malformed)
    }

    fn push(&mut self, start: u64, end: u64) {
        self.starts.push(start);
        self.ends.push(end);
    }
}

impl FieldSink for ShardIndex {
    fn field(&mut self, start: u64, end: u64) {
        if self.columns.is_none_or(|columns| self.row_fields < columns) {
            self.push(start, end);
        }
        self.row_fields += 1;
    }

    fn end_row(&mut self, row: RowEnd) -> ControlFlow<()> {
        let fields = std::mem::take(&mut self.row_fields);
        let columns = *self.columns.get_or_insert(fields);
        for _ in fields..columns {
            self.push(row.line_end, row.line_end);
        }

        let count_issue = (fields != columns).then_some(MalformedKind::FieldCount {
            expected: columns,
            actual: fields,
        });
        // A row can carry a scanner issue and a count mismatch; both are kept, in that order.
        for kind in row.issue.into_iter().chain(count_issue) {
            tracing::trace!(record = self.records, offset = row.start, %kind, "malformed record");
            self.malformed.push(MalformedRow {
                record: self.records,
                kind,
                fields,
                offset: row.start,
            });
        }

        self.records += 1;
        match self.limit {
            Some(limit) if self.records >= limit => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MalformedKind, ShardIndex};
    use crate::core::scan::{FieldSink, RowEnd};
    use std::ops::ControlFlow;

    fn row(sink: &mut ShardIndex, fields: &[(u64, u64)], line_end: u64) -> ControlFlow<()> {
        for (start, end) in fields {
            sink.field(*start, *end);
        }
        sink.end_row(RowEnd {
            start: fields[0].0,
            line_end,
            issue: None,
        })
    }

    #[test]
    fn first_row_fixes_columns_and_short_rows_are_padded() {
        let mut sink = ShardIndex::new(None, None);
        let _ = row(&mut sink, &[(0, 1), (2, 3), (4, 5)], 5);
        let _ = row(&mut sink, &[(6, 7)], 7);
        assert_eq!(sink.columns(), Some(3));
        assert_eq!(sink.records(), 2);
        assert_eq!(sink.starts(), &[0, 2, 4, 6, 7, 7]);
        assert_eq!(sink.ends(), &[1, 3, 5, 7, 7, 7]);
        assert_eq!(
            sink.malformed()[0].kind,
            MalformedKind::FieldCount {
                expected: 3,
                actual: 1
            }
        );
        assert_eq!(sink.malformed()[0].record, 1);
    }

    #[test]
    fn long_rows_are_truncated() {
        let mut sink = ShardIndex::new(Some(2), None);
        let _ = row(&mut sink, &[(0, 1), (2, 3), (4, 5)], 5);
        assert_eq!(sink.starts(), &[0, 2]);
        assert_eq!(sink.malformed().len(), 1);
        assert_eq!(sink.malformed()[0].fields, 3);
    }

    #[test]
    fn stray_quote_and_count_mismatch_are_both_recorded() {
        let mut sink = ShardIndex::new(Some(3), None);
        sink.field(0, 3);
        sink.field(5, 6);
        let _ = sink.end_row(RowEnd {
            start: 0,
            line_end: 6,
            issue: Some(MalformedKind::StrayAfterQuote),
        });
        let kinds: Vec<_> = sink.malformed().iter().map(|row| row.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MalformedKind::StrayAfterQuote,
                MalformedKind::FieldCount {
                    expected: 3,
                    actual: 2
                }
            ]
        );
        assert!(sink.malformed().iter().all(|row| row.record == 0));
    }

    #[test]
    fn limit_breaks_after_enough_records() {
        let mut sink = ShardIndex::new(None, Some(2));
        assert_eq!(row(&mut sink, &[(0, 1)], 1), ControlFlow::Continue(()));
        assert_eq!(row(&mut sink, &[(2, 3)], 3), ControlFlow::Break(()));
    }
}
