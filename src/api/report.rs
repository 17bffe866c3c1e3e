//! Purpose: Provide a stable, serializable summary of an index and its anomalies.
//! Exports: `IndexReport`, `IndexStatus`, `RowIssue`.
//! Role: Shared contract for the bench tool, API users and log output.
//! Invariants: Reports never embed more than a short snippet of source bytes per issue.
//! Invariants: Issue rows are data-relative; a malformed header is reported with `row: None`.
use std::path::PathBuf;

use bstr::ByteSlice;
use memchr::memchr;
use serde::Serialize;

use crate::core::index::FieldIndex;
use crate::core::table::{MalformedKind, MalformedRow};

pub const MAX_SNIPPET_BYTES: usize = 80;
pub const DEFAULT_MAX_ISSUES: usize = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Ok,
    Malformed,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RowIssue {
    pub code: String,
    pub message: String,
    pub row: Option<u64>,
    pub record: u64,
    pub offset: u64,
    pub fields: usize,
    pub snippet: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct IndexReport {
    pub path: Option<PathBuf>,
    pub status: IndexStatus,
    pub rows: u64,
    pub columns: usize,
    pub delimiter: String,
    pub has_header: bool,
    pub bytes: u64,
    pub issues: Vec<RowIssue>,
    pub issue_count: usize,
    pub remediation_hints: Vec<String>,
}

impl IndexReport {
    pub fn from_index(index: &FieldIndex) -> Self {
        Self::with_max_issues(index, DEFAULT_MAX_ISSUES)
    }

    /// Lists at most `max_issues` issues; `issue_count` always counts all of them.
    pub fn with_max_issues(index: &FieldIndex, max_issues: usize) -> Self {
        let source = index.source();
        let issues = index
            .malformed()
            .iter()
            .take(max_issues)
            .map(|row| issue(index, row))
            .collect();
        let issue_count = index.malformed().len();
        let remediation_hints = hints(index.malformed());
        Self {
            path: source.path().map(|path| path.to_path_buf()),
            status: if issue_count == 0 {
                IndexStatus::Ok
            } else {
                IndexStatus::Malformed
            },
            rows: index.row_count(),
            columns: index.column_count(),
            delimiter: index.delimiter().to_string(),
            has_header: index.has_header(),
            bytes: source.size(),
            issues,
            issue_count,
            remediation_hints,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl FieldIndex {
    pub fn report(&self) -> IndexReport {
        IndexReport::from_index(self)
    }
}

fn issue(index: &FieldIndex, row: &MalformedRow) -> RowIssue {
    let header = index.has_header() as u64;
    let snippet = index
        .source()
        .as_slice()
        .get(row.offset as usize..)
        .map(|rest| {
            let line = match memchr(b'\n', rest) {
                Some(end) => &rest[..end],
                None => rest,
            };
            truncate_snippet(line.strip_suffix(b"\r").unwrap_or(line), MAX_SNIPPET_BYTES)
        });
    RowIssue {
        code: row.kind.code().to_string(),
        message: row.kind.to_string(),
        row: row.record.checked_sub(header),
        record: row.record,
        offset: row.offset,
        fields: row.fields,
        snippet,
    }
}

fn hints(rows: &[MalformedRow]) -> Vec<String> {
    let mut hints = Vec::new();
    if rows
        .iter()
        .any(|row| matches!(row.kind, MalformedKind::FieldCount { .. }))
    {
        hints.push(
            "Rows disagree on field count. Check the delimiter and whether the first line is a header."
                .to_string(),
        );
    }
    if rows.iter().any(|row| {
        matches!(
            row.kind,
            MalformedKind::UnterminatedQuote | MalformedKind::StrayAfterQuote
        )
    }) {
        hints.push("Quoting looks inconsistent. Check the quote and escape settings.".to_string());
    }
    hints
}

fn truncate_snippet(input: &[u8], max: usize) -> String {
    if input.len() <= max {
        return input.to_str_lossy().into_owned();
    }
    let suffix = "...";
    if max <= suffix.len() {
        return suffix[..max].to_string();
    }
    let mut snippet = input[..max - suffix.len()].to_str_lossy().into_owned();
    snippet.push_str(suffix);
    snippet
}
