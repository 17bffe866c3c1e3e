//! Purpose: Concatenate per-region offset tables into one `FieldIndex`.
//! Exports: `assemble`.
//! Role: Final stage of both the mapped and streamed paths.
//! Invariants: Regions arrive in source order; record numbers in malformed entries are
//!   rebased so they count from the first record of the source.
//! Invariants: A source without any record is an `Empty` error, not an empty index.
use std::sync::Arc;

use crate::core::dialect::Dialect;
use crate::core::error::{Error, ErrorKind};
use crate::core::index::FieldIndex;
use crate::core::source::ByteSource;
use crate::core::table::ShardIndex;

pub fn assemble(
    source: Arc<ByteSource>,
    dialect: Dialect,
    parts: Vec<ShardIndex>,
    has_header: bool,
    max_rows: Option<u64>,
) -> Result<FieldIndex, Error> {
    let Some(columns) = parts.iter().find_map(ShardIndex::columns) else {
        let mut err = Error::new(ErrorKind::Empty)
            .with_message("source contains no records")
            .with_hint("Check skip and comment settings; blank and comment lines produce no records.");
        if let Some(path) = source.path() {
            err = err.with_path(path);
        }
        return Err(err);
    };
    if let Some(part) = parts
        .iter()
        .find(|part| part.records() > 0 && part.columns() != Some(columns))
    {
        return Err(Error::new(ErrorKind::Internal).with_message(format!(
            "region column count {:?} disagrees with {columns}",
            part.columns()
        )));
    }

    let total: u64 = parts.iter().map(ShardIndex::records).sum();
    let header = has_header as u64;
    let keep = max_rows.map_or(total, |rows| total.min(rows.saturating_add(header)));
    let keep_slots = usize::try_from(keep)
        .ok()
        .and_then(|keep| keep.checked_mul(columns))
        .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("index exceeds address space"))?;

    let mut starts = Vec::with_capacity(keep_slots);
    let mut ends = Vec::with_capacity(keep_slots);
    let mut malformed = Vec::new();
    let mut base = 0u64;
    for part in parts {
        if base >= keep {
            break;
        }
        let records = part.records();
        let take = (keep - base).min(records);
        let slots = take as usize * columns;
        let (part_starts, part_ends, part_malformed) = part.into_parts();
        starts.extend_from_slice(&part_starts[..slots]);
        ends.extend_from_slice(&part_ends[..slots]);
        malformed.extend(
            part_malformed
                .into_iter()
                .filter(|row| row.record < take)
                .map(|mut row| {
                    row.record += base;
                    row
                }),
        );
        base += records;
    }

    if !malformed.is_empty() {
        tracing::warn!(
            malformed = malformed.len(),
            first_record = malformed[0].record,
            "malformed records indexed"
        );
    }
    tracing::debug!(
        records = keep,
        columns,
        fields = starts.len(),
        truncated = keep < total,
        "assembled index"
    );

    Ok(FieldIndex::new(
        source, dialect, starts, ends, columns, has_header, malformed,
    ))
}
