//! Purpose: Index a fully available source, in parallel when it is large enough.
//! Exports: `index_mapped`.
//! Role: Mapped-file and in-memory path; composes sniffing, the prefix scan, shard
//!   planning, parallel scanning and assembly.
//! Invariants: The result is identical for every worker count.
//! Invariants: Worker threads only read the shared source; each owns its own table.
use std::sync::Arc;
use std::thread;

use crate::core::assemble::assemble;
use crate::core::error::{Error, ErrorKind};
use crate::core::index::FieldIndex;
use crate::core::options::IndexOptions;
use crate::core::progress::Progress;
use crate::core::scan::{RegionIndexer, Scan, State};
use crate::core::shard::{plan_shards, shard_count};
use crate::core::source::ByteSource;
use crate::core::table::ShardIndex;

pub fn index_mapped(
    source: Arc<ByteSource>,
    options: &IndexOptions,
    progress: &Progress,
) -> Result<FieldIndex, Error> {
    options.validate()?;
    let bytes = source.as_slice();
    if bytes.is_empty() {
        let mut err = Error::new(ErrorKind::Empty).with_message("source is empty");
        if let Some(path) = source.path() {
            err = err.with_path(path);
        }
        return Err(err);
    }
    let dialect = options.dialect(bytes)?;
    let limit = options.record_limit();
    let len = bytes.len() as u64;

    // The first record fixes the column count and where sharding may begin.
    let mut prefix = ShardIndex::new(None, Some(1));
    let mut scanner = RegionIndexer::new(&dialect, 0, options.skip);
    let data_start = match scanner.scan(bytes, 0, &mut prefix) {
        Scan::Complete => {
            scanner.finish(len, &mut prefix);
            progress.advance(len);
            return assemble(
                Arc::clone(&source),
                dialect,
                vec![prefix],
                options.has_header,
                options.max_rows,
            );
        }
        Scan::Halted { consumed } => consumed,
    };
    progress.advance(data_start as u64);
    let columns = prefix.columns();
    if limit == Some(1) {
        return assemble(
            Arc::clone(&source),
            dialect,
            vec![prefix],
            options.has_header,
            options.max_rows,
        );
    }

    let count = shard_count(bytes.len() - data_start, options.workers);
    let ranges = plan_shards(&dialect, bytes, data_start, count)?;
    let shard_limit = limit.map(|limit| limit.saturating_sub(1));
    tracing::debug!(
        workers = options.workers,
        shards = ranges.len(),
        data_start,
        delimiter = %dialect.delimiter,
        "indexing mapped source"
    );

    let dialect_ref = &dialect;
    let parts = thread::scope(|scope| {
        let handles: Vec<_> = ranges
            .iter()
            .cloned()
            .map(|range| {
                scope.spawn(move || {
                    let mut sink = ShardIndex::new(columns, shard_limit);
                    let mut scanner = RegionIndexer::new(dialect_ref, range.start as u64, 0);
                    let outcome = scanner.scan_with_progress(
                        &bytes[range.clone()],
                        range.start as u64,
                        &mut sink,
                        progress,
                    );
                    if outcome == Scan::Complete {
                        if range.end == bytes.len() {
                            scanner.finish(len, &mut sink);
                        } else {
                            debug_assert_eq!(scanner.state(), State::RowStart);
                        }
                    }
                    sink
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().map_err(|_| {
                    Error::new(ErrorKind::Internal).with_message("indexing worker panicked")
                })
            })
            .collect::<Result<Vec<_>, Error>>()
    })?;

    let mut all = Vec::with_capacity(parts.len() + 1);
    all.push(prefix);
    all.extend(parts);
    assemble(source, dialect, all, options.has_header, options.max_rows)
}
