//! Purpose: Define the stable public Rust API boundary for delimdex.
//! Exports: Entry points for indexing paths, readers and sources, plus the types they return.
//! Role: Public, additive-only surface; scanning and sharding internals stay in `core`.
//! Invariants: Every entry point validates options before touching input bytes.
//! Invariants: Returned indexes own their source; nothing borrows from the caller.
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

mod report;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::dialect::{Delimiter, Dialect, EscapeMode};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::field::Field;
pub use crate::core::index::FieldIndex;
pub use crate::core::options::{BackingStore, DelimiterSpec, IndexOptions};
pub use crate::core::progress::{Progress, ProgressSink};
pub use crate::core::source::ByteSource;
pub use crate::core::table::{MalformedKind, MalformedRow};
pub use report::{IndexReport, IndexStatus, RowIssue};

use crate::core::{connection, session};

/// Configured entry point; carries options and an optional progress callback.
#[derive(Clone, Debug, Default)]
pub struct Indexer {
    options: IndexOptions,
    progress: Progress,
}

impl Indexer {
    pub fn new(options: IndexOptions) -> Self {
        Self {
            options,
            progress: Progress::none(),
        }
    }

    /// Calls `sink` with byte counts as indexing advances.
    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = Progress::new(Arc::new(sink), self.options.progress_bytes);
        self
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn index_path(&self, path: impl AsRef<Path>) -> Result<FieldIndex, Error> {
        let path = path.as_ref();
        self.options.validate()?;
        let source = ByteSource::map(path)?;
        tracing::debug!(path = %path.display(), bytes = source.size(), "mapped source");
        self.index_source(Arc::new(source))
    }

    pub fn index_source(&self, source: Arc<ByteSource>) -> Result<FieldIndex, Error> {
        session::index_mapped(source, &self.options, &self.progress)
    }

    pub fn index_bytes(&self, bytes: impl Into<bytes::Bytes>) -> Result<FieldIndex, Error> {
        self.index_source(Arc::new(ByteSource::from_bytes(bytes)))
    }

    pub fn index_reader<R: Read>(&self, reader: R) -> Result<FieldIndex, Error> {
        connection::index_reader(reader, &self.options, &self.progress)
    }
}

pub fn index_path(path: impl AsRef<Path>, options: &IndexOptions) -> Result<FieldIndex, Error> {
    Indexer::new(options.clone()).index_path(path)
}

pub fn index_source(source: Arc<ByteSource>, options: &IndexOptions) -> Result<FieldIndex, Error> {
    Indexer::new(options.clone()).index_source(source)
}

pub fn index_reader<R: Read>(reader: R, options: &IndexOptions) -> Result<FieldIndex, Error> {
    Indexer::new(options.clone()).index_reader(reader)
}
