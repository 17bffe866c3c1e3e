//! Purpose: User-facing indexing options and their resolution into a `Dialect`.
//! Exports: `IndexOptions`, `DelimiterSpec`, `BackingStore`, `DEFAULT_CHUNK_SIZE`.
//! Role: The one configuration surface; loadable from JSON so callers can keep presets.
//! Invariants: `validate` runs before any byte is scanned; nothing downstream re-checks.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::dialect::{Delimiter, Dialect, EscapeMode};
use crate::core::error::{Error, ErrorKind};
use crate::core::sniff::{SNIFF_WINDOW, find_first_line, sample_is_complete, sniff_delimiter};

pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DelimiterSpec {
    #[default]
    Auto,
    Explicit(String),
}

impl From<String> for DelimiterSpec {
    fn from(value: String) -> Self {
        if value == "auto" {
            Self::Auto
        } else {
            Self::Explicit(value)
        }
    }
}

impl From<DelimiterSpec> for String {
    fn from(value: DelimiterSpec) -> Self {
        match value {
            DelimiterSpec::Auto => "auto".to_string(),
            DelimiterSpec::Explicit(value) => value,
        }
    }
}

/// Where streamed bytes are retained once read.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackingStore {
    #[default]
    Memory,
    /// An anonymous file, mapped after the stream ends and removed with the index.
    TempFile {
        #[serde(default)]
        dir: Option<PathBuf>,
    },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexOptions {
    pub delimiter: DelimiterSpec,
    pub quote: Option<char>,
    pub escape: EscapeMode,
    pub comment: Option<char>,
    pub trim_ws: bool,
    pub has_header: bool,
    /// Physical lines dropped before the first record; comment lines are not counted.
    pub skip: u64,
    /// Data rows to keep, header excluded.
    pub max_rows: Option<u64>,
    pub skip_empty_rows: bool,
    pub chunk_size: usize,
    pub workers: usize,
    pub progress_bytes: u64,
    pub backing: BackingStore,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            delimiter: DelimiterSpec::Auto,
            quote: Some('"'),
            escape: EscapeMode::DoubleQuote,
            comment: None,
            trim_ws: false,
            has_header: true,
            skip: 0,
            max_rows: None,
            skip_empty_rows: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            progress_bytes: 0,
            backing: BackingStore::Memory,
        }
    }
}

impl IndexOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, Error> {
        let options: Self = serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid index options")
                .with_hint("Options are a JSON object; unknown keys are rejected.")
                .with_source(err)
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = DelimiterSpec::from(delimiter.into());
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_comment(mut self, comment: Option<char>) -> Self {
        self.comment = comment;
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_max_rows(mut self, max_rows: Option<u64>) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_backing(mut self, backing: BackingStore) -> Self {
        self.backing = backing;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_size == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("chunk_size must be at least 1"));
        }
        if self.workers == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("workers must be at least 1"));
        }
        if let DelimiterSpec::Explicit(text) = &self.delimiter {
            Delimiter::new(text.as_bytes())?;
        }
        ascii_byte(self.quote, "quote")?;
        ascii_byte(self.comment, "comment")?;
        Ok(())
    }

    /// Records to collect, header included.
    pub fn record_limit(&self) -> Option<u64> {
        self.max_rows
            .map(|rows| rows.saturating_add(self.has_header as u64))
    }

    /// Builds the dialect, sniffing the delimiter from `sample` when it is `auto`.
    ///
    /// `sample` is the start of the source: the whole map, or the first streamed chunk.
    /// Whether `prefix` of a stream is enough to resolve the dialect exactly as a
    /// fully mapped source would.
    pub fn sample_ready(&self, prefix: &[u8]) -> Result<bool, Error> {
        match &self.delimiter {
            DelimiterSpec::Explicit(_) => Ok(true),
            DelimiterSpec::Auto => {
                let comment = ascii_byte(self.comment, "comment")?;
                Ok(sample_is_complete(prefix, self.skip, comment))
            }
        }
    }

    pub fn dialect(&self, sample: &[u8]) -> Result<Dialect, Error> {
        let quote = ascii_byte(self.quote, "quote")?;
        let comment = ascii_byte(self.comment, "comment")?;
        let delimiter = match &self.delimiter {
            DelimiterSpec::Explicit(text) => Delimiter::new(text.as_bytes())?,
            DelimiterSpec::Auto => {
                let first = find_first_line(sample, self.skip, comment);
                let window = &sample[first..sample.len().min(first + SNIFF_WINDOW)];
                if window.is_empty() {
                    return Err(Error::new(ErrorKind::Empty)
                        .with_message("no data lines to sniff a delimiter from")
                        .with_offset(first as u64));
                }
                let byte = sniff_delimiter(window, quote, comment)
                    .map_err(|err| err.with_offset(first as u64))?;
                Delimiter::byte(byte)?
            }
        };
        let dialect = Dialect::new(delimiter)
            .with_quote(quote)
            .with_escape(self.escape)
            .with_comment(comment)
            .with_trim_ws(self.trim_ws)
            .with_skip_empty_rows(self.skip_empty_rows);
        dialect.validate()?;
        Ok(dialect)
    }
}

fn ascii_byte(value: Option<char>, what: &str) -> Result<Option<u8>, Error> {
    match value {
        None => Ok(None),
        Some(c) if c.is_ascii() => Ok(Some(c as u8)),
        Some(c) => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("{what} must be a single ASCII character, got {c:?}"))),
    }
}
