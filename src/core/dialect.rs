//! Purpose: Describe how a delimited source is tokenized.
//! Exports: `Delimiter`, `EscapeMode`, `Dialect`.
//! Role: Immutable per-source configuration shared by the sniffer, scanner and shard planner.
//! Invariants: A delimiter is 1..=`MAX_DELIMITER_LEN` bytes and never contains `\n`, `\r` or the quote byte.
//! Invariants: A dialect is fixed once indexing starts; nothing mutates it afterwards.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

pub const MAX_DELIMITER_LEN: usize = 16;

/// Field separator: one byte or a short byte sequence.
///
/// Multi-byte separators are matched with a KMP automaton so a match may begin in
/// one chunk and complete in the next.
#[derive(Clone, PartialEq, Eq)]
pub struct Delimiter {
    bytes: Box<[u8]>,
    fallback: Box<[u8]>,
}

impl Delimiter {
    pub fn new(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.is_empty() || bytes.len() > MAX_DELIMITER_LEN {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "delimiter must be 1..={MAX_DELIMITER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.iter().any(|b| *b == b'\n' || *b == b'\r') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("delimiter must not contain line terminators"));
        }
        Ok(Self {
            bytes: bytes.into(),
            fallback: failure_table(bytes),
        })
    }

    pub fn byte(byte: u8) -> Result<Self, Error> {
        Self::new(&[byte])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The separator byte when the delimiter is a single byte.
    pub fn single(&self) -> Option<u8> {
        match *self.bytes {
            [byte] => Some(byte),
            _ => None,
        }
    }

    pub fn starts_with(&self, byte: u8) -> bool {
        self.bytes[0] == byte
    }

    /// Feeds one byte to the matcher. `matched` is the length of the partial match
    /// so far (always `< len`); returns the new length, `len()` on a full match.
    #[inline]
    pub fn advance(&self, mut matched: usize, byte: u8) -> usize {
        loop {
            if self.bytes[matched] == byte {
                return matched + 1;
            }
            if matched == 0 {
                return 0;
            }
            matched = self.fallback[matched - 1] as usize;
        }
    }
}

fn failure_table(pattern: &[u8]) -> Box<[u8]> {
    let mut table = vec![0u8; pattern.len()];
    let mut k = 0usize;
    for i in 1..pattern.len() {
        while k > 0 && pattern[i] != pattern[k] {
            k = table[k - 1] as usize;
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        table[i] = k as u8;
    }
    table.into_boxed_slice()
}

impl fmt::Debug for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Delimiter({:?})", bstr::BStr::new(&self.bytes))
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bstr::BStr::new(&self.bytes))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeMode {
    /// `""` inside a quoted field stands for one quote byte.
    #[default]
    DoubleQuote,
    /// `\` inside a quoted field makes the next byte literal.
    Backslash,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: Delimiter,
    pub quote: Option<u8>,
    pub escape: EscapeMode,
    pub comment: Option<u8>,
    pub trim_ws: bool,
    pub skip_empty_rows: bool,
}

impl Dialect {
    pub fn new(delimiter: Delimiter) -> Self {
        Self {
            delimiter,
            quote: Some(b'"'),
            escape: EscapeMode::DoubleQuote,
            comment: None,
            trim_ws: false,
            skip_empty_rows: true,
        }
    }

    pub fn with_quote(mut self, quote: Option<u8>) -> Self {
        self.quote = quote;
        self
    }

    pub fn with_escape(mut self, escape: EscapeMode) -> Self {
        self.escape = escape;
        self
    }

    pub fn with_comment(mut self, comment: Option<u8>) -> Self {
        self.comment = comment;
        self
    }

    pub fn with_trim_ws(mut self, trim_ws: bool) -> Self {
        self.trim_ws = trim_ws;
        self
    }

    pub fn with_skip_empty_rows(mut self, skip_empty_rows: bool) -> Self {
        self.skip_empty_rows = skip_empty_rows;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(quote) = self.quote {
            if self.delimiter.as_bytes().contains(&quote) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("delimiter must not contain the quote byte"));
            }
            if quote == b'\n' || quote == b'\r' {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("quote must not be a line terminator"));
            }
            if self.escape == EscapeMode::Backslash && quote == b'\\' {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("quote and escape byte must differ"));
            }
        }
        if let Some(comment) = self.comment {
            if comment == b'\n' || comment == b'\r' {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("comment must not be a line terminator"));
            }
            if Some(comment) == self.quote || self.delimiter.starts_with(comment) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("comment byte collides with quote or delimiter"));
            }
        }
        Ok(())
    }
}
