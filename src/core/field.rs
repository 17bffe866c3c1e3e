// Borrowed view of one field's raw bytes with lazy unquoting.
use std::borrow::Cow;

use crate::core::dialect::{Dialect, EscapeMode};

#[derive(Clone, Copy, Debug)]
pub struct Field<'a> {
    raw: &'a [u8],
    quote: Option<u8>,
    escape: EscapeMode,
    trim_ws: bool,
}

impl<'a> Field<'a> {
    pub(crate) fn new(raw: &'a [u8], dialect: &Dialect) -> Self {
        Self {
            raw,
            quote: dialect.quote,
            escape: dialect.escape,
            trim_ws: dialect.trim_ws,
        }
    }

    /// Bytes exactly as stored, quotes and escapes included.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn is_quoted(&self) -> bool {
        match self.quote {
            Some(quote) => self.trimmed().first() == Some(&quote),
            None => false,
        }
    }

    /// Field value with surrounding quotes removed and escapes resolved.
    ///
    /// Borrows when nothing needs rewriting. An unterminated quoted field keeps
    /// everything after its opening quote.
    pub fn unquoted(&self) -> Cow<'a, [u8]> {
        let text = self.trimmed();
        let Some(quote) = self.quote.filter(|_| self.is_quoted()) else {
            return Cow::Borrowed(text);
        };
        let inner = &text[1..];
        let inner = match inner.last() {
            Some(last) if *last == quote && !ends_escaped(inner, self.escape) => {
                &inner[..inner.len() - 1]
            }
            _ => inner,
        };

        let needs_rewrite = match self.escape {
            EscapeMode::DoubleQuote => inner.contains(&quote),
            EscapeMode::Backslash => inner.contains(&b'\\'),
        };
        if !needs_rewrite {
            return Cow::Borrowed(inner);
        }

        let mut out = Vec::with_capacity(inner.len());
        let mut iter = inner.iter().copied().peekable();
        while let Some(byte) = iter.next() {
            match self.escape {
                EscapeMode::DoubleQuote if byte == quote => {
                    out.push(byte);
                    if iter.peek() == Some(&quote) {
                        iter.next();
                    }
                }
                EscapeMode::Backslash if byte == b'\\' => {
                    if let Some(next) = iter.next() {
                        out.push(next);
                    }
                }
                _ => out.push(byte),
            }
        }
        Cow::Owned(out)
    }

    fn trimmed(&self) -> &'a [u8] {
        if self.trim_ws {
            self.raw.trim_ascii_start().trim_ascii_end()
        } else {
            self.raw
        }
    }
}

// The closing quote of `\"...\"` style text is literal when preceded by an odd
// run of backslashes.
fn ends_escaped(inner: &[u8], escape: EscapeMode) -> bool {
    if escape != EscapeMode::Backslash || inner.is_empty() {
        return false;
    }
    let body = &inner[..inner.len() - 1];
    body.iter().rev().take_while(|b| **b == b'\\').count() % 2 == 1
}
