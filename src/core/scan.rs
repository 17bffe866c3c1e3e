//! Purpose: Walk a byte region and emit one span per field honoring quotes, escapes and comments.
//! Exports: `State`, `Action`, `FieldSink`, `RowEnd`, `RegionIndexer`, `Scan`.
//! Role: The scanning core; the shard planner and both ingestion paths compose around it.
//! Invariants: `Dialect::step` is the single transition function; emission and shard
//!   pre-passes never disagree about where rows end.
//! Invariants: Scanning is resumable at any byte; quotes, CRLF pairs and multi-byte
//!   delimiters may straddle `scan` calls.
//! Invariants: Anomalies are recorded on the row and never abort the scan.
use std::ops::ControlFlow;

use memchr::{memchr, memchr2};

use crate::core::dialect::{Dialect, EscapeMode};
use crate::core::progress::Progress;
use crate::core::table::MalformedKind;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum State {
    /// First byte of a fresh line; comments are only recognized here.
    RowStart,
    SkipLine,
    Comment,
    FieldStart,
    Field { matched: u8 },
    Quoted,
    QuotedEscape,
    /// After a closing quote. `immediate` is set while no byte has followed it yet.
    AfterQuote { immediate: bool, matched: u8 },
    /// Stray bytes after a closing quote, skipped up to the next separator.
    Stray { matched: u8 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    None,
    CloseQuote,
    ReopenQuote,
    Delimiter,
    Newline,
    BlankLine,
    CommentEnd,
    SkipEnd,
    Stray,
}

impl Action {
    /// Whether the byte carrying this action is the last byte of a line.
    pub fn is_row_boundary(self) -> bool {
        matches!(
            self,
            Action::Newline | Action::BlankLine | Action::CommentEnd | Action::SkipEnd
        )
    }
}

#[inline]
fn is_blank(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

impl Dialect {
    pub fn step(&self, state: State, byte: u8) -> (State, Action) {
        match state {
            State::RowStart => {
                if self.comment == Some(byte) {
                    return (State::Comment, Action::None);
                }
                if byte == b'\n' {
                    return (State::RowStart, Action::BlankLine);
                }
                // Under trimming a line of blanks, with or without a CR, is blank.
                if self.trim_ws
                    && (is_blank(byte) || byte == b'\r')
                    && !self.delimiter.starts_with(byte)
                {
                    return (State::RowStart, Action::None);
                }
                self.step(State::FieldStart, byte)
            }
            State::SkipLine => match byte {
                b'\n' => (State::RowStart, Action::SkipEnd),
                _ => (State::SkipLine, Action::None),
            },
            State::Comment => match byte {
                b'\n' => (State::RowStart, Action::CommentEnd),
                _ => (State::Comment, Action::None),
            },
            State::FieldStart => {
                if byte == b'\n' {
                    return (State::RowStart, Action::Newline);
                }
                if self.quote == Some(byte) {
                    return (State::Quoted, Action::None);
                }
                match self.delimiter.advance(0, byte) {
                    0 if self.trim_ws && is_blank(byte) => (State::FieldStart, Action::None),
                    0 => (State::Field { matched: 0 }, Action::None),
                    m if m == self.delimiter.len() => (State::FieldStart, Action::Delimiter),
                    m => (State::Field { matched: m as u8 }, Action::None),
                }
            }
            State::Field { matched } => {
                if byte == b'\n' {
                    return (State::RowStart, Action::Newline);
                }
                match self.delimiter.advance(matched as usize, byte) {
                    m if m == self.delimiter.len() => (State::FieldStart, Action::Delimiter),
                    m => (State::Field { matched: m as u8 }, Action::None),
                }
            }
            State::Quoted => {
                if self.escape == EscapeMode::Backslash && byte == b'\\' {
                    return (State::QuotedEscape, Action::None);
                }
                if self.quote == Some(byte) {
                    return (
                        State::AfterQuote {
                            immediate: true,
                            matched: 0,
                        },
                        Action::CloseQuote,
                    );
                }
                (State::Quoted, Action::None)
            }
            State::QuotedEscape => (State::Quoted, Action::None),
            State::AfterQuote { immediate, matched } => {
                if immediate && self.escape == EscapeMode::DoubleQuote && self.quote == Some(byte) {
                    return (State::Quoted, Action::ReopenQuote);
                }
                if byte == b'\n' {
                    return (State::RowStart, Action::Newline);
                }
                match self.delimiter.advance(matched as usize, byte) {
                    m if m == self.delimiter.len() => (State::FieldStart, Action::Delimiter),
                    0 if byte == b'\r' || (self.trim_ws && is_blank(byte)) => (
                        State::AfterQuote {
                            immediate: false,
                            matched: 0,
                        },
                        Action::None,
                    ),
                    0 => (State::Stray { matched: 0 }, Action::Stray),
                    m => (
                        State::AfterQuote {
                            immediate: false,
                            matched: m as u8,
                        },
                        Action::None,
                    ),
                }
            }
            State::Stray { matched } => {
                if byte == b'\n' {
                    return (State::RowStart, Action::Newline);
                }
                match self.delimiter.advance(matched as usize, byte) {
                    m if m == self.delimiter.len() => (State::FieldStart, Action::Delimiter),
                    m => (State::Stray { matched: m as u8 }, Action::None),
                }
            }
        }
    }

    /// Length of the prefix of `bytes` that leaves `state` unchanged with no action.
    #[inline]
    pub fn skip_inert(&self, state: State, bytes: &[u8]) -> usize {
        let found = match state {
            State::Field { matched: 0 } | State::Stray { matched: 0 } => {
                memchr2(self.delimiter.as_bytes()[0], b'\n', bytes)
            }
            State::Quoted => match (self.quote, self.escape) {
                (Some(quote), EscapeMode::Backslash) => memchr2(quote, b'\\', bytes),
                (Some(quote), EscapeMode::DoubleQuote) => memchr(quote, bytes),
                (None, _) => Some(0),
            },
            State::Comment | State::SkipLine => memchr(b'\n', bytes),
            _ => Some(0),
        };
        found.unwrap_or(bytes.len())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RowEnd {
    /// Offset of the first byte of the line.
    pub start: u64,
    /// Offset of the line terminator (the `\r` of a CRLF pair), or end of input.
    pub line_end: u64,
    pub issue: Option<MalformedKind>,
}

/// Destination for field spans, in row-major order.
pub trait FieldSink {
    fn field(&mut self, start: u64, end: u64);

    fn end_row(&mut self, row: RowEnd) -> ControlFlow<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scan {
    Complete,
    /// The sink asked to stop; `consumed` bytes of the last call were processed.
    Halted { consumed: usize },
}

#[derive(Debug)]
pub struct RegionIndexer<'d> {
    dialect: &'d Dialect,
    state: State,
    skip_remaining: u64,
    row_start: u64,
    field_start: u64,
    field_end: Option<u64>,
    row_fields: usize,
    issue: Option<MalformedKind>,
    carry_cr: bool,
    next: u64,
    halted: bool,
}

impl<'d> RegionIndexer<'d> {
    /// Starts a scanner positioned at a row start `start`, skipping `skip` lines first.
    pub fn new(dialect: &'d Dialect, start: u64, skip: u64) -> Self {
        Self {
            dialect,
            state: State::RowStart,
            skip_remaining: skip,
            row_start: start,
            field_start: start,
            field_end: None,
            row_fields: 0,
            issue: None,
            carry_cr: false,
            next: start,
            halted: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Absolute offset of the next byte the scanner expects.
    pub fn position(&self) -> u64 {
        self.next
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Scans `bytes`, which must start at absolute offset `base == self.position()`.
    pub fn scan<S: FieldSink>(&mut self, bytes: &[u8], base: u64, sink: &mut S) -> Scan {
        if self.halted {
            return Scan::Halted { consumed: 0 };
        }
        debug_assert_eq!(base, self.next, "scan regions must be contiguous");
        let delim_len = self.dialect.delimiter.len() as u64;
        let mut i = 0usize;
        while i < bytes.len() {
            i += self.dialect.skip_inert(self.state, &bytes[i..]);
            if i >= bytes.len() {
                break;
            }
            let byte = bytes[i];
            let prev = self.state;
            if prev == State::RowStart
                && self.skip_remaining > 0
                && self.dialect.comment != Some(byte)
            {
                self.state = State::SkipLine;
                continue;
            }

            let (next, action) = self.dialect.step(prev, byte);
            if prev == State::RowStart && !matches!(next, State::RowStart | State::Comment) {
                self.begin_row();
            }
            self.state = next;

            let pos = base + i as u64;
            let flow = match action {
                Action::None => ControlFlow::Continue(()),
                Action::CloseQuote => {
                    self.field_end = Some(pos + 1);
                    ControlFlow::Continue(())
                }
                Action::ReopenQuote => {
                    self.field_end = None;
                    ControlFlow::Continue(())
                }
                Action::Delimiter => {
                    let end = self.field_end.take().unwrap_or(pos + 1 - delim_len);
                    sink.field(self.field_start, end);
                    self.row_fields += 1;
                    self.field_start = pos + 1;
                    ControlFlow::Continue(())
                }
                Action::Stray => {
                    self.issue.get_or_insert(MalformedKind::StrayAfterQuote);
                    ControlFlow::Continue(())
                }
                Action::Newline => {
                    let cr = if i > 0 { bytes[i - 1] == b'\r' } else { self.carry_cr };
                    let flow = self.end_line(pos - cr as u64, sink);
                    self.row_start = pos + 1;
                    flow
                }
                Action::BlankLine => {
                    let cr = if i > 0 { bytes[i - 1] == b'\r' } else { self.carry_cr };
                    let line_end = (pos - cr as u64).max(self.row_start);
                    let flow = self.blank_line(line_end, sink);
                    self.row_start = pos + 1;
                    flow
                }
                Action::CommentEnd => {
                    self.row_start = pos + 1;
                    ControlFlow::Continue(())
                }
                Action::SkipEnd => {
                    self.skip_remaining -= 1;
                    self.row_start = pos + 1;
                    ControlFlow::Continue(())
                }
            };
            i += 1;

            if flow.is_break() {
                self.halted = true;
                self.next = base + i as u64;
                return Scan::Halted { consumed: i };
            }
        }

        if let Some(last) = bytes.last() {
            self.carry_cr = *last == b'\r';
        }
        self.next = base + bytes.len() as u64;
        Scan::Complete
    }

    /// Scans in blocks of the progress cadence, reporting each block.
    pub fn scan_with_progress<S: FieldSink>(
        &mut self,
        bytes: &[u8],
        base: u64,
        sink: &mut S,
        progress: &Progress,
    ) -> Scan {
        let block = progress.block_size();
        let mut offset = 0usize;
        while offset < bytes.len() {
            let end = bytes.len().min(offset.saturating_add(block));
            let outcome = self.scan(&bytes[offset..end], base + offset as u64, sink);
            if let Scan::Halted { consumed } = outcome {
                progress.advance(consumed as u64);
                return Scan::Halted {
                    consumed: offset + consumed,
                };
            }
            progress.advance((end - offset) as u64);
            offset = end;
        }
        Scan::Complete
    }

    /// Closes the region at absolute offset `end`, emitting a trailing record that
    /// lacks a line terminator. Input ending inside quotes is recorded malformed.
    pub fn finish<S: FieldSink>(&mut self, end: u64, sink: &mut S) {
        if self.halted {
            return;
        }
        debug_assert_eq!(end, self.next, "finish must follow the last scanned byte");
        match self.state {
            State::RowStart => {
                if end > self.row_start {
                    let line_end = (end - self.carry_cr as u64).max(self.row_start);
                    let _ = self.blank_line(line_end, sink);
                }
            }
            State::SkipLine | State::Comment => {}
            State::Quoted | State::QuotedEscape => {
                self.issue.get_or_insert(MalformedKind::UnterminatedQuote);
                let _ = self.end_line(end, sink);
            }
            State::FieldStart
            | State::Field { .. }
            | State::AfterQuote { .. }
            | State::Stray { .. } => {
                let line_end = end - self.carry_cr as u64;
                let _ = self.end_line(line_end, sink);
            }
        }
        self.state = State::RowStart;
        self.row_start = end;
        self.halted = true;
    }

    fn begin_row(&mut self) {
        self.field_start = self.row_start;
        self.field_end = None;
        self.row_fields = 0;
        self.issue = None;
    }

    fn end_line<S: FieldSink>(&mut self, line_end: u64, sink: &mut S) -> ControlFlow<()> {
        let end = self.field_end.take().unwrap_or(line_end);
        let blank = self.row_fields == 0 && end == line_end && line_end == self.row_start;
        if blank && self.dialect.skip_empty_rows {
            self.row_fields = 0;
            return ControlFlow::Continue(());
        }
        sink.field(self.field_start, end);
        self.row_fields = 0;
        sink.end_row(RowEnd {
            start: self.row_start,
            line_end,
            issue: self.issue.take(),
        })
    }

    fn blank_line<S: FieldSink>(&mut self, line_end: u64, sink: &mut S) -> ControlFlow<()> {
        if self.dialect.skip_empty_rows {
            return ControlFlow::Continue(());
        }
        sink.field(self.row_start, line_end);
        sink.end_row(RowEnd {
            start: self.row_start,
            line_end,
            issue: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;

    use super::{Action, FieldSink, RegionIndexer, RowEnd, Scan, State};
    use crate::core::dialect::{Delimiter, Dialect, EscapeMode};
    use crate::core::table::MalformedKind;

    #[derive(Default)]
    struct Rows {
        current: Vec<(u64, u64)>,
        rows: Vec<Vec<(u64, u64)>>,
        issues: Vec<Option<MalformedKind>>,
        stop_after: Option<usize>,
    }

    impl FieldSink for Rows {
        fn field(&mut self, start: u64, end: u64) {
            self.current.push((start, end));
        }

        fn end_row(&mut self, row: RowEnd) -> ControlFlow<()> {
            self.rows.push(std::mem::take(&mut self.current));
            self.issues.push(row.issue);
            match self.stop_after {
                Some(limit) if self.rows.len() >= limit => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }
    }

    fn csv() -> Dialect {
        Dialect::new(Delimiter::byte(b',').expect("delim"))
    }

    fn index(dialect: &Dialect, input: &[u8], skip: u64) -> Rows {
        let mut rows = Rows::default();
        let mut scanner = RegionIndexer::new(dialect, 0, skip);
        assert_eq!(scanner.scan(input, 0, &mut rows), Scan::Complete);
        scanner.finish(input.len() as u64, &mut rows);
        rows
    }

    fn index_chunked(dialect: &Dialect, input: &[u8], chunk: usize) -> Rows {
        let mut rows = Rows::default();
        let mut scanner = RegionIndexer::new(dialect, 0, 0);
        let mut base = 0u64;
        for piece in input.chunks(chunk) {
            scanner.scan(piece, base, &mut rows);
            base += piece.len() as u64;
        }
        scanner.finish(input.len() as u64, &mut rows);
        rows
    }

    fn texts<'a>(input: &'a [u8], rows: &Rows) -> Vec<Vec<&'a [u8]>> {
        rows.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|(s, e)| &input[*s as usize..*e as usize])
                    .collect()
            })
            .collect()
    }

    #[test]
    fn quoted_field_with_delimiter_newline_and_doubled_quote() {
        let input = b"a,\"b,c\nd\"\"e\",f\n";
        let rows = index(&csv(), input, 0);
        assert_eq!(
            texts(input, &rows),
            vec![vec![&b"a"[..], &b"\"b,c\nd\"\"e\""[..], &b"f"[..]]]
        );
        assert_eq!(rows.issues, vec![None]);
    }

    #[test]
    fn crlf_is_excluded_from_last_field() {
        let input = b"a,b\r\nc,\"d\"\r\n";
        let rows = index(&csv(), input, 0);
        assert_eq!(
            texts(input, &rows),
            vec![vec![&b"a"[..], &b"b"[..]], vec![&b"c"[..], &b"\"d\""[..]]]
        );
        assert_eq!(rows.issues, vec![None, None]);
    }

    #[test]
    fn crlf_split_across_chunks_matches_single_pass() {
        let input = b"x,y\r\n\"1\r\n2\",3\r\n4,5";
        let whole = index(&csv(), input, 0);
        for chunk in 1..input.len() {
            let split = index_chunked(&csv(), input, chunk);
            assert_eq!(split.rows, whole.rows, "chunk size {chunk}");
        }
    }

    #[test]
    fn comment_and_skip_lines_produce_nothing() {
        let dialect = csv().with_comment(Some(b'#'));
        let input = b"junk line\n# note\nmore,junk\nh1,h2\n#x,y\n1,2\n";
        let rows = index(&dialect, input, 2);
        assert_eq!(
            texts(input, &rows),
            vec![vec![&b"h1"[..], &b"h2"[..]], vec![&b"1"[..], &b"2"[..]]]
        );
    }

    #[test]
    fn comment_byte_mid_row_is_literal() {
        let dialect = csv().with_comment(Some(b'#'));
        let input = b"a,#b\n";
        let rows = index(&dialect, input, 0);
        assert_eq!(texts(input, &rows), vec![vec![&b"a"[..], &b"#b"[..]]]);
    }

    #[test]
    fn blank_lines_follow_skip_empty_rows() {
        let input = b"a\n\n\r\nb\n";
        let rows = index(&csv(), input, 0);
        assert_eq!(texts(input, &rows), vec![vec![&b"a"[..]], vec![&b"b"[..]]]);

        let dialect = csv().with_skip_empty_rows(false);
        let rows = index(&dialect, input, 0);
        assert_eq!(rows.rows.len(), 4);
        assert_eq!(rows.rows[1], vec![(2, 2)]);
        assert_eq!(rows.rows[2], vec![(3, 3)]);
    }

    #[test]
    fn stray_byte_after_quote_closes_field() {
        let input = b"\"ab\"cd,e\n";
        let rows = index(&csv(), input, 0);
        assert_eq!(texts(input, &rows), vec![vec![&b"\"ab\""[..], &b"e"[..]]]);
        assert_eq!(rows.issues, vec![Some(MalformedKind::StrayAfterQuote)]);
    }

    #[test]
    fn unterminated_quote_is_recorded_at_end_of_input() {
        let input = b"a,\"open\nstill open";
        let rows = index(&csv(), input, 0);
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(rows.issues, vec![Some(MalformedKind::UnterminatedQuote)]);
        assert_eq!(rows.rows[0][1], (2, input.len() as u64));
    }

    #[test]
    fn quote_inside_unquoted_field_is_literal() {
        let input = b"5\" screen,x\n";
        let rows = index(&csv(), input, 0);
        assert_eq!(texts(input, &rows), vec![vec![&b"5\" screen"[..], &b"x"[..]]]);
        assert_eq!(rows.issues, vec![None]);
    }

    #[test]
    fn backslash_escape_keeps_quote_literal() {
        let dialect = csv().with_escape(EscapeMode::Backslash);
        let input = b"\"a\\\",b\",c\n";
        let rows = index(&dialect, input, 0);
        assert_eq!(texts(input, &rows), vec![vec![&b"\"a\\\",b\""[..], &b"c"[..]]]);
    }

    #[test]
    fn trim_ws_tolerates_blanks_around_quotes_and_comments() {
        let dialect = csv().with_trim_ws(true).with_comment(Some(b'#'));
        let input = b"  # indented comment\n  \"a\"  , b\n";
        let rows = index(&dialect, input, 0);
        assert_eq!(texts(input, &rows), vec![vec![&b"  \"a\""[..], &b" b"[..]]]);
        assert_eq!(rows.issues, vec![None]);
    }

    #[test]
    fn trimmed_blank_lines_match_across_line_endings() {
        let dialect = csv().with_trim_ws(true);
        let lf = b"a,b\n  \nc,d\n";
        let crlf = b"a,b\r\n  \r\nc,d\r\n";
        let lf_rows = index(&dialect, lf, 0);
        let crlf_rows = index(&dialect, crlf, 0);
        assert_eq!(texts(lf, &lf_rows), texts(crlf, &crlf_rows));
        assert_eq!(lf_rows.rows.len(), 2);
        assert_eq!(crlf_rows.issues, vec![None, None]);
        for chunk in 1..crlf.len() {
            assert_eq!(index_chunked(&dialect, crlf, chunk).rows, crlf_rows.rows);
        }

        let kept = dialect.with_skip_empty_rows(false);
        let lf_rows = index(&kept, lf, 0);
        let crlf_rows = index(&kept, crlf, 0);
        assert_eq!(texts(lf, &lf_rows), texts(crlf, &crlf_rows));
        assert_eq!(texts(crlf, &crlf_rows)[1], vec![&b"  "[..]]);
    }

    #[test]
    fn multi_byte_delimiter_across_chunks() {
        let dialect = Dialect::new(Delimiter::new(b"::").expect("delim"));
        let input = b"a::b:c::\"q::\"::d\n";
        let whole = index(&dialect, input, 0);
        assert_eq!(
            texts(input, &whole),
            vec![vec![&b"a"[..], &b"b:c"[..], &b"\"q::\""[..], &b"d"[..]]]
        );
        for chunk in 1..input.len() {
            assert_eq!(index_chunked(&dialect, input, chunk).rows, whole.rows);
        }
    }

    #[test]
    fn trailing_record_without_newline_and_trailing_delimiter() {
        let input = b"a,b\nc,";
        let rows = index(&csv(), input, 0);
        assert_eq!(
            texts(input, &rows),
            vec![vec![&b"a"[..], &b"b"[..]], vec![&b"c"[..], &b""[..]]]
        );
    }

    #[test]
    fn sink_break_halts_scanner() {
        let mut rows = Rows {
            stop_after: Some(1),
            ..Rows::default()
        };
        let input = b"a,b\nc,d\n";
        let dialect = csv();
        let mut scanner = RegionIndexer::new(&dialect, 0, 0);
        assert_eq!(scanner.scan(input, 0, &mut rows), Scan::Halted { consumed: 4 });
        assert_eq!(scanner.position(), 4);
        assert_eq!(scanner.state(), State::RowStart);
        assert!(scanner.is_halted());
        assert_eq!(scanner.scan(&input[4..], 4, &mut rows), Scan::Halted { consumed: 0 });
        assert_eq!(rows.rows.len(), 1);
    }

    #[test]
    fn step_reports_row_boundaries() {
        let dialect = csv().with_comment(Some(b'#'));
        assert_eq!(dialect.step(State::Field { matched: 0 }, b'\n').1, Action::Newline);
        assert!(Action::CommentEnd.is_row_boundary());
        assert_eq!(
            dialect.step(State::Quoted, b'\n'),
            (State::Quoted, Action::None)
        );
        assert_eq!(dialect.step(State::RowStart, b'#'), (State::Comment, Action::None));
    }
}
