//! Purpose: Locate the first data line and infer the field delimiter from a sample window.
//! Exports: `find_first_line`, `sniff_delimiter`, `sample_is_complete`, `CANDIDATES`,
//!   `SNIFF_LINES`, `SNIFF_WINDOW`.
//! Role: Runs once per source, before any region is indexed.
//! Invariants: Detection is deterministic and bounded by `SNIFF_LINES` lines of the window.
//! Invariants: Ties resolve by candidate priority, comma first.
use memchr::memchr;

use crate::core::error::{Error, ErrorKind};

/// Candidate delimiters in priority order.
pub const CANDIDATES: [u8; 5] = [b',', b'\t', b';', b'|', b' '];
pub const SNIFF_LINES: usize = 20;
pub const SNIFF_WINDOW: usize = 64 * 1024;

/// Offset of the first line after `skip` physical lines and any comment lines.
///
/// Uses a raw newline scan; quoting is not considered here.
pub fn find_first_line(bytes: &[u8], skip: u64, comment: Option<u8>) -> usize {
    let mut pos = 0usize;
    let mut skipped = 0u64;
    while pos < bytes.len() {
        let is_comment = comment.is_some_and(|c| bytes[pos] == c);
        if !is_comment && skipped >= skip {
            break;
        }
        if !is_comment {
            skipped += 1;
        }
        match memchr(b'\n', &bytes[pos..]) {
            Some(nl) => pos += nl + 1,
            None => return bytes.len(),
        }
    }
    pos
}

/// Whether a stream prefix already holds everything sniffing would look at, so that
/// reading further cannot change the pick. End of input must be handled by the caller.
pub fn sample_is_complete(prefix: &[u8], skip: u64, comment: Option<u8>) -> bool {
    let first = find_first_line(prefix, skip, comment);
    let window = &prefix[first..];
    if window.len() >= SNIFF_WINDOW {
        return true;
    }
    let mut sampled = 0usize;
    let mut rest = window;
    while let Some(nl) = memchr(b'\n', rest) {
        let line = &rest[..nl];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if !line.is_empty() && !comment.is_some_and(|c| line[0] == c) {
            sampled += 1;
            if sampled >= SNIFF_LINES {
                return true;
            }
        }
        rest = &rest[nl + 1..];
    }
    false
}

/// Picks the candidate whose per-line count is most uniform across the window.
pub fn sniff_delimiter(window: &[u8], quote: Option<u8>, comment: Option<u8>) -> Result<u8, Error> {
    let lines = sample_lines(window, comment);
    let mut best: Option<(usize, u8)> = None;
    for candidate in CANDIDATES {
        if Some(candidate) == quote || Some(candidate) == comment {
            continue;
        }
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| count_unquoted(line, candidate, quote))
            .collect();
        let Some(mode) = modal_nonzero(&counts) else {
            continue;
        };
        let uniform = counts.iter().filter(|count| **count == mode).count();
        // Strict comparison keeps the earlier (higher priority) candidate on ties.
        if best.is_none_or(|(score, _)| uniform > score) {
            best = Some((uniform, candidate));
        }
    }

    match best {
        Some((score, delimiter)) => {
            tracing::debug!(
                delimiter = %(delimiter as char).escape_default(),
                uniform_lines = score,
                sampled_lines = lines.len(),
                "sniffed delimiter"
            );
            Ok(delimiter)
        }
        None => Err(Error::new(ErrorKind::AmbiguousDelimiter)
            .with_message("no candidate delimiter occurs in the sample")
            .with_hint("Pass an explicit delimiter.")),
    }
}

fn sample_lines(window: &[u8], comment: Option<u8>) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut rest = window;
    while !rest.is_empty() && lines.len() < SNIFF_LINES {
        let (line, next, complete) = match memchr(b'\n', rest) {
            Some(nl) => (&rest[..nl], &rest[nl + 1..], true),
            None => (rest, &rest[rest.len()..], false),
        };
        rest = next;
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() || comment.is_some_and(|c| line[0] == c) {
            continue;
        }
        // A truncated trailing line only counts when nothing else was sampled.
        if !complete && !lines.is_empty() {
            break;
        }
        lines.push(line);
    }
    lines
}

fn count_unquoted(line: &[u8], candidate: u8, quote: Option<u8>) -> usize {
    let mut in_quotes = false;
    let mut count = 0usize;
    for b in line {
        if Some(*b) == quote {
            in_quotes = !in_quotes;
        } else if *b == candidate && !in_quotes {
            count += 1;
        }
    }
    count
}

fn modal_nonzero(counts: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for count in counts.iter().copied().filter(|count| *count > 0) {
        let freq = counts.iter().filter(|c| **c == count).count();
        let better = match best {
            None => true,
            Some((best_count, best_freq)) => {
                freq > best_freq || (freq == best_freq && count > best_count)
            }
        };
        if better {
            best = Some((count, freq));
        }
    }
    best.map(|(count, _)| count)
}

#[cfg(test)]
mod tests {
    use super::{SNIFF_LINES, SNIFF_WINDOW, find_first_line, sample_is_complete, sniff_delimiter};
    use crate::core::error::ErrorKind;

    #[test]
    fn semicolon_is_detected() {
        assert_eq!(sniff_delimiter(b"a;b;c\n1;2;3\n", Some(b'"'), None).expect("sniff"), b';');
    }

    #[test]
    fn tab_and_pipe_are_detected() {
        assert_eq!(sniff_delimiter(b"a\tb\n1\t2\n", Some(b'"'), None).expect("sniff"), b'\t');
        assert_eq!(sniff_delimiter(b"a|b|c\n1|2|3", Some(b'"'), None).expect("sniff"), b'|');
    }

    #[test]
    fn ties_prefer_comma() {
        let input = b"the quick fox,1\nthe lazy dog,2\n";
        assert_eq!(sniff_delimiter(input, Some(b'"'), None).expect("sniff"), b',');
    }

    #[test]
    fn quoted_occurrences_are_ignored() {
        let input = b"\"a,b,c\";x\n\"d,e\";y\n\"f\";z\n";
        assert_eq!(sniff_delimiter(input, Some(b'"'), None).expect("sniff"), b';');
    }

    #[test]
    fn uniformity_beats_raw_frequency() {
        // Spaces are frequent but irregular; the comma count is constant.
        let input = b"a b c d,1\ne,2\nf g,3\n";
        assert_eq!(sniff_delimiter(input, Some(b'"'), None).expect("sniff"), b',');
    }

    #[test]
    fn no_candidate_is_ambiguous() {
        let err = sniff_delimiter(b"abc\ndef\n", Some(b'"'), None).expect_err("ambiguous");
        assert_eq!(err.kind(), ErrorKind::AmbiguousDelimiter);
        assert!(err.hint().is_some());
    }

    #[test]
    fn comment_lines_are_not_sampled() {
        let input = b"# a|b|c|d\nx,y\n1,2\n";
        assert_eq!(sniff_delimiter(input, Some(b'"'), Some(b'#')).expect("sniff"), b',');
    }

    #[test]
    fn sample_completes_after_enough_lines_or_bytes() {
        assert!(!sample_is_complete(b"first name;last", 0, None));
        assert!(!sample_is_complete(b"preamble\nh1;h2\n", 1, None));

        let mut lines = b"skip me\n".to_vec();
        for i in 0..SNIFF_LINES - 1 {
            lines.extend_from_slice(format!("#c\n{i};x\n").as_bytes());
        }
        assert!(!sample_is_complete(&lines, 1, Some(b'#')));
        lines.extend_from_slice(b"last;y\n");
        assert!(sample_is_complete(&lines, 1, Some(b'#')));

        let long = vec![b'x'; SNIFF_WINDOW];
        assert!(sample_is_complete(&long, 0, None));
    }

    #[test]
    fn first_line_skips_lines_and_comments() {
        let input = b"junk\n#c\nmore junk\nh1,h2\n1,2\n";
        assert_eq!(find_first_line(input, 0, None), 0);
        assert_eq!(find_first_line(input, 2, Some(b'#')), 18);
        assert_eq!(find_first_line(b"#only\n", 0, Some(b'#')), 6);
        assert_eq!(find_first_line(b"a\nb", 5, None), 3);
    }
}
