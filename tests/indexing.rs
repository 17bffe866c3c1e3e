// End-to-end indexing properties over mapped files and in-memory sources.
use std::sync::Arc;

use delimdex::api::{
    ByteSource, ErrorKind, FieldIndex, IndexOptions, IndexStatus, Indexer, MalformedKind,
    index_path, index_source,
};

fn index_str(input: &str, options: IndexOptions) -> FieldIndex {
    Indexer::new(options)
        .index_bytes(input.as_bytes().to_vec())
        .expect("index")
}

fn row_text(index: &FieldIndex, row: u64) -> Vec<String> {
    (0..index.column_count())
        .map(|col| {
            let field = index.field(row, col).expect("field");
            String::from_utf8_lossy(&field.unquoted()).into_owned()
        })
        .collect()
}

/// Mixed-feature CSV large enough to shard eight ways.
fn mixed_input(target: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(target + 128);
    out.extend_from_slice(b"# exported by test\nid,name,note\r\n");
    let mut i = 0usize;
    while out.len() < target {
        match i % 6 {
            0 => out.extend_from_slice(format!("{i},\"multi\nline, {i}\",x\n").as_bytes()),
            1 => out.extend_from_slice(format!("{i},\"say \"\"{i}\"\"\",y\r\n").as_bytes()),
            2 => out.extend_from_slice(b"# comment between rows\n"),
            3 => out.extend_from_slice(format!("{i},,\n").as_bytes()),
            4 => out.extend_from_slice(b"\n"),
            _ => out.extend_from_slice(format!("{i},plain{i},z\n").as_bytes()),
        }
        i += 1;
    }
    out
}

#[test]
fn headerless_source_has_rows_times_columns_increasing_offsets() {
    let index = index_str("1,2,3\n4,5,6\n7,8,9\n10,11,12\n", IndexOptions::new().with_header(false));
    assert_eq!(index.row_count(), 4);
    assert_eq!(index.column_count(), 3);
    assert_eq!(index.offsets().len(), 12);
    assert!(index.offsets().windows(2).all(|pair| pair[0] < pair[1]));
    assert!(index.malformed().is_empty());
    assert_eq!(row_text(&index, 3), vec!["10", "11", "12"]);
}

#[test]
fn worker_counts_produce_identical_offsets() {
    let bytes = mixed_input(700 * 1024);
    let source = Arc::new(ByteSource::from_bytes(bytes));
    let options = IndexOptions::new().with_comment(Some('#'));

    let single = index_source(Arc::clone(&source), &options.clone().with_workers(1)).expect("single");
    for workers in [2usize, 8] {
        let sharded =
            index_source(Arc::clone(&source), &options.clone().with_workers(workers)).expect("sharded");
        assert_eq!(sharded.offsets(), single.offsets(), "workers {workers}");
        assert_eq!(sharded.end_offsets(), single.end_offsets(), "workers {workers}");
        assert_eq!(sharded.row_count(), single.row_count());
    }
    assert_eq!(single.column_count(), 3);
    assert!(single.malformed().is_empty());
    assert_eq!(row_text(&single, 0), vec!["0", "multi\nline, 0", "x"]);
    assert_eq!(row_text(&single, 1), vec!["1", "say \"1\"", "y"]);
    assert_eq!(row_text(&single, 2), vec!["3", "", ""]);
}

#[test]
fn quoted_field_spans_delimiter_newline_and_escaped_quote() {
    let index = index_str("a,\"b,c\nd\"\"e\",f\n", IndexOptions::new().with_header(false));
    assert_eq!(index.row_count(), 1);
    assert_eq!(index.column_count(), 3);
    assert_eq!(index.read_field(0, 1), Some(&b"\"b,c\nd\"\"e\""[..]));
    assert_eq!(row_text(&index, 0), vec!["a", "b,c\nd\"e", "f"]);
}

#[test]
fn mapped_file_index_reads_fields_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("people.csv");
    std::fs::write(&path, "name,age\nada,36\n\"lovelace, a\",37\n").expect("write");

    let index = index_path(&path, &IndexOptions::new()).expect("index");
    assert_eq!(index.source().path(), Some(path.as_path()));
    assert_eq!(index.row_count(), 2);
    assert_eq!(index.header(0).map(|field| field.raw()), Some(&b"name"[..]));
    assert_eq!(row_text(&index, 1), vec!["lovelace, a", "37"]);
    assert!(index.field(0, 0).is_some_and(|field| !field.is_quoted()));
}

#[test]
fn comment_lines_contribute_nothing() {
    let options = IndexOptions::new().with_header(false).with_comment(Some('#'));
    let with = index_str("# top\n1,2\n#mid\n3,4\n# end", options.clone());
    let without = index_str("1,2\n3,4\n", options);
    assert_eq!(with.row_count(), 2);
    assert_eq!(with.offsets().len(), without.offsets().len());
    assert_eq!(row_text(&with, 1), vec!["3", "4"]);
}

#[test]
fn skipped_lines_precede_header_detection() {
    let options = IndexOptions::new().with_skip(2).with_comment(Some('#'));
    let index = index_str("report v1\n# generated\nexported today\nx;y\n1;2\n3;4\n", options);
    assert_eq!(index.delimiter().as_bytes(), b";");
    assert_eq!(index.header(0).map(|field| field.raw()), Some(&b"x"[..]));
    assert_eq!(index.row_count(), 2);
    assert_eq!(row_text(&index, 0), vec!["1", "2"]);
}

#[test]
fn short_row_is_recorded_not_fatal() {
    let index = index_str("a,b,c\n1,2,3\n4,5\n6,7,8\n", IndexOptions::new());
    assert_eq!(index.row_count(), 3);
    assert_eq!(index.malformed_rows(), vec![1]);
    assert_eq!(
        index.malformed()[0].kind,
        MalformedKind::FieldCount {
            expected: 3,
            actual: 2
        }
    );
    assert_eq!(index.read_field(1, 2), Some(&b""[..]));
    assert_eq!(row_text(&index, 2), vec!["6", "7", "8"]);

    let report = index.report();
    assert_eq!(report.status, IndexStatus::Malformed);
    assert_eq!(report.issues[0].row, Some(1));
    assert_eq!(report.issues[0].snippet.as_deref(), Some("4,5"));
}

#[test]
fn long_row_keeps_leading_fields() {
    let index = index_str("a,b\n1,2,3\n", IndexOptions::new());
    assert_eq!(index.row_count(), 1);
    assert_eq!(row_text(&index, 0), vec!["1", "2"]);
    assert_eq!(index.malformed()[0].fields, 3);
}

#[test]
fn semicolon_is_sniffed() {
    let index = index_str("a;b;c\n1;2;3\n", IndexOptions::new());
    assert_eq!(index.delimiter().as_bytes(), b";");
    assert_eq!(index.column_count(), 3);
    assert_eq!(index.row_count(), 1);
}

#[test]
fn crlf_and_lf_yield_the_same_fields() {
    let lf = index_str("a,b\n\"x\",2\n3,4\n", IndexOptions::new());
    let crlf = index_str("a,b\r\n\"x\",2\r\n3,4\r\n", IndexOptions::new());
    assert_eq!(lf.row_count(), crlf.row_count());
    for row in 0..lf.row_count() {
        assert_eq!(row_text(&lf, row), row_text(&crlf, row));
    }
}

#[test]
fn trimmed_whitespace_lines_are_blank_for_lf_and_crlf() {
    let mut options = IndexOptions::new().with_header(false);
    options.trim_ws = true;
    let lf = index_str("a,b\n  \nc,d\n", options.clone());
    let crlf = index_str("a,b\r\n  \r\nc,d\r\n", options);
    assert_eq!(lf.row_count(), 2);
    assert_eq!(crlf.row_count(), 2);
    assert!(crlf.malformed().is_empty());
    assert_eq!(row_text(&crlf, 1), row_text(&lf, 1));
}

#[test]
fn multi_byte_delimiter_matches_single_byte_equivalent() {
    let single = index_str("a|b\n\"1|x\"|2\n3|4\n", IndexOptions::new().with_delimiter("|"));
    let multi = index_str(
        "a<>b\n\"1<>x\"<>2\n3<>4\n",
        IndexOptions::new().with_delimiter("<>"),
    );
    assert_eq!(single.row_count(), multi.row_count());
    assert_eq!(row_text(&multi, 0), vec!["1<>x", "2"]);
    assert_eq!(row_text(&single, 1), row_text(&multi, 1));
}

#[test]
fn max_rows_caps_row_count() {
    let index = index_str(
        "h\n1\n2\n3\n4\n",
        IndexOptions::new().with_delimiter(",").with_max_rows(Some(2)),
    );
    assert_eq!(index.row_count(), 2);
    assert_eq!(index.offsets().len(), 3);
    assert_eq!(row_text(&index, 1), vec!["2"]);
}

#[test]
fn progress_reports_every_byte_once() {
    use std::sync::atomic::{AtomicU64, Ordering};

    let bytes = mixed_input(300 * 1024);
    let len = bytes.len() as u64;
    let seen = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&seen);
    let mut options = IndexOptions::new().with_comment(Some('#')).with_workers(4);
    options.progress_bytes = 8192;
    Indexer::new(options)
        .with_progress(move |bytes: u64| {
            counter.fetch_add(bytes, Ordering::Relaxed);
        })
        .index_bytes(bytes)
        .expect("index");
    assert_eq!(seen.load(Ordering::Relaxed), len);
}

#[test]
fn fatal_errors_are_classified() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = index_path(dir.path().join("missing.csv"), &IndexOptions::new()).expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = Indexer::new(IndexOptions::new())
        .index_bytes(&b"nodelimiters\natall\n"[..])
        .expect_err("ambiguous");
    assert_eq!(err.kind(), ErrorKind::AmbiguousDelimiter);

    let err = Indexer::new(IndexOptions::new().with_comment(Some('#')).with_delimiter(","))
        .index_bytes(&b"# only\n# comments\n"[..])
        .expect_err("empty");
    assert_eq!(err.kind(), ErrorKind::Empty);

    let err = Indexer::new(IndexOptions::new().with_workers(0))
        .index_bytes(&b"a,b\n"[..])
        .expect_err("usage");
    assert_eq!(err.kind(), ErrorKind::Usage);
}
