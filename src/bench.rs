// Benchmark harness for delimdex.
//
// Purpose:
// - Provide a repeatable throughput baseline for the mapped (per worker count) and streamed paths.
// - Emit machine-readable JSON to stdout and a human-readable table to stderr.
//
// Design notes:
// - Generates synthetic CSV with quoted fields, embedded delimiters and embedded newlines.
// - Numbers are trend indicators, not lab-grade profiling.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use crate::api::{BackingStore, Error, ErrorKind, FieldIndex, IndexOptions, Indexer};

#[derive(Clone, Debug)]
pub struct BenchArgs {
    pub work_dir: Option<PathBuf>,
    /// Existing file to index instead of generated data.
    pub input: Option<PathBuf>,
    pub sizes: Vec<u64>,
    pub workers: Vec<usize>,
    pub chunk_size: usize,
    pub format: BenchFormat,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BenchFormat {
    Json,
    Table,
    Both,
}

impl BenchFormat {
    pub fn parse(input: &str) -> Result<Self, Error> {
        match input.trim() {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            "both" => Ok(Self::Both),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message("invalid --format (use json|table|both)")),
        }
    }
}

/// Parses sizes such as `512K`, `16M` or `1G` (binary multiples).
pub fn parse_size(input: &str) -> Result<u64, Error> {
    let text = input.trim();
    let (digits, scale) = match text.char_indices().last() {
        Some((idx, 'K' | 'k')) => (&text[..idx], 1u64 << 10),
        Some((idx, 'M' | 'm')) => (&text[..idx], 1u64 << 20),
        Some((idx, 'G' | 'g')) => (&text[..idx], 1u64 << 30),
        _ => (text, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|value| value.checked_mul(scale))
        .filter(|value| *value > 0)
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid size {input:?}"))
                .with_hint("Use a positive number with an optional K, M or G suffix.")
        })
}

pub fn run_bench(args: BenchArgs, program_version: &str) -> Result<(), Error> {
    let start = SystemTime::now();
    let work_dir = args.work_dir.clone().unwrap_or_else(default_work_dir);
    std::fs::create_dir_all(&work_dir).map_err(|err| {
        Error::from_io(err)
            .with_message("failed to create bench directory")
            .with_path(&work_dir)
    })?;

    let inputs: Vec<PathBuf> = match &args.input {
        Some(path) => vec![path.clone()],
        None => {
            let mut paths = Vec::with_capacity(args.sizes.len());
            for size in &args.sizes {
                let path = work_dir.join(format!("bench-{size}.csv"));
                generate_csv(&path, *size)?;
                paths.push(path);
            }
            paths
        }
    };

    let mut results = Vec::new();
    for path in &inputs {
        for workers in &args.workers {
            results.push(bench_mapped(path, *workers)?);
        }
        results.push(bench_streamed(path, args.chunk_size, BackingStore::Memory)?);
        results.push(bench_streamed(
            path,
            args.chunk_size,
            BackingStore::TempFile {
                dir: Some(work_dir.clone()),
            },
        )?);
    }

    let output = json!({
        "name": "delimdex",
        "version": program_version,
        "ts": rfc3339_now(start),
        "system": system_json(),
        "params": {
            "sizes": args.sizes,
            "workers": args.workers,
            "chunk_size": args.chunk_size,
            "input": args.input.as_ref().map(|path| path.display().to_string()),
            "work_dir": work_dir.display().to_string(),
            "debug_build": cfg!(debug_assertions),
        },
        "results": results,
    });

    emit_bench_output(output, args.format)
}

fn emit_bench_output(value: Value, format: BenchFormat) -> Result<(), Error> {
    match format {
        BenchFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string()));
            Ok(())
        }
        BenchFormat::Table => emit_table(&value),
        BenchFormat::Both => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string()));
            emit_table(&value)
        }
    }
}

fn table_io_error(err: io::Error) -> Error {
    Error::from_io(err).with_message("failed to write bench table")
}

fn emit_table(value: &Value) -> Result<(), Error> {
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "delimdex bench (table)").map_err(table_io_error)?;

    let results = value
        .get("results")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("bench results missing"))?;

    writeln!(
        stderr,
        "{:>10}  {:>10}  {:>8}  {:>10}  {:>10}  {:>10}  {}",
        "bench", "size", "workers", "rows", "ms", "MiB/s", "notes"
    )
    .map_err(table_io_error)?;

    for item in results {
        let bench = item.get("bench").and_then(|v| v.as_str()).unwrap_or("?");
        let bytes = item.get("bytes").and_then(|v| v.as_u64()).unwrap_or(0);
        let workers = item.get("workers").and_then(|v| v.as_u64()).unwrap_or(1);
        let rows = item.get("rows").and_then(|v| v.as_u64()).unwrap_or(0);
        let ms = item
            .get("duration_ms")
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::NAN);
        let mb_per_sec = item
            .get("mb_per_sec")
            .and_then(|v| v.as_f64())
            .unwrap_or(f64::NAN);
        let notes = item.get("notes").and_then(|v| v.as_str()).unwrap_or("");

        writeln!(
            stderr,
            "{:>10}  {:>10}  {:>8}  {:>10}  {:>10.1}  {:>10.1}  {}",
            bench,
            format_bytes(bytes),
            workers,
            rows,
            ms,
            mb_per_sec,
            notes
        )
        .map_err(table_io_error)?;
    }

    Ok(())
}

fn bench_mapped(path: &Path, workers: usize) -> Result<Value, Error> {
    let indexer = Indexer::new(IndexOptions::new().with_workers(workers));
    let start = Instant::now();
    let index = indexer.index_path(path)?;
    let dur = start.elapsed();
    Ok(result_entry("mapped", &index, workers, dur, None))
}

fn bench_streamed(path: &Path, chunk_size: usize, backing: BackingStore) -> Result<Value, Error> {
    let notes = match backing {
        BackingStore::Memory => "memory",
        BackingStore::TempFile { .. } => "temp_file",
    };
    let file = File::open(path).map_err(|err| Error::from_io(err).with_path(path))?;
    let indexer = Indexer::new(
        IndexOptions::new()
            .with_chunk_size(chunk_size)
            .with_backing(backing),
    );
    let start = Instant::now();
    let index = indexer.index_reader(file)?;
    let dur = start.elapsed();
    Ok(result_entry("streamed", &index, 1, dur, Some(notes)))
}

fn result_entry(
    bench: &str,
    index: &FieldIndex,
    workers: usize,
    duration: Duration,
    notes: Option<&str>,
) -> Value {
    let bytes = index.source().size();
    let dur_ms = duration.as_secs_f64() * 1000.0;
    let secs = duration.as_secs_f64().max(1e-9);
    let mb_per_sec = (bytes as f64 / (1024.0 * 1024.0)) / secs;
    let rows_per_sec = index.row_count() as f64 / secs;

    let mut map = BTreeMap::new();
    map.insert("bench".to_string(), json!(bench));
    map.insert("bytes".to_string(), json!(bytes));
    map.insert("workers".to_string(), json!(workers));
    map.insert("rows".to_string(), json!(index.row_count()));
    map.insert("columns".to_string(), json!(index.column_count()));
    map.insert("malformed".to_string(), json!(index.malformed().len()));
    map.insert("duration_ms".to_string(), json!(dur_ms));
    map.insert("mb_per_sec".to_string(), json!(mb_per_sec));
    map.insert("rows_per_sec".to_string(), json!(rows_per_sec));
    if let Some(notes) = notes {
        map.insert("notes".to_string(), json!(notes));
    }
    Value::Object(map.into_iter().collect())
}

/// Writes roughly `target` bytes of CSV; every fifth row carries a quoted field with
/// an embedded delimiter, doubled quote and newline.
pub fn generate_csv(path: &Path, target: u64) -> Result<(), Error> {
    let io_err = |err: io::Error| {
        Error::from_io(err)
            .with_message("failed to write bench input")
            .with_path(path)
    };
    let file = File::create(path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    let mut written = 0u64;
    let mut state = 0x9e37_79b9_7f4a_7c15u64;

    let header = b"id,name,score,comment\n";
    out.write_all(header).map_err(io_err)?;
    written += header.len() as u64;

    let mut row = 0u64;
    let mut line = Vec::with_capacity(128);
    while written < target {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        line.clear();
        if row % 5 == 0 {
            write!(
                line,
                "{row},user{},{}.{:02},\"said \"\"hi\"\", then\nleft, twice\"\n",
                state % 10_000,
                state % 1000,
                state % 100
            )
            .map_err(io_err)?;
        } else {
            write!(
                line,
                "{row},user{},{}.{:02},plain text {}\n",
                state % 10_000,
                state % 1000,
                state % 100,
                state % 97
            )
            .map_err(io_err)?;
        }
        out.write_all(&line).map_err(io_err)?;
        written += line.len() as u64;
        row += 1;
    }
    out.flush().map_err(io_err)?;
    tracing::debug!(path = %path.display(), bytes = written, rows = row, "generated bench input");
    Ok(())
}

fn system_json() -> Value {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpus": cpus,
    })
}

fn default_work_dir() -> PathBuf {
    let pid = std::process::id();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis();
    PathBuf::from(".scratch").join(format!("delimdex-bench-{pid}-{ts}"))
}

fn rfc3339_now(ts: SystemTime) -> String {
    let dur = ts.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = dur.as_secs() as i64;
    let nsec = dur.subsec_nanos();
    let tm = time::OffsetDateTime::from_unix_timestamp(secs).unwrap_or(time::OffsetDateTime::UNIX_EPOCH);
    let tm = tm.replace_nanosecond(nsec).unwrap_or(tm);
    tm.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn format_bytes(value: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let v = value as f64;
    if v >= GB {
        format!("{:.1}GiB", v / GB)
    } else if v >= MB {
        format!("{:.1}MiB", v / MB)
    } else if v >= KB {
        format!("{:.1}KiB", v / KB)
    } else {
        format!("{value}B")
    }
}
