//! Purpose: Command-line entry for the delimdex throughput benchmark.
//! Role: Parses flags, installs tracing, and hands off to `delimdex::bench`.
//! Invariants: Exit codes follow `to_exit_code`; errors print one line plus an optional hint.
use std::path::PathBuf;

use clap::{Parser, ValueHint};
use tracing_subscriber::EnvFilter;

use delimdex::api::{Error, to_exit_code};
use delimdex::bench::{BenchArgs, BenchFormat, parse_size, run_bench};
use delimdex::core::options::DEFAULT_CHUNK_SIZE;

#[derive(Parser, Debug)]
#[command(
    name = "delimdex-bench",
    version,
    about = "Measure delimited-text indexing throughput",
    long_about = None,
    after_help = r#"EXAMPLES
  $ delimdex-bench --size 64M --workers 1 --workers 8
  $ delimdex-bench --input data.csv --format table
  $ RUST_LOG=delimdex=debug delimdex-bench --size 4M"#
)]
struct Cli {
    #[arg(
        long,
        help = "Directory for generated inputs (default: .scratch/delimdex-bench-*)",
        value_hint = ValueHint::DirPath
    )]
    work_dir: Option<PathBuf>,
    #[arg(
        long,
        help = "Index an existing file instead of generated CSV",
        value_hint = ValueHint::FilePath
    )]
    input: Option<PathBuf>,
    #[arg(
        long = "size",
        default_value = "16M",
        help = "Generated input size (repeatable; K/M/G suffixes)"
    )]
    sizes: Vec<String>,
    #[arg(
        long = "workers",
        default_values_t = [1usize, 2, 4, 8],
        help = "Worker counts for the mapped path (repeatable)"
    )]
    workers: Vec<usize>,
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, help = "Chunk size for the streamed path")]
    chunk_size: usize,
    #[arg(long, default_value = "both", help = "Output format: json|table|both")]
    format: String,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("delimdex-bench: {err}");
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        std::process::exit(to_exit_code(err.kind()));
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let sizes = cli
        .sizes
        .iter()
        .map(|size| parse_size(size))
        .collect::<Result<Vec<_>, _>>()?;
    let args = BenchArgs {
        work_dir: cli.work_dir,
        input: cli.input,
        sizes,
        workers: cli.workers,
        chunk_size: cli.chunk_size,
        format: BenchFormat::parse(&cli.format)?,
    };
    run_bench(args, env!("CARGO_PKG_VERSION"))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
