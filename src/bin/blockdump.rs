use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use blockdump::{select, Archiver, ArchiverConfig, BlockCatalog, Clock, SystemClock, TimeRange, Timestamp};
use clap::Parser;
use log::info;

const DEFAULT_WINDOW_SECS: i64 = 2 * 60 * 60;

#[derive(Parser)]
#[command(name = "blockdump", version)]
#[command(about = "Stream the TSDB blocks overlapping a time window to stdout as a gzipped tar")]
struct Cli {
    /// TSDB data directory
    #[arg(long, default_value = "/data")]
    data_dir: PathBuf,

    /// Window start, nanoseconds since the Unix epoch (default: two hours ago)
    #[arg(long, allow_hyphen_values = true)]
    min_time: Option<i64>,

    /// Window end, nanoseconds since the Unix epoch (default: now)
    #[arg(long, allow_hyphen_values = true)]
    max_time: Option<i64>,

    /// Print the catalog report instead of an archive
    #[arg(long)]
    meta: bool,

    /// Log at debug level on stderr
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // stdout carries the archive; logs go to stderr and stay quiet by default.
    let level = if cli.debug { "debug" } else { "error" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let catalog = BlockCatalog::open(&cli.data_dir)
        .with_context(|| format!("failed to open data directory {}", cli.data_dir.display()))?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if cli.meta {
        let summary = catalog.enumerate().context("failed to read the catalog")?.summary();
        summary.write_report(&mut out)?;
        out.flush()?;
        return Ok(());
    }

    let clock = SystemClock;
    let window = resolve_window(&clock, cli.min_time, cli.max_time)?;
    window.ensure_not_future(&clock)?;

    let blocks = catalog.blocks().context("failed to list blocks")?;
    let selection = select(&blocks, &window);
    info!("{} of {} blocks overlap {}", selection.len(), blocks.len(), window);

    let archiver = Archiver::new(catalog.data_root(), ArchiverConfig::default());
    let outcome = archiver
        .stream(selection.blocks(), &mut out)
        .context("failed to stream blocks")?;
    info!("wrote {} bytes", outcome.bytes_written());
    Ok(())
}

fn resolve_window(clock: &dyn Clock, min_time: Option<i64>, max_time: Option<i64>) -> Result<TimeRange> {
    Ok(TimeRange::resolve(
        clock,
        min_time.map(Timestamp::from_nanos),
        max_time.map(Timestamp::from_nanos),
        DEFAULT_WINDOW_SECS,
    )?)
}
