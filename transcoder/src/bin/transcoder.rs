//! Command-line entry point: `init`, `worker`, `status`, `release`.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use transcoder::jobctl::{self, InitOptions, StatusReport, Throughput, WorkerOptions};
use transcoder::resin::ResinMode;

#[derive(Parser)]
#[command(name = "transcoder", version, about = "Resumable, distributed tile transcoding work queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the queue database and enumerate the source into it.
    Init {
        /// Source blob namespace (bare path or `file://` URI).
        source: String,
        /// Destination blob namespace; defaults to `source` (in-place transcode).
        destination: Option<String>,
        /// Destination encoding: same, jpeg, jxl, png, bmp, or tiff.
        #[arg(long, default_value = "same")]
        encoding: String,
        /// Destination bitstream compression: same, none, gzip, br, or zstd.
        #[arg(long, default_value = "same")]
        compression: String,
        /// Encoding level: jpeg/jxl 0-100 (jxl 100 = lossless), png 0-9.
        #[arg(long)]
        level: Option<i32>,
        /// JPEG-XL encoder effort, 1 (fastest) to 10 (slowest, smallest).
        #[arg(long = "jxl-effort", default_value_t = 3)]
        jxl_effort: i32,
        /// JPEG-XL progressive decoding speed hint, 0-4.
        #[arg(long = "jxl-decoding-speed", default_value_t = 0)]
        jxl_decoding_speed: i32,
        /// Delete each source tile once its transcoded output is written.
        #[arg(long)]
        delete_original: bool,
        /// Restrict the enumerated source to these file extensions
        /// (comma-separated, e.g. "png,tif").
        #[arg(long)]
        ext: Option<String>,
        /// Path to create the tracking database at.
        #[arg(long)]
        db: String,
        /// How to handle tiles the tissue detector classifies as resin.
        #[arg(long, default_value = "noop")]
        resin: ResinMode,
    },
    /// Execute the transfer using a database created by `init`.
    Worker {
        /// Path to a database created by `init`.
        db: String,
        /// Number of concurrent workers.
        #[arg(short = 'p', long = "parallel", default_value_t = 1)]
        parallel: usize,
        /// Number of files reserved and processed per batch.
        #[arg(short = 'b', long = "block-size", default_value_t = 200)]
        block_size: i64,
        /// Lease duration in milliseconds; required to exceed 0 when `-p` > 1.
        #[arg(long = "lease-msec", default_value_t = 0)]
        lease_msec: i64,
        /// Seconds to wait on a locked database before giving up.
        #[arg(long = "db-timeout", default_value_t = 5.0)]
        db_timeout: f64,
        /// Seconds to wait between launching additional workers.
        #[arg(long = "ramp-sec", default_value_t = 0.25)]
        ramp_sec: f64,
        /// Threads the codec should use per worker; 0 means codec default.
        #[arg(long = "codec-threads", default_value_t = 0)]
        codec_threads: i32,
        /// Log each item's outcome, not just each batch's.
        #[arg(short = 'v', long)]
        verbose: bool,
        /// Render a progress bar.
        #[arg(long)]
        progress: bool,
        /// Delete the database once the queue drains with zero errors.
        #[arg(long)]
        cleanup: bool,
    },
    /// Report queue counts.
    Status {
        /// Path to a database created by `init`.
        db: String,
        /// Sample throughput over this many seconds and project an ETA.
        #[arg(long)]
        eta: Option<f64>,
        /// Print bare counts instead of percentages.
        #[arg(long = "raw-counts")]
        raw_counts: bool,
    },
    /// Clear every item's lease, making the whole queue reservable again.
    Release {
        /// Path to a database created by `init`.
        db: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    install_interrupt_handler();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// On Ctrl-C, exits immediately rather than unwinding. Any items a worker
/// thread had reserved stay on their lease and become reservable again once
/// it expires; nothing is marked finished or recorded as an error.
fn install_interrupt_handler() {
    let _ = ctrlc::set_handler(|| {
        eprintln!("interrupted");
        std::process::exit(130);
    });
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init {
            source,
            destination,
            encoding,
            compression,
            level,
            jxl_effort,
            jxl_decoding_speed,
            delete_original,
            ext,
            db,
            resin,
        } => {
            init_logging(false);
            let inserted = jobctl::init(InitOptions {
                source,
                destination,
                encoding,
                compression,
                level,
                jxl_effort,
                jxl_decoding_speed,
                delete_original,
                ext,
                resin,
                database: db,
            })?;
            println!("inserted {inserted} items");
            Ok(())
        }
        Command::Worker {
            db,
            parallel,
            block_size,
            lease_msec,
            db_timeout,
            ramp_sec,
            codec_threads,
            verbose,
            progress,
            cleanup,
        } => {
            init_logging(verbose);
            let codec_threads = if codec_threads != 0 { codec_threads } else { codec_threads_from_env() };
            jobctl::worker(WorkerOptions {
                database: db,
                parallel,
                block_size,
                lease_msec,
                db_timeout_sec: db_timeout,
                ramp_sec,
                codec_threads,
                verbose,
                progress,
                cleanup,
            })?;
            Ok(())
        }
        Command::Status { db, eta, raw_counts } => {
            init_logging(false);
            let (report, throughput) = jobctl::status(&db, eta)?;
            print_status(&report, throughput, raw_counts);
            Ok(())
        }
        Command::Release { db } => {
            init_logging(false);
            jobctl::release(&db)?;
            println!("released all leases");
            Ok(())
        }
    }
}

/// Falls back to `TRANSCODER_CODEC_THREADS` when `--codec-threads` is left
/// at its default of 0; invalid or unset values keep the codec's own default.
fn codec_threads_from_env() -> i32 {
    shared_utils::get_env_var("TRANSCODER_CODEC_THREADS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn print_status(report: &StatusReport, throughput: Option<Throughput>, raw_counts: bool) {
    if raw_counts || report.total == 0 {
        println!("{} remaining", report.remaining);
        println!("{} completed", report.completed);
        println!("{} leased", report.leased);
        println!("{} errors", report.errors);
        println!("{} total", report.total);
    } else {
        let pct = |n: i64| n as f64 / report.total as f64 * 100.0;
        println!("{} remaining ({:.2}%)", report.remaining, pct(report.remaining));
        println!("{} completed ({:.2}%)", report.completed, pct(report.completed));
        println!("{} leased ({:.2}%)", report.leased, pct(report.leased));
        println!("{} errors ({:.2}%)", report.errors, pct(report.errors));
        println!("{} total", report.total);
    }

    if let Some(t) = throughput {
        println!("{:.2} items/sec, eta {:.0}s", t.items_per_sec, t.eta_secs);
    }
}
