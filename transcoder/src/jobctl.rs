//! Job control surface: the four operations the `transcoder` CLI binary
//! exposes as subcommands (`init`, `worker`, `status`, `release`), kept
//! separate from [`crate::worker`] (the execution loop) and
//! [`crate::queue`] (the storage layer) so the CLI itself stays a thin
//! argument-parsing shim.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use thiserror::Error;

use crate::blob::{self, BlobError, BlobStore, FileStore};
use crate::codec::{Format, FormatError};
use crate::compress::{CompressError, Recompression};
use crate::queue::{NewJob, QueueError, WorkQueue};
use crate::resin::ResinMode;
use crate::worker::{self, DriverOptions, ExecuteOptions, WorkerError};

/// Default SQLite busy-timeout, milliseconds, used wherever the CLI doesn't
/// expose a narrower `--db-timeout` (only `worker` does).
const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5_000;

/// Errors raised by the job-control operations. The CLI binary prints these
/// via `anyhow`'s `Display` and exits non-zero.
#[derive(Debug, Error)]
pub enum JobCtlError {
    /// A blob namespace operation (URI normalization, listing) failed.
    #[error(transparent)]
    Blob(#[from] BlobError),
    /// A queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The worker driver failed (includes the refused-parallel-with-no-lease case).
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// An `--encoding` value didn't name a known format.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// A `--compression` value didn't name a known compressor.
    #[error(transparent)]
    Compress(#[from] CompressError),
    /// `worker <db>` was pointed at a path that doesn't exist.
    #[error("database {0:?} does not exist; did you run `transcoder init`?")]
    MissingDatabase(PathBuf),
    /// `-b/--block-size` was not positive.
    #[error("block size must be positive, got {0}")]
    InvalidBlockSize(i64),
    /// `-p/--parallel` was not positive.
    #[error("parallelism must be positive, got {0}")]
    InvalidParallelism(i64),
    /// `--lease-msec` was negative.
    #[error("lease_msec must be non-negative, got {0}")]
    InvalidLease(i64),
}

/// Parameters for [`init`], mirroring the `init` subcommand's flags.
pub struct InitOptions {
    /// Source blob namespace, bare path or URI.
    pub source: String,
    /// Destination blob namespace; `None` means in-place (`dest = source`).
    pub destination: Option<String>,
    /// `--encoding`: `same`, `jpeg`, `jxl`, `png`, `bmp`, or `tiff`.
    pub encoding: String,
    /// `--compression`: `same`, `none`, `gzip`, `br`, or `zstd`.
    pub compression: String,
    /// `--level`.
    pub level: Option<i32>,
    /// `--jxl-effort`.
    pub jxl_effort: i32,
    /// `--jxl-decoding-speed`.
    pub jxl_decoding_speed: i32,
    /// `--delete-original`.
    pub delete_original: bool,
    /// `--ext`: filter the enumerated source to a comma-separated list of
    /// extensions.
    pub ext: Option<String>,
    /// `--resin`.
    pub resin: ResinMode,
    /// `--db`: path to the queue database to create.
    pub database: String,
}

/// Creates a fresh queue database, enumerates `opts.source`, and inserts
/// every matching filename as a pending item. Returns the number inserted.
pub fn init(opts: InitOptions) -> Result<usize, JobCtlError> {
    let source = blob::normalize_uri(&opts.source)?;
    let destination = match &opts.destination {
        Some(d) => blob::normalize_uri(d)?,
        None => source.clone(),
    };

    let reencode = parse_same_or(&opts.encoding, Format::parse)?.map(|f| f.to_string());
    let recompress = parse_same_or(&opts.compression, |s| {
        if s.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        Recompression::parse(s).map(Some)
    })?
    .flatten()
    .map(|c| c.name().to_string());

    let mut encoding_options = IndexMap::new();
    if reencode.as_deref() == Some("jxl") {
        encoding_options.insert("effort".to_string(), opts.jxl_effort as i64);
        encoding_options.insert("decodingspeed".to_string(), opts.jxl_decoding_speed as i64);
    }

    let store = FileStore::new(&source)?;
    let names = store.list(opts.ext.as_deref())?;

    let job = NewJob {
        source,
        dest: destination,
        recompress,
        reencode,
        encoding_level: opts.level,
        encoding_options,
        resin_handling: opts.resin,
        delete_original: opts.delete_original,
    };

    let mut queue = WorkQueue::create(&opts.database, DEFAULT_BUSY_TIMEOUT_MS, &job)?;
    queue.insert(&names)?;
    Ok(names.len())
}

/// `"same"` (case-insensitively) parses to `None`; anything else is parsed
/// by `parse` and wrapped in `Some`.
fn parse_same_or<T, E>(raw: &str, parse: impl FnOnce(&str) -> Result<T, E>) -> Result<Option<T>, E> {
    if raw.eq_ignore_ascii_case("same") {
        Ok(None)
    } else {
        Ok(Some(parse(raw)?))
    }
}

/// Parameters for [`worker`], mirroring the `worker` subcommand's flags.
#[derive(Clone)]
pub struct WorkerOptions {
    /// Path to an existing queue database.
    pub database: String,
    /// `-p/--parallel`.
    pub parallel: usize,
    /// `-b/--block-size`.
    pub block_size: i64,
    /// `--lease-msec`.
    pub lease_msec: i64,
    /// `--db-timeout`, seconds.
    pub db_timeout_sec: f64,
    /// `--ramp-sec`.
    pub ramp_sec: f64,
    /// `--codec-threads`.
    pub codec_threads: i32,
    /// `--verbose`.
    pub verbose: bool,
    /// `--progress`.
    pub progress: bool,
    /// `--cleanup`: drop the database on a clean, error-free drain.
    pub cleanup: bool,
}

/// Validates flags, then drives the configured number of executors against
/// `opts.database` to completion, optionally dropping the database file
/// afterward (see [`close`]).
pub fn worker(opts: WorkerOptions) -> Result<(), JobCtlError> {
    if !Path::new(&opts.database).exists() {
        return Err(JobCtlError::MissingDatabase(PathBuf::from(&opts.database)));
    }
    if opts.parallel == 0 {
        return Err(JobCtlError::InvalidParallelism(0));
    }
    if opts.block_size <= 0 {
        return Err(JobCtlError::InvalidBlockSize(opts.block_size));
    }
    if opts.lease_msec < 0 {
        return Err(JobCtlError::InvalidLease(opts.lease_msec));
    }

    let busy_timeout_ms = (opts.db_timeout_sec.max(0.0) * 1000.0) as u32;
    let exec_opts = ExecuteOptions {
        block_size: opts.block_size,
        codec_threads: opts.codec_threads,
        verbose: opts.verbose,
    };
    let driver_opts = DriverOptions {
        parallel: opts.parallel,
        ramp: Duration::from_secs_f64(opts.ramp_sec.max(0.0)),
        progress: opts.progress,
    };

    worker::run(
        &opts.database,
        busy_timeout_ms,
        opts.lease_msec,
        exec_opts,
        driver_opts,
        &worker::default_working_dir(),
    )?;

    if opts.cleanup {
        close(&opts.database, busy_timeout_ms)?;
    }

    Ok(())
}

/// Drops the database on a clean drain (no recorded errors); otherwise
/// leaves it in place and writes a notice to stderr.
fn close(database: &str, busy_timeout_ms: u32) -> Result<(), JobCtlError> {
    let has_errors = {
        let mut queue = WorkQueue::open(database, busy_timeout_ms, 0)?;
        queue.has_errors()?
    };

    if has_errors {
        eprintln!("errors were recorded during processing; keeping {database:?} for inspection");
        return Ok(());
    }

    for suffix in ["", "-wal", "-shm", "-journal"] {
        let _ = std::fs::remove_file(format!("{database}{suffix}"));
    }
    Ok(())
}

/// A snapshot of queue counts, as reported by `status`.
#[derive(Debug, Clone, Copy)]
pub struct StatusReport {
    /// Total items ever inserted.
    pub total: i64,
    /// Items marked done.
    pub completed: i64,
    /// Items currently out on an unexpired lease.
    pub leased: i64,
    /// Items recorded in the error log.
    pub errors: i64,
    /// Items still eligible for reservation.
    pub remaining: i64,
}

/// Observed throughput over a `status --eta` sampling window.
#[derive(Debug, Clone, Copy)]
pub struct Throughput {
    /// Items completed per second over the sampling window.
    pub items_per_sec: f64,
    /// Estimated seconds until `remaining` reaches zero at this rate.
    pub eta_secs: f64,
}

/// Reports queue counts for `database`. When `eta_sec` is `Some` and
/// positive, sleeps that many seconds and reports the throughput observed
/// over the window alongside the final snapshot.
pub fn status(database: &str, eta_sec: Option<f64>) -> Result<(StatusReport, Option<Throughput>), JobCtlError> {
    let mut queue = WorkQueue::open(database, DEFAULT_BUSY_TIMEOUT_MS, 0)?;
    let before = snapshot(&mut queue)?;

    let throughput = match eta_sec.filter(|s| *s > 0.0) {
        None => None,
        Some(secs) => {
            thread::sleep(Duration::from_secs_f64(secs));
            let after = snapshot(&mut queue)?;
            let rate = (after.completed + after.errors - before.completed - before.errors) as f64 / secs;
            let eta_secs = if rate > 0.0 { after.remaining as f64 / rate } else { f64::INFINITY };
            return Ok((after, Some(Throughput { items_per_sec: rate, eta_secs })));
        }
    };

    Ok((before, throughput))
}

fn snapshot(queue: &mut WorkQueue) -> Result<StatusReport, QueueError> {
    Ok(StatusReport {
        total: queue.total()?,
        completed: queue.finished()?,
        leased: queue.num_leased()?,
        errors: queue.num_errors()?,
        remaining: queue.remaining()?,
    })
}

/// Clears every item's lease, making the whole queue immediately
/// reservable again.
pub fn release(database: &str) -> Result<(), JobCtlError> {
    let mut queue = WorkQueue::open(database, DEFAULT_BUSY_TIMEOUT_MS, 0)?;
    queue.release()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(store: &FileStore, name: &str, fill: u8) {
        let img = crate::codec::Image { width: 4, height: 4, channels: 1, data: vec![fill; 16] };
        let bytes = crate::codec::encode(Format::Png, &img, None, &IndexMap::new()).unwrap();
        store.put(name, &bytes).unwrap();
    }

    #[test]
    fn init_enumerates_source_and_inserts_every_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let store = FileStore::new(src_dir.to_str().unwrap()).unwrap();
        write_png(&store, "a.png", 1);
        write_png(&store, "b.png", 2);

        let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
        let opts = InitOptions {
            source: src_dir.to_str().unwrap().to_string(),
            destination: None,
            encoding: "jxl".to_string(),
            compression: "same".to_string(),
            level: Some(100),
            jxl_effort: 1,
            jxl_decoding_speed: 0,
            delete_original: false,
            ext: Some("png".to_string()),
            resin: ResinMode::Noop,
            database: db.clone(),
        };

        let inserted = init(opts).unwrap();
        assert_eq!(inserted, 2);

        let mut queue = WorkQueue::open(&db, 5000, 0).unwrap();
        assert_eq!(queue.total().unwrap(), 2);
        let meta = queue.metadata().unwrap();
        assert_eq!(meta.reencode.as_deref(), Some("jxl"));
        assert_eq!(meta.encoding_options.get("effort"), Some(&1));
    }

    #[test]
    fn worker_rejects_a_database_that_does_not_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let opts = WorkerOptions {
            database: tmp.path().join("nope.sqlite3").to_str().unwrap().to_string(),
            parallel: 1,
            block_size: 200,
            lease_msec: 0,
            db_timeout_sec: 5.0,
            ramp_sec: 0.0,
            codec_threads: 0,
            verbose: false,
            progress: false,
            cleanup: false,
        };
        assert!(matches!(worker(opts), Err(JobCtlError::MissingDatabase(_))));
    }

    #[test]
    fn worker_rejects_invalid_flag_combinations() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("queue.sqlite3");
        std::fs::write(&db, b"").unwrap();
        let db = db.to_str().unwrap().to_string();

        let base = WorkerOptions {
            database: db,
            parallel: 1,
            block_size: 200,
            lease_msec: 0,
            db_timeout_sec: 5.0,
            ramp_sec: 0.0,
            codec_threads: 0,
            verbose: false,
            progress: false,
            cleanup: false,
        };

        let bad_block = WorkerOptions { block_size: 0, ..base.clone() };
        assert!(matches!(worker(bad_block), Err(JobCtlError::InvalidBlockSize(0))));

        let bad_lease = WorkerOptions { lease_msec: -1, ..base.clone() };
        assert!(matches!(worker(bad_lease), Err(JobCtlError::InvalidLease(-1))));

        let bad_parallel = WorkerOptions { parallel: 0, ..base };
        assert!(matches!(worker(bad_parallel), Err(JobCtlError::InvalidParallelism(0))));
    }

    #[test]
    fn release_clears_leases() {
        let tmp = tempfile::tempdir().unwrap();
        let db = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();
        let job = NewJob {
            source: format!("file://{}", tmp.path().join("src").display()),
            dest: format!("file://{}", tmp.path().join("dst").display()),
            recompress: None,
            reencode: None,
            encoding_level: None,
            encoding_options: IndexMap::new(),
            resin_handling: ResinMode::Noop,
            delete_original: false,
        };
        let mut q = WorkQueue::create(&db, 5000, &job).unwrap();
        q.insert(&["a.png".into()]).unwrap();
        drop(q);

        let mut q = WorkQueue::open(&db, 5000, 60_000).unwrap();
        assert_eq!(q.reserve_batch(1).unwrap().len(), 1);
        drop(q);

        release(&db).unwrap();

        let mut q = WorkQueue::open(&db, 5000, 60_000).unwrap();
        assert_eq!(q.reserve_batch(1).unwrap().len(), 1);
    }
}
