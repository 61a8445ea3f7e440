//! The worker driver: pulls batches from the queue, runs each reserved tile
//! through [`crate::pipeline::transcode`], and writes results to the
//! destination blob store.
//!
//! Parallel workers run as OS threads against one SQLite database rather
//! than separate processes: the codec libraries here (`image`, `jpegxl-rs`)
//! are reentrant, so there's no need to pay for process isolation. The
//! `reserve`/`mark_finished` transactional boundary in
//! [`crate::queue::WorkQueue`] is what actually keeps workers from
//! duplicating work, and that holds just as well across threads.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::blob::{self, BlobError, BlobStore, FileStore};
use crate::codec::{Format, FormatError};
use crate::compress::{CompressError, Recompression};
use crate::pipeline::{self, Action, TranscodeOptions};
use crate::queue::{JobMeta, QueueError, WorkQueue};
use crate::resin::{ResinMode, ResinPolicy};

/// Errors raised by the worker driver. Per-item failures never surface here:
/// they are recorded in the queue's error log and the batch continues;
/// only database and startup failures are fatal.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A queue operation failed (reservation, mark-finished, metadata read).
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Opening a blob namespace, or building the resin sibling directory, failed.
    #[error(transparent)]
    Blob(#[from] BlobError),
    /// The job's `recompress`/`reencode` metadata named an unknown format.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// The job's `recompress` metadata named an unknown compressor.
    #[error(transparent)]
    Compress(#[from] CompressError),
    /// Launching parallel workers without a positive lease would race.
    #[error(
        "refusing to launch {parallel} parallel workers with lease_msec = 0: \
         set --lease-msec to a value exceeding your worst-case batch latency"
    )]
    ParallelRequiresLease {
        /// The requested parallelism.
        parallel: usize,
    },
}

/// Tunables for one executor's batch loop, mirroring the `worker` subcommand
/// flags that are per-process rather than shared job metadata.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum items reserved per batch.
    pub block_size: i64,
    /// `encoding_options["num_threads"]` override for this process; `0`
    /// means "codec default / all cores".
    pub codec_threads: i32,
    /// Emit a `tracing::debug!` span per item instead of just per batch.
    pub verbose: bool,
}

/// Runs the per-item pipeline over batches reserved from one queue
/// database, writing to one destination blob store.
pub struct Executor {
    queue: WorkQueue,
    src: FileStore,
    dest: FileStore,
    resin: Option<ResinPolicy>,
    resin_store: Option<FileStore>,
    meta: JobMeta,
    options: ExecuteOptions,
}

impl Executor {
    /// Opens the queue database and the source/destination blob stores named
    /// in its job metadata. `working_dir` is where the resin log
    /// (`transcoder.resin.<pid>.log`) is created.
    pub fn open(
        database_url: &str,
        busy_timeout_ms: u32,
        lease_msec: i64,
        options: ExecuteOptions,
        working_dir: &Path,
    ) -> Result<Self, WorkerError> {
        let mut queue = WorkQueue::open(database_url, busy_timeout_ms, lease_msec)?;
        let meta = queue.metadata()?;
        let src = FileStore::new(&meta.source)?;
        let dest = FileStore::new(&meta.dest)?;

        let resin = (meta.resin_handling != ResinMode::Noop)
            .then(|| ResinPolicy::new(&meta.source, options.verbose, meta.resin_handling, working_dir))
            .transpose()?;
        let resin_store = (meta.resin_handling == ResinMode::Move)
            .then(|| blob::resin_sibling(&src))
            .transpose()?;

        Ok(Self {
            queue,
            src,
            dest,
            resin,
            resin_store,
            meta,
            options,
        })
    }

    /// Runs batches to completion: loops [`Self::run_batch`] until a
    /// reservation pass returns zero items.
    pub fn execute(&mut self) -> Result<(), WorkerError> {
        loop {
            let reserved = self.run_batch()?;
            if reserved == 0 {
                return Ok(());
            }
        }
    }

    /// Reserves one batch and drives it through fetch -> transcode -> write
    /// -> (optional delete) -> mark finished. Returns the number of items
    /// reserved (`0` means the queue was drained on this pass).
    pub fn run_batch(&mut self) -> Result<usize, WorkerError> {
        let filenames = self.queue.reserve_batch(self.options.block_size)?;
        if filenames.is_empty() {
            return Ok(0);
        }
        let _span = tracing::info_span!("batch", batch_size = filenames.len()).entered();

        let target_format = self.meta.reencode.as_deref().map(Format::parse).transpose()?;
        let recompress = self.meta.recompress.as_deref().map(Recompression::parse).transpose()?;

        let mut encoding_options = self.meta.encoding_options.clone();
        encoding_options.insert("num_threads".to_string(), self.options.codec_threads as i64);

        let mut written = Vec::new();

        for filename in &filenames {
            match self.process_item(filename, target_format, recompress, &encoding_options) {
                Ok(ItemOutcome::Written) => written.push(filename.clone()),
                Ok(ItemOutcome::Skipped) | Ok(ItemOutcome::SkippedAndMoved) => {}
                Err(message) => {
                    if self.options.verbose {
                        tracing::warn!(filename, error = %message, "item failed");
                    }
                    self.queue.record_error(filename, &message)?;
                }
            }
        }

        if self.meta.delete_original {
            for filename in &written {
                self.src.delete(filename)?;
            }
        }

        self.queue.mark_finished(&filenames)?;
        tracing::info!(batch_size = filenames.len(), written = written.len(), "batch complete");
        Ok(filenames.len())
    }

    /// Processes one item: fetch, transcode, and (if written) recompress and
    /// put. Returns `Err` with a human-readable message for anything the
    /// caller should record as a per-item error rather than abort the batch.
    fn process_item(
        &mut self,
        filename: &str,
        target_format: Option<Format>,
        recompress: Option<Recompression>,
        options: &IndexMap<String, i64>,
    ) -> Result<ItemOutcome, String> {
        let bytes = self.src.get(filename).map_err(|e| e.to_string())?;
        if bytes.is_empty() {
            return Err("empty or missing file".to_string());
        }

        let opts = TranscodeOptions {
            target_format,
            level: self.meta.encoding_level,
            options,
            resin: self.resin.as_ref(),
        };

        match pipeline::transcode(filename, &bytes, &opts).map_err(|e| e.to_string())? {
            Action::Write { filename: out_name, bytes: out_bytes } => {
                let tolerates = Format::from_filename(&out_name).map(|f| f.tolerates_recompression()).unwrap_or(false);
                let out_bytes = match (recompress, tolerates) {
                    (Some(rc), true) => rc.compress(&out_bytes).map_err(|e| e.to_string())?,
                    _ => out_bytes,
                };
                self.dest.put(&out_name, &out_bytes).map_err(|e| e.to_string())?;
                Ok(ItemOutcome::Written)
            }
            Action::Skip => Ok(ItemOutcome::Skipped),
            Action::SkipAndMove => {
                let resin_store = self
                    .resin_store
                    .as_ref()
                    .expect("resin_store is built whenever resin_handling == Move");
                self.src.move_to(filename, resin_store).map_err(|e| e.to_string())?;
                Ok(ItemOutcome::SkippedAndMoved)
            }
        }
    }
}

enum ItemOutcome {
    Written,
    Skipped,
    SkippedAndMoved,
}

/// Parameters for [`run`] that are process-orchestration concerns rather
/// than per-executor tunables.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Number of concurrent executors; `1` runs serially on the calling thread.
    pub parallel: usize,
    /// Delay between launching successive workers, to spread contention on
    /// the database's first few transactions.
    pub ramp: Duration,
    /// Render a progress bar while polling `remaining()`.
    pub progress: bool,
}

/// Drives one or many [`Executor`]s against `database_url` to completion.
///
/// `parallel > 1` requires `lease_msec > 0`: without a lease, concurrent
/// reservers would race over the same rows.
pub fn run(
    database_url: &str,
    busy_timeout_ms: u32,
    lease_msec: i64,
    exec_opts: ExecuteOptions,
    driver_opts: DriverOptions,
    working_dir: &Path,
) -> Result<(), WorkerError> {
    if driver_opts.parallel > 1 && lease_msec == 0 {
        return Err(WorkerError::ParallelRequiresLease { parallel: driver_opts.parallel });
    }

    if driver_opts.parallel <= 1 {
        let mut executor = Executor::open(database_url, busy_timeout_ms, lease_msec, exec_opts, working_dir)?;
        return executor.execute();
    }

    let mut progress_queue = WorkQueue::open(database_url, busy_timeout_ms, 0)?;
    let total = progress_queue.total()?;
    let completed = progress_queue.finished()? + progress_queue.num_errors()?;

    let bar = driver_opts.progress.then(|| {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} tiles ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_position(completed as u64);
        bar
    });

    let handles: Vec<_> = (0..driver_opts.parallel)
        .map(|_| {
            let database_url = database_url.to_string();
            let working_dir = working_dir.to_path_buf();
            let exec_opts = exec_opts.clone();
            let handle = thread::spawn(move || -> Result<(), WorkerError> {
                let mut executor = Executor::open(&database_url, busy_timeout_ms, lease_msec, exec_opts, &working_dir)?;
                executor.execute()
            });
            if driver_opts.ramp > Duration::ZERO {
                thread::sleep(driver_opts.ramp);
            }
            handle
        })
        .collect();

    loop {
        let remaining = progress_queue.remaining()?;
        if let Some(bar) = &bar {
            let completed = progress_queue.finished()? + progress_queue.num_errors()?;
            bar.set_position(completed as u64);
        }
        if remaining <= 0 || handles.iter().all(|h| h.is_finished()) {
            break;
        }
        thread::sleep(Duration::from_millis(500));
    }

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    for handle in handles {
        handle.join().expect("worker thread panicked")?;
    }

    Ok(())
}

/// Absolute path to use as `working_dir` when none is given explicitly:
/// the process's current directory, where `transcoder.resin.<pid>.log`
/// is created.
pub fn default_working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
