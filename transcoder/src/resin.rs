//! Tissue detection and resin handling policy.
//!
//! The detector itself (histogram peak count, mean/stdev thresholds) is a
//! pure `image -> bool` predicate tuned for one microscopy dataset, kept
//! separate from the queue contract so [`has_tissue`] is the one function a
//! deployment would swap out. Everything else here, the four-mode policy
//! table and the process-local log file, is stable.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;

/// How non-tissue ("resin") tiles are handled during transcoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResinMode {
    /// No detector is installed; every tile is processed normally.
    Noop,
    /// Detect and log non-tissue tiles, but still transcode and write them.
    Log,
    /// Detect non-tissue tiles, log them, and skip writing them.
    Stay,
    /// Detect non-tissue tiles and move the source elsewhere instead of writing them.
    Move,
}

impl ResinMode {
    /// Maps to/from the small integer stored in `xfermeta.resin_handling`.
    pub fn from_db(v: i32) -> Result<Self, ResinError> {
        match v {
            0 => Ok(Self::Noop),
            1 => Ok(Self::Move),
            2 => Ok(Self::Log),
            3 => Ok(Self::Stay),
            other => Err(ResinError::UnknownMode(other)),
        }
    }

    /// Inverse of [`Self::from_db`].
    pub fn to_db(self) -> i32 {
        match self {
            Self::Noop => 0,
            Self::Move => 1,
            Self::Log => 2,
            Self::Stay => 3,
        }
    }
}

impl fmt::Display for ResinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Noop => "noop",
            Self::Log => "log",
            Self::Stay => "stay",
            Self::Move => "move",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ResinMode {
    type Err = ResinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "noop" => Ok(Self::Noop),
            "log" => Ok(Self::Log),
            "stay" => Ok(Self::Stay),
            "move" => Ok(Self::Move),
            other => Err(ResinError::UnknownModeName(other.to_string())),
        }
    }
}

/// Errors raised by resin handling.
#[derive(Debug, Error)]
pub enum ResinError {
    /// `xfermeta.resin_handling` held a value outside the known range.
    #[error("unknown resin_handling value in database: {0}")]
    UnknownMode(i32),
    /// A `--resin-handling` CLI flag didn't match a known mode name.
    #[error("unknown resin mode name: {0}")]
    UnknownModeName(String),
    /// The resin log file could not be created or written to.
    #[error("could not open resin log {path}: {source}")]
    LogOpen {
        /// Path of the log file that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// An 8-bit single-channel grayscale view, the shape the detector expects.
pub struct GrayImage<'a> {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major pixel data, `width * height` bytes.
    pub pixels: &'a [u8],
}

/// Tissue/resin predicate for one grayscale subtile.
///
/// Tuned for cricket TEM subtiles imaged on Luxel Tape EM; recipe: downsample
/// 2x, count histogram peaks, then fall back to mean/stdev thresholds. A
/// black-box recipe: callers should not depend on its exact numeric
/// thresholds remaining stable across releases.
pub fn has_tissue(img: &GrayImage<'_>) -> bool {
    if img.pixels.is_empty() {
        return false;
    }

    let mut histogram = [0u32; 20];
    let min = 0u8;
    let max = 255u8;
    let bin_width = (max - min) as f64 / histogram.len() as f64;
    for &p in img.pixels {
        let idx = ((p as f64) / bin_width).floor() as usize;
        histogram[idx.min(histogram.len() - 1)] += 1;
    }

    let peak_count = count_histogram_peaks(&histogram, 500);
    if peak_count != 1 {
        return true;
    }

    let n = img.pixels.len() as f64;
    let mean = img.pixels.iter().map(|&p| p as f64).sum::<f64>() / n;
    if mean <= 185.0 {
        return true;
    }

    let variance = img
        .pixels
        .iter()
        .map(|&p| {
            let d = p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let stdev = variance.sqrt();

    stdev >= 11.0
}

/// Counts local maxima in `histogram` whose height clears `min_height`.
fn count_histogram_peaks(histogram: &[u32], min_height: u32) -> usize {
    let mut peaks = 0;
    for i in 0..histogram.len() {
        let h = histogram[i];
        if h < min_height {
            continue;
        }
        let left_ok = i == 0 || histogram[i - 1] <= h;
        let right_ok = i + 1 == histogram.len() || histogram[i + 1] <= h;
        if left_ok && right_ok {
            peaks += 1;
        }
    }
    peaks
}

/// Result of running the resin policy over one decoded tile.
pub enum ResinDecision {
    /// Continue the normal encode/write path.
    Keep,
    /// Drop the item: do not write it to the destination.
    Skip,
    /// Drop the item and relocate its source; the caller (which owns the
    /// blob stores) performs the actual move, since policy evaluation itself
    /// must not touch the filesystem beyond its own log.
    SkipAndMove,
}

/// A resin callback closes over the job's source URI, verbosity, and an
/// open log file (for `Log`/`Stay`); [`crate::blob::BlobStore`] is used to
/// perform the `Move` action's relocate.
pub struct ResinPolicy {
    mode: ResinMode,
    verbose: bool,
    source: String,
    log: Option<Mutex<std::fs::File>>,
}

impl ResinPolicy {
    /// Builds the policy for `mode`, opening the process-local log file for
    /// `Log`/`Stay` modes. `working_dir` is where `transcoder.resin.<pid>.log`
    /// is created (normally the process's current directory).
    pub fn new(
        source: &str,
        verbose: bool,
        mode: ResinMode,
        working_dir: &Path,
    ) -> Result<Self, ResinError> {
        let log = match mode {
            ResinMode::Log | ResinMode::Stay => Some(Mutex::new(open_resin_log(source, working_dir)?)),
            ResinMode::Noop | ResinMode::Move => None,
        };

        Ok(Self {
            mode,
            verbose,
            source: source.to_string(),
            log,
        })
    }

    /// No callback is needed in [`ResinMode::Noop`]; callers should skip the
    /// eager decode entirely in that case.
    pub fn is_noop(&self) -> bool {
        matches!(self.mode, ResinMode::Noop)
    }

    /// Applies the policy to one decoded tile. In [`ResinMode::Move`] the
    /// caller is responsible for performing the relocation when this returns
    /// [`ResinDecision::SkipAndMove`].
    pub fn decide(&self, filename: &str, img: &GrayImage<'_>) -> Result<ResinDecision, ResinError> {
        if has_tissue(img) {
            return Ok(ResinDecision::Keep);
        }

        match self.mode {
            ResinMode::Noop => Ok(ResinDecision::Keep),
            ResinMode::Log => {
                self.log_line(filename)?;
                if self.verbose {
                    tracing::info!(filename, "no tissue detected");
                }
                Ok(ResinDecision::Keep)
            }
            ResinMode::Stay => {
                self.log_line(filename)?;
                if self.verbose {
                    tracing::info!(filename, "no tissue detected, not writing");
                }
                Ok(ResinDecision::Skip)
            }
            ResinMode::Move => {
                if self.verbose {
                    tracing::info!(filename, "no tissue detected, moving to resin/");
                }
                Ok(ResinDecision::SkipAndMove)
            }
        }
    }

    fn log_line(&self, filename: &str) -> Result<(), ResinError> {
        if let Some(log) = &self.log {
            let mut f = log.lock().expect("resin log mutex poisoned");
            let _ = &self.source;
            writeln!(f, "{filename}").map_err(|source| ResinError::LogOpen {
                path: PathBuf::from("transcoder.resin.log"),
                source,
            })?;
        }
        Ok(())
    }
}

fn open_resin_log(source: &str, working_dir: &Path) -> Result<std::fs::File, ResinError> {
    let path = working_dir.join(format!("transcoder.resin.{}.log", std::process::id()));
    let is_new = !path.exists();
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| ResinError::LogOpen {
            path: path.clone(),
            source,
        })?;

    if is_new {
        writeln!(f, "# LOGTYPE resin").map_err(|source| ResinError::LogOpen {
            path: path.clone(),
            source,
        })?;
        writeln!(f, "# DESCRIPTION filenames classified as resin (no tissue detected)")
            .map_err(|source| ResinError::LogOpen { path: path.clone(), source })?;
        writeln!(f, "# SOURCE {source}").map_err(|source| ResinError::LogOpen {
            path: path.clone(),
            source,
        })?;
        writeln!(f, "# DATE {}", Utc::now().to_rfc3339()).map_err(|source| ResinError::LogOpen {
            path: path.clone(),
            source,
        })?;
    }

    Ok(f)
}
