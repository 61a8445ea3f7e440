//! The per-item transcoding state machine:
//!
//! ```text
//! PENDING -> DECODED -> (FILTERED? skip/move/continue) -> ENCODED -> WRITTEN
//! ```
//!
//! [`transcode`] never touches the filesystem for its image output: it
//! takes bytes, returns bytes (or a skip signal), and leaves writing,
//! deleting, and resin relocation to [`crate::worker`], which owns the blob
//! stores.

use indexmap::IndexMap;
use thiserror::Error;

use crate::codec::{self, CodecError, Format};
use crate::resin::{GrayImage, ResinDecision, ResinError, ResinPolicy};

/// What the caller should do with a transcoded item.
pub enum Action {
    /// Write `bytes` to `filename` at the destination.
    Write { filename: String, bytes: Vec<u8> },
    /// Do not write anything; the detector decided this tile is not tissue.
    Skip,
    /// As [`Action::Skip`], but the caller must also relocate the source.
    SkipAndMove,
}

/// Errors raised transcoding one item. Always carries the filename that
/// failed so the caller can route it to [`crate::queue::WorkQueue::record_error`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The input bitstream was zero-length.
    #[error("{filename}: empty input")]
    EmptyInput {
        /// The tile that failed.
        filename: String,
    },
    /// The source or target format could not be determined.
    #[error("{filename}: {source}")]
    Format {
        /// The tile that failed.
        filename: String,
        /// The underlying format error.
        #[source]
        source: crate::codec::FormatError,
    },
    /// Decoding or encoding failed.
    #[error("{filename}: {source}")]
    Codec {
        /// The tile that failed.
        filename: String,
        /// The underlying codec error.
        #[source]
        source: CodecError,
    },
    /// The resin log could not be written.
    #[error("{filename}: {source}")]
    Resin {
        /// The tile that failed.
        filename: String,
        /// The underlying resin error.
        #[source]
        source: ResinError,
    },
}

/// Parameters controlling one `transcode` call, mirroring the job metadata
/// every item in a batch shares.
pub struct TranscodeOptions<'a> {
    /// Target format, or `None` to keep the source format (pass-through
    /// unless a detector forces a decode).
    pub target_format: Option<Format>,
    /// Encoding level; format-specific (see [`crate::codec`]).
    pub level: Option<i32>,
    /// Extra encoder options (JPEG-XL `effort`/`decodingspeed`).
    pub options: &'a IndexMap<String, i64>,
    /// Resin policy to apply, if any.
    pub resin: Option<&'a ResinPolicy>,
}

/// Transcodes one item. `filename` is used only for format inference and
/// error attribution; it is not read from disk here.
pub fn transcode(filename: &str, bytes: &[u8], opts: &TranscodeOptions<'_>) -> Result<Action, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput { filename: filename.to_string() });
    }

    let source_format = Format::from_filename(filename).map_err(|source| PipelineError::Format {
        filename: filename.to_string(),
        source,
    })?;
    let target_format = opts.target_format.unwrap_or(source_format);

    // Fast paths: JPEG <-> JPEG-XL lossless recompression skips pixel decode
    // entirely, and only applies when no explicit level override is given.
    if opts.resin.is_none() && opts.level.is_none() {
        if source_format == Format::Jpeg && target_format == Format::Jxl {
            let out = codec::recompress_jpeg_to_jxl(bytes).map_err(|source| PipelineError::Codec {
                filename: filename.to_string(),
                source,
            })?;
            return Ok(Action::Write { filename: target_format.rename(filename), bytes: out });
        }
        if source_format == Format::Jxl && target_format == Format::Jpeg {
            let out = codec::recompress_jxl_to_jpeg(bytes).map_err(|source| PipelineError::Codec {
                filename: filename.to_string(),
                source,
            })?;
            return Ok(Action::Write { filename: target_format.rename(filename), bytes: out });
        }
    }

    // Pure pass-through: same format, no detector forcing a decode.
    if opts.resin.is_none() && target_format == source_format {
        return Ok(Action::Write { filename: filename.to_string(), bytes: bytes.to_vec() });
    }

    let decoded = codec::decode(source_format, bytes).map_err(|source| PipelineError::Codec {
        filename: filename.to_string(),
        source,
    })?;

    if let Some(resin) = opts.resin {
        let gray_buf = to_grayscale_buffer(&decoded);
        let gray = GrayImage { width: decoded.width, height: decoded.height, pixels: &gray_buf };
        match resin
            .decide(filename, &gray)
            .map_err(|source| PipelineError::Resin { filename: filename.to_string(), source })?
        {
            ResinDecision::Skip => return Ok(Action::Skip),
            ResinDecision::SkipAndMove => return Ok(Action::SkipAndMove),
            ResinDecision::Keep => {}
        }
    }

    if target_format == source_format {
        return Ok(Action::Write { filename: filename.to_string(), bytes: bytes.to_vec() });
    }

    let encoded = codec::encode(target_format, &decoded, opts.level, opts.options).map_err(|source| {
        PipelineError::Codec { filename: filename.to_string(), source }
    })?;

    Ok(Action::Write { filename: target_format.rename(filename), bytes: encoded })
}

/// Builds the grayscale sample buffer the tissue detector expects from a
/// decoded [`codec::Image`]: single-channel data is copied as-is, RGB/RGBA
/// is averaged down channel-wise.
fn to_grayscale_buffer(img: &codec::Image) -> Vec<u8> {
    if img.channels == 1 {
        return img.data.clone();
    }

    let channels = img.channels as usize;
    img.data
        .chunks_exact(channels)
        .map(|px| {
            let sum: u32 = px.iter().take(3).map(|&c| c as u32).sum();
            (sum / px.len().min(3) as u32) as u8
        })
        .collect()
}
