//! Codec dispatch: `(format, bytes) -> pixels` and `(pixels, format, level,
//! options) -> bytes`, plus the JPEG⇄JPEG-XL lossless recompression fast
//! path that avoids a pixel round-trip.
//!
//! The pivot representation is [`Image`]: row-major 8-bit samples, 1/3/4
//! channels. Format-specific modules ([`raster`], [`jxl`]) convert to and
//! from it; nothing above this module touches an encoder or decoder type
//! directly.

pub mod format;
pub mod raster;
#[cfg(feature = "jxl")]
pub mod jxl;

use indexmap::IndexMap;
use thiserror::Error;

pub use format::{Format, FormatError};

/// An 8-bit raster image, the pivot type every codec decodes into and
/// encodes out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of channels (1 = grayscale, 3 = RGB, 4 = RGBA).
    pub channels: u32,
    /// Row-major interleaved samples, `width * height * channels` bytes.
    pub data: Vec<u8>,
}

/// Errors raised by codec decode/encode.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The input bitstream was zero-length.
    #[error("empty input")]
    EmptyInput,
    /// Decoding `format` failed.
    #[error("failed to decode {format}: {source}")]
    Decode {
        /// Format the decoder was asked to parse.
        format: Format,
        /// Underlying decoder error.
        #[source]
        source: anyhow::Error,
    },
    /// Encoding `format` failed.
    #[error("failed to encode {format}: {source}")]
    Encode {
        /// Format the encoder was asked to produce.
        format: Format,
        /// Underlying encoder error.
        #[source]
        source: anyhow::Error,
    },
    /// The image's channel count is not supported by the target format.
    #[error("unsupported channel count for this format: {channels}")]
    UnsupportedShape {
        /// The channel count that was rejected.
        channels: u32,
    },
    /// A JPEG-XL-specific codec error (builder construction, native library).
    #[error("jpeg-xl codec error: {source}")]
    Jxl {
        /// Message from the underlying `jpegxl-rs` error.
        source: String,
    },
    /// The `jxl` feature was not compiled in.
    #[error("JPEG-XL support is not compiled into this build (enable the `jxl` feature)")]
    JxlDisabled,
    /// `format` has no codec implementation.
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Decodes `bytes` (known to be `format`) into the pivot representation.
pub fn decode(format: Format, bytes: &[u8]) -> Result<Image, CodecError> {
    match format {
        Format::Jxl => decode_jxl(bytes),
        other => raster::decode(other, bytes),
    }
}

/// Encodes `img` as `format`. `level` is format-specific (see
/// [`crate::codec::raster::DEFAULT_JPEG_LEVEL`] and
/// [`crate::codec::jxl::DEFAULT_JXL_LEVEL`]); `options` supplies JPEG-XL's
/// `effort` and `decodingspeed` overrides.
pub fn encode(
    format: Format,
    img: &Image,
    level: Option<i32>,
    options: &IndexMap<String, i64>,
) -> Result<Vec<u8>, CodecError> {
    match format {
        Format::Jxl => {
            let effort = options.get("effort").copied().unwrap_or(3) as i32;
            let decoding_speed = options.get("decodingspeed").copied().unwrap_or(0) as i32;
            let num_threads = options.get("num_threads").copied().unwrap_or(0) as i32;
            encode_jxl(img, level, effort, decoding_speed, num_threads)
        }
        other => raster::encode(other, img, level),
    }
}

#[cfg(feature = "jxl")]
fn decode_jxl(bytes: &[u8]) -> Result<Image, CodecError> {
    jxl::decode(bytes)
}

#[cfg(not(feature = "jxl"))]
fn decode_jxl(_bytes: &[u8]) -> Result<Image, CodecError> {
    Err(CodecError::JxlDisabled)
}

#[cfg(feature = "jxl")]
fn encode_jxl(
    img: &Image,
    level: Option<i32>,
    effort: i32,
    decoding_speed: i32,
    num_threads: i32,
) -> Result<Vec<u8>, CodecError> {
    jxl::encode(img, level, effort, decoding_speed, num_threads)
}

#[cfg(not(feature = "jxl"))]
fn encode_jxl(
    _img: &Image,
    _level: Option<i32>,
    _effort: i32,
    _decoding_speed: i32,
    _num_threads: i32,
) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::JxlDisabled)
}

/// JPEG -> JPEG-XL without a pixel decode, used when `reencode = jxl` and no
/// explicit level was requested.
#[cfg(feature = "jxl")]
pub fn recompress_jpeg_to_jxl(jpeg_bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    jxl::recompress_jpeg_losslessly(jpeg_bytes)
}

#[cfg(not(feature = "jxl"))]
/// JPEG -> JPEG-XL without a pixel decode, used when `reencode = jxl` and no
/// explicit level was requested.
pub fn recompress_jpeg_to_jxl(_jpeg_bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::JxlDisabled)
}

/// JPEG-XL -> JPEG without a pixel decode, the inverse of
/// [`recompress_jpeg_to_jxl`].
#[cfg(feature = "jxl")]
pub fn recompress_jxl_to_jpeg(jxl_bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    jxl::recompress_jxl_to_jpeg(jxl_bytes)
}

#[cfg(not(feature = "jxl"))]
/// JPEG-XL -> JPEG without a pixel decode, the inverse of
/// [`recompress_jpeg_to_jxl`].
pub fn recompress_jxl_to_jpeg(_jxl_bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::JxlDisabled)
}
