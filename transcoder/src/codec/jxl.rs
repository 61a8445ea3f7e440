//! JPEG-XL encode/decode, plus the lossless JPEG⇄JPEG-XL recompression fast
//! path that lets [`crate::pipeline`] skip pixel decoding entirely when no
//! other transform is requested.
//!
//! Gated behind the `jxl` feature: `jpegxl-rs` links against `libjxl`, which
//! is not always available in minimal build environments.

use jpegxl_rs::encode::{EncoderResult, EncoderSpeed};
use jpegxl_rs::parallel::threads_runner::ThreadsRunner;
use jpegxl_rs::{decoder_builder, encoder_builder};

use super::{CodecError, Format, Image};

/// JPEG-XL default quality when no explicit level is configured (`< 100`
/// maps to lossy `distance`; `100` and above request lossless).
pub const DEFAULT_JXL_LEVEL: i32 = 90;

/// Decodes a JPEG-XL bitstream into the pivot [`Image`] (single-channel,
/// 8-bit, per the shape constraint this crate enforces on encode).
pub fn decode(bytes: &[u8]) -> Result<Image, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::EmptyInput);
    }

    let decoder = decoder_builder()
        .build()
        .map_err(|source| CodecError::Jxl { source: source.to_string() })?;

    let (metadata, pixels): (_, Vec<u8>) = decoder
        .decode_with(bytes)
        .map_err(|source| CodecError::Decode { format: Format::Jxl, source: anyhow::anyhow!(source.to_string()) })?;

    Ok(Image {
        width: metadata.width,
        height: metadata.height,
        channels: metadata.num_color_channels as u32,
        data: pixels,
    })
}

/// Encodes the pivot [`Image`] as JPEG-XL. Requires a single-channel 8-bit
/// image; a trailing axis of size 1 should already have been squeezed by the
/// caller. `level` selects lossy distance below 100 and lossless at/above it,
/// `effort` and `decoding_speed` map to the encoder's speed tier and
/// progressive decoding hint. `num_threads` follows the job's
/// `encoding_options["num_threads"]` convention: `0` asks the codec to use
/// all available cores.
pub fn encode(
    img: &Image,
    level: Option<i32>,
    effort: i32,
    decoding_speed: i32,
    num_threads: i32,
) -> Result<Vec<u8>, CodecError> {
    if img.channels != 1 {
        return Err(CodecError::UnsupportedShape { channels: img.channels });
    }

    let level = level.unwrap_or(DEFAULT_JXL_LEVEL);
    let lossless = level >= 100;
    let speed = encoder_speed_for_effort(effort);

    let runner = if num_threads == 1 {
        None
    } else {
        let threads = if num_threads <= 0 { None } else { Some(num_threads as usize) };
        ThreadsRunner::new(None, threads)
    };

    let mut builder = encoder_builder();
    builder.lossless(lossless).speed(speed).decoding_speed(decoding_speed.clamp(0, 4) as i64);
    if let Some(runner) = &runner {
        builder.parallel_runner(runner);
    }
    let mut encoder = builder.build().map_err(|source| CodecError::Jxl { source: source.to_string() })?;

    if !lossless {
        encoder.quality = 100.0 - level.clamp(0, 100) as f32;
    }

    let result: EncoderResult<u8> = encoder
        .encode(&img.data, img.width, img.height)
        .map_err(|source| CodecError::Encode { format: Format::Jxl, source: anyhow::anyhow!(source.to_string()) })?;

    Ok(result.data)
}

/// Wraps a JPEG bitstream in a JPEG-XL container without decoding pixels,
/// the fast path `transcode` takes when `reencode = jxl` and `level = None`.
pub fn recompress_jpeg_losslessly(jpeg_bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = encoder_builder()
        .build()
        .map_err(|source| CodecError::Jxl { source: source.to_string() })?;

    let result: EncoderResult<u8> = encoder
        .encode_jpeg(jpeg_bytes)
        .map_err(|source| CodecError::Encode { format: Format::Jxl, source: anyhow::anyhow!(source.to_string()) })?;

    Ok(result.data)
}

/// Inverse of [`recompress_jpeg_losslessly`]: recovers the original JPEG
/// bitstream from a JPEG-XL container that losslessly wraps one.
pub fn recompress_jxl_to_jpeg(jxl_bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let decoder = decoder_builder()
        .reconstruct_jpeg(true)
        .build()
        .map_err(|source| CodecError::Jxl { source: source.to_string() })?;

    let (_, jpeg_bytes) = decoder
        .reconstruct(jxl_bytes)
        .map_err(|source| CodecError::Decode { format: Format::Jpeg, source: anyhow::anyhow!(source.to_string()) })?;

    jpeg_bytes.ok_or_else(|| CodecError::Jxl {
        source: "JPEG-XL input does not losslessly wrap a JPEG bitstream".to_string(),
    })
}

fn encoder_speed_for_effort(effort: i32) -> EncoderSpeed {
    match effort.clamp(1, 10) {
        1 => EncoderSpeed::Lightning,
        2 => EncoderSpeed::Thunder,
        3 => EncoderSpeed::Falcon,
        4 => EncoderSpeed::Cheetah,
        5 => EncoderSpeed::Hare,
        6 => EncoderSpeed::Wombat,
        7 => EncoderSpeed::Squirrel,
        8 => EncoderSpeed::Kitten,
        _ => EncoderSpeed::Tortoise,
    }
}
