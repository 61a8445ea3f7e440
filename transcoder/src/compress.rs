//! Destination-side bitstream recompression: an extra gzip/brotli/zstd pass
//! applied to already-encoded bytes before [`crate::worker`] puts them.
//!
//! Only meaningful for formats whose own container has no entropy coding of
//! its own ([`crate::codec::Format::tolerates_recompression`]); PNG/JPEG/JXL
//! outputs are never passed through this module.

use std::io::{Read, Write};

use thiserror::Error;

/// One of the three destination-side bitstream compressors this crate
/// understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recompression {
    /// DEFLATE via `flate2`.
    Gzip,
    /// Brotli via the `brotli` crate.
    Brotli,
    /// Zstandard via `zstd`.
    Zstd,
}

/// Errors raised applying a recompression pass.
#[derive(Debug, Error)]
pub enum CompressError {
    /// A `--compression` flag or `xfermeta.recompress` value didn't match a
    /// known compressor name.
    #[error("unknown recompression name: {0:?}")]
    UnknownName(String),
    /// The underlying compressor failed.
    #[error("recompression failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Recompression {
    /// Parses the name stored in `xfermeta.recompress` / passed to
    /// `--compression` (`gzip`, `br`, `zstd`).
    pub fn parse(name: &str) -> Result<Self, CompressError> {
        match name.to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Self::Gzip),
            "br" | "brotli" => Ok(Self::Brotli),
            "zstd" => Ok(Self::Zstd),
            other => Err(CompressError::UnknownName(other.to_string())),
        }
    }

    /// The name this variant is persisted as.
    pub fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "br",
            Self::Zstd => "zstd",
        }
    }

    /// Compresses `data` with this compressor at a reasonable default level.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, CompressError> {
        match self {
            Self::Gzip => {
                let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Self::Brotli => {
                let mut out = Vec::new();
                let params = brotli::enc::BrotliEncoderParams::default();
                brotli::BrotliCompress(&mut Cursor(data), &mut out, &params)?;
                Ok(out)
            }
            Self::Zstd => Ok(zstd::encode_all(data, 0)?),
        }
    }
}

/// A minimal `Read` adapter over a byte slice, avoiding a dependency on
/// `std::io::Cursor`'s ownership requirements for the `brotli` crate's
/// `&mut dyn Read` signature.
struct Cursor<'a>(&'a [u8]);

impl Read for Cursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.0.len());
        buf[..n].copy_from_slice(&self.0[..n]);
        self.0 = &self.0[n..];
        Ok(n)
    }
}
