//! Canonical image formats and filename suffix parsing.

use std::fmt;

use thiserror::Error;

/// One of the five encoded representations this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Lossless, deflate-compressed raster.
    Png,
    /// Uncompressed raster.
    Bmp,
    /// Lossless or LZW-compressed raster.
    Tiff,
    /// Lossy DCT raster; also reachable via a lossless recompression path.
    Jpeg,
    /// JPEG-XL; supports a lossless recompression fast path to/from JPEG.
    Jxl,
}

/// Errors parsing format names or filename suffixes.
#[derive(Debug, Error)]
pub enum FormatError {
    /// A `--encoding`/`--compression` flag or filename suffix was unrecognized.
    #[error("unrecognized image format: {0:?}")]
    Unrecognized(String),
    /// The filename had no extension to parse a format from.
    #[error("filename has no extension: {0:?}")]
    NoExtension(String),
}

impl Format {
    /// Parses a format name as used in `--encoding` and job metadata
    /// (`jpeg`, `jpegxl`/`jxl`, `png`, `bmp`, `tiff`/`tif`).
    pub fn parse(name: &str) -> Result<Self, FormatError> {
        match name.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "bmp" => Ok(Self::Bmp),
            "tiff" | "tif" => Ok(Self::Tiff),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "jxl" | "jpegxl" => Ok(Self::Jxl),
            other => Err(FormatError::Unrecognized(other.to_string())),
        }
    }

    /// Infers the format from a filename's extension.
    pub fn from_filename(filename: &str) -> Result<Self, FormatError> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .ok_or_else(|| FormatError::NoExtension(filename.to_string()))?;
        Self::parse(ext)
    }

    /// The canonical filename extension for this format (no leading dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Jpeg => "jpeg",
            Self::Jxl => "jxl",
        }
    }

    /// Replaces `filename`'s extension with this format's canonical one.
    pub fn rename(self, filename: &str) -> String {
        let stem = filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename);
        format!("{stem}.{}", self.extension())
    }

    /// Whether this format's own bitstream already contains entropy coding,
    /// making a destination-side recompression pass pointless. Only `bmp`
    /// and `tiff` tolerate an extra gzip/brotli/zstd pass.
    pub fn tolerates_recompression(self) -> bool {
        matches!(self, Self::Bmp | Self::Tiff)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_and_jpg_are_equivalent() {
        assert_eq!(Format::from_filename("tile.jpg").unwrap(), Format::Jpeg);
        assert_eq!(Format::from_filename("tile.jpeg").unwrap(), Format::Jpeg);
    }

    #[test]
    fn jxl_and_jpegxl_are_equivalent() {
        assert_eq!(Format::parse("jxl").unwrap(), Format::Jxl);
        assert_eq!(Format::parse("jpegxl").unwrap(), Format::Jxl);
    }

    #[test]
    fn tif_and_tiff_are_equivalent() {
        assert_eq!(Format::from_filename("tile.tif").unwrap(), Format::Tiff);
        assert_eq!(Format::from_filename("tile.tiff").unwrap(), Format::Tiff);
    }

    #[test]
    fn rename_swaps_only_the_extension() {
        assert_eq!(Format::Jxl.rename("a.b.png"), "a.b.jxl");
    }

    #[test]
    fn only_bmp_and_tiff_tolerate_recompression() {
        assert!(Format::Bmp.tolerates_recompression());
        assert!(Format::Tiff.tolerates_recompression());
        assert!(!Format::Png.tolerates_recompression());
        assert!(!Format::Jpeg.tolerates_recompression());
        assert!(!Format::Jxl.tolerates_recompression());
    }
}
