//! PNG/BMP/TIFF/JPEG encode and decode via the `image` crate.

use std::io::Cursor;

use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::tiff::TiffEncoder;
use image::{ColorType, DynamicImage, ImageEncoder, ImageReader};

use super::{CodecError, Format, Image};

/// PNG compression level is always maximal; `level` has no effect for this format.
const PNG_COMPRESSION_LEVEL: CompressionType = CompressionType::Best;

/// Default JPEG quality when no explicit level is configured.
pub const DEFAULT_JPEG_LEVEL: i32 = 85;

/// Decodes `bytes` (already known to be `format`) into the pivot [`Image`].
pub fn decode(format: Format, bytes: &[u8]) -> Result<Image, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::EmptyInput);
    }

    let image_format = to_image_format(format);
    let reader = ImageReader::with_format(Cursor::new(bytes), image_format);
    let decoded = reader
        .decode()
        .map_err(|source| CodecError::Decode { format, source: source.into() })?;

    Ok(Image::from_dynamic(decoded))
}

/// Encodes `img` as `format` at `level` (format-specific meaning; `None`
/// selects the format's default).
pub fn encode(format: Format, img: &Image, level: Option<i32>) -> Result<Vec<u8>, CodecError> {
    let dynamic = img.to_dynamic()?;
    let mut out = Vec::new();

    match format {
        Format::Png => {
            let encoder = PngEncoder::new_with_quality(&mut out, PNG_COMPRESSION_LEVEL, FilterType::Adaptive);
            encoder
                .write_image(dynamic.as_bytes(), dynamic.width(), dynamic.height(), dynamic.color().into())
                .map_err(|source| CodecError::Encode { format, source: source.into() })?;
        }
        Format::Bmp => {
            let encoder = BmpEncoder::new(&mut out);
            encoder
                .write_image(dynamic.as_bytes(), dynamic.width(), dynamic.height(), dynamic.color().into())
                .map_err(|source| CodecError::Encode { format, source: source.into() })?;
        }
        Format::Tiff => {
            let encoder = TiffEncoder::new(&mut out);
            encoder
                .write_image(dynamic.as_bytes(), dynamic.width(), dynamic.height(), dynamic.color().into())
                .map_err(|source| CodecError::Encode { format, source: source.into() })?;
        }
        Format::Jpeg => {
            let quality = level.unwrap_or(DEFAULT_JPEG_LEVEL).clamp(1, 100) as u8;
            let encoder = JpegEncoder::new_with_quality(&mut out, quality);
            encoder
                .write_image(dynamic.as_bytes(), dynamic.width(), dynamic.height(), dynamic.color().into())
                .map_err(|source| CodecError::Encode { format, source: source.into() })?;
        }
        Format::Jxl => unreachable!("jxl is handled by codec::jxl"),
    }

    Ok(out)
}

fn to_image_format(format: Format) -> image::ImageFormat {
    match format {
        Format::Png => image::ImageFormat::Png,
        Format::Bmp => image::ImageFormat::Bmp,
        Format::Tiff => image::ImageFormat::Tiff,
        Format::Jpeg => image::ImageFormat::Jpeg,
        Format::Jxl => unreachable!("jxl is handled by codec::jxl"),
    }
}

impl Image {
    fn from_dynamic(img: DynamicImage) -> Self {
        let channels = img.color().channel_count();
        Self {
            width: img.width(),
            height: img.height(),
            channels,
            data: img.into_bytes(),
        }
    }

    fn to_dynamic(&self) -> Result<DynamicImage, CodecError> {
        let color = match self.channels {
            1 => ColorType::L8,
            3 => ColorType::Rgb8,
            4 => ColorType::Rgba8,
            n => return Err(CodecError::UnsupportedShape { channels: n }),
        };
        DynamicImage::from_decoder(RawDecoder {
            width: self.width,
            height: self.height,
            color,
            data: self.data.clone(),
        })
        .map_err(|source| CodecError::Decode { format: Format::Png, source: source.into() })
    }
}

/// A trivial [`image::ImageDecoder`] wrapping an in-memory buffer, used to
/// hand raw pivot pixels back to `image`'s encoders without round-tripping
/// through a container format.
struct RawDecoder {
    width: u32,
    height: u32,
    color: ColorType,
    data: Vec<u8>,
}

impl image::ImageDecoder for RawDecoder {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn color_type(&self) -> ColorType {
        self.color
    }

    fn read_image(self, buf: &mut [u8]) -> image::ImageResult<()> {
        buf.copy_from_slice(&self.data);
        Ok(())
    }

    fn read_image_boxed(self: Box<Self>, buf: &mut [u8]) -> image::ImageResult<()> {
        (*self).read_image(buf)
    }
}
