//! Image encoding for bitmap, PNG and icon outputs.

use std::io::Cursor;

use bytes::{BufMut, BytesMut};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

pub const MIME_PNG: &str = "image/png";
pub const MIME_BMP: &str = "image/bmp";
pub const MIME_ICO: &str = "image/vnd.microsoft.icon";

/// Icons are capped at this edge length.
const MAX_ICON_EDGE: u32 = 256;

const BMP_FILE_HEADER_LEN: u32 = 14;
const BITMAP_V5_HEADER_LEN: u32 = 124;
const BI_BITFIELDS: u32 = 3;
/// `'sRGB'` colour space tag.
const LCS_SRGB: u32 = 0x7352_4742;
const LCS_GM_IMAGES: u32 = 4;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("unsupported output type: {0}")]
    UnsupportedMime(String),
    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}x{1} image is too large for a bitmap")]
    TooLarge(u32, u32),
}

/// Encodes an image to a byte container.
///
/// `options` is a `;`-separated `key=value` list. The bitmap encoder
/// understands `bpp` (24 or 32) and `version` (3 or 5).
pub trait ImageEncoder: Send + Sync {
    fn encode(&self, image: &DynamicImage, mime: &str, options: &str) -> Result<Vec<u8>, EncodeError>;
}

/// [`ImageEncoder`] backed by the `image` crate codecs.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodecImageEncoder;

impl ImageEncoder for CodecImageEncoder {
    fn encode(&self, image: &DynamicImage, mime: &str, options: &str) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        match mime {
            MIME_PNG => {
                DynamicImage::ImageRgba8(image.to_rgba8())
                    .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
            }
            MIME_BMP if BmpOptions::parse(options).version >= 5 => {
                out = bmp_v5(image)?;
            }
            MIME_BMP => {
                let opts = BmpOptions::parse(options);
                // Version 3 headers carry no alpha masks unless 32 bpp was
                // asked for explicitly.
                let flattened = if opts.bpp != 32 {
                    DynamicImage::ImageRgb8(image.to_rgb8())
                } else {
                    DynamicImage::ImageRgba8(image.to_rgba8())
                };
                flattened.write_to(&mut Cursor::new(&mut out), ImageFormat::Bmp)?;
            }
            MIME_ICO => {
                let icon = fit_icon(image);
                icon.write_to(&mut Cursor::new(&mut out), ImageFormat::Ico)?;
            }
            other => return Err(EncodeError::UnsupportedMime(other.to_string())),
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BmpOptions {
    bpp: u8,
    version: u8,
}

impl BmpOptions {
    fn parse(options: &str) -> Self {
        let mut parsed = Self { bpp: 24, version: 3 };
        for pair in options.split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match (key.trim(), value.trim().parse::<u8>()) {
                ("bpp", Ok(bpp)) => parsed.bpp = bpp,
                ("version", Ok(version)) => parsed.version = version,
                _ => {}
            }
        }
        parsed
    }
}

/// 32 bpp bottom-up bitmap with a `BITMAPV5HEADER`: BGRA bitfields,
/// sRGB colour space, no embedded profile.
fn bmp_v5(image: &DynamicImage) -> Result<Vec<u8>, EncodeError> {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let pixel_len = u64::from(width) * u64::from(height) * 4;
    let offset = BMP_FILE_HEADER_LEN + BITMAP_V5_HEADER_LEN;
    let (Ok(pixel_len), Ok(w), Ok(h)) = (
        u32::try_from(pixel_len),
        i32::try_from(width),
        i32::try_from(height),
    ) else {
        return Err(EncodeError::TooLarge(width, height));
    };
    let file_len = offset
        .checked_add(pixel_len)
        .ok_or(EncodeError::TooLarge(width, height))?;

    let mut out = BytesMut::with_capacity(file_len as usize);
    out.put_slice(b"BM");
    out.put_u32_le(file_len);
    out.put_u32_le(0);
    out.put_u32_le(offset);

    out.put_u32_le(BITMAP_V5_HEADER_LEN);
    out.put_i32_le(w);
    out.put_i32_le(h);
    out.put_u16_le(1);
    out.put_u16_le(32);
    out.put_u32_le(BI_BITFIELDS);
    out.put_u32_le(pixel_len);
    out.put_i32_le(0);
    out.put_i32_le(0);
    out.put_u32_le(0);
    out.put_u32_le(0);
    out.put_u32_le(0x00FF_0000);
    out.put_u32_le(0x0000_FF00);
    out.put_u32_le(0x0000_00FF);
    out.put_u32_le(0xFF00_0000);
    out.put_u32_le(LCS_SRGB);
    // Endpoints and gamma are ignored for sRGB.
    out.put_bytes(0, 36 + 12);
    out.put_u32_le(LCS_GM_IMAGES);
    // Profile data, profile size, reserved.
    out.put_bytes(0, 12);

    for row in rgba.rows().rev() {
        for px in row {
            let [r, g, b, a] = px.0;
            out.put_slice(&[b, g, r, a]);
        }
    }
    Ok(out.to_vec())
}

fn fit_icon(image: &DynamicImage) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width <= MAX_ICON_EDGE && height <= MAX_ICON_EDGE {
        return DynamicImage::ImageRgba8(image.to_rgba8());
    }
    let (w, h) = if width >= height {
        let scaled = (f64::from(height) * f64::from(MAX_ICON_EDGE) / f64::from(width)).round() as u32;
        (MAX_ICON_EDGE, scaled.max(1))
    } else {
        let scaled = (f64::from(width) * f64::from(MAX_ICON_EDGE) / f64::from(height)).round() as u32;
        (scaled.max(1), MAX_ICON_EDGE)
    };
    DynamicImage::ImageRgba8(image::imageops::resize(image, w, h, FilterType::Triangle))
}
