use std::sync::Arc;

use crate::config::ImageCodecKind;
use crate::error::{Result, SessionError};

const RAW_HEADER_SIZE: usize = 8;

/// A decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Encodes RGBA8 frames for transmission and decodes them back.
pub trait ImageCodec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Encode `rgba` (`width * height * 4` bytes) at `quality` 1 to 100.
    fn encode(&self, width: u32, height: u32, rgba: &[u8], quality: u8) -> Result<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> Result<DecodedImage>;
}

/// Build the codec selected in configuration.
pub fn codec_for(kind: ImageCodecKind) -> Result<Arc<dyn ImageCodec>> {
    match kind {
        #[cfg(feature = "jpeg")]
        ImageCodecKind::Jpeg => Ok(Arc::new(JpegCodec)),
        #[cfg(not(feature = "jpeg"))]
        ImageCodecKind::Jpeg => Err(SessionError::Config(
            "jpeg codec is not compiled in".to_string(),
        )),
        ImageCodecKind::Raw => Ok(Arc::new(RawCodec)),
    }
}

fn rgba_len(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(SessionError::Codec(format!(
            "empty image {width}x{height}"
        )));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| SessionError::Codec(format!("image {width}x{height} is too large")))
}

fn check_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<()> {
    let expected = rgba_len(width, height)?;
    if rgba.len() != expected {
        return Err(SessionError::Codec(format!(
            "{width}x{height} RGBA needs {expected} bytes, got {}",
            rgba.len()
        )));
    }
    Ok(())
}

/// Uncompressed frames: `u32 LE width`, `u32 LE height`, RGBA8 pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl ImageCodec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn encode(&self, width: u32, height: u32, rgba: &[u8], _quality: u8) -> Result<Vec<u8>> {
        check_rgba(width, height, rgba)?;
        let mut out = Vec::with_capacity(RAW_HEADER_SIZE + rgba.len());
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.extend_from_slice(rgba);
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<DecodedImage> {
        let (header, pixels) = data
            .split_at_checked(RAW_HEADER_SIZE)
            .ok_or_else(|| SessionError::Codec("raw frame shorter than header".to_string()))?;
        let mut width = [0u8; 4];
        let mut height = [0u8; 4];
        width.copy_from_slice(&header[..4]);
        height.copy_from_slice(&header[4..]);
        let (width, height) = (u32::from_le_bytes(width), u32::from_le_bytes(height));

        check_rgba(width, height, pixels)?;
        Ok(DecodedImage {
            width,
            height,
            rgba: pixels.to_vec(),
        })
    }
}

/// JPEG via the `image` crate. Alpha is dropped on encode and restored as
/// opaque on decode.
#[cfg(feature = "jpeg")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

#[cfg(feature = "jpeg")]
impl ImageCodec for JpegCodec {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn encode(&self, width: u32, height: u32, rgba: &[u8], quality: u8) -> Result<Vec<u8>> {
        use image::codecs::jpeg::JpegEncoder;

        check_rgba(width, height, rgba)?;
        let rgb: Vec<u8> = rgba
            .chunks_exact(4)
            .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
            .collect();

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(&rgb, width, height, image::ExtendedColorType::Rgb8)
            .map_err(|err| SessionError::Codec(err.to_string()))?;
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<DecodedImage> {
        let decoded = image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .map_err(|err| SessionError::Codec(err.to_string()))?
            .to_rgba8();
        Ok(DecodedImage {
            width: decoded.width(),
            height: decoded.height(),
            rgba: decoded.into_raw(),
        })
    }
}
