//! Cover art embedded in tagged fixtures
//!
//! Pictures are described, not stored: a `CoverArt` is a solid-colour PNG
//! that renders to the same bytes every time, so manifests and configs carry
//! three numbers instead of an image blob.

use crate::error::{FixtureError, Result};
use png::{BitDepth, ColorType, Compression, Encoder, FilterType};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

pub const COVER_MIME_TYPE: &str = "image/png";

/// Largest width or height accepted for a cover
pub const MAX_COVER_SIDE: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoverArt {
    pub width: u32,
    pub height: u32,
    /// RGB
    pub color: [u8; 3],
}

impl CoverArt {
    pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self {
            width,
            height,
            color,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let side = 1..=MAX_COVER_SIDE;
        if !side.contains(&self.width) || !side.contains(&self.height) {
            return Err(FixtureError::unsupported(
                "cover",
                format!(
                    "cover must be 1..={MAX_COVER_SIDE} pixels per side, got {}x{}",
                    self.width, self.height
                ),
            ));
        }
        Ok(())
    }

    /// Encode the cover as PNG
    pub fn render(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let pixel_count = self.width as usize * self.height as usize;
        let pixels: Vec<u8> = self.color.iter().copied().cycle().take(pixel_count * 3).collect();

        let mut data = Vec::new();
        let mut encoder = Encoder::new(&mut data, self.width, self.height);
        encoder.set_color(ColorType::Rgb);
        encoder.set_depth(BitDepth::Eight);
        // Fixed settings for byte-identical output
        encoder.set_compression(Compression::Default);
        encoder.set_filter(FilterType::NoFilter);

        let mut writer = encoder.write_header().map_err(render_error)?;
        writer.write_image_data(&pixels).map_err(render_error)?;
        writer.finish().map_err(render_error)?;

        Ok(data)
    }

    /// Recover a cover from embedded picture bytes
    ///
    /// Only succeeds when `data` is byte-for-byte what `render` produces for
    /// the recovered cover.
    pub fn from_png(data: &[u8]) -> Option<Self> {
        let mut reader = png::Decoder::new(Cursor::new(data)).read_info().ok()?;
        let mut pixels = vec![0u8; reader.output_buffer_size()];
        let info = reader.next_frame(&mut pixels).ok()?;

        if info.color_type != ColorType::Rgb || info.bit_depth != BitDepth::Eight {
            return None;
        }

        let color: [u8; 3] = pixels.get(..3)?.try_into().ok()?;
        let cover = Self::solid(info.width, info.height, color);
        (cover.render().ok()? == data).then_some(cover)
    }
}

fn render_error(e: png::EncodingError) -> FixtureError {
    FixtureError::Tag(format!("Failed to render cover art: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_deterministic() {
        let cover = CoverArt::solid(100, 100, [255, 0, 0]);
        let png = cover.render().unwrap();
        assert!(png.starts_with(b"\x89PNG\r\n\x1a\n"));
        assert_eq!(png, cover.render().unwrap());
    }

    #[test]
    fn test_from_png_recovers_cover() {
        let cover = CoverArt::solid(16, 8, [12, 200, 99]);
        assert_eq!(CoverArt::from_png(&cover.render().unwrap()), Some(cover));
    }

    #[test]
    fn test_from_png_rejects_altered_bytes() {
        let mut png = CoverArt::solid(4, 4, [0, 0, 255]).render().unwrap();
        png.push(0);
        assert_eq!(CoverArt::from_png(&png), None);
        assert_eq!(CoverArt::from_png(b"not a picture"), None);
    }

    #[test]
    fn test_size_limits() {
        assert!(CoverArt::solid(0, 10, [0; 3]).validate().is_err());
        assert!(CoverArt::solid(10, MAX_COVER_SIDE + 1, [0; 3]).render().is_err());
    }
}
