//! Flat RGBA8 rasters and the TGA output container.

pub mod tga;

pub use tga::{EncodeError, TgaHeader, encode, read_header};

/// Largest width or height the output container can express.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

/// A flat raster: `pixels` is row-major RGBA8, `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    /// Wrap a pixel buffer. `None` if its length does not match the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Fully transparent raster. `None` if the buffer size overflows.
    pub fn transparent(width: u32, height: u32) -> Option<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(4)?;
        Some(Self {
            width,
            height,
            pixels: vec![0; len],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_length() {
        assert!(RasterImage::new(2, 2, vec![0; 16]).is_some());
        assert!(RasterImage::new(2, 2, vec![0; 15]).is_none());
        assert!(RasterImage::new(u32::MAX, u32::MAX, Vec::new()).is_none());
    }

    #[test]
    fn test_transparent() {
        let raster = RasterImage::transparent(3, 2).unwrap();
        assert_eq!(raster.pixels().len(), 24);
        assert!(raster.pixels().iter().all(|&b| b == 0));
        assert!(RasterImage::transparent(0, 5).unwrap().is_empty());
    }

    #[test]
    fn test_transparent_size_overflow() {
        if usize::BITS == 64 {
            // u32::MAX^2 * 4 is past usize::MAX even on 64-bit
            assert!(RasterImage::transparent(u32::MAX, u32::MAX).is_none());
        }
        assert!(RasterImage::transparent(u32::MAX, 0).is_some());
    }
}
