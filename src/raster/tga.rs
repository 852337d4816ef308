//! Uncompressed 32-bit truecolor TGA, top-left origin.
//!
//! ```text
//! offset  size  field
//! 0       1     id length (0)
//! 1       1     color map type (0)
//! 2       1     image type (2, uncompressed truecolor)
//! 3       5     color map spec (zero)
//! 8       4     x/y origin (zero)
//! 12      2     width, LE
//! 14      2     height, LE
//! 16      1     pixel depth (32)
//! 17      1     descriptor (0x28: top-left origin, 8 alpha bits)
//! 18      ...   B,G,R,A per pixel, row-major
//! ```

use thiserror::Error;

use super::RasterImage;

pub const HEADER_LEN: usize = 18;

const IMAGE_TYPE_TRUECOLOR: u8 = 2;
const PIXEL_DEPTH: u8 = 32;
const DESCRIPTOR_TOP_LEFT: u8 = 0x20;
const ALPHA_BITS: u8 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("cannot encode an empty {width}x{height} raster")]
    Empty { width: u32, height: u32 },

    #[error("{width}x{height} exceeds the 65535 pixel limit of the output format")]
    TooLarge { width: u32, height: u32 },

    #[error("not a TGA header: {0}")]
    BadHeader(&'static str),
}

/// Dimensions and format bytes of a TGA header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TgaHeader {
    pub width: u16,
    pub height: u16,
    pub image_type: u8,
    pub pixel_depth: u8,
    pub descriptor: u8,
}

impl TgaHeader {
    pub fn top_left_origin(&self) -> bool {
        self.descriptor & DESCRIPTOR_TOP_LEFT != 0
    }
}

/// Serialize a raster as TGA bytes.
pub fn encode(image: &RasterImage) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(EncodeError::Empty { width, height });
    }
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(EncodeError::TooLarge { width, height });
    };

    let mut out = Vec::with_capacity(HEADER_LEN + image.pixels().len());
    out.extend_from_slice(&[0, 0, IMAGE_TYPE_TRUECOLOR]);
    out.extend_from_slice(&[0; 5]);
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&w.to_le_bytes());
    out.extend_from_slice(&h.to_le_bytes());
    out.push(PIXEL_DEPTH);
    out.push(DESCRIPTOR_TOP_LEFT | ALPHA_BITS);

    for px in image.pixels().chunks_exact(4) {
        out.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
    }
    Ok(out)
}

/// Parse the fixed 18-byte header.
pub fn read_header(bytes: &[u8]) -> Result<TgaHeader, EncodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(EncodeError::BadHeader("shorter than 18 bytes"));
    }
    if bytes[1] != 0 {
        return Err(EncodeError::BadHeader("color-mapped images are not produced"));
    }
    Ok(TgaHeader {
        width: u16::from_le_bytes([bytes[12], bytes[13]]),
        height: u16::from_le_bytes([bytes[14], bytes[15]]),
        image_type: bytes[2],
        pixel_depth: bytes[16],
        descriptor: bytes[17],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bytes_exact() {
        let image = RasterImage::new(2, 1, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let out = encode(&image).unwrap();
        assert_eq!(
            &out[..HEADER_LEN],
            &[0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 0, 1, 0, 32, 0x28]
        );
        assert_eq!(&out[HEADER_LEN..], &[3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_header_reports_dimensions() {
        let image = RasterImage::transparent(300, 7).unwrap();
        let out = encode(&image).unwrap();
        assert_eq!(out.len(), HEADER_LEN + 300 * 7 * 4);

        let header = read_header(&out).unwrap();
        assert_eq!((header.width, header.height), (300, 7));
        assert_eq!(header.pixel_depth, 32);
        assert_eq!(header.image_type, 2);
        assert!(header.top_left_origin());
    }

    #[test]
    fn test_empty_raster_is_rejected() {
        assert_eq!(
            encode(&RasterImage::transparent(0, 4).unwrap()),
            Err(EncodeError::Empty {
                width: 0,
                height: 4
            })
        );
        assert!(encode(&RasterImage::transparent(4, 0).unwrap()).is_err());
    }

    #[test]
    fn test_oversized_raster_is_rejected() {
        let image = RasterImage::transparent(65_536, 1).unwrap();
        assert!(matches!(encode(&image), Err(EncodeError::TooLarge { .. })));
    }

    #[test]
    fn test_read_header_too_short() {
        assert!(read_header(&[0; 10]).is_err());
    }
}
