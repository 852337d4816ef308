//! Layer compositing.
//!
//! Integer arithmetic only, so output is bit-identical across runs and
//! platforms. Each layer's opacity scales its own alpha channel; the blend
//! mode decides the color where the layer overlaps existing content, and
//! plain source color shows through where the canvas is still transparent.

use rayon::prelude::*;

use crate::document::{BlendMode, Layer, PdnDocument};
use crate::raster::{EncodeError, MAX_DIMENSION, RasterImage};

/// Composite visible layers bottom to top onto a transparent canvas.
///
/// Canvases the output format cannot hold are refused before allocating.
pub fn flatten(document: &PdnDocument) -> Result<RasterImage, EncodeError> {
    let (width, height) = (document.width, document.height);
    let too_large = EncodeError::TooLarge { width, height };
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(too_large);
    }
    let mut canvas = RasterImage::transparent(width, height).ok_or(too_large)?;
    if canvas.is_empty() {
        return Ok(canvas);
    }

    let layers: Vec<&Layer> = document
        .layers
        .iter()
        .filter(|layer| layer.visible && has_valid_pixels(layer))
        .collect();

    let row_len = width as usize * 4;
    canvas
        .pixels_mut()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            for layer in &layers {
                composite_row(layer, y as i64, row, width);
            }
        });

    Ok(canvas)
}

fn has_valid_pixels(layer: &Layer) -> bool {
    let expected = layer.width as usize * layer.height as usize * 4;
    if layer.pixels.len() == expected {
        return true;
    }
    crate::debug!(
        "flatten";
        "skipping layer '{}': {} pixel bytes for {}x{}",
        layer.name, layer.pixels.len(), layer.width, layer.height
    );
    false
}

/// Composite one canvas row of `layer`, clipped to the canvas.
fn composite_row(layer: &Layer, y: i64, row: &mut [u8], canvas_width: u32) {
    let ly = y - i64::from(layer.y);
    if ly < 0 || ly >= i64::from(layer.height) {
        return;
    }

    let x0 = i64::from(layer.x).max(0);
    let x1 = (i64::from(layer.x) + i64::from(layer.width)).min(i64::from(canvas_width));
    if x0 >= x1 {
        return;
    }

    let src_row = ly as usize * layer.width as usize * 4;
    for x in x0..x1 {
        let lx = (x - i64::from(layer.x)) as usize;
        let src = &layer.pixels[src_row + lx * 4..src_row + lx * 4 + 4];
        let dst = &mut row[x as usize * 4..x as usize * 4 + 4];
        blend_pixel(dst, src, layer.opacity, layer.blend_mode);
    }
}

#[inline]
fn mul_div255(a: u32, b: u32) -> u32 {
    (a * b + 127) / 255
}

fn blend_pixel(dst: &mut [u8], src: &[u8], opacity: u8, mode: BlendMode) {
    let sa = mul_div255(u32::from(src[3]), u32::from(opacity));
    if sa == 0 {
        return;
    }
    let da = u32::from(dst[3]);
    let oa = sa + mul_div255(da, 255 - sa);
    let denominator = oa * 255;

    for c in 0..3 {
        let s = u32::from(src[c]);
        let d = u32::from(dst[c]);
        let effective = (blend_channel(mode, d, s) * da + s * (255 - da) + 127) / 255;
        let numerator = effective * sa * 255 + d * da * (255 - sa);
        dst[c] = ((numerator + denominator / 2) / denominator).min(255) as u8;
    }
    dst[3] = oa as u8;
}

/// Blend one channel: `d` is the backdrop, `s` the layer.
fn blend_channel(mode: BlendMode, d: u32, s: u32) -> u32 {
    match mode {
        BlendMode::Normal => s,
        BlendMode::Multiply => d * s / 255,
        BlendMode::Additive => (d + s).min(255),
        BlendMode::ColorBurn => {
            if s == 0 {
                0
            } else {
                255u32.saturating_sub((255 - d) * 255 / s)
            }
        }
        BlendMode::ColorDodge => {
            if s == 255 {
                255
            } else {
                (d * 255 / (255 - s)).min(255)
            }
        }
        BlendMode::Reflect => {
            if s == 255 {
                255
            } else {
                (d * d / (255 - s)).min(255)
            }
        }
        BlendMode::Glow => {
            if d == 255 {
                255
            } else {
                (s * s / (255 - d)).min(255)
            }
        }
        BlendMode::Overlay => {
            if d < 128 {
                2 * d * s / 255
            } else {
                255 - 2 * (255 - d) * (255 - s) / 255
            }
        }
        BlendMode::Difference => d.abs_diff(s),
        BlendMode::Negation => 255 - 255u32.abs_diff(d + s),
        BlendMode::Lighten => d.max(s),
        BlendMode::Darken => d.min(s),
        BlendMode::Screen => 255 - (255 - d) * (255 - s) / 255,
        BlendMode::Xor => d ^ s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(name: &str, width: u32, height: u32, rgba: [u8; 4]) -> Layer {
        Layer::from_pixels(name, width, height, rgba.repeat((width * height) as usize))
    }

    fn pixel(image: &RasterImage, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * image.width() + x) * 4) as usize;
        image.pixels()[i..i + 4].try_into().unwrap()
    }

    #[test]
    fn test_single_opaque_layer() {
        let doc = PdnDocument::new(2, 2).with_layer(solid("a", 2, 2, [10, 20, 30, 255]));
        let image = flatten(&doc).unwrap();
        assert_eq!(image.pixels(), [10, 20, 30, 255].repeat(4).as_slice());
    }

    #[test]
    fn test_half_opacity_over_opaque() {
        let mut top = solid("top", 1, 1, [255, 0, 0, 255]);
        top.opacity = 128;
        let doc = PdnDocument::new(1, 1)
            .with_layer(solid("base", 1, 1, [0, 0, 255, 255]))
            .with_layer(top);
        assert_eq!(pixel(&flatten(&doc).unwrap(), 0, 0), [128, 0, 127, 255]);
    }

    #[test]
    fn test_layer_over_transparent_keeps_color() {
        let doc = PdnDocument::new(1, 1).with_layer(solid("a", 1, 1, [200, 100, 50, 128]));
        assert_eq!(pixel(&flatten(&doc).unwrap(), 0, 0), [200, 100, 50, 128]);
    }

    #[test]
    fn test_multiply_over_opaque() {
        let mut top = solid("top", 1, 1, [128, 255, 0, 255]);
        top.blend_mode = BlendMode::Multiply;
        let doc = PdnDocument::new(1, 1)
            .with_layer(solid("base", 1, 1, [200, 100, 50, 255]))
            .with_layer(top);
        assert_eq!(pixel(&flatten(&doc).unwrap(), 0, 0), [100, 100, 0, 255]);
    }

    #[test]
    fn test_blend_mode_ignored_over_transparent() {
        let mut top = solid("top", 1, 1, [40, 50, 60, 255]);
        top.blend_mode = BlendMode::Darken;
        let doc = PdnDocument::new(1, 1).with_layer(top);
        assert_eq!(pixel(&flatten(&doc).unwrap(), 0, 0), [40, 50, 60, 255]);
    }

    #[test]
    fn test_invisible_layer_skipped() {
        let mut hidden = solid("hidden", 1, 1, [255, 255, 255, 255]);
        hidden.visible = false;
        let doc = PdnDocument::new(1, 1)
            .with_layer(solid("base", 1, 1, [1, 2, 3, 255]))
            .with_layer(hidden);
        assert_eq!(pixel(&flatten(&doc).unwrap(), 0, 0), [1, 2, 3, 255]);
    }

    #[test]
    fn test_offsets_are_clipped() {
        let mut inside = solid("inside", 2, 2, [9, 9, 9, 255]);
        inside.x = 2;
        inside.y = 1;
        let mut left = Layer::from_pixels("left", 2, 1, vec![1, 1, 1, 255, 7, 7, 7, 255]);
        left.x = -1;

        let doc = PdnDocument::new(3, 2).with_layer(inside).with_layer(left);
        let image = flatten(&doc).unwrap();

        assert_eq!(pixel(&image, 0, 0), [7, 7, 7, 255]);
        assert_eq!(pixel(&image, 1, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&image, 2, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&image, 2, 1), [9, 9, 9, 255]);
        assert_eq!(pixel(&image, 0, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn test_layer_entirely_off_canvas() {
        let mut away = solid("away", 2, 2, [9, 9, 9, 255]);
        away.x = 10;
        away.y = -10;
        let doc = PdnDocument::new(2, 2).with_layer(away);
        assert!(flatten(&doc).unwrap().pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_canvas() {
        let doc = PdnDocument::new(0, 3).with_layer(solid("a", 1, 1, [1, 1, 1, 255]));
        let image = flatten(&doc).unwrap();
        assert_eq!((image.width(), image.height()), (0, 3));
        assert!(image.is_empty());
    }

    #[test]
    fn test_canvas_beyond_output_limit() {
        for (width, height) in [(u32::MAX, u32::MAX), (70_000, 1), (1, 65_536)] {
            assert_eq!(
                flatten(&PdnDocument::new(width, height)),
                Err(EncodeError::TooLarge { width, height })
            );
        }
    }

    #[test]
    fn test_blend_channel_formulas() {
        assert_eq!(blend_channel(BlendMode::Additive, 200, 100), 255);
        assert_eq!(blend_channel(BlendMode::ColorBurn, 100, 0), 0);
        assert_eq!(blend_channel(BlendMode::ColorDodge, 100, 255), 255);
        assert_eq!(blend_channel(BlendMode::Difference, 30, 100), 70);
        assert_eq!(blend_channel(BlendMode::Negation, 200, 100), 210);
        assert_eq!(blend_channel(BlendMode::Screen, 0, 0), 0);
        assert_eq!(blend_channel(BlendMode::Screen, 255, 0), 255);
        assert_eq!(blend_channel(BlendMode::Overlay, 0, 200), 0);
        assert_eq!(blend_channel(BlendMode::Xor, 0b1100, 0b1010), 0b0110);
        assert_eq!(blend_channel(BlendMode::Glow, 255, 3), 255);
        assert_eq!(blend_channel(BlendMode::Reflect, 3, 255), 255);
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let mut doc = PdnDocument::new(16, 9);
        for (i, mode) in BlendMode::ALL.iter().enumerate() {
            let mut layer = solid("l", 8, 5, [i as u8 * 17, 255 - i as u8 * 9, 77, 200]);
            layer.x = i as i32 % 9 - 2;
            layer.y = i as i32 % 5 - 1;
            layer.blend_mode = *mode;
            layer.opacity = 180;
            doc.layers.push(layer);
        }
        assert_eq!(flatten(&doc).unwrap(), flatten(&doc).unwrap());
    }
}
