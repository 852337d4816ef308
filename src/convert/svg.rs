//! Vector sources, rasterized with resvg.

use std::fs;
use std::path::Path;

use tiny_skia::{Pixmap, Transform};
use usvg::{Options, Tree};

use super::{ConvertError, RasterSource};
use crate::raster::RasterImage;

/// Livery templates are 2048x2048; vector art is stretched to fill it.
pub const SVG_RESOLUTION: u32 = 2048;

pub struct SvgRasterizer {
    size: u32,
}

impl SvgRasterizer {
    pub fn new(size: u32) -> Self {
        Self { size }
    }
}

impl Default for SvgRasterizer {
    fn default() -> Self {
        Self::new(SVG_RESOLUTION)
    }
}

impl RasterSource for SvgRasterizer {
    fn decode(&self, path: &Path) -> Result<RasterImage, ConvertError> {
        let data = fs::read(path)?;
        let tree = Tree::from_data(&data, &Options::default())
            .map_err(|e| ConvertError::rasterize("svg", e.to_string()))?;

        let size = tree.size();
        if size.width() <= 0.0 || size.height() <= 0.0 {
            return Err(ConvertError::rasterize(
                "svg",
                format!("invalid size {}x{}", size.width(), size.height()),
            ));
        }

        let mut pixmap = Pixmap::new(self.size, self.size)
            .ok_or_else(|| ConvertError::rasterize("svg", "failed to allocate pixmap"))?;
        let transform = Transform::from_scale(
            self.size as f32 / size.width(),
            self.size as f32 / size.height(),
        );
        resvg::render(&tree, transform, &mut pixmap.as_mut());

        // tiny-skia stores premultiplied alpha
        let pixels = pixmap
            .pixels()
            .iter()
            .flat_map(|p| {
                let c = p.demultiply();
                [c.red(), c.green(), c.blue(), c.alpha()]
            })
            .collect();

        RasterImage::new(self.size, self.size, pixels)
            .ok_or_else(|| ConvertError::rasterize("svg", "pixmap size mismatch"))
    }
}
