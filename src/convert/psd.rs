//! Photo-editor sources (`.psd`), decoded by ImageMagick.

use std::ffi::OsStr;
use std::path::Path;

use image::ImageFormat;

use super::{ConvertError, RasterSource};
use crate::raster::RasterImage;
use crate::utils::exec::{Cmd, FilterRule};

const MAGICK: &str = "magick";

/// Layer-mask and color-profile chatter that does not affect the result.
const MAGICK_FILTER: FilterRule = FilterRule::new(&["magick: ", "Warning: "]);

/// Reads the merged composite of a layered file through `magick`.
#[derive(Debug)]
pub struct MagickDecoder {
    program: &'static str,
}

impl Default for MagickDecoder {
    fn default() -> Self {
        Self { program: MAGICK }
    }
}

#[cfg(test)]
impl MagickDecoder {
    /// Decode with a different executable, looked up in `PATH`.
    pub fn with_program(program: &'static str) -> Self {
        Self { program }
    }
}

impl RasterSource for MagickDecoder {
    fn decode(&self, path: &Path) -> Result<RasterImage, ConvertError> {
        let program = self.program;
        which::which(program).map_err(|_| ConvertError::ToolMissing(program))?;

        // Frame 0 of a layered PSD is the flattened composite.
        let mut input = path.as_os_str().to_owned();
        input.push("[0]");

        let output = Cmd::new(program)
            .args([input.as_os_str(), OsStr::new("png32:-")])
            .filter(&MAGICK_FILTER)
            .run()
            .map_err(|e| ConvertError::Tool {
                tool: program,
                message: format!("{e:#}"),
            })?;

        let image = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)?
            .into_rgba8();
        let (width, height) = image.dimensions();
        RasterImage::new(width, height, image.into_raw())
            .ok_or_else(|| ConvertError::rasterize("psd", "decoded buffer size mismatch"))
    }
}
