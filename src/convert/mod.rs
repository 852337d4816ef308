//! Source dispatch: every supported format ends up as one flattened raster.
//!
//! | extension | path                                                    |
//! |-----------|---------------------------------------------------------|
//! | `.pdn`    | document decoder, then flatten                          |
//! | `.svg`    | vector rasterizer at 2048x2048                          |
//! | `.psd`    | photo decoder, bridged through a temporary document     |
//!
//! Other extensions are ignored rather than reported.

mod error;
pub mod flatten;
pub mod psd;
pub mod svg;

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use error::ConvertError;
pub use flatten::flatten;

use crate::core::Role;
use crate::document::{self, Layer, Layout, PdnDocument};
use crate::output::{self, Placement};
use crate::raster::{self, RasterImage};
use psd::MagickDecoder;
use svg::SvgRasterizer;

/// A third-party decoder that produces a flat raster from a file.
pub trait RasterSource: Send + Sync {
    fn decode(&self, path: &Path) -> Result<RasterImage, ConvertError>;
}

/// Source format, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Document,
    Vector,
    Photo,
}

impl SourceKind {
    /// Classify by extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdn" => Some(Self::Document),
            "svg" => Some(Self::Vector),
            "psd" => Some(Self::Photo),
            _ => None,
        }
    }
}

/// One detected change, with the output settings in force when it was seen.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub role: Role,
    pub source: PathBuf,
    pub output: Arc<Placement>,
}

/// What a refresh produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written(PathBuf),
    /// Unsupported extension; nothing was written.
    Skipped,
}

pub struct Converter {
    vector: Box<dyn RasterSource>,
    photo: Box<dyn RasterSource>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::with_sources(Box::new(SvgRasterizer::default()), Box::new(MagickDecoder::default()))
    }
}

impl Converter {
    pub fn with_sources(vector: Box<dyn RasterSource>, photo: Box<dyn RasterSource>) -> Self {
        Self { vector, photo }
    }

    /// Decode and flatten `path`. `Ok(None)` for unsupported extensions.
    pub fn convert(&self, path: &Path, role: Role) -> Result<Option<RasterImage>, ConvertError> {
        let Some(kind) = SourceKind::from_path(path) else {
            crate::debug!(role.label(); "ignoring unsupported file {}", path.display());
            return Ok(None);
        };

        let raster = match kind {
            SourceKind::Document => flatten(&document::open(path)?)?,
            SourceKind::Vector => self.vector.decode(path)?,
            SourceKind::Photo => bridge(self.photo.decode(path)?, &std::env::temp_dir())?,
        };
        Ok(Some(raster))
    }

    /// Convert, encode and write the output for one request.
    pub fn refresh(&self, request: &ConversionRequest) -> Result<Outcome, ConvertError> {
        let Some(raster) = self.convert(&request.source, request.role)? else {
            return Ok(Outcome::Skipped);
        };
        let bytes = raster::encode(&raster)?;
        let path = request.output.output_path(request.role);
        output::write_atomic(&path, &bytes)?;
        Ok(Outcome::Written(path))
    }
}

/// Route a foreign raster through the document decoder and flattener.
///
/// The temporary document lives in `temp_dir` and is removed when this
/// returns, on every path.
fn bridge(raster: RasterImage, temp_dir: &Path) -> Result<RasterImage, ConvertError> {
    let (width, height) = (raster.width(), raster.height());
    let doc = PdnDocument::new(width, height).with_layer(Layer::from_pixels(
        "Background",
        width,
        height,
        raster.into_pixels(),
    ));

    let mut temp = tempfile::Builder::new()
        .prefix("paint-refresher-")
        .suffix(".pdn")
        .tempfile_in(temp_dir)?;
    document::write(&doc, Layout::Deferred, BufWriter::new(temp.as_file_mut()))?;

    Ok(flatten(&document::open(temp.path())?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentError;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Returns a fixed raster and remembers what it was asked to decode.
    struct FakeSource {
        raster: Option<RasterImage>,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl FakeSource {
        fn returning(raster: Option<RasterImage>) -> Self {
            Self {
                raster,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl RasterSource for FakeSource {
        fn decode(&self, path: &Path) -> Result<RasterImage, ConvertError> {
            self.calls.lock().unwrap().push(path.to_path_buf());
            self.raster
                .clone()
                .ok_or_else(|| ConvertError::rasterize("fake", "no raster"))
        }
    }

    fn pixel_raster() -> RasterImage {
        RasterImage::new(2, 1, vec![10, 20, 30, 255, 40, 50, 60, 128]).unwrap()
    }

    fn converter() -> Converter {
        Converter::with_sources(
            Box::new(FakeSource::returning(Some(pixel_raster()))),
            Box::new(FakeSource::returning(Some(pixel_raster()))),
        )
    }

    fn placement(dir: &Path) -> Arc<Placement> {
        Arc::new(Placement {
            dir: dir.to_path_buf(),
            id: 4242,
            custom_number: false,
            suffix: String::new(),
        })
    }

    fn write_document(path: &Path) {
        let doc = PdnDocument::new(1, 1).with_layer(Layer::from_pixels("a", 1, 1, vec![1, 2, 3, 255]));
        let mut out = Vec::new();
        document::write(&doc, Layout::Compressed, &mut out).unwrap();
        fs::write(path, out).unwrap();
    }

    #[test]
    fn test_source_kind_is_case_insensitive() {
        assert_eq!(SourceKind::from_path(Path::new("a.PDN")), Some(SourceKind::Document));
        assert_eq!(SourceKind::from_path(Path::new("a.Svg")), Some(SourceKind::Vector));
        assert_eq!(SourceKind::from_path(Path::new("a.psd")), Some(SourceKind::Photo));
        assert_eq!(SourceKind::from_path(Path::new("a.png")), None);
        assert_eq!(SourceKind::from_path(Path::new("psd")), None);
    }

    #[test]
    fn test_unknown_extension_is_noop() {
        let result = converter().convert(Path::new("/nowhere/car.tga"), Role::Paint);
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_vector_raster_adopted_directly() {
        let raster = converter()
            .convert(Path::new("decal.svg"), Role::Paint)
            .unwrap()
            .unwrap();
        assert_eq!(raster, pixel_raster());
    }

    #[test]
    fn test_photo_goes_through_document_path() {
        let raster = converter()
            .convert(Path::new("car.psd"), Role::SpecMap)
            .unwrap()
            .unwrap();
        // A single full-canvas layer flattens to itself
        assert_eq!(raster, pixel_raster());
    }

    #[test]
    fn test_bridge_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        assert_eq!(bridge(pixel_raster(), dir.path()).unwrap(), pixel_raster());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_bridge_cleans_up_after_failure() {
        // Written fine, but the decoder refuses a canvas past the output limit
        let dir = TempDir::new().unwrap();
        let wide = RasterImage::new(70_000, 1, vec![0; 280_000]).unwrap();
        assert!(matches!(
            bridge(wide, dir.path()),
            Err(ConvertError::Document(DocumentError::Format(_)))
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_collaborator_failure_propagates() {
        let converter = Converter::with_sources(
            Box::new(FakeSource::returning(None)),
            Box::new(FakeSource::returning(None)),
        );
        assert!(matches!(
            converter.convert(Path::new("car.psd"), Role::Paint),
            Err(ConvertError::Rasterize { kind: "fake", .. })
        ));
    }

    #[test]
    fn test_refresh_writes_named_output() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("car.pdn");
        write_document(&source);

        let request = ConversionRequest {
            role: Role::SpecMap,
            source,
            output: placement(dir.path()),
        };
        let outcome = converter().refresh(&request).unwrap();

        let expected = dir.path().join("car_spec_4242.tga");
        assert_eq!(outcome, Outcome::Written(expected.clone()));

        let bytes = fs::read(expected).unwrap();
        let header = raster::read_header(&bytes).unwrap();
        assert_eq!((header.width, header.height), (1, 1));
        assert_eq!(&bytes[raster::tga::HEADER_LEN..], &[3, 2, 1, 255]);
    }

    #[test]
    fn test_refresh_skips_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let request = ConversionRequest {
            role: Role::Paint,
            source: dir.path().join("notes.txt"),
            output: placement(dir.path()),
        };
        assert_eq!(converter().refresh(&request).unwrap(), Outcome::Skipped);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_refresh_rejects_oversized_document() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("huge.pdn");
        let mut out = Vec::new();
        document::write(&PdnDocument::new(70_000, 70_000), Layout::Deferred, &mut out).unwrap();
        fs::write(&source, out).unwrap();

        let request = ConversionRequest {
            role: Role::Paint,
            source,
            output: placement(dir.path()),
        };
        assert!(matches!(
            Converter::default().refresh(&request),
            Err(ConvertError::Document(DocumentError::Format(_)))
        ));
        assert!(!dir.path().join("car_4242.tga").exists());
    }

    #[test]
    fn test_refresh_reports_empty_document() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("empty.pdn");
        let mut out = Vec::new();
        document::write(&PdnDocument::new(0, 0), Layout::Deferred, &mut out).unwrap();
        fs::write(&source, out).unwrap();

        let request = ConversionRequest {
            role: Role::Paint,
            source,
            output: placement(dir.path()),
        };
        assert!(matches!(
            converter().refresh(&request),
            Err(ConvertError::Encode(_))
        ));
    }
}
