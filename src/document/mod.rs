//! Layered document (`.pdn`) decoding.
//!
//! # Stream layout
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ "PDN3" + len(3) + XML        │  optional; absent in the legacy layout
//! ├──────────────────────────────┤
//! │ tag bytes                    │  (0, 1)    -> deferred-object layout
//! │                              │  (31, 139) -> gzip-compressed graph
//! ├──────────────────────────────┤
//! │ binary object graph          │  MS-NRBF message, see `record`
//! ├──────────────────────────────┤
//! │ memory block payloads        │  deferred layout only, see `graph`
//! └──────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`header`]: magic prefix and XML metadata
//! - `record`: the closed set of graph records
//! - `nrbf`: the object arena built from one message
//! - `graph`: mapping onto [`PdnDocument`] and deferred payload binding
//! - [`writer`]: serialization in either layout

mod error;
pub mod header;
mod graph;
mod nrbf;
mod reader;
mod record;
pub mod writer;

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;

pub use error::DocumentError;
pub use header::DocumentHeader;
pub use writer::{Layout, write};

use graph::{GraphKind, Skeleton};
use reader::ByteReader;

/// Container tag of the deferred-object layout.
pub const DEFERRED_TAG: [u8; 2] = [0, 1];

/// First two bytes of every gzip stream.
pub const GZIP_TAG: [u8; 2] = [31, 139];

// ============================================================================
// Types
// ============================================================================

/// Per-layer blend mode, one per blend operation class of the format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Additive,
    ColorBurn,
    ColorDodge,
    Reflect,
    Glow,
    Overlay,
    Difference,
    Negation,
    Lighten,
    Darken,
    Screen,
    Xor,
}

impl BlendMode {
    pub const ALL: [Self; 14] = [
        Self::Normal,
        Self::Multiply,
        Self::Additive,
        Self::ColorBurn,
        Self::ColorDodge,
        Self::Reflect,
        Self::Glow,
        Self::Overlay,
        Self::Difference,
        Self::Negation,
        Self::Lighten,
        Self::Darken,
        Self::Screen,
        Self::Xor,
    ];

    /// Serialized class name of the blend operation.
    pub fn class_name(self) -> &'static str {
        match self {
            Self::Normal => "PaintDotNet.UserBlendOps+NormalBlendOp",
            Self::Multiply => "PaintDotNet.UserBlendOps+MultiplyBlendOp",
            Self::Additive => "PaintDotNet.UserBlendOps+AdditiveBlendOp",
            Self::ColorBurn => "PaintDotNet.UserBlendOps+ColorBurnBlendOp",
            Self::ColorDodge => "PaintDotNet.UserBlendOps+ColorDodgeBlendOp",
            Self::Reflect => "PaintDotNet.UserBlendOps+ReflectBlendOp",
            Self::Glow => "PaintDotNet.UserBlendOps+GlowBlendOp",
            Self::Overlay => "PaintDotNet.UserBlendOps+OverlayBlendOp",
            Self::Difference => "PaintDotNet.UserBlendOps+DifferenceBlendOp",
            Self::Negation => "PaintDotNet.UserBlendOps+NegationBlendOp",
            Self::Lighten => "PaintDotNet.UserBlendOps+LightenBlendOp",
            Self::Darken => "PaintDotNet.UserBlendOps+DarkenBlendOp",
            Self::Screen => "PaintDotNet.UserBlendOps+ScreenBlendOp",
            Self::Xor => "PaintDotNet.UserBlendOps+XorBlendOp",
        }
    }

    /// `None` for blend operations outside the known set.
    pub fn from_class_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.class_name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Multiply => "multiply",
            Self::Additive => "additive",
            Self::ColorBurn => "color-burn",
            Self::ColorDodge => "color-dodge",
            Self::Reflect => "reflect",
            Self::Glow => "glow",
            Self::Overlay => "overlay",
            Self::Difference => "difference",
            Self::Negation => "negation",
            Self::Lighten => "lighten",
            Self::Darken => "darken",
            Self::Screen => "screen",
            Self::Xor => "xor",
        }
    }
}

/// One layer of a document. `pixels` is RGBA8, `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Linear multiplier over the layer's own alpha channel.
    pub opacity: u8,
    pub blend_mode: BlendMode,
    pub visible: bool,
    pub pixels: Vec<u8>,
}

impl Layer {
    /// Full-canvas, fully opaque, normal layer over the given pixels.
    pub fn from_pixels(name: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            x: 0,
            y: 0,
            width,
            height,
            opacity: 255,
            blend_mode: BlendMode::Normal,
            visible: true,
            pixels,
        }
    }
}

/// Decoded document, layers bottom to top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdnDocument {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<Layer>,
    /// Metadata block, if the stream carried one.
    pub header: Option<DocumentHeader>,
    /// Set on every freshly decoded document: derived state must be rebuilt.
    pub dirty: bool,
}

impl PdnDocument {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layers: Vec::new(),
            header: None,
            dirty: false,
        }
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a document from a seekable stream.
pub fn decode<R: Read + Seek>(mut stream: R) -> Result<PdnDocument, DocumentError> {
    let header = header::read_header(&mut stream)?;
    let tag_start = stream.stream_position().map_err(DocumentError::Io)?;

    let tags = {
        let mut reader = ByteReader::new(&mut stream);
        [reader.u8("container tag")?, reader.u8("container tag")?]
    };

    let mut document = match tags {
        DEFERRED_TAG => {
            let mut reader = ByteReader::new(&mut stream);
            let graph = nrbf::read_graph(&mut reader)?;
            Skeleton::from_graph(graph, GraphKind::Deferred)?
                .bind_deferred(&mut reader)?
                .into_document()
        }
        GZIP_TAG => {
            // The tag bytes are the gzip magic; hand them back to the decoder.
            stream
                .seek(SeekFrom::Start(tag_start))
                .map_err(DocumentError::Io)?;
            let mut reader = ByteReader::new(GzDecoder::new(&mut stream));
            let graph = nrbf::read_graph(&mut reader)?;
            Skeleton::from_graph(graph, GraphKind::Legacy)?.into_document()
        }
        _ => return Err(DocumentError::format("not a valid document")),
    };

    if let Some(header) = &header {
        check_header(header, &document);
    }
    document.header = header;
    document.dirty = true;
    Ok(document)
}

/// Decode a document held in memory.
pub fn decode_bytes(bytes: &[u8]) -> Result<PdnDocument, DocumentError> {
    decode(Cursor::new(bytes))
}

/// Open and decode a document file.
pub fn open(path: &Path) -> Result<PdnDocument, DocumentError> {
    let file = File::open(path).map_err(DocumentError::Io)?;
    decode(BufReader::new(file))
}

/// The graph is authoritative; disagreeing metadata is only worth a note.
fn check_header(header: &DocumentHeader, document: &PdnDocument) {
    let size_mismatch = header.width.is_some_and(|w| w != document.width)
        || header.height.is_some_and(|h| h != document.height);
    let layers_mismatch = header
        .layers
        .is_some_and(|n| n as usize != document.layers.len());

    if size_mismatch || layers_mismatch {
        crate::debug!(
            "document";
            "metadata says {:?}x{:?} with {:?} layers, graph has {}x{} with {}",
            header.width, header.height, header.layers,
            document.width, document.height, document.layers.len()
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
