//! Document serialization.
//!
//! Produces the same container layouts the decoder accepts, always with a
//! metadata block. Used to bridge rasters from other formats into the
//! document decoder, so there is a single flattening path.
//!
//! Layers must cover the whole canvas: the format has no layer offsets.

use std::collections::HashMap;
use std::io::{self, Write};

use flate2::{Compression, write::GzEncoder};

use super::graph::{block_format, class};
use super::header::{DocumentHeader, write_header};
use super::record::{MemberType, PrimitiveType, RecordType, write_prefixed_string};
use super::{DEFERRED_TAG, Layer, PdnDocument};

/// Container layout to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Layout {
    /// Uncompressed graph, gzip-compressed pixel chunks after it.
    #[default]
    Deferred,
    /// Whole graph gzip-compressed, pixels inline.
    Compressed,
}

/// Uncompressed bytes per deferred chunk.
const CHUNK_SIZE: usize = 1 << 22;

const LIBRARY_ID: i32 = 2;
const LIBRARY: &str = "PaintDotNet.Data, Version=3.36.0.0, Culture=neutral, PublicKeyToken=null";
const NAME_VALUE_COLLECTION: &str = "System.Collections.Specialized.NameValueCollection";

/// Object ids: 1 document, 3 layer list, 4 its items, then a block per layer.
const DOCUMENT_ID: i32 = 1;
const LAYER_LIST_ID: i32 = 3;
const ITEMS_ID: i32 = 4;
const FIRST_LAYER_ID: i32 = 5;
const IDS_PER_LAYER: i32 = 8;

/// Serialize `document` to `out`.
pub fn write<W: Write>(document: &PdnDocument, layout: Layout, mut out: W) -> io::Result<()> {
    check_writable(document)?;

    let header = DocumentHeader {
        width: Some(document.width),
        height: Some(document.height),
        layers: Some(document.layers.len() as u32),
        saved_with_version: Some(concat!("paint-refresher ", env!("CARGO_PKG_VERSION")).into()),
    };
    write_header(&mut out, &header)?;

    match layout {
        Layout::Deferred => {
            out.write_all(&DEFERRED_TAG)?;
            write_graph(document, layout, &mut out)?;
            for layer in &document.layers {
                write_memory_block(&mut out, &to_bgra(&layer.pixels))?;
            }
        }
        Layout::Compressed => {
            // The gzip magic doubles as the container tag.
            let mut encoder = GzEncoder::new(&mut out, Compression::default());
            write_graph(document, layout, &mut encoder)?;
            encoder.finish()?;
        }
    }

    out.flush()
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

fn check_writable(document: &PdnDocument) -> io::Result<()> {
    let (width, height) = (document.width, document.height);
    if i32::try_from(width).is_err() || i32::try_from(height).is_err() {
        return Err(invalid(format!("{width}x{height} does not fit the format")));
    }
    let max_layers = ((i32::MAX - FIRST_LAYER_ID) / IDS_PER_LAYER) as usize;
    if document.layers.len() > max_layers {
        return Err(invalid(format!("{} layers", document.layers.len())));
    }

    for layer in &document.layers {
        if (layer.x, layer.y, layer.width, layer.height) != (0, 0, width, height) {
            return Err(invalid(format!(
                "layer '{}' does not cover the {width}x{height} canvas",
                layer.name
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|area| area.checked_mul(4));
        if expected != Some(layer.pixels.len()) {
            return Err(invalid(format!(
                "layer '{}' has {} pixel bytes for {width}x{height}",
                layer.name,
                layer.pixels.len()
            )));
        }
    }
    Ok(())
}

fn to_bgra(rgba: &[u8]) -> Vec<u8> {
    rgba.chunks_exact(4)
        .flat_map(|px| [px[2], px[1], px[0], px[3]])
        .collect()
}

/// Append one gzip-chunked memory block payload.
fn write_memory_block<W: Write>(out: &mut W, data: &[u8]) -> io::Result<()> {
    out.write_all(&[block_format::GZIP])?;
    out.write_all(&(CHUNK_SIZE as u32).to_be_bytes())?;
    for (number, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(chunk)?;
        let stored = encoder.finish()?;
        let stored_len =
            u32::try_from(stored.len()).map_err(|_| invalid("chunk too large".to_string()))?;
        out.write_all(&(number as u32).to_be_bytes())?;
        out.write_all(&stored_len.to_be_bytes())?;
        out.write_all(&stored)?;
    }
    Ok(())
}

// ============================================================================
// Object graph
// ============================================================================

/// A member in a class declaration.
#[derive(Clone, Copy)]
enum Field {
    Primitive(PrimitiveType),
    String,
    Object,
    Class(&'static str),
    SystemClass(&'static str),
    ObjectArray,
    PrimitiveArray(PrimitiveType),
}

struct ClassDef {
    name: &'static str,
    members: &'static [(&'static str, Field)],
}

const DOCUMENT: ClassDef = ClassDef {
    name: class::DOCUMENT,
    members: &[
        ("isDisposed", Field::Primitive(PrimitiveType::Boolean)),
        ("layers", Field::Class(class::LAYER_LIST)),
        ("width", Field::Primitive(PrimitiveType::Int32)),
        ("height", Field::Primitive(PrimitiveType::Int32)),
        ("savedWith", Field::SystemClass("System.Version")),
        ("userMetaData", Field::SystemClass(NAME_VALUE_COLLECTION)),
    ],
};

const LAYER_LIST: ClassDef = ClassDef {
    name: class::LAYER_LIST,
    members: &[
        ("parent", Field::Class(class::DOCUMENT)),
        ("ArrayList+_items", Field::ObjectArray),
        ("ArrayList+_size", Field::Primitive(PrimitiveType::Int32)),
        ("ArrayList+_version", Field::Primitive(PrimitiveType::Int32)),
    ],
};

const BITMAP_LAYER: ClassDef = ClassDef {
    name: class::BITMAP_LAYER,
    members: &[
        ("properties", Field::Class(class::BITMAP_LAYER_PROPERTIES)),
        ("surface", Field::Class(class::SURFACE)),
        ("Layer+isDisposed", Field::Primitive(PrimitiveType::Boolean)),
        ("Layer+width", Field::Primitive(PrimitiveType::Int32)),
        ("Layer+height", Field::Primitive(PrimitiveType::Int32)),
        ("Layer+properties", Field::Class(class::LAYER_PROPERTIES)),
    ],
};

const BITMAP_LAYER_PROPERTIES: ClassDef = ClassDef {
    name: class::BITMAP_LAYER_PROPERTIES,
    members: &[("blendOp", Field::Object)],
};

const LAYER_PROPERTIES: ClassDef = ClassDef {
    name: class::LAYER_PROPERTIES,
    members: &[
        ("name", Field::String),
        ("userMetaData", Field::SystemClass(NAME_VALUE_COLLECTION)),
        ("visible", Field::Primitive(PrimitiveType::Boolean)),
        ("isBackground", Field::Primitive(PrimitiveType::Boolean)),
        ("opacity", Field::Primitive(PrimitiveType::Byte)),
    ],
};

const SURFACE: ClassDef = ClassDef {
    name: class::SURFACE,
    members: &[
        ("width", Field::Primitive(PrimitiveType::Int32)),
        ("height", Field::Primitive(PrimitiveType::Int32)),
        ("stride", Field::Primitive(PrimitiveType::Int32)),
        ("scan0", Field::Class(class::MEMORY_BLOCK)),
    ],
};

const DEFERRED_BLOCK: ClassDef = ClassDef {
    name: class::MEMORY_BLOCK,
    members: &[
        ("length64", Field::Primitive(PrimitiveType::Int64)),
        ("hasParent", Field::Primitive(PrimitiveType::Boolean)),
        ("deferred", Field::Primitive(PrimitiveType::Boolean)),
    ],
};

const INLINE_BLOCK: ClassDef = ClassDef {
    name: class::MEMORY_BLOCK,
    members: &[
        ("length64", Field::Primitive(PrimitiveType::Int64)),
        ("hasParent", Field::Primitive(PrimitiveType::Boolean)),
        ("pointerData", Field::PrimitiveArray(PrimitiveType::Byte)),
    ],
};

/// Emits records, declaring each class layout once.
struct GraphWriter<'a, W> {
    out: &'a mut W,
    /// Object id that declared each class layout.
    declared: HashMap<&'static str, i32>,
}

impl<W: Write> GraphWriter<'_, W> {
    fn tag(&mut self, record: RecordType) -> io::Result<()> {
        self.out.write_all(&[record.tag()])
    }

    fn i32(&mut self, value: i32) -> io::Result<()> {
        self.out.write_all(&value.to_le_bytes())
    }

    fn u8(&mut self, value: u8) -> io::Result<()> {
        self.out.write_all(&[value])
    }

    fn flag(&mut self, value: bool) -> io::Result<()> {
        self.u8(u8::from(value))
    }

    fn reference(&mut self, id: i32) -> io::Result<()> {
        self.tag(RecordType::MemberReference)?;
        self.i32(id)
    }

    fn null(&mut self) -> io::Result<()> {
        self.tag(RecordType::ObjectNull)
    }

    fn string(&mut self, id: i32, value: &str) -> io::Result<()> {
        self.tag(RecordType::BinaryObjectString)?;
        self.i32(id)?;
        write_prefixed_string(self.out, value)
    }

    /// Start an instance; its member values follow in declaration order.
    fn begin(&mut self, id: i32, def: &ClassDef) -> io::Result<()> {
        if let Some(&layout_id) = self.declared.get(def.name) {
            self.tag(RecordType::ClassWithId)?;
            self.i32(id)?;
            return self.i32(layout_id);
        }
        self.declared.insert(def.name, id);

        self.tag(RecordType::ClassWithMembersAndTypes)?;
        self.i32(id)?;
        write_prefixed_string(self.out, def.name)?;
        self.i32(def.members.len() as i32)?;
        for (name, _) in def.members {
            write_prefixed_string(self.out, name)?;
        }
        for (_, field) in def.members {
            self.u8(match field {
                Field::Primitive(_) => MemberType::PRIMITIVE,
                Field::String => MemberType::STRING,
                Field::Object => MemberType::OBJECT,
                Field::SystemClass(_) => MemberType::SYSTEM_CLASS,
                Field::Class(_) => MemberType::CLASS,
                Field::ObjectArray => MemberType::OBJECT_ARRAY,
                Field::PrimitiveArray(_) => MemberType::PRIMITIVE_ARRAY,
            })?;
        }
        for (_, field) in def.members {
            match field {
                Field::Primitive(kind) | Field::PrimitiveArray(kind) => self.u8(kind.tag())?,
                Field::SystemClass(name) => write_prefixed_string(self.out, name)?,
                Field::Class(name) => {
                    write_prefixed_string(self.out, name)?;
                    self.i32(LIBRARY_ID)?;
                }
                Field::String | Field::Object | Field::ObjectArray => {}
            }
        }
        self.i32(LIBRARY_ID)
    }

    fn layer(&mut self, base: i32, index: usize, layer: &Layer, layout: Layout) -> io::Result<()> {
        let (props, op, surface, block, layer_props, name, data) =
            (base + 1, base + 2, base + 3, base + 4, base + 5, base + 6, base + 7);
        let (width, height) = (layer.width as i32, layer.height as i32);

        self.begin(base, &BITMAP_LAYER)?;
        self.reference(props)?;
        self.reference(surface)?;
        self.flag(false)?;
        self.i32(width)?;
        self.i32(height)?;
        self.reference(layer_props)?;

        self.begin(props, &BITMAP_LAYER_PROPERTIES)?;
        self.reference(op)?;
        self.begin(
            op,
            &ClassDef {
                name: layer.blend_mode.class_name(),
                members: &[],
            },
        )?;

        self.begin(surface, &SURFACE)?;
        self.i32(width)?;
        self.i32(height)?;
        self.i32(width * 4)?;
        self.reference(block)?;

        let len = layer.pixels.len() as i64;
        match layout {
            Layout::Deferred => {
                self.begin(block, &DEFERRED_BLOCK)?;
                self.out.write_all(&len.to_le_bytes())?;
                self.flag(false)?;
                self.flag(true)?;
            }
            Layout::Compressed => {
                self.begin(block, &INLINE_BLOCK)?;
                self.out.write_all(&len.to_le_bytes())?;
                self.flag(false)?;
                self.tag(RecordType::ArraySinglePrimitive)?;
                self.i32(data)?;
                self.i32(len as i32)?;
                self.u8(PrimitiveType::Byte.tag())?;
                self.out.write_all(&to_bgra(&layer.pixels))?;
            }
        }

        self.begin(layer_props, &LAYER_PROPERTIES)?;
        self.string(name, &layer.name)?;
        self.null()?;
        self.flag(layer.visible)?;
        self.flag(index == 0)?;
        self.u8(layer.opacity)
    }
}

/// Write the object graph message for `document`.
///
/// With `Layout::Deferred` the memory blocks are marked deferred and their
/// payloads must follow, one per layer, in layer order.
pub(super) fn write_graph<W: Write>(document: &PdnDocument, layout: Layout, out: &mut W) -> io::Result<()> {
    check_writable(document)?;
    let mut w = GraphWriter {
        out,
        declared: HashMap::new(),
    };
    let count = document.layers.len() as i32;

    w.tag(RecordType::SerializedStreamHeader)?;
    w.i32(DOCUMENT_ID)?;
    w.i32(-1)?;
    w.i32(1)?;
    w.i32(0)?;
    w.tag(RecordType::BinaryLibrary)?;
    w.i32(LIBRARY_ID)?;
    write_prefixed_string(w.out, LIBRARY)?;

    w.begin(DOCUMENT_ID, &DOCUMENT)?;
    w.flag(false)?;
    w.reference(LAYER_LIST_ID)?;
    w.i32(document.width as i32)?;
    w.i32(document.height as i32)?;
    w.null()?;
    w.null()?;

    w.begin(LAYER_LIST_ID, &LAYER_LIST)?;
    w.reference(DOCUMENT_ID)?;
    w.reference(ITEMS_ID)?;
    w.i32(count)?;
    w.i32(count)?;

    w.tag(RecordType::ArraySingleObject)?;
    w.i32(ITEMS_ID)?;
    w.i32(count)?;
    for i in 0..count {
        w.reference(FIRST_LAYER_ID + i * IDS_PER_LAYER)?;
    }

    for (i, layer) in document.layers.iter().enumerate() {
        w.layer(FIRST_LAYER_ID + i as i32 * IDS_PER_LAYER, i, layer, layout)?;
    }

    w.tag(RecordType::MessageEnd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{GZIP_TAG, decode_bytes, header::MAGIC};

    fn one_pixel() -> PdnDocument {
        PdnDocument::new(1, 1).with_layer(Layer::from_pixels("a", 1, 1, vec![10, 20, 30, 40]))
    }

    #[test]
    fn test_starts_with_magic() {
        for layout in [Layout::Deferred, Layout::Compressed] {
            let mut out = Vec::new();
            write(&one_pixel(), layout, &mut out).unwrap();
            assert_eq!(&out[..4], MAGIC);
        }
    }

    #[test]
    fn test_tag_bytes_per_layout() {
        let mut deferred = Vec::new();
        write(&one_pixel(), Layout::Deferred, &mut deferred).unwrap();
        let mut compressed = Vec::new();
        write(&one_pixel(), Layout::Compressed, &mut compressed).unwrap();

        let offset = |bytes: &[u8]| 7 + bytes[4] as usize + ((bytes[5] as usize) << 8);
        let at = offset(&deferred);
        assert_eq!(&deferred[at..at + 2], &DEFERRED_TAG);
        // Stream header record right after the marker
        assert_eq!(deferred[at + 2], RecordType::SerializedStreamHeader.tag());
        assert_eq!(&compressed[offset(&compressed)..offset(&compressed) + 2], &GZIP_TAG);
    }

    #[test]
    fn test_deferred_payload_follows_message() {
        let mut graph = Vec::new();
        write_graph(&one_pixel(), Layout::Deferred, &mut graph).unwrap();
        assert_eq!(graph.last(), Some(&RecordType::MessageEnd.tag()));

        let mut out = Vec::new();
        write(&one_pixel(), Layout::Deferred, &mut out).unwrap();
        let end = out
            .windows(graph.len())
            .position(|window| window == graph)
            .unwrap()
            + graph.len();
        assert_eq!(out[end], block_format::GZIP);
        assert_eq!(&out[end + 1..end + 5], &(CHUNK_SIZE as u32).to_be_bytes());
        assert_eq!(&out[end + 5..end + 9], &0u32.to_be_bytes());
    }

    #[test]
    fn test_pixels_stored_as_bgra() {
        let mut graph = Vec::new();
        write_graph(&one_pixel(), Layout::Compressed, &mut graph).unwrap();
        assert!(graph.windows(4).any(|w| w == [30, 20, 10, 40]));
        assert!(!graph.windows(4).any(|w| w == [10, 20, 30, 40]));
    }

    #[test]
    fn test_class_layouts_declared_once() {
        let document = one_pixel()
            .with_layer(Layer::from_pixels("b", 1, 1, vec![0; 4]))
            .with_layer(Layer::from_pixels("c", 1, 1, vec![0; 4]));
        let mut graph = Vec::new();
        write_graph(&document, Layout::Deferred, &mut graph).unwrap();

        let mut name = Vec::new();
        write_prefixed_string(&mut name, class::BITMAP_LAYER).unwrap();
        let declarations = graph.windows(name.len()).filter(|w| *w == name).count();
        assert_eq!(declarations, 1);
        assert_eq!(decode_round_trip(&document).layers.len(), 3);
    }

    fn decode_round_trip(document: &PdnDocument) -> PdnDocument {
        let mut out = Vec::new();
        write(document, Layout::Deferred, &mut out).unwrap();
        decode_bytes(&out).unwrap()
    }

    #[test]
    fn test_multi_chunk_payload() {
        // 1100x1000 RGBA spans two chunks
        let (width, height) = (1100, 1000);
        let pixels: Vec<u8> = (0..width * height * 4).map(|i| (i % 251) as u8).collect();
        let document = PdnDocument::new(width, height)
            .with_layer(Layer::from_pixels("big", width, height, pixels.clone()));
        assert!(pixels.len() > CHUNK_SIZE);
        assert_eq!(decode_round_trip(&document).layers[0].pixels, pixels);
    }

    #[test]
    fn test_rejects_mis_sized_layer() {
        let document = PdnDocument::new(2, 2).with_layer(Layer::from_pixels("a", 2, 2, vec![0; 3]));
        let err = write(&document, Layout::Deferred, Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_rejects_partial_layer() {
        let mut layer = Layer::from_pixels("a", 1, 1, vec![0; 4]);
        layer.x = 1;
        let document = PdnDocument::new(2, 1).with_layer(layer);
        let err = write(&document, Layout::Compressed, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("does not cover"));
    }

    #[test]
    fn test_rejects_dimensions_beyond_int32() {
        let err = write(&PdnDocument::new(u32::MAX, 1), Layout::Deferred, Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_empty_document() {
        let document = PdnDocument::new(0, 0);
        let mut out = Vec::new();
        write(&document, Layout::Deferred, &mut out).unwrap();
        let decoded = decode_bytes(&out).unwrap();
        assert_eq!(decoded.width, 0);
        assert!(decoded.layers.is_empty());
    }
}
