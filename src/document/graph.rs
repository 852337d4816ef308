//! Document model over the object graph.
//!
//! Both container layouts serialize the same objects:
//!
//! ```text
//! Document { width, height, layers -> LayerList }
//! LayerList { ArrayList+_items -> [BitmapLayer], ArrayList+_size }
//! BitmapLayer {
//!     properties       -> BitmapLayerProperties { blendOp -> <blend op class> }
//!     Layer+properties -> LayerProperties { name, visible, opacity }
//!     surface          -> Surface { width, height, stride, scan0 -> MemoryBlock }
//! }
//! MemoryBlock { length64, hasParent, deferred | pointerData }
//! ```
//!
//! Surfaces hold straight BGRA rows, `stride` bytes apart. In the gzip
//! layout every memory block carries its bytes as `pointerData`. In the
//! deferred layout a block may be marked `deferred`; its payload then
//! follows the message, in the order the blocks were defined:
//!
//! ```text
//! format u8 (0 gzip, 1 raw) | chunk_size u32 BE
//! (chunk_number u32 BE | stored_len u32 BE | stored_len bytes){ceil(len / chunk_size)}
//! ```
//!
//! Chunks may arrive in any order; each decodes to `chunk_size` bytes, except
//! the last, which holds the remainder.
//!
//! The graph is mapped onto layer slots first; a second pass fills the
//! deferred slots from the payload section.

use std::collections::HashSet;
use std::io::Read;

use flate2::read::GzDecoder;

use super::nrbf::{ClassObject, Object, ObjectGraph, Value};
use super::reader::ByteReader;
use super::record::Primitive;
use super::{BlendMode, DocumentError, Layer, PdnDocument};
use crate::raster::MAX_DIMENSION;

/// Serialized class names.
pub(super) mod class {
    pub const DOCUMENT: &str = "PaintDotNet.Document";
    pub const LAYER_LIST: &str = "PaintDotNet.LayerList";
    pub const BITMAP_LAYER: &str = "PaintDotNet.BitmapLayer";
    pub const BITMAP_LAYER_PROPERTIES: &str = "PaintDotNet.BitmapLayer+BitmapLayerProperties";
    pub const LAYER_PROPERTIES: &str = "PaintDotNet.Layer+LayerProperties";
    pub const SURFACE: &str = "PaintDotNet.Surface";
    pub const MEMORY_BLOCK: &str = "PaintDotNet.MemoryBlock";
}

/// Payload formats of a deferred memory block.
pub(super) mod block_format {
    pub const GZIP: u8 = 0;
    pub const RAW: u8 = 1;
}

/// Which container produced the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum GraphKind {
    /// Gzip-compressed graph, pixels inline.
    Legacy,
    /// Uncompressed graph with a trailing payload section.
    Deferred,
}

#[derive(Debug)]
enum Pixels {
    Bound(Vec<u8>),
    Deferred { len: usize },
}

#[derive(Debug)]
struct LayerSlot {
    name: String,
    opacity: u8,
    blend_mode: BlendMode,
    visible: bool,
    width: u32,
    height: u32,
    stride: usize,
    pixels: Pixels,
}

/// Mapped document whose deferred pixel buffers may still be unbound.
#[derive(Debug)]
pub(super) struct Skeleton {
    width: u32,
    height: u32,
    slots: Vec<LayerSlot>,
    /// Slots waiting for a payload, in payload order.
    deferred: Vec<usize>,
}

impl Skeleton {
    /// Map a parsed graph onto layer slots.
    pub fn from_graph(mut graph: ObjectGraph, kind: GraphKind) -> Result<Self, DocumentError> {
        let root = match graph.get(graph.root) {
            Some(Object::Class(root)) if root.name() == class::DOCUMENT => root,
            Some(Object::Class(root)) => {
                return Err(DocumentError::format(format!(
                    "root object is {}, not a document",
                    root.name()
                )));
            }
            _ => return Err(DocumentError::format("root object is not a document")),
        };
        let width = dimension(root, "width")?;
        let height = dimension(root, "height")?;
        check_canvas(width, height)?;

        let list = class_ref(&graph, root, "layers", class::LAYER_LIST)?;
        let layer_ids = layer_ids(&graph, list)?;

        let mut slots = Vec::with_capacity(layer_ids.len());
        let mut deferred = Vec::new();
        let mut stored = Vec::new();
        for id in layer_ids {
            let layer = class_at(&graph, id, class::BITMAP_LAYER, "layer list entry")?;
            let (slot, block) = map_layer(&graph, layer, kind)?;
            match block {
                Block::Deferred(block_id) => deferred.push((graph.position(block_id), slots.len())),
                Block::Stored(data_id) => stored.push((data_id, slots.len())),
            }
            slots.push(slot);
        }

        // Inline buffers move out of the arena instead of being copied
        for (data_id, index) in stored {
            let Some(Object::Bytes(data)) = graph.objects.remove(&data_id) else {
                return Err(DocumentError::format(format!(
                    "pixel array {data_id} is shared between layers"
                )));
            };
            let slot = &mut slots[index];
            if let Pixels::Deferred { len } = slot.pixels {
                check_block_len(&slot.name, data.len(), len)?;
            }
            slot.pixels = Pixels::Bound(data);
        }

        deferred.sort_by_key(|&(position, _)| position);
        Ok(Self {
            width,
            height,
            slots,
            deferred: deferred.into_iter().map(|(_, index)| index).collect(),
        })
    }

    /// Consume the payload section, one memory block per deferred slot.
    pub fn bind_deferred<R: Read>(mut self, reader: &mut ByteReader<R>) -> Result<Self, DocumentError> {
        for index in std::mem::take(&mut self.deferred) {
            let slot = &mut self.slots[index];
            if let Pixels::Deferred { len } = slot.pixels {
                slot.pixels = Pixels::Bound(read_memory_block(reader, len)?);
            }
        }
        Ok(self)
    }

    /// Finish into a document with RGBA8 layers.
    ///
    /// A slot whose payload never arrived keeps a zero-filled buffer; only
    /// a caller that skipped `bind_deferred` can observe that.
    pub fn into_document(self) -> PdnDocument {
        let layers = self
            .slots
            .into_iter()
            .map(|slot| {
                let data = match slot.pixels {
                    Pixels::Bound(data) => data,
                    Pixels::Deferred { len } => vec![0; len],
                };
                Layer {
                    pixels: bgra_rows_to_rgba(&data, slot.width, slot.height, slot.stride),
                    name: slot.name,
                    x: 0,
                    y: 0,
                    width: slot.width,
                    height: slot.height,
                    opacity: slot.opacity,
                    blend_mode: slot.blend_mode,
                    visible: slot.visible,
                }
            })
            .collect();

        PdnDocument {
            width: self.width,
            height: self.height,
            layers,
            header: None,
            dirty: false,
        }
    }
}

/// Where a layer's pixel bytes live.
enum Block {
    /// Object id of the deferred memory block.
    Deferred(i32),
    /// Object id of the inline byte array.
    Stored(i32),
}

fn map_layer(graph: &ObjectGraph, layer: &ClassObject, kind: GraphKind) -> Result<(LayerSlot, Block), DocumentError> {
    let props = class_ref(graph, layer, "Layer+properties", class::LAYER_PROPERTIES)?;
    let name = text(graph, props, "name")?;
    let blend_mode = blend_mode(graph, layer)?;

    let surface = class_ref(graph, layer, "surface", class::SURFACE)?;
    let width = dimension(surface, "width")?;
    let height = dimension(surface, "height")?;
    check_canvas(width, height)?;
    if (dimension(layer, "Layer+width")?, dimension(layer, "Layer+height")?) != (width, height) {
        return Err(DocumentError::format(format!(
            "layer '{name}' disagrees with its {width}x{height} surface"
        )));
    }

    let stride = int(surface, "stride")?;
    let stride = usize::try_from(stride)
        .ok()
        .filter(|&stride| stride >= width as usize * 4)
        .ok_or_else(|| {
            DocumentError::format(format!("layer '{name}' has stride {stride} for width {width}"))
        })?;
    let len = stride
        .checked_mul(height as usize)
        .ok_or_else(|| DocumentError::format(format!("layer '{name}' is too large")))?;

    let scan0 = class_ref(graph, surface, "scan0", class::MEMORY_BLOCK)?;
    let declared = long(scan0, "length64")?;
    if u64::try_from(declared).ok() != Some(len as u64) {
        return Err(DocumentError::format(format!(
            "layer '{name}' memory block holds {declared} bytes, surface needs {len}"
        )));
    }
    if flag(scan0, "hasParent")? {
        return Err(DocumentError::format(format!(
            "layer '{name}' borrows memory from a parent block"
        )));
    }

    let is_deferred = match scan0.member("deferred") {
        Some(_) => flag(scan0, "deferred")?,
        None => false,
    };
    let block = if is_deferred {
        if kind == GraphKind::Legacy {
            return Err(DocumentError::format("deferred memory block inside a compressed graph"));
        }
        let Some(id) = ref_id(graph, surface, "scan0") else {
            return Err(DocumentError::format("surface memory block is not a reference"));
        };
        Block::Deferred(id)
    } else {
        match member(scan0, "pointerData")? {
            Value::Ref(id) if matches!(graph.get(*id), Some(Object::Bytes(_))) => Block::Stored(*id),
            _ => {
                return Err(DocumentError::format(format!(
                    "layer '{name}' memory block has no pixel bytes"
                )));
            }
        }
    };

    let slot = LayerSlot {
        opacity: byte(props, "opacity")?,
        visible: flag(props, "visible")?,
        blend_mode,
        width,
        height,
        stride,
        pixels: Pixels::Deferred { len },
        name,
    };
    Ok((slot, block))
}

/// Missing or null blend properties mean normal blending.
fn blend_mode(graph: &ObjectGraph, layer: &ClassObject) -> Result<BlendMode, DocumentError> {
    if matches!(layer.member("properties"), None | Some(Value::Null)) {
        return Ok(BlendMode::Normal);
    }
    let props = class_ref(graph, layer, "properties", class::BITMAP_LAYER_PROPERTIES)?;
    let op = match member(props, "blendOp")? {
        Value::Null => return Ok(BlendMode::Normal),
        Value::Ref(id) => match graph.get(*id) {
            Some(Object::Class(op)) => op.name(),
            _ => return Err(DocumentError::format("blend op is not an object")),
        },
        Value::Primitive(_) => return Err(DocumentError::format("blend op is not an object")),
    };
    BlendMode::from_class_name(op).ok_or_else(|| DocumentError::UnsupportedType {
        kind: "blend op",
        name: op.to_string(),
    })
}

/// Item ids of a layer list, in bottom-to-top order.
fn layer_ids(graph: &ObjectGraph, list: &ClassObject) -> Result<Vec<i32>, DocumentError> {
    let size = int(list, "ArrayList+_size")?;
    let items = match member(list, "ArrayList+_items")? {
        Value::Ref(id) => match graph.get(*id) {
            Some(Object::Array(items)) => items,
            _ => return Err(DocumentError::format("layer list items are not an array")),
        },
        Value::Null if size == 0 => return Ok(Vec::new()),
        _ => return Err(DocumentError::format("layer list has no items")),
    };
    let size = usize::try_from(size)
        .ok()
        .filter(|&size| size <= items.len())
        .ok_or_else(|| {
            DocumentError::format(format!("layer list size {size} exceeds {} items", items.len()))
        })?;

    items[..size]
        .iter()
        .map(|item| match item {
            Value::Ref(id) => Ok(*id),
            _ => Err(DocumentError::format("layer list entry is not a layer")),
        })
        .collect()
}

/// Canvases beyond the output format's limit are rejected before any
/// buffer is sized from them.
fn check_canvas(width: u32, height: u32) -> Result<(), DocumentError> {
    let within_limit = width <= MAX_DIMENSION && height <= MAX_DIMENSION;
    let fits = (width as usize)
        .checked_mul(height as usize)
        .and_then(|area| area.checked_mul(4))
        .is_some();
    if !(within_limit && fits) {
        return Err(DocumentError::format(format!(
            "{width}x{height} canvas exceeds the {MAX_DIMENSION} pixel limit"
        )));
    }
    Ok(())
}

fn check_block_len(name: &str, actual: usize, expected: usize) -> Result<(), DocumentError> {
    if actual != expected {
        return Err(DocumentError::format(format!(
            "layer '{name}' carries {actual} pixel bytes (expected {expected})"
        )));
    }
    Ok(())
}

/// Surface rows are straight BGRA, possibly padded past `width * 4`.
fn bgra_rows_to_rgba(data: &[u8], width: u32, height: u32, stride: usize) -> Vec<u8> {
    let row_len = width as usize * 4;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in data.chunks(stride.max(1)).take(height as usize) {
        for px in row[..row_len].chunks_exact(4) {
            pixels.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
    }
    pixels
}

// ============================================================================
// Member access
// ============================================================================

fn member<'a>(owner: &'a ClassObject, name: &str) -> Result<&'a Value, DocumentError> {
    owner
        .member(name)
        .ok_or_else(|| DocumentError::format(format!("{} has no member {name}", owner.name())))
}

fn mistyped(owner: &ClassObject, name: &str, expected: &str) -> DocumentError {
    DocumentError::format(format!("{}.{name} is not {expected}", owner.name()))
}

fn int(owner: &ClassObject, name: &str) -> Result<i32, DocumentError> {
    match member(owner, name)? {
        Value::Primitive(Primitive::Int32(value)) => Ok(*value),
        _ => Err(mistyped(owner, name, "an Int32")),
    }
}

fn long(owner: &ClassObject, name: &str) -> Result<i64, DocumentError> {
    match member(owner, name)? {
        Value::Primitive(Primitive::Int64(value)) => Ok(*value),
        _ => Err(mistyped(owner, name, "an Int64")),
    }
}

fn flag(owner: &ClassObject, name: &str) -> Result<bool, DocumentError> {
    match member(owner, name)? {
        Value::Primitive(Primitive::Boolean(value)) => Ok(*value),
        _ => Err(mistyped(owner, name, "a Boolean")),
    }
}

fn byte(owner: &ClassObject, name: &str) -> Result<u8, DocumentError> {
    match member(owner, name)? {
        Value::Primitive(Primitive::Byte(value)) => Ok(*value),
        _ => Err(mistyped(owner, name, "a Byte")),
    }
}

fn dimension(owner: &ClassObject, name: &str) -> Result<u32, DocumentError> {
    let value = int(owner, name)?;
    u32::try_from(value)
        .map_err(|_| DocumentError::format(format!("{}.{name} is negative ({value})", owner.name())))
}

/// String member; null reads as empty.
fn text(graph: &ObjectGraph, owner: &ClassObject, name: &str) -> Result<String, DocumentError> {
    match member(owner, name)? {
        Value::Null => Ok(String::new()),
        Value::Primitive(Primitive::String(value)) => Ok(value.clone()),
        Value::Ref(id) => match graph.get(*id) {
            Some(Object::String(value)) => Ok(value.clone()),
            _ => Err(mistyped(owner, name, "a string")),
        },
        Value::Primitive(_) => Err(mistyped(owner, name, "a string")),
    }
}

fn ref_id(graph: &ObjectGraph, owner: &ClassObject, name: &str) -> Option<i32> {
    match owner.member(name)? {
        Value::Ref(id) if graph.get(*id).is_some() => Some(*id),
        _ => None,
    }
}

fn class_at<'g>(graph: &'g ObjectGraph, id: i32, expected: &str, what: &str) -> Result<&'g ClassObject, DocumentError> {
    match graph.get(id) {
        Some(Object::Class(class)) if class.name() == expected => Ok(class),
        Some(Object::Class(class)) => Err(DocumentError::format(format!(
            "{what} is {}, expected {expected}",
            class.name()
        ))),
        Some(_) => Err(DocumentError::format(format!("{what} is not an object"))),
        None => Err(DocumentError::format(format!("{what} refers to undefined object {id}"))),
    }
}

/// Follow a reference member to a class instance named `expected`.
fn class_ref<'g>(
    graph: &'g ObjectGraph,
    owner: &ClassObject,
    name: &str,
    expected: &str,
) -> Result<&'g ClassObject, DocumentError> {
    let what = format!("{}.{name}", owner.name());
    match member(owner, name)? {
        Value::Ref(id) => class_at(graph, *id, expected, &what),
        _ => Err(DocumentError::format(format!("{what} is not an object reference"))),
    }
}

// ============================================================================
// Deferred payloads
// ============================================================================

/// Read one memory block payload and reassemble it to exactly `len` bytes.
fn read_memory_block<R: Read>(reader: &mut ByteReader<R>, len: usize) -> Result<Vec<u8>, DocumentError> {
    let compressed = match reader.u8("memory block")? {
        block_format::GZIP => true,
        block_format::RAW => false,
        other => return Err(DocumentError::unsupported("memory block format", other)),
    };
    let chunk_size = reader.u32_be("memory block")? as usize;
    if chunk_size == 0 {
        return Err(DocumentError::format("memory block chunk size is zero"));
    }

    let chunk_count = len.div_ceil(chunk_size);
    // Sized as chunks land; a lying length cannot force one big allocation
    let mut data = Vec::new();
    let mut seen = HashSet::new();
    for _ in 0..chunk_count {
        let number = reader.u32_be("memory block chunk")? as usize;
        if number >= chunk_count {
            return Err(DocumentError::format(format!(
                "chunk {number} of a {chunk_count}-chunk memory block"
            )));
        }
        if !seen.insert(number) {
            return Err(DocumentError::format(format!("chunk {number} appears twice")));
        }
        let stored_len = reader.u32_be("memory block chunk")? as usize;
        let stored = reader.bytes(stored_len, "memory block chunk")?;

        let offset = number * chunk_size;
        let expected = chunk_size.min(len - offset);
        let chunk = if compressed {
            let mut chunk = Vec::with_capacity(expected.min(1 << 24));
            // One extra byte exposes payloads longer than declared.
            GzDecoder::new(&stored[..])
                .take(expected as u64 + 1)
                .read_to_end(&mut chunk)
                .map_err(|e| DocumentError::from_io(e, "memory block chunk"))?;
            chunk
        } else {
            stored
        };
        if chunk.len() != expected {
            return Err(DocumentError::format(format!(
                "chunk {number} holds {} bytes, expected {expected}",
                chunk.len()
            )));
        }

        if data.len() < offset + expected {
            data.resize(offset + expected, 0);
        }
        data[offset..offset + expected].copy_from_slice(&chunk);
    }
    Ok(data)
}
