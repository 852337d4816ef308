//! Binary object graph parsing.
//!
//! Reads one serialized message, from `SerializedStreamHeader` to
//! `MessageEnd`, into an arena of objects keyed by object id. Members that
//! point at other objects hold their id, so forward references resolve after
//! the whole message has been read. The arena also remembers the order in
//! which objects were first defined; deferred payloads follow that order.

use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use super::DocumentError;
use super::reader::ByteReader;
use super::record::{ClassMeta, MemberType, Primitive, PrimitiveType, RecordType};

/// Inline objects nested deeper than this are rejected.
const MAX_DEPTH: usize = 64;

/// Object arrays longer than this are rejected. Saved documents hold a
/// handful of entries; the cap keeps a null-run record from exploding.
const MAX_OBJECT_ARRAY_LEN: usize = 1 << 20;

/// A member or array element.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Value {
    Null,
    Primitive(Primitive),
    /// Id of an object in the arena.
    Ref(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct ClassObject {
    pub meta: Rc<ClassMeta>,
    pub values: Vec<Value>,
}

impl ClassObject {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        self.meta
            .members
            .iter()
            .position(|(member, _)| member == name)
            .map(|i| &self.values[i])
    }

    #[cfg(test)]
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(i) = self.meta.members.iter().position(|(member, _)| member == name) {
            self.values[i] = value;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Object {
    Class(ClassObject),
    String(String),
    /// Elements of an object, string or multi-dimensional array.
    Array(Vec<Value>),
    /// A single-dimensional byte array, kept as raw bytes.
    Bytes(Vec<u8>),
    Primitives(Vec<Primitive>),
}

/// A fully read message.
#[derive(Debug, Default)]
pub(super) struct ObjectGraph {
    pub root: i32,
    pub objects: HashMap<i32, Object>,
    /// Object ids in order of definition.
    pub order: Vec<i32>,
}

impl ObjectGraph {
    pub fn get(&self, id: i32) -> Option<&Object> {
        self.objects.get(&id)
    }

    /// Position of `id` in definition order.
    pub fn position(&self, id: i32) -> Option<usize> {
        self.order.iter().position(|&defined| defined == id)
    }
}

/// Read one message from `reader`.
pub(super) fn read_graph<R: Read>(reader: &mut ByteReader<R>) -> Result<ObjectGraph, DocumentError> {
    let mut parser = Parser {
        reader,
        classes: HashMap::new(),
        graph: ObjectGraph::default(),
        depth: 0,
    };
    parser.read_message()?;
    Ok(parser.graph)
}

enum Entry {
    Value(Value),
    Nulls(usize),
    End,
}

struct Parser<'a, R> {
    reader: &'a mut ByteReader<R>,
    /// Class layouts by the id of the object that first declared them.
    classes: HashMap<i32, Rc<ClassMeta>>,
    graph: ObjectGraph,
    depth: usize,
}

impl<R: Read> Parser<'_, R> {
    fn read_message(&mut self) -> Result<(), DocumentError> {
        match RecordType::read(self.reader)? {
            RecordType::SerializedStreamHeader => {}
            other => {
                return Err(DocumentError::format(format!(
                    "object graph starts with {other:?}, expected a stream header"
                )));
            }
        }
        let root = self.reader.i32("stream header")?;
        let _header_id = self.reader.i32("stream header")?;
        let major = self.reader.i32("stream header")?;
        let minor = self.reader.i32("stream header")?;
        if (major, minor) != (1, 0) {
            return Err(DocumentError::format(format!(
                "serialization format {major}.{minor}"
            )));
        }
        self.graph.root = root;

        loop {
            match RecordType::read(self.reader)? {
                RecordType::MessageEnd => break,
                RecordType::BinaryLibrary => self.skip_library()?,
                record if defines_object(record) => {
                    self.read_object(record)?;
                }
                other => {
                    return Err(DocumentError::format(format!(
                        "{other:?} record outside any object"
                    )));
                }
            }
        }

        if !self.graph.objects.contains_key(&root) {
            return Err(DocumentError::format(format!("root object {root} is never defined")));
        }
        Ok(())
    }

    /// Read the next value-bearing record, skipping library declarations.
    fn read_entry(&mut self) -> Result<Entry, DocumentError> {
        loop {
            let entry = match RecordType::read(self.reader)? {
                RecordType::BinaryLibrary => {
                    self.skip_library()?;
                    continue;
                }
                RecordType::MessageEnd => Entry::End,
                RecordType::ObjectNull => Entry::Nulls(1),
                RecordType::ObjectNullMultiple256 => Entry::Nulls(self.reader.u8("null run")? as usize),
                RecordType::ObjectNullMultiple => {
                    let count = self.reader.i32("null run")?;
                    Entry::Nulls(non_negative(count, "null run")?)
                }
                RecordType::MemberReference => Entry::Value(Value::Ref(self.reader.i32("reference")?)),
                RecordType::MemberPrimitiveTyped => {
                    let kind = PrimitiveType::read(self.reader)?;
                    Entry::Value(Value::Primitive(Primitive::read(self.reader, kind)?))
                }
                RecordType::SerializedStreamHeader => {
                    return Err(DocumentError::format("stream header inside the object graph"));
                }
                definition => Entry::Value(Value::Ref(self.read_object(definition)?)),
            };
            return Ok(entry);
        }
    }

    fn skip_library(&mut self) -> Result<(), DocumentError> {
        let _id = self.reader.i32("library")?;
        let _name = self.reader.prefixed_string("library name")?;
        Ok(())
    }

    fn read_object(&mut self, record: RecordType) -> Result<i32, DocumentError> {
        if self.depth >= MAX_DEPTH {
            return Err(DocumentError::format("object graph nested too deeply"));
        }
        self.depth += 1;
        let result = self.read_definition(record);
        self.depth -= 1;
        result
    }

    fn read_definition(&mut self, record: RecordType) -> Result<i32, DocumentError> {
        let (id, object) = match record {
            RecordType::BinaryObjectString => {
                let id = self.reader.i32("string record")?;
                (id, Object::String(self.reader.prefixed_string("string record")?))
            }
            RecordType::ClassWithId => {
                let id = self.reader.i32("class record")?;
                let metadata_id = self.reader.i32("class record")?;
                let meta = self.classes.get(&metadata_id).cloned().ok_or_else(|| {
                    DocumentError::format(format!("class layout {metadata_id} is never declared"))
                })?;
                (id, self.read_class(meta)?)
            }
            RecordType::SystemClassWithMembers
            | RecordType::ClassWithMembers
            | RecordType::SystemClassWithMembersAndTypes
            | RecordType::ClassWithMembersAndTypes => {
                let typed = matches!(
                    record,
                    RecordType::SystemClassWithMembersAndTypes | RecordType::ClassWithMembersAndTypes
                );
                let (id, meta) = ClassMeta::read(self.reader, typed)?;
                if matches!(record, RecordType::ClassWithMembers | RecordType::ClassWithMembersAndTypes) {
                    let _library = self.reader.i32("class record")?;
                }
                let meta = Rc::new(meta);
                self.classes.insert(id, Rc::clone(&meta));
                (id, self.read_class(meta)?)
            }
            RecordType::BinaryArray => self.read_binary_array()?,
            RecordType::ArraySinglePrimitive => {
                let id = self.reader.i32("array record")?;
                let len = self.array_len()?;
                let kind = PrimitiveType::read(self.reader)?;
                let object = if kind == PrimitiveType::Byte {
                    Object::Bytes(self.reader.bytes(len, "byte array")?)
                } else {
                    Object::Primitives(self.read_primitives(len, kind)?)
                };
                (id, object)
            }
            RecordType::ArraySingleObject | RecordType::ArraySingleString => {
                let id = self.reader.i32("array record")?;
                let len = self.array_len()?;
                (id, Object::Array(self.read_elements(len, &MemberType::Object)?))
            }
            other => {
                return Err(DocumentError::format(format!(
                    "{other:?} record where an object definition was expected"
                )));
            }
        };

        self.define(id, object)?;
        Ok(id)
    }

    fn read_class(&mut self, meta: Rc<ClassMeta>) -> Result<Object, DocumentError> {
        let count = meta.members.len();
        let mut values = Vec::with_capacity(count);
        while values.len() < count {
            match &meta.members[values.len()].1 {
                MemberType::Primitive(kind) => {
                    values.push(Value::Primitive(Primitive::read(self.reader, *kind)?));
                }
                _ => self.push_entry(&mut values, count, &meta.name)?,
            }
        }
        Ok(Object::Class(ClassObject { meta, values }))
    }

    fn read_binary_array(&mut self) -> Result<(i32, Object), DocumentError> {
        let id = self.reader.i32("array record")?;
        let shape = self.reader.u8("array shape")?;
        if shape > 5 {
            return Err(DocumentError::unsupported("array shape", shape));
        }
        let rank = self.reader.i32("array rank")?;
        let rank = non_negative(rank, "array rank")?;
        if rank == 0 || rank > 32 {
            return Err(DocumentError::format(format!("array rank {rank}")));
        }

        let mut len: usize = 1;
        for _ in 0..rank {
            let dim = self.array_len()?;
            len = len
                .checked_mul(dim)
                .ok_or_else(|| DocumentError::format("array size overflows"))?;
        }
        // Offset shapes carry one lower bound per dimension
        if shape >= 3 {
            for _ in 0..rank {
                let _bound = self.reader.i32("array bounds")?;
            }
        }

        let tag = self.reader.u8("array element type")?;
        let element = MemberType::read(self.reader, tag)?;
        let object = match element {
            MemberType::Primitive(PrimitiveType::Byte) if rank == 1 => {
                Object::Bytes(self.reader.bytes(len, "byte array")?)
            }
            MemberType::Primitive(kind) => Object::Primitives(self.read_primitives(len, kind)?),
            other => Object::Array(self.read_elements(len, &other)?),
        };
        Ok((id, object))
    }

    fn read_primitives(&mut self, len: usize, kind: PrimitiveType) -> Result<Vec<Primitive>, DocumentError> {
        // Grows with what is actually read
        let mut values = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            values.push(Primitive::read(self.reader, kind)?);
        }
        Ok(values)
    }

    fn read_elements(&mut self, len: usize, element: &MemberType) -> Result<Vec<Value>, DocumentError> {
        if len > MAX_OBJECT_ARRAY_LEN {
            return Err(DocumentError::format(format!("object array of {len} elements")));
        }
        let mut values = Vec::with_capacity(len.min(1024));
        while values.len() < len {
            match element {
                MemberType::Primitive(kind) => {
                    values.push(Value::Primitive(Primitive::read(self.reader, *kind)?));
                }
                _ => self.push_entry(&mut values, len, "array")?,
            }
        }
        Ok(values)
    }

    /// Read one nested record into `values`, expanding null runs.
    fn push_entry(&mut self, values: &mut Vec<Value>, len: usize, owner: &str) -> Result<(), DocumentError> {
        match self.read_entry()? {
            Entry::Value(value) => values.push(value),
            Entry::Nulls(count) => {
                if count == 0 || count > len - values.len() {
                    return Err(DocumentError::format(format!(
                        "null run of {count} overruns {owner}"
                    )));
                }
                values.resize(values.len() + count, Value::Null);
            }
            Entry::End => {
                return Err(DocumentError::format(format!("message ends inside {owner}")));
            }
        }
        Ok(())
    }

    fn array_len(&mut self) -> Result<usize, DocumentError> {
        let len = self.reader.i32("array length")?;
        non_negative(len, "array length")
    }

    fn define(&mut self, id: i32, object: Object) -> Result<(), DocumentError> {
        if self.graph.objects.insert(id, object).is_some() {
            return Err(DocumentError::format(format!("object {id} is defined twice")));
        }
        self.graph.order.push(id);
        Ok(())
    }
}

fn defines_object(record: RecordType) -> bool {
    matches!(
        record,
        RecordType::ClassWithId
            | RecordType::SystemClassWithMembers
            | RecordType::ClassWithMembers
            | RecordType::SystemClassWithMembersAndTypes
            | RecordType::ClassWithMembersAndTypes
            | RecordType::BinaryObjectString
            | RecordType::BinaryArray
            | RecordType::ArraySinglePrimitive
            | RecordType::ArraySingleObject
            | RecordType::ArraySingleString
    )
}

fn non_negative(value: i32, what: &str) -> Result<usize, DocumentError> {
    usize::try_from(value).map_err(|_| DocumentError::format(format!("negative {what} {value}")))
}
