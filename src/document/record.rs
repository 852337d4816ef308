//! Records of the binary object graph (MS-NRBF).
//!
//! Every record starts with a one-byte type tag. The set below is closed: a
//! tag outside it means the graph was written by a serializer revision we do
//! not understand, and decoding stops with `UnsupportedVersion`.
//!
//! | tag | record                           | payload                                   |
//! |-----|----------------------------------|-------------------------------------------|
//! | 0   | `SerializedStreamHeader`         | root id, header id, major, minor (i32)    |
//! | 1   | `ClassWithId`                    | object id, metadata id, member values     |
//! | 2   | `SystemClassWithMembers`         | class info, member values                 |
//! | 3   | `ClassWithMembers`               | class info, library id, member values     |
//! | 4   | `SystemClassWithMembersAndTypes` | class info, member types, member values   |
//! | 5   | `ClassWithMembersAndTypes`       | class info, member types, library id, ... |
//! | 6   | `BinaryObjectString`             | object id, string                         |
//! | 7   | `BinaryArray`                    | object id, shape, element type, elements  |
//! | 8   | `MemberPrimitiveTyped`           | primitive type, value                     |
//! | 9   | `MemberReference`                | referenced object id                      |
//! | 10  | `ObjectNull`                     | -                                         |
//! | 11  | `MessageEnd`                     | -                                         |
//! | 12  | `BinaryLibrary`                  | library id, assembly name                 |
//! | 13  | `ObjectNullMultiple256`          | count u8                                  |
//! | 14  | `ObjectNullMultiple`             | count i32                                 |
//! | 15  | `ArraySinglePrimitive`           | object id, length, primitive type, values |
//! | 16  | `ArraySingleObject`              | object id, length, element records        |
//! | 17  | `ArraySingleString`              | object id, length, element records        |
//!
//! Strings are UTF-8 behind a 7-bit variable-length byte count.

use std::io::{self, Read, Write};

use super::DocumentError;
use super::reader::ByteReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RecordType {
    SerializedStreamHeader,
    ClassWithId,
    SystemClassWithMembers,
    ClassWithMembers,
    SystemClassWithMembersAndTypes,
    ClassWithMembersAndTypes,
    BinaryObjectString,
    BinaryArray,
    MemberPrimitiveTyped,
    MemberReference,
    ObjectNull,
    MessageEnd,
    BinaryLibrary,
    ObjectNullMultiple256,
    ObjectNullMultiple,
    ArraySinglePrimitive,
    ArraySingleObject,
    ArraySingleString,
}

impl RecordType {
    const ALL: [Self; 18] = [
        Self::SerializedStreamHeader,
        Self::ClassWithId,
        Self::SystemClassWithMembers,
        Self::ClassWithMembers,
        Self::SystemClassWithMembersAndTypes,
        Self::ClassWithMembersAndTypes,
        Self::BinaryObjectString,
        Self::BinaryArray,
        Self::MemberPrimitiveTyped,
        Self::MemberReference,
        Self::ObjectNull,
        Self::MessageEnd,
        Self::BinaryLibrary,
        Self::ObjectNullMultiple256,
        Self::ObjectNullMultiple,
        Self::ArraySinglePrimitive,
        Self::ArraySingleObject,
        Self::ArraySingleString,
    ];

    pub fn read<R: Read>(reader: &mut ByteReader<R>) -> Result<Self, DocumentError> {
        let tag = reader.u8("record tag")?;
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or(DocumentError::unsupported("record", tag))
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Type of an inline primitive value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Decimal,
    Double,
    Int16,
    Int32,
    Int64,
    SByte,
    Single,
    TimeSpan,
    DateTime,
    UInt16,
    UInt32,
    UInt64,
    Null,
    String,
}

impl PrimitiveType {
    pub fn from_tag(tag: u8) -> Result<Self, DocumentError> {
        Ok(match tag {
            1 => Self::Boolean,
            2 => Self::Byte,
            3 => Self::Char,
            // 4 is unused
            5 => Self::Decimal,
            6 => Self::Double,
            7 => Self::Int16,
            8 => Self::Int32,
            9 => Self::Int64,
            10 => Self::SByte,
            11 => Self::Single,
            12 => Self::TimeSpan,
            13 => Self::DateTime,
            14 => Self::UInt16,
            15 => Self::UInt32,
            16 => Self::UInt64,
            17 => Self::Null,
            18 => Self::String,
            other => return Err(DocumentError::unsupported("primitive type", other)),
        })
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Boolean => 1,
            Self::Byte => 2,
            Self::Char => 3,
            Self::Decimal => 5,
            Self::Double => 6,
            Self::Int16 => 7,
            Self::Int32 => 8,
            Self::Int64 => 9,
            Self::SByte => 10,
            Self::Single => 11,
            Self::TimeSpan => 12,
            Self::DateTime => 13,
            Self::UInt16 => 14,
            Self::UInt32 => 15,
            Self::UInt64 => 16,
            Self::Null => 17,
            Self::String => 18,
        }
    }

    pub fn read<R: Read>(reader: &mut ByteReader<R>) -> Result<Self, DocumentError> {
        Self::from_tag(reader.u8("primitive type")?)
    }
}

/// An inline primitive value.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Primitive {
    Boolean(bool),
    Byte(u8),
    SByte(i8),
    Char(char),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    /// Decimals travel as their invariant-culture text.
    Decimal(String),
    TimeSpan(i64),
    DateTime(u64),
    String(String),
    Null,
}

impl Primitive {
    pub fn read<R: Read>(reader: &mut ByteReader<R>, kind: PrimitiveType) -> Result<Self, DocumentError> {
        const WHAT: &str = "primitive value";
        Ok(match kind {
            PrimitiveType::Boolean => match reader.u8(WHAT)? {
                0 => Self::Boolean(false),
                1 => Self::Boolean(true),
                other => {
                    return Err(DocumentError::format(format!(
                        "boolean must be 0 or 1, found {other}"
                    )));
                }
            },
            PrimitiveType::Byte => Self::Byte(reader.u8(WHAT)?),
            PrimitiveType::SByte => Self::SByte(reader.u8(WHAT)? as i8),
            PrimitiveType::Char => Self::Char(read_char(reader)?),
            PrimitiveType::Int16 => Self::Int16(reader.u16(WHAT)? as i16),
            PrimitiveType::UInt16 => Self::UInt16(reader.u16(WHAT)?),
            PrimitiveType::Int32 => Self::Int32(reader.i32(WHAT)?),
            PrimitiveType::UInt32 => Self::UInt32(reader.u32(WHAT)?),
            PrimitiveType::Int64 => Self::Int64(reader.i64(WHAT)?),
            PrimitiveType::UInt64 => Self::UInt64(reader.u64(WHAT)?),
            PrimitiveType::Single => Self::Single(f32::from_bits(reader.u32(WHAT)?)),
            PrimitiveType::Double => Self::Double(f64::from_bits(reader.u64(WHAT)?)),
            PrimitiveType::Decimal => Self::Decimal(reader.prefixed_string(WHAT)?),
            PrimitiveType::TimeSpan => Self::TimeSpan(reader.i64(WHAT)?),
            PrimitiveType::DateTime => Self::DateTime(reader.u64(WHAT)?),
            PrimitiveType::String => Self::String(reader.prefixed_string(WHAT)?),
            PrimitiveType::Null => Self::Null,
        })
    }
}

/// One UTF-8 encoded character, 1 to 4 bytes.
fn read_char<R: Read>(reader: &mut ByteReader<R>) -> Result<char, DocumentError> {
    let first = reader.u8("char value")?;
    let len = match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => return Err(DocumentError::format("char value is not UTF-8")),
    };
    let mut buf = [first, 0, 0, 0];
    for slot in buf.iter_mut().take(len).skip(1) {
        *slot = reader.u8("char value")?;
    }
    std::str::from_utf8(&buf[..len])
        .ok()
        .and_then(|s| s.chars().next())
        .ok_or_else(|| DocumentError::format("char value is not UTF-8"))
}

/// Declared type of a class member or array element.
///
/// Only `Primitive` members are stored inline; everything else is a nested
/// record (often a reference to an object defined later in the stream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum MemberType {
    Primitive(PrimitiveType),
    String,
    Object,
    SystemClass(String),
    Class { name: String, library: i32 },
    ObjectArray,
    StringArray,
    PrimitiveArray(PrimitiveType),
}

impl MemberType {
    /// Binary type tags, in the order member type tables list them.
    pub const PRIMITIVE: u8 = 0;
    pub const STRING: u8 = 1;
    pub const OBJECT: u8 = 2;
    pub const SYSTEM_CLASS: u8 = 3;
    pub const CLASS: u8 = 4;
    pub const OBJECT_ARRAY: u8 = 5;
    pub const STRING_ARRAY: u8 = 6;
    pub const PRIMITIVE_ARRAY: u8 = 7;

    /// Read the additional info that follows a binary type tag.
    pub fn read<R: Read>(reader: &mut ByteReader<R>, tag: u8) -> Result<Self, DocumentError> {
        Ok(match tag {
            Self::PRIMITIVE => Self::Primitive(PrimitiveType::read(reader)?),
            Self::STRING => Self::String,
            Self::OBJECT => Self::Object,
            Self::SYSTEM_CLASS => Self::SystemClass(reader.prefixed_string("member type")?),
            Self::CLASS => Self::Class {
                name: reader.prefixed_string("member type")?,
                library: reader.i32("member type")?,
            },
            Self::OBJECT_ARRAY => Self::ObjectArray,
            Self::STRING_ARRAY => Self::StringArray,
            Self::PRIMITIVE_ARRAY => Self::PrimitiveArray(PrimitiveType::read(reader)?),
            other => return Err(DocumentError::unsupported("member type", other)),
        })
    }
}

/// Class name and member layout, shared by every instance of the class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ClassMeta {
    pub name: String,
    pub members: Vec<(String, MemberType)>,
}

impl ClassMeta {
    /// Read class info and, when `typed`, the member type table.
    ///
    /// Untyped classes declare every member as a nested record.
    pub fn read<R: Read>(reader: &mut ByteReader<R>, typed: bool) -> Result<(i32, Self), DocumentError> {
        let object_id = reader.i32("class info")?;
        let name = reader.prefixed_string("class name")?;
        let count = reader.i32("class info")?;
        let count = usize::try_from(count)
            .map_err(|_| DocumentError::format(format!("class {name} has {count} members")))?;

        let mut names = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            names.push(reader.prefixed_string("member name")?);
        }

        let members = if typed {
            let mut tags = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                tags.push(reader.u8("member type")?);
            }
            let mut members = Vec::with_capacity(count.min(64));
            for (name, tag) in names.into_iter().zip(tags) {
                members.push((name, MemberType::read(reader, tag)?));
            }
            members
        } else {
            names.into_iter().map(|name| (name, MemberType::Object)).collect()
        };

        Ok((object_id, Self { name, members }))
    }
}

/// Append a 7-bit length-prefixed UTF-8 string.
pub(super) fn write_prefixed_string<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > i32::MAX as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "string too long"));
    }
    let mut len = bytes.len();
    while len >= 0x80 {
        out.write_all(&[(len as u8 & 0x7f) | 0x80])?;
        len >>= 7;
    }
    out.write_all(&[len as u8])?;
    out.write_all(bytes)
}
