//! Magic prefix and embedded XML metadata block.
//!
//! ```text
//! "PDN3" | len: 3 bytes LE | len bytes of UTF-8 XML | container tag ...
//! ```
//!
//! Streams that do not start with the magic prefix are the legacy layout and
//! carry no metadata; the caller rewinds to the start in that case.

use std::io::{Read, Seek, SeekFrom, Write};

use quick_xml::{Reader, events::Event};

use super::DocumentError;
use super::reader::ByteReader;

/// Magic prefix announcing a metadata block.
pub const MAGIC: &[u8; 4] = b"PDN3";

/// Largest metadata block expressible with a 3-byte length.
pub const MAX_METADATA_LEN: usize = (1 << 24) - 1;

const ROOT_ELEMENT: &[u8] = b"pdnImage";

/// Side information carried by the `<pdnImage>` metadata element.
///
/// The object graph is authoritative; these values are informational.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentHeader {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub layers: Option<u32>,
    pub saved_with_version: Option<String>,
}

/// Read the optional magic + metadata prefix.
///
/// Leaves the stream positioned at the container tag bytes.
pub(super) fn read_header<R: Read + Seek>(
    stream: &mut R,
) -> Result<Option<DocumentHeader>, DocumentError> {
    let start = stream.stream_position().map_err(DocumentError::Io)?;

    let matched = {
        let mut reader = ByteReader::new(&mut *stream);
        let mut matched = true;
        for &expected in MAGIC {
            if reader.u8("magic bytes")? != expected {
                matched = false;
                break;
            }
        }
        matched
    };

    if !matched {
        stream
            .seek(SeekFrom::Start(start))
            .map_err(DocumentError::Io)?;
        return Ok(None);
    }

    let mut reader = ByteReader::new(stream);
    let b0 = reader.u8("metadata length")? as usize;
    let b1 = reader.u8("metadata length")? as usize;
    let b2 = reader.u8("metadata length")? as usize;
    let len = b0 + (b1 << 8) + (b2 << 16);

    let xml = reader.bytes(len, "metadata")?;
    parse_metadata(&xml).map(Some)
}

/// Parse the metadata XML.
///
/// An empty block is valid and yields an empty header. Anything else must be
/// well-formed XML rooted at `<pdnImage>`.
pub fn parse_metadata(xml: &[u8]) -> Result<DocumentHeader, DocumentError> {
    if xml.is_empty() {
        return Ok(DocumentHeader::default());
    }

    let text = std::str::from_utf8(xml)
        .map_err(|_| DocumentError::format("metadata is not UTF-8"))?;

    let mut reader = Reader::from_str(text);
    let mut header = None;
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(elem)) => {
                if depth == 0 {
                    header = Some(root_header(&elem)?);
                }
                depth += 1;
            }
            Ok(Event::Empty(elem)) => {
                if depth == 0 {
                    header = Some(root_header(&elem)?);
                }
            }
            Ok(Event::End(_)) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| DocumentError::format("metadata has an unmatched end tag"))?;
            }
            Ok(Event::Text(text)) if depth == 0 => {
                if !text.iter().all(u8::is_ascii_whitespace) {
                    return Err(DocumentError::format("metadata has text outside the root"));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(DocumentError::format(format!(
                    "metadata XML error at position {}: {e}",
                    reader.error_position()
                )));
            }
        }
    }

    if depth != 0 {
        return Err(DocumentError::format("metadata has an unclosed element"));
    }
    header.ok_or_else(|| DocumentError::format("metadata has no <pdnImage> root"))
}

fn root_header(elem: &quick_xml::events::BytesStart<'_>) -> Result<DocumentHeader, DocumentError> {
    if elem.name().as_ref() != ROOT_ELEMENT {
        return Err(DocumentError::format(format!(
            "metadata root is <{}>, expected <pdnImage>",
            String::from_utf8_lossy(elem.name().as_ref())
        )));
    }

    let mut header = DocumentHeader::default();
    for attr in elem.attributes() {
        let attr = attr.map_err(|e| DocumentError::format(format!("metadata attribute: {e}")))?;
        let value = std::str::from_utf8(&attr.value)
            .map_err(|_| DocumentError::format("metadata attribute is not UTF-8"))?;
        match attr.key.as_ref() {
            b"width" => header.width = value.trim().parse().ok(),
            b"height" => header.height = value.trim().parse().ok(),
            b"layers" => header.layers = value.trim().parse().ok(),
            b"savedWithVersion" => header.saved_with_version = Some(value.to_string()),
            _ => {}
        }
    }
    Ok(header)
}

/// Write the magic prefix and a `<pdnImage>` metadata block.
pub(super) fn write_header<W: Write>(out: &mut W, header: &DocumentHeader) -> std::io::Result<()> {
    let mut xml = String::from("<pdnImage");
    if let Some(width) = header.width {
        xml.push_str(&format!(" width=\"{width}\""));
    }
    if let Some(height) = header.height {
        xml.push_str(&format!(" height=\"{height}\""));
    }
    if let Some(layers) = header.layers {
        xml.push_str(&format!(" layers=\"{layers}\""));
    }
    if let Some(version) = &header.saved_with_version {
        xml.push_str(&format!(" savedWithVersion=\"{}\"", escape_attr(version)));
    }
    xml.push_str(" />");

    let len = xml.len();
    if len > MAX_METADATA_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "metadata block too large",
        ));
    }

    out.write_all(MAGIC)?;
    out.write_all(&[len as u8, (len >> 8) as u8, (len >> 16) as u8])?;
    out.write_all(xml.as_bytes())
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn with_metadata(xml: &[u8], rest: &[u8]) -> Vec<u8> {
        let mut data = MAGIC.to_vec();
        let len = xml.len();
        data.extend_from_slice(&[len as u8, (len >> 8) as u8, (len >> 16) as u8]);
        data.extend_from_slice(xml);
        data.extend_from_slice(rest);
        data
    }

    #[test]
    fn test_reads_metadata_attributes() {
        let xml = br#"<pdnImage width="64" height="32" layers="2" savedWithVersion="3.36"><custom /></pdnImage>"#;
        let mut stream = Cursor::new(with_metadata(xml, &[0, 1]));
        let header = read_header(&mut stream).unwrap().unwrap();
        assert_eq!(header.width, Some(64));
        assert_eq!(header.height, Some(32));
        assert_eq!(header.layers, Some(2));
        assert_eq!(header.saved_with_version.as_deref(), Some("3.36"));
        assert_eq!(stream.position() as usize, 4 + 3 + xml.len());
    }

    #[test]
    fn test_empty_metadata_is_valid() {
        let mut stream = Cursor::new(with_metadata(b"", &[0x1f, 0x8b]));
        let header = read_header(&mut stream).unwrap().unwrap();
        assert_eq!(header, DocumentHeader::default());
        assert_eq!(stream.position(), 7);
    }

    #[test]
    fn test_no_magic_rewinds() {
        let mut stream = Cursor::new(vec![0x1f, 0x8b, 0x08, 0x00, 0x00]);
        assert!(read_header(&mut stream).unwrap().is_none());
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_partial_magic_then_eof_is_truncated() {
        let mut stream = Cursor::new(b"PD".to_vec());
        assert!(matches!(
            read_header(&mut stream),
            Err(DocumentError::Truncated("magic bytes"))
        ));
    }

    #[test]
    fn test_missing_length_is_truncated() {
        let mut stream = Cursor::new(b"PDN3\x05".to_vec());
        assert!(matches!(
            read_header(&mut stream),
            Err(DocumentError::Truncated("metadata length"))
        ));
    }

    #[test]
    fn test_short_metadata_is_truncated() {
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(&[100, 0, 0]);
        data.extend_from_slice(b"<pdnImage");
        let mut stream = Cursor::new(data);
        assert!(matches!(
            read_header(&mut stream),
            Err(DocumentError::Truncated("metadata"))
        ));
    }

    #[test]
    fn test_three_byte_length_assembly() {
        // 0x010203 = 66051 bytes; only the length prefix matters here.
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(&[0x03, 0x02, 0x01]);
        let mut stream = Cursor::new(data);
        // No payload present at all
        assert!(matches!(
            read_header(&mut stream),
            Err(DocumentError::Truncated("metadata"))
        ));
    }

    #[test]
    fn test_garbage_metadata_is_format_error() {
        let mut stream = Cursor::new(with_metadata(b"\x00\x01 not xml at all", &[0, 1]));
        assert!(matches!(
            read_header(&mut stream),
            Err(DocumentError::Format(_))
        ));
    }

    #[test]
    fn test_wrong_root_is_format_error() {
        assert!(matches!(
            parse_metadata(b"<image width=\"1\"/>"),
            Err(DocumentError::Format(_))
        ));
    }

    #[test]
    fn test_unclosed_root_is_format_error() {
        assert!(matches!(
            parse_metadata(b"<pdnImage width=\"1\">"),
            Err(DocumentError::Format(_))
        ));
    }

    #[test]
    fn test_write_header_roundtrip() {
        let header = DocumentHeader {
            width: Some(8),
            height: Some(4),
            layers: Some(1),
            saved_with_version: Some("paint-refresher \"x\"".to_string()),
        };
        let mut out = Vec::new();
        write_header(&mut out, &header).unwrap();
        out.extend_from_slice(&[0, 1]);

        let mut stream = Cursor::new(out);
        let parsed = read_header(&mut stream).unwrap().unwrap();
        assert_eq!(parsed.width, Some(8));
        assert_eq!(parsed.height, Some(4));
        assert_eq!(parsed.layers, Some(1));
    }
}
