//! Primitive reads with EOF classification.
//!
//! Graph fields are little-endian; deferred chunk headers are big-endian.

use std::io::Read;

use super::DocumentError;

/// Thin wrapper over a byte stream that labels every read.
///
/// Each read names what it was reading so a premature end of stream
/// surfaces as `Truncated("layer record")` rather than a bare IO error.
pub(super) struct ByteReader<R> {
    inner: R,
}

impl<R: Read> ByteReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    fn fill(&mut self, buf: &mut [u8], what: &'static str) -> Result<(), DocumentError> {
        self.inner
            .read_exact(buf)
            .map_err(|e| DocumentError::from_io(e, what))
    }

    pub fn u8(&mut self, what: &'static str) -> Result<u8, DocumentError> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf, what)?;
        Ok(buf[0])
    }

    pub fn u16(&mut self, what: &'static str) -> Result<u16, DocumentError> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf, what)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32, DocumentError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, what)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn i32(&mut self, what: &'static str) -> Result<i32, DocumentError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, what)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read exactly `len` bytes.
    ///
    /// Allocation grows with the bytes actually present, so a corrupt length
    /// field cannot force a huge up-front allocation.
    pub fn bytes(&mut self, len: usize, what: &'static str) -> Result<Vec<u8>, DocumentError> {
        let mut buf = Vec::with_capacity(len.min(1 << 20));
        (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| DocumentError::from_io(e, what))?;
        if buf.len() != len {
            return Err(DocumentError::Truncated(what));
        }
        Ok(buf)
    }

    pub fn i64(&mut self, what: &'static str) -> Result<i64, DocumentError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf, what)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn u64(&mut self, what: &'static str) -> Result<u64, DocumentError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf, what)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn u32_be(&mut self, what: &'static str) -> Result<u32, DocumentError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, what)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a string prefixed by a 7-bit variable-length byte count.
    ///
    /// The prefix is at most five bytes and the count must fit an `i32`.
    pub fn prefixed_string(&mut self, what: &'static str) -> Result<String, DocumentError> {
        let mut len: u64 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.u8(what)?;
            len |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                if len > i32::MAX as u64 {
                    break;
                }
                let bytes = self.bytes(len as usize, what)?;
                return String::from_utf8(bytes)
                    .map_err(|_| DocumentError::format(format!("{what} is not UTF-8")));
            }
        }
        Err(DocumentError::format(format!("{what} has a malformed length prefix")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_reads() {
        let data = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xff, 0xff, 0xff, 0xff];
        let mut reader = ByteReader::new(&data[..]);
        assert_eq!(reader.u8("a").unwrap(), 1);
        assert_eq!(reader.u16("b").unwrap(), 0x1234);
        assert_eq!(reader.u32("c").unwrap(), 0x1234_5678);
        assert_eq!(reader.i32("d").unwrap(), -1);
    }

    #[test]
    fn test_short_read_is_truncated() {
        let data = [0x01, 0x02];
        let mut reader = ByteReader::new(&data[..]);
        assert!(matches!(
            reader.u32("layer width"),
            Err(DocumentError::Truncated("layer width"))
        ));
    }

    #[test]
    fn test_bytes_shorter_than_declared() {
        let data = [1u8, 2, 3];
        let mut reader = ByteReader::new(&data[..]);
        assert!(matches!(
            reader.bytes(10, "pixels"),
            Err(DocumentError::Truncated("pixels"))
        ));
    }

    #[test]
    fn test_wide_and_big_endian_reads() {
        let mut data = (-2i64).to_le_bytes().to_vec();
        data.extend_from_slice(&7u64.to_le_bytes());
        data.extend_from_slice(&[0, 0, 1, 0]);
        let mut reader = ByteReader::new(&data[..]);
        assert_eq!(reader.i64("a").unwrap(), -2);
        assert_eq!(reader.u64("b").unwrap(), 7);
        assert_eq!(reader.u32_be("c").unwrap(), 256);
    }

    #[test]
    fn test_prefixed_string() {
        let mut data = vec![5];
        data.extend_from_slice(b"Layer");
        let mut reader = ByteReader::new(&data[..]);
        assert_eq!(reader.prefixed_string("name").unwrap(), "Layer");
    }

    #[test]
    fn test_prefixed_string_multi_byte_length() {
        // 200 = 0b1_1001000 -> 0xc8 0x01
        let mut data = vec![0xc8, 0x01];
        data.extend_from_slice(&[b'x'; 200]);
        let mut reader = ByteReader::new(&data[..]);
        assert_eq!(reader.prefixed_string("name").unwrap().len(), 200);
    }

    #[test]
    fn test_prefixed_string_overlong_prefix() {
        let data = [0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        let mut reader = ByteReader::new(&data[..]);
        assert!(matches!(
            reader.prefixed_string("name"),
            Err(DocumentError::Format(_))
        ));
    }

    #[test]
    fn test_prefixed_string_invalid_utf8() {
        let data = [2, 0xff, 0xfe];
        let mut reader = ByteReader::new(&data[..]);
        assert!(matches!(
            reader.prefixed_string("name"),
            Err(DocumentError::Format(_))
        ));
    }
}
