//! Document decoding errors.

use std::io;
use thiserror::Error;

/// Errors raised while decoding a layered document.
///
/// `Truncated` and `Format` are deliberately distinct: a stream that ends
/// early is never reported as malformed.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unexpected end of document while reading {0}")]
    Truncated(&'static str),

    #[error("invalid document: {0}")]
    Format(String),

    #[error("unsupported {kind} tag {tag:#04x}")]
    UnsupportedVersion { kind: &'static str, tag: u8 },

    #[error("unsupported {kind} {name}")]
    UnsupportedType { kind: &'static str, name: String },

    #[error("IO error while reading document")]
    Io(#[source] io::Error),
}

impl DocumentError {
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub const fn unsupported(kind: &'static str, tag: u8) -> Self {
        Self::UnsupportedVersion { kind, tag }
    }

    /// Classify an IO error raised while reading `what`.
    ///
    /// Gzip streams report corrupt data as `InvalidInput`/`InvalidData`,
    /// which is a structural problem, not an IO failure.
    pub fn from_io(err: io::Error, what: &'static str) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::Truncated(what),
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
                Self::Format(format!("{what}: {err}"))
            }
            _ => Self::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_truncated() {
        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            DocumentError::from_io(err, "metadata"),
            DocumentError::Truncated("metadata")
        ));
    }

    #[test]
    fn test_invalid_data_maps_to_format() {
        let err = io::Error::new(io::ErrorKind::InvalidInput, "invalid gzip header");
        let mapped = DocumentError::from_io(err, "compressed graph");
        assert!(matches!(mapped, DocumentError::Format(_)));
        assert!(mapped.to_string().contains("invalid gzip header"));
    }

    #[test]
    fn test_other_io_kept() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "locked");
        assert!(matches!(
            DocumentError::from_io(err, "layer"),
            DocumentError::Io(_)
        ));
    }
}
