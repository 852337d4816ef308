//! Content fingerprints and modification times.
//!
//! The mtime is a cheap pre-filter; the blake3 content hash decides whether
//! a file really changed. Editors often rewrite files with identical bytes.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::time::SystemTime;

/// A 256-bit content hash (blake3 output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[inline]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash an in-memory buffer.
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 16 hex chars are plenty for log lines
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Hash file contents, streaming.
///
/// Errors are returned rather than mapped to a sentinel: a file locked
/// mid-save must read as "try again", never as "changed".
pub fn compute_file_hash(path: &Path) -> io::Result<ContentHash> {
    let file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(BufReader::with_capacity(64 * 1024, file))?;
    Ok(ContentHash::new(*hasher.finalize().as_bytes()))
}

/// Get the modification time of a file
pub fn get_mtime(path: &Path) -> io::Result<SystemTime> {
    path.metadata().and_then(|m| m.modified())
}
