//! Conversion error types.

use std::io;

use thiserror::Error;

use crate::document::DocumentError;
use crate::raster::EncodeError;

/// Failure of one conversion attempt.
///
/// Raised at the per-role conversion boundary; the watch loop logs it and
/// keeps polling.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("{kind} rasterizer failed: {message}")]
    Rasterize { kind: &'static str, message: String },

    #[error("`{0}` not found in PATH, install it to convert this format")]
    ToolMissing(&'static str),

    #[error("`{tool}` failed: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("decoded image is unreadable: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConvertError {
    pub fn rasterize(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Rasterize {
            kind,
            message: message.into(),
        }
    }
}
