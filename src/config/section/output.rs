//! `[output]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [output]
//! dir = "~/Documents/iRacing/paint/car"   # Defaults to the paint's folder
//! id = 999999                             # Customer id in the file name
//! custom_number = false                   # Write car_num_<id>.tga
//! suffix = ""                             # Appended after the id
//! ```

use std::path::PathBuf;

use serde::Deserialize;

/// Where and under which name outputs are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output directory. Unset: derived from the paint source.
    pub dir: Option<PathBuf>,

    /// Numeric customer id.
    pub id: u32,

    /// Paint carries its own number.
    pub custom_number: bool,

    /// Appended to the file stem, after the id.
    pub suffix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: None,
            id: 999_999,
            custom_number: false,
            suffix: String::new(),
        }
    }
}
