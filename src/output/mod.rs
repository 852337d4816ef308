//! Output naming and placement.
//!
//! ```text
//! car_<id><suffix>.tga         paint
//! car_num_<id><suffix>.tga     paint, custom number enabled
//! car_spec_<id><suffix>.tga    spec map
//! ```
//!
//! The output directory is configured explicitly, or derived from the paint
//! source: a `paintconfig.json` next to it (or one level up) may name the
//! simulator's paint folder.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::OutputConfig;
use crate::core::Role;

/// Extension of every produced file.
pub const OUTPUT_EXTENSION: &str = "tga";

const PAINT_CONFIG_FILE: &str = "paintconfig.json";

/// Inputs that fully determine an output file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamingContext<'a> {
    pub id: u32,
    pub role: Role,
    pub custom_number: bool,
    pub suffix: &'a str,
}

impl NamingContext<'_> {
    pub fn file_name(&self) -> String {
        format!(
            "car_{}{}{}.{OUTPUT_EXTENSION}",
            self.role.infix(self.custom_number),
            self.id,
            self.suffix
        )
    }
}

/// Resolved output settings, snapshotted per conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub dir: PathBuf,
    pub id: u32,
    pub custom_number: bool,
    pub suffix: String,
}

impl Placement {
    /// Resolve the output directory for `config`.
    ///
    /// Precedence: configured `dir`, then discovery from the paint source,
    /// then the current directory.
    pub fn resolve(config: &OutputConfig, paint_source: Option<&Path>) -> Self {
        let dir = config
            .dir
            .clone()
            .or_else(|| paint_source.and_then(discover_output_dir))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            dir,
            id: config.id,
            custom_number: config.custom_number,
            suffix: config.suffix.clone(),
        }
    }

    pub fn naming(&self, role: Role) -> NamingContext<'_> {
        NamingContext {
            id: self.id,
            role,
            custom_number: self.custom_number,
            suffix: &self.suffix,
        }
    }

    pub fn output_path(&self, role: Role) -> PathBuf {
        self.dir.join(self.naming(role).file_name())
    }

    /// Where the custom-numbered paint for the current id lives.
    pub fn custom_number_path(&self) -> PathBuf {
        let naming = NamingContext {
            custom_number: true,
            ..self.naming(Role::Paint)
        };
        self.dir.join(naming.file_name())
    }
}

/// React to a settings change.
///
/// Turning the custom number off removes the custom-numbered paint, so the
/// simulator falls back to its own number. Returns the deleted path.
pub fn on_custom_number_change(old: &Placement, new: &Placement) -> io::Result<Option<PathBuf>> {
    if !old.custom_number || new.custom_number {
        return Ok(None);
    }

    let path = new.custom_number_path();
    match fs::remove_file(&path) {
        Ok(()) => Ok(Some(path)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Deserialize)]
struct PaintConfig {
    #[serde(rename = "IRacingPath")]
    iracing_path: Option<PathBuf>,
}

/// Output directory for a paint source.
///
/// The source's directory, unless a `paintconfig.json` there (or in its
/// parent) names an existing folder.
pub fn discover_output_dir(source: &Path) -> Option<PathBuf> {
    let dir = source.parent()?;

    let config_file = [Some(dir), dir.parent()]
        .into_iter()
        .flatten()
        .map(|d| d.join(PAINT_CONFIG_FILE))
        .find(|p| p.is_file());

    if let Some(config_file) = config_file
        && let Some(target) = read_paint_config(&config_file)
    {
        return Some(target);
    }
    Some(dir.to_path_buf())
}

fn read_paint_config(path: &Path) -> Option<PathBuf> {
    let content = fs::read_to_string(path).ok()?;
    let config: PaintConfig = match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            crate::debug!("output"; "ignoring {}: {}", path.display(), e);
            return None;
        }
    };
    config
        .iracing_path
        .filter(|p| !p.as_os_str().is_empty() && p.is_dir())
}

/// Write `bytes` to `path` through a temp file in the same directory.
///
/// Readers of `path` see either the old file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".paint-refresher-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
