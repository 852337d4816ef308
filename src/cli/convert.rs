//! `convert` command: one synchronous refresh, no watching.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};

use crate::config::RefresherConfig;
use crate::convert::{ConversionRequest, Converter, Outcome, SourceKind};
use crate::core::Role;
use crate::logger::status_success;
use crate::output::Placement;
use crate::utils::path::expand_path;

/// Convert `path` for `role` and write the output.
pub fn convert_once(config: &RefresherConfig, path: &Path, role: Role) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let source = expand_path(path, &cwd);

    if !source.is_file() {
        bail!("{} is not a file", source.display());
    }
    if SourceKind::from_path(&source).is_none() {
        bail!(
            "unsupported file type: {} (expected .pdn, .psd or .svg)",
            source.display()
        );
    }

    // Without a configured directory the output lands next to this source.
    let paint_hint = match role {
        Role::Paint => Some(source.as_path()),
        Role::SpecMap => config.watch.paint.as_deref().or(Some(source.as_path())),
    };
    let request = ConversionRequest {
        role,
        source: source.clone(),
        output: Arc::new(Placement::resolve(&config.output, paint_hint)),
    };

    match Converter::default().refresh(&request)? {
        Outcome::Written(out) => {
            status_success(&format!("{role} written to {}", out.display()));
            Ok(())
        }
        Outcome::Skipped => bail!("nothing written for {}", source.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{self, Layer, Layout, PdnDocument};
    use std::fs;
    use tempfile::TempDir;

    fn config_for(dir: &Path) -> RefresherConfig {
        let mut config = RefresherConfig::default();
        config.output.dir = Some(dir.to_path_buf());
        config.output.id = 4242;
        config
    }

    #[test]
    fn test_convert_spec_map() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("spec.pdn");
        let doc = PdnDocument::new(1, 1).with_layer(Layer::from_pixels("a", 1, 1, vec![10, 20, 30, 255]));
        let mut bytes = Vec::new();
        document::write(&doc, Layout::Compressed, &mut bytes).unwrap();
        fs::write(&source, bytes).unwrap();

        convert_once(&config_for(dir.path()), &source, Role::SpecMap).unwrap();

        let out = fs::read(dir.path().join("car_spec_4242.tga")).unwrap();
        assert_eq!(&out[18..], &[30, 20, 10, 255]);
    }

    #[test]
    fn test_rejects_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("car.png");
        fs::write(&source, b"png").unwrap();

        let err = convert_once(&config_for(dir.path()), &source, Role::Paint).unwrap_err();
        assert!(err.to_string().contains("unsupported file type"));
    }

    #[test]
    fn test_rejects_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = convert_once(&config_for(dir.path()), &dir.path().join("nope.pdn"), Role::Paint)
            .unwrap_err();
        assert!(err.to_string().contains("is not a file"));
    }
}
