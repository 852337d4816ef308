//! Configuration management for `refresher.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # [watch] and [output]
//! ├── error          # ConfigError
//! ├── handle         # Global config handle with hot reload
//! ├── util           # Config file discovery
//! └── mod.rs         # RefresherConfig (this file)
//! ```
//!
//! A missing config file is not an error: defaults apply and CLI flags
//! fill in the rest.

mod error;
mod handle;
pub mod section;
mod util;

pub use error::ConfigError;
pub use handle::{cfg, init_config, reload_config};
pub use section::{OutputConfig, WatchConfig};

use section::REFRESH_RATE_RANGE;
use util::find_config_file;

use crate::{
    cli::{Cli, Commands},
    log,
    utils::path::expand_path,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing refresher.toml
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefresherConfig {
    /// CLI arguments reference (internal use only)
    #[serde(skip)]
    pub cli: Option<&'static Cli>,

    /// Absolute path to the config file, which may not exist
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Watched sources
    #[serde(default)]
    pub watch: WatchConfig,

    /// Output placement and naming
    #[serde(default)]
    pub output: OutputConfig,
}

impl RefresherConfig {
    /// Load configuration for the given CLI invocation.
    ///
    /// Searches upward from cwd for the config file. Relative paths in the
    /// file resolve against its directory; relative CLI paths against cwd.
    pub fn load(cli: &'static Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current working directory")?;

        let (config_path, mut config) = match find_config_file(&cli.config) {
            Some(path) => {
                let config = Self::from_path(&path)?;
                (path, config)
            }
            None => {
                crate::debug!("config"; "no {} found, using defaults", cli.config.display());
                (cwd.join(&cli.config), Self::default())
            }
        };

        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.clone());
        config.normalize_paths(&root);

        config.config_path = config_path;
        config.cli = Some(cli);
        config.apply_cli(cli, &cwd);
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    /// Unknown keys are usually typos; warn but keep going.
    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "ignoring unknown fields in {}: {}", display_path, fields.join(", "));
    }

    // ========================================================================
    // cli configuration updates
    // ========================================================================

    /// CLI flags override the file.
    fn apply_cli(&mut self, cli: &Cli, cwd: &Path) {
        crate::logger::set_verbose(cli.verbose);

        let resolve = |p: &PathBuf| expand_path(p, cwd);
        Self::update_option(&mut self.output.dir, cli.output.as_ref().map(resolve).as_ref());
        Self::update_option(&mut self.output.id, cli.id.as_ref());
        Self::update_option(&mut self.output.custom_number, cli.custom_number.as_ref());
        Self::update_option(&mut self.output.suffix, cli.suffix.as_ref());

        if let Commands::Watch {
            paint,
            spec,
            interval,
        } = &cli.command
        {
            Self::update_option(&mut self.watch.paint, paint.as_ref().map(resolve).as_ref());
            Self::update_option(&mut self.watch.spec, spec.as_ref().map(resolve).as_ref());
            Self::update_option(&mut self.watch.refresh_rate, interval.as_ref());
        }
    }

    /// Update config option if CLI value is provided.
    fn update_option<T: Clone + Into<U>, U>(config_option: &mut U, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone().into();
        }
    }

    // ========================================================================
    // path normalization
    // ========================================================================

    fn normalize_paths(&mut self, root: &Path) {
        for path in [
            &mut self.watch.paint,
            &mut self.watch.spec,
            &mut self.output.dir,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand_path(path, root);
        }
    }

    // ========================================================================
    // validation
    // ========================================================================

    /// Validate configuration, collecting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if !REFRESH_RATE_RANGE.contains(&self.watch.refresh_rate) {
            problems.push(format!(
                "watch.refresh_rate must be between {} and {} ms, got {}",
                REFRESH_RATE_RANGE.start(),
                REFRESH_RATE_RANGE.end(),
                self.watch.refresh_rate
            ));
        }
        if self.output.id == 0 {
            problems.push("output.id must be a positive customer id".to_string());
        }
        if self
            .output
            .suffix
            .chars()
            .any(|c| std::path::is_separator(c) || c.is_control())
        {
            problems.push(format!(
                "output.suffix {:?} must not contain path separators",
                self.output.suffix
            ));
        }
        if let Some(dir) = &self.output.dir
            && dir.is_file()
        {
            problems.push(format!("output.dir {} is a file", dir.display()));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems.join("; ")))
        }
    }
}

// ============================================================================
// Test Helpers (available to all modules via `use crate::config::test_*`)
// ============================================================================

/// Parse config from TOML.
/// Panics if there are unknown fields (to catch config typos in tests).
#[cfg(test)]
pub fn test_parse_config(content: &str) -> RefresherConfig {
    let (parsed, ignored) = RefresherConfig::parse_with_ignored(content).unwrap();
    assert!(
        ignored.is_empty(),
        "test config has unknown fields: {:?}",
        ignored
    );
    parsed
}
