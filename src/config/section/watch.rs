//! `[watch]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [watch]
//! paint = "~/paints/car.pdn"     # Paint source (.pdn, .psd, .svg)
//! spec = "~/paints/spec.psd"     # Spec map source
//! refresh_rate = 500             # Polling interval in milliseconds
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::Role;

/// Allowed polling interval, in milliseconds.
pub const REFRESH_RATE_RANGE: std::ops::RangeInclusive<u64> = 50..=60_000;

/// Watched sources and polling cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Paint source file.
    pub paint: Option<PathBuf>,

    /// Spec map source file.
    pub spec: Option<PathBuf>,

    /// Polling interval in milliseconds.
    pub refresh_rate: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paint: None,
            spec: None,
            refresh_rate: 500,
        }
    }
}

impl WatchConfig {
    pub fn source(&self, role: Role) -> Option<&PathBuf> {
        match role {
            Role::Paint => self.paint.as_ref(),
            Role::SpecMap => self.spec.as_ref(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.refresh_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_parse_config;

    #[test]
    fn test_watch_config() {
        let config = test_parse_config(
            "[watch]\npaint = \"car.pdn\"\nspec = \"spec.svg\"\nrefresh_rate = 250",
        );
        assert_eq!(config.watch.paint, Some(PathBuf::from("car.pdn")));
        assert_eq!(config.watch.source(Role::SpecMap), Some(&PathBuf::from("spec.svg")));
        assert_eq!(config.watch.interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_watch_config_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.watch, WatchConfig::default());
        assert_eq!(config.watch.refresh_rate, 500);
        assert!(config.watch.source(Role::Paint).is_none());
    }
}
