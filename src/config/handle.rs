//! Global config with atomic reload support.
//!
//! Uses `arc-swap` for lock-free reads and atomic config replacement, so
//! `refresher.toml` can be edited while the watcher runs.

use std::fs;
use std::io;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::{ConfigError, RefresherConfig};

/// Global config storage.
static CONFIG: LazyLock<ArcSwap<RefresherConfig>> =
    LazyLock::new(|| ArcSwap::from_pointee(RefresherConfig::default()));

/// Hash of the config file content last loaded; `None` while the file is absent.
static CONFIG_HASH: Mutex<Option<blake3::Hash>> = Mutex::new(None);

#[inline]
pub fn cfg() -> Arc<RefresherConfig> {
    CONFIG.load_full()
}

/// Reload config from disk if content changed.
///
/// Returns `Ok(true)` if config was updated, `Ok(false)` if unchanged. On
/// error the previous config stays in place.
pub fn reload_config() -> Result<bool> {
    let current = cfg();
    let Some(cli) = current.cli else {
        return Ok(false);
    };

    let new_hash = match fs::read(&current.config_path) {
        Ok(content) => Some(blake3::hash(&content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(ConfigError::Io(current.config_path.clone(), e).into()),
    };

    let mut hash = CONFIG_HASH.lock();
    if *hash == new_hash {
        return Ok(false);
    }

    let new_config = RefresherConfig::load(cli)?;
    CONFIG.store(Arc::new(new_config));
    *hash = new_hash;

    Ok(true)
}

#[inline]
pub fn init_config(config: RefresherConfig) -> Arc<RefresherConfig> {
    *CONFIG_HASH.lock() = fs::read(&config.config_path)
        .ok()
        .map(|content| blake3::hash(&content));

    let arc = Arc::new(config);
    CONFIG.store(Arc::clone(&arc));
    arc
}
