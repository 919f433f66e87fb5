//! Platform-specific directory management
//!
//! Environment variables can override default directories:
//! - `SUITEFORGE_CACHE_DIR` - build fingerprint cache
//! - `SUITEFORGE_CONFIG_DIR` - global `config.toml`
//! - `SUITEFORGE_DATA_DIR` - verified library downloads

use std::env;
use std::path::{Path, PathBuf};

pub const ENV_CACHE_DIR: &str = "SUITEFORGE_CACHE_DIR";
pub const ENV_CONFIG_DIR: &str = "SUITEFORGE_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "SUITEFORGE_DATA_DIR";

const APP_NAME: &str = "suiteforge";

const DOWNLOADS_SUBDIR: &str = "downloads";
const BUILD_CACHE_SUBDIR: &str = "build-cache";

/// Directory layout used by one invocation
#[derive(Debug, Clone)]
pub struct SuiteforgeDirs {
    cache_dir: PathBuf,
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl SuiteforgeDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_dir: resolve(ENV_CACHE_DIR, dirs::cache_dir, &[".cache"]),
            config_dir: resolve(ENV_CONFIG_DIR, dirs::config_dir, &[".config"]),
            data_dir: resolve(ENV_DATA_DIR, dirs::data_dir, &[".local", "share"]),
        }
    }

    /// Place every directory under one root (`<root>/cache`, `<root>/config`, `<root>/data`)
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            cache_dir: root.join("cache"),
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Verified library blobs, keyed by checksum
    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join(DOWNLOADS_SUBDIR)
    }

    /// Build fingerprint cache
    #[must_use]
    pub fn build_cache_dir(&self) -> PathBuf {
        self.cache_dir.join(BUILD_CACHE_SUBDIR)
    }

    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

impl Default for SuiteforgeDirs {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(var: &str, platform: fn() -> Option<PathBuf>, home_fallback: &[&str]) -> PathBuf {
    if let Ok(path) = env::var(var) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    platform().map_or_else(
        || {
            let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            home_fallback
                .iter()
                .fold(base, |acc, part| acc.join(part))
                .join(APP_NAME)
        },
        |p| p.join(APP_NAME),
    )
}
