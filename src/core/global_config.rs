//! Global configuration management
//!
//! Reads settings from `config.toml` in the config directory. Every value
//! is optional; command-line flags take precedence over what is set here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::defaults;
use crate::error::ConfigError;
use crate::infra::dirs::SuiteforgeDirs;
use crate::registry::ConflictPolicy;

/// Global configuration for suiteforge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default build options
    #[serde(default)]
    pub build: BuildConfig,

    /// Download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// External build commands
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Extra roots searched for imported suites
    #[serde(default)]
    pub search: SearchConfig,
}

/// Default build options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Default number of parallel jobs
    pub jobs: Option<usize>,

    /// Cancel unstarted nodes after the first failure
    pub fail_fast: Option<bool>,

    /// `strict` or `latest`
    pub conflict_policy: Option<String>,

    /// Default JDK version class
    pub jdk: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    /// Base URL replacing Maven Central for coordinate-derived URLs
    pub maven_mirror: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Compile command (argv)
    pub compiler: Option<Vec<String>>,

    /// Annotation processor command (argv)
    pub processor: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub roots: Vec<PathBuf>,
}

impl GlobalConfig {
    /// Load global configuration from the config directory
    ///
    /// A missing file yields the default configuration.
    pub fn load(dirs: &SuiteforgeDirs) -> Result<Self, ConfigError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load global configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Save global configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError {
                path: parent.display().to_string(),
                error: e.to_string(),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        fs::write(path, content).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Effective number of build jobs
    #[must_use]
    pub fn build_jobs(&self) -> usize {
        self.build.jobs.filter(|&jobs| jobs > 0).unwrap_or_else(num_cpus::get)
    }

    /// Effective download retry count
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.download
            .max_retries
            .unwrap_or(defaults::MAX_DOWNLOAD_RETRIES)
    }

    /// Effective base backoff delay
    #[must_use]
    pub fn base_delay_ms(&self) -> u64 {
        self.download
            .base_delay_ms
            .unwrap_or(defaults::DOWNLOAD_BASE_DELAY_MS)
    }

    /// Parsed conflict policy, if configured
    pub fn conflict_policy(&self) -> Result<Option<ConflictPolicy>, ConfigError> {
        self.build
            .conflict_policy
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e: crate::error::RegistryError| ConfigError::ParseError {
                path: "[build] conflict_policy".to_string(),
                error: e.to_string(),
            })
    }
}
