//! Where suite descriptors come from
//!
//! Suites are checked out side by side. A pinned import of `name` at
//! revision `rev` is looked up as `<root>/<name>@<rev>/suite.toml` first and
//! falls back to the plain `<root>/<name>/suite.toml` checkout.

use std::path::{Path, PathBuf};

use crate::config::defaults::SUITE_FILE;
use crate::core::descriptor::SuiteDescriptor;
use crate::error::RegistryError;

/// A descriptor together with the directory it was read from
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSuite {
    pub descriptor: SuiteDescriptor,
    /// Suite directory; `file:` layout sources and project dirs are relative to it
    pub dir: PathBuf,
}

/// Resolves a suite name and optional revision to a descriptor
pub trait SuiteSource {
    fn load(&self, name: &str, revision: Option<&str>) -> Result<LoadedSuite, RegistryError>;
}

/// Read and validate `<dir>/suite.toml`
pub fn load_suite_dir(dir: &Path) -> Result<LoadedSuite, RegistryError> {
    let path = dir.join(SUITE_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| RegistryError::IoError {
        path: path.clone(),
        error: e.to_string(),
    })?;
    let descriptor = SuiteDescriptor::from_toml(&content, &path)?;
    Ok(LoadedSuite {
        descriptor,
        dir: dir.to_path_buf(),
    })
}

/// Suite source searching sibling checkouts under a list of roots
#[derive(Debug, Clone, Default)]
pub struct DirectorySuiteSource {
    roots: Vec<PathBuf>,
}

impl DirectorySuiteSource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn candidates(&self, name: &str, revision: Option<&str>) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for root in &self.roots {
            if let Some(rev) = revision {
                dirs.push(root.join(format!("{name}@{rev}")));
            }
            dirs.push(root.join(name));
        }
        dirs
    }
}

impl SuiteSource for DirectorySuiteSource {
    fn load(&self, name: &str, revision: Option<&str>) -> Result<LoadedSuite, RegistryError> {
        let candidates = self.candidates(name, revision);
        let dir = candidates
            .iter()
            .find(|dir| dir.join(SUITE_FILE).is_file())
            .ok_or_else(|| RegistryError::SuiteNotFound {
                name: name.to_string(),
                searched: candidates.clone(),
            })?;

        tracing::debug!(suite = name, revision = ?revision, dir = %dir.display(), "loading suite");

        let loaded = load_suite_dir(dir)?;
        if loaded.descriptor.name != name {
            return Err(RegistryError::NameMismatch {
                path: dir.join(SUITE_FILE),
                expected: name.to_string(),
                found: loaded.descriptor.name,
            });
        }
        Ok(loaded)
    }
}
