//! Lock file handling
//!
//! The lock file (suites.lock) records the revision every suite resolved
//! to and the checksum of every library, for reproducible builds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{ConfigError, RegistryError};
use crate::registry::Registry;

const UNPINNED: &str = "<unpinned>";
const ABSENT: &str = "<absent>";

/// Lock file structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuitesLock {
    /// Lock file format version
    pub version: u32,

    /// Locked suites by name
    #[serde(default)]
    pub suites: BTreeMap<String, LockedSuite>,

    /// Library checksums by qualified name (`suite:library`)
    #[serde(default)]
    pub libraries: BTreeMap<String, String>,
}

/// A locked suite entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedSuite {
    /// Resolved revision; absent for entry points and unpinned imports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Suites importing this one
    #[serde(default)]
    pub importers: Vec<String>,
}

impl SuitesLock {
    pub fn new() -> Self {
        Self {
            version: 1,
            suites: BTreeMap::new(),
            libraries: BTreeMap::new(),
        }
    }

    /// Snapshot of a resolved registry
    pub fn from_registry(registry: &Registry) -> Self {
        let mut lock = Self::new();
        for suite in registry.suites() {
            lock.suites.insert(
                suite.name().to_string(),
                LockedSuite {
                    revision: suite.revision.clone(),
                    importers: suite.importers.clone(),
                },
            );
            for library in &suite.descriptor.libraries {
                if let Some(checksum) = library.checksum() {
                    lock.libraries
                        .insert(format!("{}:{}", suite.name(), library.name), checksum.to_string());
                }
            }
        }
        lock
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Read `path`, or `None` when it does not exist
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
            .map(Some)
            .map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                error: e.to_string(),
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml().map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        fs::write(path, content).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Check that `resolved` matches this lock
    ///
    /// Importer lists are informational and not compared.
    pub fn verify(&self, resolved: &Self) -> Result<(), RegistryError> {
        let revision = |lock: &Self, name: &str| -> String {
            match lock.suites.get(name) {
                Some(LockedSuite {
                    revision: Some(rev),
                    ..
                }) => rev.clone(),
                Some(_) => UNPINNED.to_string(),
                None => ABSENT.to_string(),
            }
        };
        for name in self.suites.keys().chain(resolved.suites.keys()) {
            let (locked, fresh) = (revision(self, name), revision(resolved, name));
            if locked != fresh {
                return Err(RegistryError::LockMismatch {
                    suite: name.clone(),
                    locked,
                    resolved: fresh,
                });
            }
        }

        let checksum = |lock: &Self, name: &str| {
            lock.libraries
                .get(name)
                .cloned()
                .unwrap_or_else(|| ABSENT.to_string())
        };
        for name in self.libraries.keys().chain(resolved.libraries.keys()) {
            let (locked, fresh) = (checksum(self, name), checksum(resolved, name));
            if locked != fresh {
                return Err(RegistryError::LockMismatch {
                    suite: name.clone(),
                    locked,
                    resolved: fresh,
                });
            }
        }
        Ok(())
    }
}

impl Default for SuitesLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConflictPolicy;
    use crate::test_utils::MemorySuiteSource;
    use tempfile::TempDir;

    const SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    fn registry(b_revision: &str) -> Registry {
        let src = MemorySuiteSource::new()
            .with(
                "A",
                None,
                &format!("name = \"A\"\n[[import]]\nname = \"B\"\nversion = \"{b_revision}\"\n"),
            )
            .with(
                "B",
                None,
                &format!(
                    "name = \"B\"\n[[library]]\nname = \"LIB\"\nurls = [\"https://example.com/lib.jar\"]\nsha1 = \"{SHA}\"\n"
                ),
            );
        Registry::load(vec![src.entry("A")], &src, ConflictPolicy::Strict).unwrap()
    }

    #[test]
    fn test_snapshot_records_revisions_and_checksums() {
        let lock = SuitesLock::from_registry(&registry("1.0"));
        assert_eq!(lock.suites["B"].revision.as_deref(), Some("1.0"));
        assert_eq!(lock.suites["B"].importers, vec!["A"]);
        assert_eq!(lock.suites["A"].revision, None);
        assert_eq!(lock.libraries["B:LIB"], format!("sha1:{SHA}"));
    }

    #[test]
    fn test_verify_detects_moved_revision() {
        let locked = SuitesLock::from_registry(&registry("1.0"));
        let fresh = SuitesLock::from_registry(&registry("1.1"));
        assert!(locked.verify(&locked.clone()).is_ok());
        match locked.verify(&fresh).unwrap_err() {
            RegistryError::LockMismatch {
                suite,
                locked,
                resolved,
            } => {
                assert_eq!(suite, "B");
                assert_eq!(locked, "1.0");
                assert_eq!(resolved, "1.1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("suites.lock");
        assert!(SuitesLock::load(&path).unwrap().is_none());

        let lock = SuitesLock::from_registry(&registry("2.0"));
        lock.save(&path).unwrap();
        assert_eq!(SuitesLock::load(&path).unwrap(), Some(lock));
    }
}
