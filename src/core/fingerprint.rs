//! Build fingerprints and the content-addressed build cache
//!
//! A fingerprint is a SHA-256 over everything that determines a node's
//! output: its identity, the environment, its input content and the
//! fingerprints of its direct dependencies. Because dependency
//! fingerprints are folded in, a change to one node changes the
//! fingerprint of every node that transitively depends on it and of no
//! other node.
//!
//! Cache entries live at `<root>/<fp[0..2]>/<fp>/` and hold an `output/`
//! tree plus `record.json`. The record is written last, so an interrupted
//! build never produces a hit.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::OwnedRwLockWriteGuard;

use crate::core::build_env::GENERATED_DIR;
use crate::core::graph::{NodeId, NodeKind};
use crate::core::platform::Environment;
use crate::error::FilesystemError;
use crate::infra::filesystem;
use crate::infra::keyed_lock::KeyedLocks;

const RECORD_FILE: &str = "record.json";
const OUTPUT_DIR: &str = "output";

/// Hex SHA-256 over a node's resolved inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulates fingerprint inputs
///
/// Every value is written as `key \0 value \0` so that adjacent fields
/// cannot run into each other.
pub struct FingerprintBuilder {
    hasher: Sha256,
}

impl FingerprintBuilder {
    pub fn new(node: &NodeId, kind: NodeKind, env: &Environment) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.field("node", node.as_str());
        builder.field("kind", &kind.to_string());
        builder.field("env", &env.to_string());
        builder
    }

    pub fn field(&mut self, key: &str, value: &str) -> &mut Self {
        self.hasher.update(key.as_bytes());
        self.hasher.update(b"\0");
        self.hasher.update(value.as_bytes());
        self.hasher.update(b"\0");
        self
    }

    /// Hash every file under `root`: sorted relative paths and their bytes
    ///
    /// A missing root contributes only its key.
    pub fn tree(&mut self, key: &str, root: &Path) -> Result<&mut Self, FilesystemError> {
        self.field("tree", key);
        for relative in filesystem::list_files(root)? {
            let path = if root.is_file() {
                root.to_path_buf()
            } else {
                root.join(&relative)
            };
            let content = filesystem::read_file(&path)?;
            self.field("path", &filesystem::to_slash(&relative));
            self.hasher.update((content.len() as u64).to_le_bytes());
            self.hasher.update(&content);
        }
        Ok(self)
    }

    pub fn dependency(&mut self, id: &NodeId, fingerprint: &Fingerprint) -> &mut Self {
        self.field("dep", id.as_str());
        self.field("fp", fingerprint.as_str())
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(hex::encode(self.hasher.finalize()))
    }
}

/// What a committed cache entry records about its build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub node: NodeId,
    pub kind: NodeKind,
    pub fingerprint: Fingerprint,
    /// Number of files in the output tree
    pub files: usize,
}

/// The fingerprint-keyed build cache
pub struct FingerprintCache {
    root: PathBuf,
    locks: KeyedLocks<Fingerprint>,
}

impl FingerprintCache {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: KeyedLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        let fp = fingerprint.as_str();
        self.root.join(&fp[..2.min(fp.len())]).join(fp)
    }

    pub fn output_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.entry_dir(fingerprint).join(OUTPUT_DIR)
    }

    /// The committed record for `fingerprint`, if any
    ///
    /// A record that cannot be read or that names another node is treated
    /// as a miss.
    pub async fn lookup(&self, node: &NodeId, fingerprint: &Fingerprint) -> Option<BuildRecord> {
        let _guard = self.locks.read(fingerprint).await;
        let path = self.entry_dir(fingerprint).join(RECORD_FILE);
        if !path.is_file() {
            return None;
        }
        let record: BuildRecord = match filesystem::read_file(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        {
            Some(record) => record,
            None => {
                tracing::warn!(path = %path.display(), "ignoring unreadable build record");
                return None;
            }
        };
        (record.node == *node && record.fingerprint == *fingerprint).then_some(record)
    }

    /// Start writing the entry for `fingerprint`
    ///
    /// Holds the entry's write lock until the returned value is committed
    /// or dropped. Any previous content of the entry is removed.
    pub async fn begin(
        &self,
        node: &NodeId,
        kind: NodeKind,
        fingerprint: &Fingerprint,
    ) -> Result<PendingEntry, FilesystemError> {
        let guard = self.locks.write(fingerprint).await;
        let dir = self.entry_dir(fingerprint);
        filesystem::remove_all(&dir)?;
        filesystem::create_dir_all(&dir.join(OUTPUT_DIR))?;
        Ok(PendingEntry {
            dir,
            record: BuildRecord {
                node: node.clone(),
                kind,
                fingerprint: fingerprint.clone(),
                files: 0,
            },
            _guard: guard,
        })
    }
}

/// A cache entry being built
pub struct PendingEntry {
    dir: PathBuf,
    record: BuildRecord,
    _guard: OwnedRwLockWriteGuard<()>,
}

impl PendingEntry {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.join(OUTPUT_DIR)
    }

    /// Write the record, making the entry visible to lookups
    ///
    /// Intermediate processor output is discarded; only `output/` is kept.
    pub fn commit(mut self) -> Result<BuildRecord, FilesystemError> {
        filesystem::remove_all(&self.dir.join(GENERATED_DIR))?;
        self.record.files = filesystem::list_files(&self.output_dir())?.len();
        let path = self.dir.join(RECORD_FILE);
        let json = serde_json::to_vec_pretty(&self.record).map_err(|e| {
            FilesystemError::WriteFile {
                path: path.clone(),
                error: e.to_string(),
            }
        })?;
        filesystem::write_file(&path, &json)?;
        Ok(self.record)
    }
}
