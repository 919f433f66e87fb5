//! Error types for suiteforge
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Suite descriptor parsing and validation errors
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// Descriptor file could not be parsed
    #[error("Failed to parse suite descriptor '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Two entities in one suite share a name
    #[error("Suite '{suite}' declares '{name}' more than once")]
    DuplicateName { suite: String, name: String },

    /// Library without a checksum, or with more than one
    #[error("Library '{suite}:{library}' must declare exactly one of sha1 or sha256")]
    ChecksumRequired { suite: String, library: String },

    /// Library with neither urls nor maven coordinates
    #[error("Library '{suite}:{library}' has no urls and no maven coordinates")]
    NoLibrarySource { suite: String, library: String },

    /// Platform branch declared twice
    #[error("'{suite}:{entity}' declares the platform branch {os}/{arch} more than once")]
    DuplicatePlatform {
        suite: String,
        entity: String,
        os: String,
        arch: String,
    },

    /// Malformed layout source
    #[error("Invalid layout source '{source_spec}': {reason}")]
    InvalidLayoutSource { source_spec: String, reason: String },

    /// Malformed java compliance string
    #[error("Invalid java compliance '{value}' on '{suite}:{project}'")]
    InvalidCompliance {
        suite: String,
        project: String,
        value: String,
    },
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    #[error("Failed to remove '{path}': {error}")]
    Remove { path: PathBuf, error: String },

    #[error("Failed to write '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    #[error("Failed to read '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    #[error("Failed to copy '{from}' to '{to}': {error}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },

    #[error("Failed to walk '{path}': {error}")]
    Walk { path: PathBuf, error: String },
}

/// Suite registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No descriptor found for an imported suite
    #[error("Suite '{name}' not found (searched: {})", format_paths(searched))]
    SuiteNotFound { name: String, searched: Vec<PathBuf> },

    /// Descriptor file unreadable
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Descriptor invalid
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Descriptor declares a different name than requested
    #[error("Descriptor '{path}' declares suite '{found}', expected '{expected}'")]
    NameMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// Two importers pin the same suite at different revisions
    #[error(
        "Version conflict for suite '{suite}': '{first_importer}' requires {first_revision}, \
         '{second_importer}' requires {second_revision}"
    )]
    VersionConflict {
        suite: String,
        first_importer: String,
        first_revision: String,
        second_importer: String,
        second_revision: String,
    },

    /// Suite imports form a cycle
    #[error("Cyclic suite import: {}", cycle.join(" -> "))]
    CyclicImport { cycle: Vec<String> },

    /// Latest-wins resolution returned to an earlier assignment of revisions
    #[error("Suite revisions do not settle under latest-wins: {}", suites.join(", "))]
    Unsettled { suites: Vec<String> },

    /// No conflict policy was chosen for this invocation
    #[error(
        "No version conflict policy configured; pass --conflict-policy strict|latest, \
         set build.conflict_policy, or declare version_conflict_resolution in the primary suite"
    )]
    PolicyUnset,

    /// Unknown conflict policy name
    #[error("Unknown version conflict policy '{0}' (expected 'strict' or 'latest')")]
    UnknownPolicy(String),

    /// Resolution differs from the lock file
    #[error("Suite '{suite}' resolved to {resolved}, but suites.lock records {locked}")]
    LockMismatch {
        suite: String,
        locked: String,
        resolved: String,
    },
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Dependency graph construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Circular dependency detected
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Reference to an entity that does not exist
    #[error("Unknown reference '{reference}' in '{from}'")]
    UnknownReference { from: String, reference: String },

    /// Reference to an entity of the wrong kind
    #[error("Invalid reference '{reference}' in '{from}': {reason}")]
    InvalidReference {
        from: String,
        reference: String,
        reason: String,
    },

    /// Requested build target does not exist
    #[error("Unknown target '{0}'")]
    UnknownTarget(String),

    /// A bare target name exists in several suites
    #[error("Target '{target}' is ambiguous, qualify it as one of: {}", candidates.join(", "))]
    AmbiguousTarget {
        target: String,
        candidates: Vec<String>,
    },
}

/// Variant resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariantError {
    /// More than one overlay applies
    #[error(
        "Ambiguous overlays for '{target}' under {environment}: {}",
        candidates.join(", ")
    )]
    AmbiguousOverlay {
        target: String,
        candidates: Vec<String>,
        environment: String,
    },

    /// No platform branch matches and no wildcard exists
    #[error("'{entity}' has no platform branch for {environment}")]
    UnsupportedPlatform { entity: String, environment: String },

    /// Substitution produced an invalid graph
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Download errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Network error
    #[error("Network error downloading '{url}': {error}")]
    NetworkError { url: String, error: String },

    /// Server rejected the request; retrying will not help
    #[error("HTTP {status} downloading '{url}'")]
    Rejected { url: String, status: u16 },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Max retries exceeded
    #[error("Download failed after {retries} retries: {url}")]
    MaxRetriesExceeded { url: String, retries: u32 },
}

/// Artifact store errors
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Downloaded bytes do not match the declared checksum
    #[error("Integrity check failed for '{library}' from '{url}': expected {expected}, got {actual}")]
    Integrity {
        library: String,
        url: String,
        expected: String,
        actual: String,
    },

    /// Every candidate URL failed
    #[error("Failed to fetch '{library}': {}", errors.join("; "))]
    Fetch { library: String, errors: Vec<String> },

    /// Cache IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// External toolchain errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolchainError {
    /// Program not found on PATH
    #[error("Toolchain program '{program}' not found in PATH")]
    NotFound { program: String },

    /// No command configured for a step
    #[error("No {step} command configured")]
    NotConfigured { step: String },

    /// Process could not be spawned
    #[error("Failed to run '{program}': {error}")]
    Spawn { program: String, error: String },

    /// Process exited unsuccessfully
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Distribution assembly errors
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// Layout source does not exist
    #[error("Distribution '{distribution}': layout source '{source_spec}' not found")]
    MissingSource {
        distribution: String,
        source_spec: String,
    },

    /// Layout source reaches outside the referenced output
    #[error("Distribution '{distribution}': layout source '{source_spec}' escapes its dependency output")]
    InvalidSource {
        distribution: String,
        source_spec: String,
    },

    /// Layout destination is absolute or escapes the tree
    #[error("Distribution '{distribution}': invalid destination '{destination}'")]
    InvalidDestination {
        distribution: String,
        destination: String,
    },

    /// A referenced node has no build output
    #[error("Distribution '{distribution}': '{dependency}' has not been built")]
    UnbuiltDependency {
        distribution: String,
        dependency: String,
    },

    /// IO error while materializing
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Failure of a single build node
#[derive(Error, Debug)]
pub enum NodeError {
    /// Library fetch failed
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Processor or compile step failed
    #[error("Build step '{step}' failed for '{node}': {error}")]
    StepFailed {
        node: String,
        step: String,
        error: ToolchainError,
    },

    /// Declared result missing after a successful step
    #[error("'{node}' did not produce declared result '{path}'")]
    MissingResult { node: String, path: String },

    /// Distribution assembly failed
    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// Build cache or output directory error
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    /// Worker task panicked or was aborted
    #[error("Worker for '{node}' terminated: {error}")]
    Worker { node: String, error: String },
}

impl NodeError {
    /// Whether this failure is a checksum mismatch
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Artifact(ArtifactError::Integrity { .. }))
    }

    /// Whether this failure happened while assembling a distribution
    pub fn is_assembly(&self) -> bool {
        matches!(self, Self::Assembly(_))
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// A required setting is missing
    #[error("Missing setting: {0}")]
    Missing(String),
}

/// Top-level suiteforge error type
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Graph error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Variant error
    #[error("Variant error: {0}")]
    Variant(#[from] VariantError),

    /// Artifact error outside of a build
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// Toolchain error outside of a build
    #[error("Toolchain error: {0}")]
    Toolchain(#[from] ToolchainError),

    /// Config error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem error outside of a build
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// One or more build nodes failed
    #[error("{failed} build node(s) failed")]
    BuildFailed {
        failed: usize,
        integrity: bool,
        assembly_only: bool,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl ForgeError {
    /// Process exit code for this error
    ///
    /// Structural errors (registry, graph, variant) share one code so that
    /// automation can tell a broken plan apart from a broken build.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Registry(_) | Self::Graph(_) | Self::Variant(_) => 2,
            Self::Artifact(ArtifactError::Integrity { .. }) => 3,
            Self::BuildFailed {
                integrity: true, ..
            } => 3,
            Self::BuildFailed {
                assembly_only: true,
                ..
            } => 5,
            Self::BuildFailed { .. } => 4,
            Self::Artifact(_)
            | Self::Toolchain(_)
            | Self::Config(_)
            | Self::Filesystem(_)
            | Self::Io { .. } => 1,
        }
    }
}
