//! Suite descriptor (suite.toml) parsing and validation
//!
//! A descriptor declares one suite: its imports, libraries, projects and
//! distributions. Every collection is an array of tables so that
//! declaration order survives parsing; graph traversal and layout
//! precedence both depend on it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::config::{defaults, urls};
use crate::core::platform::{JavaCompliance, PlatformBranch};
use crate::error::DescriptorError;
use crate::infra::download::{Checksum, ChecksumAlgorithm};

/// A parsed suite.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteDescriptor {
    /// Suite name, unique within a registry
    pub name: String,

    /// Suite release version
    #[serde(default)]
    pub version: Option<String>,

    /// Preferred conflict policy when this suite is the primary suite
    #[serde(default)]
    pub version_conflict_resolution: Option<String>,

    /// Imported suites
    #[serde(default, rename = "import")]
    pub imports: Vec<SuiteImport>,

    /// External libraries
    #[serde(default, rename = "library")]
    pub libraries: Vec<LibraryDescriptor>,

    /// Compilable projects
    #[serde(default, rename = "project")]
    pub projects: Vec<ProjectDescriptor>,

    /// Output distributions
    #[serde(default, rename = "distribution")]
    pub distributions: Vec<DistributionDescriptor>,
}

/// An import of another suite
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteImport {
    /// Imported suite name
    pub name: String,

    /// Pinned revision
    #[serde(default)]
    pub version: Option<String>,

    /// Where the suite can be obtained (informational)
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Maven coordinates of a library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MavenCoordinates {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    #[serde(default)]
    pub classifier: Option<String>,
}

impl MavenCoordinates {
    /// Repository-relative path of the jar
    pub fn path(&self) -> String {
        let file = match &self.classifier {
            Some(classifier) => {
                format!("{}-{}-{classifier}.jar", self.artifact_id, self.version)
            }
            None => format!("{}-{}.jar", self.artifact_id, self.version),
        };
        format!(
            "{}/{}/{}/{file}",
            self.group_id.replace('.', "/"),
            self.artifact_id,
            self.version
        )
    }
}

/// An external, checksum-verified artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryDescriptor {
    pub name: String,

    /// Candidate URLs, tried in order
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub sha1: Option<String>,

    #[serde(default)]
    pub sha256: Option<String>,

    #[serde(default)]
    pub module_name: Option<String>,

    #[serde(default)]
    pub maven: Option<MavenCoordinates>,

    /// Other libraries this one needs
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Candidate URLs of the source jar
    #[serde(default)]
    pub source_urls: Vec<String>,

    #[serde(default)]
    pub source_sha1: Option<String>,

    #[serde(default)]
    pub source_sha256: Option<String>,
}

impl LibraryDescriptor {
    /// The declared checksum, if exactly one is declared
    pub fn checksum(&self) -> Option<Checksum> {
        match (&self.sha1, &self.sha256) {
            (Some(value), None) => Some(Checksum::new(ChecksumAlgorithm::Sha1, value)),
            (None, Some(value)) => Some(Checksum::new(ChecksumAlgorithm::Sha256, value)),
            _ => None,
        }
    }

    /// The source jar as a library of its own, if one is declared
    ///
    /// Without `source_urls` the `sources` classifier of the maven
    /// coordinates is used.
    pub fn sources(&self) -> Option<Self> {
        if self.source_sha1.is_none() && self.source_sha256.is_none() && self.source_urls.is_empty()
        {
            return None;
        }
        Some(Self {
            name: format!("{}.sources", self.name),
            urls: self.source_urls.clone(),
            sha1: self.source_sha1.clone(),
            sha256: self.source_sha256.clone(),
            module_name: None,
            maven: self.maven.clone().map(|coords| MavenCoordinates {
                classifier: Some("sources".to_string()),
                ..coords
            }),
            dependencies: Vec::new(),
            source_urls: Vec::new(),
            source_sha1: None,
            source_sha256: None,
        })
    }

    /// Download URLs: the declared ones, else one derived from maven coordinates
    pub fn download_urls(&self, maven_mirror: Option<&str>) -> Vec<String> {
        if !self.urls.is_empty() {
            return self.urls.clone();
        }
        self.maven
            .as_ref()
            .map(|coords| {
                let base = maven_mirror.unwrap_or(urls::MAVEN_CENTRAL);
                vec![format!("{}/{}", base.trim_end_matches('/'), coords.path())]
            })
            .unwrap_or_default()
    }

    /// File name used for the cached artifact
    pub fn file_name(&self) -> String {
        self.download_urls(None)
            .first()
            .and_then(|url| url.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .map_or_else(|| format!("{}.jar", self.name), ToString::to_string)
    }
}

/// Per-platform override of a project's results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectPlatform {
    pub os: String,
    #[serde(default = "others")]
    pub arch: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub results: Vec<String>,
}

/// A compilable unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectDescriptor {
    pub name: String,

    /// Directory under the suite holding the project directory
    #[serde(default)]
    pub subdir: Option<String>,

    /// Explicit project directory, relative to the suite
    #[serde(default)]
    pub dir: Option<String>,

    #[serde(default = "default_source_dirs")]
    pub source_dirs: Vec<String>,

    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Dependencies that only constrain ordering
    #[serde(default)]
    pub build_dependencies: Vec<String>,

    /// Code-generation processor distributions
    #[serde(default)]
    pub annotation_processors: Vec<String>,

    #[serde(default)]
    pub java_compliance: Option<String>,

    /// Project this one conditionally replaces
    #[serde(default)]
    pub overlay_target: Option<String>,

    /// Overlay restriction on operating system
    #[serde(default)]
    pub os: Option<String>,

    /// Overlay restriction on architecture
    #[serde(default)]
    pub arch: Option<String>,

    /// Custom build command (argv)
    #[serde(default)]
    pub build_command: Option<Vec<String>>,

    #[serde(default)]
    pub output: Option<String>,

    #[serde(default)]
    pub results: Vec<String>,

    #[serde(default)]
    pub platform: Vec<ProjectPlatform>,
}

impl ProjectDescriptor {
    /// Project directory relative to the suite directory
    pub fn relative_dir(&self) -> std::path::PathBuf {
        if let Some(dir) = &self.dir {
            return Path::new(dir).to_path_buf();
        }
        match &self.subdir {
            Some(subdir) => Path::new(subdir).join(&self.name),
            None => Path::new(&self.name).to_path_buf(),
        }
    }

    /// Parsed java compliance
    pub fn compliance(&self) -> Option<JavaCompliance> {
        self.java_compliance
            .as_deref()
            .and_then(|value| JavaCompliance::parse(value).ok())
    }
}

/// A destination-to-source mapping in a layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayoutEntry {
    /// Destination path; a trailing `/` denotes a directory
    pub dest: String,
    pub source: SourceList,
}

/// One layout source or several
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SourceList {
    One(LayoutSource),
    Many(Vec<LayoutSource>),
}

impl SourceList {
    pub fn as_slice(&self) -> &[LayoutSource] {
        match self {
            Self::One(source) => std::slice::from_ref(source),
            Self::Many(sources) => sources,
        }
    }
}

/// Where layout content comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LayoutSource {
    /// `file:<path>` relative to the suite directory
    File(String),
    /// `dependency:<ref>[/<subpath>]`
    Dependency {
        reference: String,
        subpath: Option<String>,
    },
    /// `string:<content>`
    Text(String),
}

impl LayoutSource {
    /// Parse the `kind:value` form
    pub fn parse(spec: &str) -> Result<Self, DescriptorError> {
        let invalid = |reason: &str| DescriptorError::InvalidLayoutSource {
            source_spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (kind, value) = spec
            .split_once(':')
            .ok_or_else(|| invalid("expected '<kind>:<value>'"))?;

        match kind {
            "file" if value.is_empty() => Err(invalid("empty file path")),
            "file" => Ok(Self::File(value.to_string())),
            "string" => Ok(Self::Text(value.to_string())),
            "dependency" => {
                let (reference, subpath) = match value.split_once('/') {
                    Some((reference, rest)) if !rest.is_empty() => {
                        (reference, Some(rest.to_string()))
                    }
                    Some((reference, _)) => (reference, None),
                    None => (value, None),
                };
                if reference.is_empty() {
                    return Err(invalid("empty dependency reference"));
                }
                Ok(Self::Dependency {
                    reference: reference.to_string(),
                    subpath,
                })
            }
            other => Err(invalid(&format!("unknown kind '{other}'"))),
        }
    }
}

impl TryFrom<String> for LayoutSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).map_err(|e| e.to_string())
    }
}

impl From<LayoutSource> for String {
    fn from(value: LayoutSource) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LayoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{path}"),
            Self::Text(content) => write!(f, "string:{content}"),
            Self::Dependency {
                reference,
                subpath: Some(subpath),
            } => write!(f, "dependency:{reference}/{subpath}"),
            Self::Dependency {
                reference,
                subpath: None,
            } => write!(f, "dependency:{reference}"),
        }
    }
}

/// Per-platform layout additions of a distribution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributionPlatform {
    pub os: String,
    #[serde(default = "others")]
    pub arch: String,
    #[serde(default)]
    pub layout: Vec<LayoutEntry>,
}

/// A named output artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributionDescriptor {
    pub name: String,

    /// Projects and libraries packaged into this distribution
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Distributions built before this one and linked against
    #[serde(default)]
    pub dist_dependencies: Vec<String>,

    /// Dependencies kept out of the packaged content
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Native/support tree rather than a library bundle
    #[serde(default)]
    pub native: bool,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub layout: Vec<LayoutEntry>,

    #[serde(default)]
    pub platform: Vec<DistributionPlatform>,
}

impl DistributionDescriptor {
    /// Every `dependency:` reference across the base layout and all branches
    pub fn layout_references(&self) -> impl Iterator<Item = &str> {
        self.layout
            .iter()
            .chain(self.platform.iter().flat_map(|branch| branch.layout.iter()))
            .flat_map(|entry| entry.source.as_slice())
            .filter_map(|source| match source {
                LayoutSource::Dependency { reference, .. } => Some(reference.as_str()),
                _ => None,
            })
    }
}

impl PlatformBranch for ProjectPlatform {
    fn os(&self) -> &str {
        &self.os
    }

    fn arch(&self) -> &str {
        &self.arch
    }
}

impl PlatformBranch for DistributionPlatform {
    fn os(&self) -> &str {
        &self.os
    }

    fn arch(&self) -> &str {
        &self.arch
    }
}

fn others() -> String {
    defaults::OTHERS.to_string()
}

fn default_source_dirs() -> Vec<String> {
    vec![defaults::DEFAULT_SOURCE_DIR.to_string()]
}

/// Borrowed view of any entity in a suite
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Library(&'a LibraryDescriptor),
    Project(&'a ProjectDescriptor),
    Distribution(&'a DistributionDescriptor),
}

impl SuiteDescriptor {
    /// Parse and validate a descriptor
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, DescriptorError> {
        let descriptor: Self = toml::from_str(content).map_err(|e| DescriptorError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Look up an entity by its bare name
    pub fn entity(&self, name: &str) -> Option<Entity<'_>> {
        if let Some(library) = self.libraries.iter().find(|l| l.name == name) {
            return Some(Entity::Library(library));
        }
        if let Some(project) = self.projects.iter().find(|p| p.name == name) {
            return Some(Entity::Project(project));
        }
        self.distributions
            .iter()
            .find(|d| d.name == name)
            .map(Entity::Distribution)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let mut seen = HashSet::new();
        let names = self
            .libraries
            .iter()
            .map(|l| &l.name)
            .chain(self.projects.iter().map(|p| &p.name))
            .chain(self.distributions.iter().map(|d| &d.name));
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(DescriptorError::DuplicateName {
                    suite: self.name.clone(),
                    name: name.clone(),
                });
            }
        }

        for library in &self.libraries {
            if library.checksum().is_none() {
                return Err(DescriptorError::ChecksumRequired {
                    suite: self.name.clone(),
                    library: library.name.clone(),
                });
            }
            if library.urls.is_empty() && library.maven.is_none() {
                return Err(DescriptorError::NoLibrarySource {
                    suite: self.name.clone(),
                    library: library.name.clone(),
                });
            }
            if let Some(sources) = library.sources() {
                if sources.checksum().is_none() {
                    return Err(DescriptorError::ChecksumRequired {
                        suite: self.name.clone(),
                        library: sources.name,
                    });
                }
                if sources.urls.is_empty() && sources.maven.is_none() {
                    return Err(DescriptorError::NoLibrarySource {
                        suite: self.name.clone(),
                        library: sources.name,
                    });
                }
            }
        }

        for project in &self.projects {
            if let Some(value) = &project.java_compliance {
                if JavaCompliance::parse(value).is_err() {
                    return Err(DescriptorError::InvalidCompliance {
                        suite: self.name.clone(),
                        project: project.name.clone(),
                        value: value.clone(),
                    });
                }
            }
            self.check_unique_branches(&project.name, &project.platform)?;
        }

        for distribution in &self.distributions {
            self.check_unique_branches(&distribution.name, &distribution.platform)?;
        }

        Ok(())
    }

    fn check_unique_branches<B: PlatformBranch>(
        &self,
        entity: &str,
        branches: &[B],
    ) -> Result<(), DescriptorError> {
        let mut seen = HashSet::new();
        for branch in branches {
            if !seen.insert((branch.os(), branch.arch())) {
                return Err(DescriptorError::DuplicatePlatform {
                    suite: self.name.clone(),
                    entity: entity.to_string(),
                    os: branch.os().to_string(),
                    arch: branch.arch().to_string(),
                });
            }
        }
        Ok(())
    }
}
