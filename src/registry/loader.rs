//! Suite registry
//!
//! Loads entry-point suites and, transitively, everything they import.
//! Each suite name maps to exactly one loaded revision. When importers
//! disagree on a pin, the configured [`ConflictPolicy`] decides.

use semver::Version;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::descriptor::SuiteDescriptor;
use crate::error::{DescriptorError, RegistryError};
use crate::registry::source::{LoadedSuite, SuiteSource};

/// How to settle two different pins of the same suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Any disagreement is an error
    Strict,
    /// The newest pinned revision wins
    Latest,
}

impl ConflictPolicy {
    /// Pick the policy from the first source that sets one
    ///
    /// Sources in precedence order: command line, config file, primary
    /// suite descriptor. No default is assumed.
    pub fn select(
        cli: Option<&str>,
        config: Option<&str>,
        primary: Option<&str>,
    ) -> Result<Self, RegistryError> {
        cli.or(config)
            .or(primary)
            .ok_or(RegistryError::PolicyUnset)?
            .parse()
    }
}

impl FromStr for ConflictPolicy {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "none" => Ok(Self::Strict),
            "latest" => Ok(Self::Latest),
            other => Err(RegistryError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => f.write_str("strict"),
            Self::Latest => f.write_str("latest"),
        }
    }
}

/// Order two revisions; semantic versions when both parse, else lexicographic
pub fn compare_revisions(a: &str, b: &str) -> Ordering {
    match (lenient_version(a), lenient_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

fn lenient_version(value: &str) -> Option<Version> {
    let trimmed = value.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }
    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let parts = core.split('.').count();
    let padded = match parts {
        1 => format!("{core}.0.0{rest}"),
        2 => format!("{core}.0{rest}"),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

/// A suite as it participates in one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredSuite {
    pub descriptor: SuiteDescriptor,
    pub dir: PathBuf,
    /// Revision it was loaded at; `None` for entry points and unpinned imports
    pub revision: Option<String>,
    /// Whether the suite was named on the command line
    pub entry_point: bool,
    /// Suites importing this one
    pub importers: Vec<String>,
}

impl RegisteredSuite {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// All suites of one invocation, keyed by name
#[derive(Debug, Clone, Default)]
pub struct Registry {
    suites: Vec<RegisteredSuite>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
struct Requirement {
    importer: String,
    revision: Option<String>,
}

struct Loader<'a> {
    source: &'a dyn SuiteSource,
    policy: ConflictPolicy,
    loaded: HashMap<String, RegisteredSuite>,
    entries: Vec<String>,
}

impl Registry {
    /// Load `entries` and every suite they transitively import
    pub fn load(
        entries: Vec<LoadedSuite>,
        source: &dyn SuiteSource,
        policy: ConflictPolicy,
    ) -> Result<Self, RegistryError> {
        let mut loader = Loader {
            source,
            policy,
            loaded: HashMap::new(),
            entries: Vec::new(),
        };

        for entry in entries {
            let name = entry.descriptor.name.clone();
            if loader.loaded.contains_key(&name) {
                return Err(DescriptorError::DuplicateName {
                    suite: "<entry points>".to_string(),
                    name,
                }
                .into());
            }
            loader.entries.push(name.clone());
            loader.loaded.insert(
                name,
                RegisteredSuite {
                    descriptor: entry.descriptor,
                    dir: entry.dir,
                    revision: None,
                    entry_point: true,
                    importers: Vec::new(),
                },
            );
        }

        // Only live pins count, so revisions may move back; a repeated
        // assignment means the imports oscillate.
        let mut passes = 0;
        let mut seen = HashSet::new();
        let (order, requirements) = loop {
            passes += 1;
            let (order, requirements) = loader.walk()?;
            if !seen.insert(loader.assignment(&order)) {
                return Err(RegistryError::Unsettled { suites: order });
            }
            if !loader.settle(&order, &requirements)? {
                break (order, requirements);
            }
        };

        tracing::debug!(passes, suites = order.len(), %policy, "suite registry resolved");

        let mut registry = Self::default();
        for name in order {
            if let Some(mut suite) = loader.loaded.remove(&name) {
                suite.importers = requirements
                    .get(&name)
                    .map(|reqs| dedup(reqs.iter().map(|r| r.importer.clone())))
                    .unwrap_or_default();
                registry.index.insert(name, registry.suites.len());
                registry.suites.push(suite);
            }
        }
        Ok(registry)
    }

    /// Suites in discovery order (entry points first)
    pub fn suites(&self) -> &[RegisteredSuite] {
        &self.suites
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredSuite> {
        self.index.get(name).map(|&i| &self.suites[i])
    }

    /// The first entry point
    pub fn primary(&self) -> Option<&RegisteredSuite> {
        self.suites.first()
    }

    pub fn len(&self) -> usize {
        self.suites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }
}

impl Loader<'_> {
    /// Loaded revision of every suite in `order`
    fn assignment(&self, order: &[String]) -> Vec<(String, Option<String>)> {
        order
            .iter()
            .map(|name| {
                let revision = self.loaded.get(name).and_then(|s| s.revision.clone());
                (name.clone(), revision)
            })
            .collect()
    }

    /// DFS over the current import edges, collecting pins and checking cycles
    fn walk(&mut self) -> Result<(Vec<String>, HashMap<String, Vec<Requirement>>), RegistryError> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        let mut requirements: HashMap<String, Vec<Requirement>> = HashMap::new();

        for entry in self.entries.clone() {
            self.visit(
                &entry,
                &mut order,
                &mut visited,
                &mut stack,
                &mut requirements,
            )?;
        }
        Ok((order, requirements))
    }

    fn visit(
        &mut self,
        name: &str,
        order: &mut Vec<String>,
        visited: &mut HashSet<String>,
        stack: &mut Vec<String>,
        requirements: &mut HashMap<String, Vec<Requirement>>,
    ) -> Result<(), RegistryError> {
        if let Some(pos) = stack.iter().position(|s| s == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(RegistryError::CyclicImport { cycle });
        }
        if !visited.insert(name.to_string()) {
            return Ok(());
        }
        order.push(name.to_string());
        stack.push(name.to_string());

        let imports = self
            .loaded
            .get(name)
            .map(|suite| suite.descriptor.imports.clone())
            .unwrap_or_default();

        for import in imports {
            let reqs = requirements.entry(import.name.clone()).or_default();
            reqs.push(Requirement {
                importer: name.to_string(),
                revision: import.version.clone(),
            });

            if !self.loaded.contains_key(&import.name) {
                let revision = self.choose(&import.name, reqs)?;
                self.load(&import.name, revision)?;
            }

            self.visit(&import.name, order, visited, stack, requirements)?;
        }

        stack.pop();
        Ok(())
    }

    /// Reload suites whose chosen revision moved; returns whether anything changed
    fn settle(
        &mut self,
        order: &[String],
        requirements: &HashMap<String, Vec<Requirement>>,
    ) -> Result<bool, RegistryError> {
        let mut changed = false;
        for name in order {
            let Some(reqs) = requirements.get(name) else {
                continue;
            };
            let is_entry = self.loaded.get(name).is_some_and(|s| s.entry_point);
            if is_entry {
                continue;
            }
            let chosen = self.choose(name, reqs)?;
            let current = self.loaded.get(name).and_then(|s| s.revision.clone());
            if chosen != current {
                tracing::info!(
                    suite = %name,
                    from = current.as_deref().unwrap_or("<unpinned>"),
                    to = chosen.as_deref().unwrap_or("<unpinned>"),
                    "reloading suite at resolved revision"
                );
                self.load(name, chosen)?;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Revision to load for `name` given the pins seen so far
    fn choose(
        &self,
        name: &str,
        reqs: &[Requirement],
    ) -> Result<Option<String>, RegistryError> {
        let pinned: Vec<&Requirement> = reqs.iter().filter(|r| r.revision.is_some()).collect();
        let Some(first) = pinned.first() else {
            return Ok(None);
        };

        match self.policy {
            ConflictPolicy::Strict => {
                if let Some(other) = pinned.iter().find(|r| r.revision != first.revision) {
                    return Err(RegistryError::VersionConflict {
                        suite: name.to_string(),
                        first_importer: first.importer.clone(),
                        first_revision: first.revision.clone().unwrap_or_default(),
                        second_importer: other.importer.clone(),
                        second_revision: other.revision.clone().unwrap_or_default(),
                    });
                }
                Ok(first.revision.clone())
            }
            ConflictPolicy::Latest => Ok(pinned
                .iter()
                .filter_map(|r| r.revision.clone())
                .max_by(|a, b| compare_revisions(a, b))),
        }
    }

    fn load(&mut self, name: &str, revision: Option<String>) -> Result<(), RegistryError> {
        let loaded = self.source.load(name, revision.as_deref())?;
        self.loaded.insert(
            name.to_string(),
            RegisteredSuite {
                descriptor: loaded.descriptor,
                dir: loaded.dir,
                revision,
                entry_point: false,
                importers: Vec::new(),
            },
        );
        Ok(())
    }
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}
