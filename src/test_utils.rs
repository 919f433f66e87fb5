//! Test utilities
//!
//! Generators for proptest and an in-memory suite source.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::build_env::BuildEnvironment;
use crate::core::descriptor::SuiteDescriptor;
use crate::error::{RegistryError, ToolchainError};
use crate::infra::toolchain::{BuildStep, Toolchain};
use crate::registry::source::{LoadedSuite, SuiteSource};

/// Suite source backed by descriptor strings keyed by `(name, revision)`
#[derive(Debug, Default)]
pub struct MemorySuiteSource {
    suites: HashMap<(String, Option<String>), String>,
}

impl MemorySuiteSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &str, revision: Option<&str>, toml: &str) -> Self {
        self.suites.insert(
            (name.to_string(), revision.map(ToString::to_string)),
            toml.to_string(),
        );
        self
    }

    /// Load the unpinned descriptor of `name` as an entry point
    pub fn entry(&self, name: &str) -> LoadedSuite {
        self.load(name, None).expect("entry suite registered")
    }

    fn dir(name: &str, revision: Option<&str>) -> PathBuf {
        match revision {
            Some(rev) => Path::new("/suites").join(format!("{name}@{rev}")),
            None => Path::new("/suites").join(name),
        }
    }
}

impl SuiteSource for MemorySuiteSource {
    fn load(&self, name: &str, revision: Option<&str>) -> Result<LoadedSuite, RegistryError> {
        let key = (name.to_string(), revision.map(ToString::to_string));
        let (content, rev) = match self.suites.get(&key) {
            Some(content) => (content, revision),
            None => self
                .suites
                .get(&(name.to_string(), None))
                .map(|content| (content, None))
                .ok_or_else(|| RegistryError::SuiteNotFound {
                    name: name.to_string(),
                    searched: vec![Self::dir(name, revision)],
                })?,
        };
        let dir = Self::dir(name, rev);
        let descriptor = SuiteDescriptor::from_toml(content, &dir.join("suite.toml"))?;
        Ok(LoadedSuite { descriptor, dir })
    }
}

/// In-process toolchain
///
/// The compile step writes `<project>.out` into the output directory; the
/// processor step writes `Generated.java` into the generated directory.
/// Projects named in `failing` fail their compile step.
#[derive(Default)]
pub struct FakeToolchain {
    failing: HashSet<String>,
    pub started: AtomicUsize,
    steps: Mutex<Vec<(String, BuildStep, BuildEnvironment)>>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(node: &str) -> Self {
        Self::failing_many(&[node])
    }

    pub fn failing_many(nodes: &[&str]) -> Self {
        Self {
            failing: nodes.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    /// Every step run so far, in call order
    pub fn steps(&self) -> Vec<(String, BuildStep, BuildEnvironment)> {
        self.steps.lock().unwrap().clone()
    }

    /// Nodes whose compile step ran, in call order
    pub fn compiled(&self) -> Vec<String> {
        self.steps()
            .into_iter()
            .filter(|(_, step, _)| *step == BuildStep::Compile)
            .map(|(node, _, _)| node)
            .collect()
    }
}

impl Toolchain for FakeToolchain {
    fn run(
        &self,
        step: BuildStep,
        _command: Option<&[String]>,
        env: &BuildEnvironment,
    ) -> Result<(), ToolchainError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.steps
            .lock()
            .unwrap()
            .push((env.node.clone(), step, env.clone()));

        match step {
            BuildStep::Processor => {
                std::fs::create_dir_all(&env.generated_dir).unwrap();
                std::fs::write(env.generated_dir.join("Generated.java"), "class Generated {}")
                    .unwrap();
                Ok(())
            }
            BuildStep::Compile if self.failing.contains(&env.node) => Err(ToolchainError::Failed {
                program: "fake".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("{} does not compile", env.project),
            }),
            BuildStep::Compile => {
                std::fs::create_dir_all(&env.output_dir).unwrap();
                std::fs::write(
                    env.output_dir.join(format!("{}.out", env.project)),
                    env.classpath.len().to_string(),
                )
                .unwrap();
                Ok(())
            }
        }
    }

    fn identity(&self, step: BuildStep, command: Option<&[String]>) -> String {
        format!("fake {step} {}", command.map(|c| c.join(" ")).unwrap_or_default())
    }
}

pub mod generators {
    use proptest::prelude::*;

    /// Generate a valid entity name
    pub fn entity_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9.]{0,12}[a-z0-9]".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate a valid SHA256 hash (64 hex characters)
    pub fn sha256_hash() -> impl Strategy<Value = String> {
        "[0-9a-f]{64}"
    }

    /// Generate a DAG as adjacency lists: node `i` only depends on nodes `< i`
    pub fn dag(max_nodes: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
        (1..=max_nodes).prop_flat_map(|n| {
            (0..n)
                .map(|i| {
                    if i == 0 {
                        Just(Vec::new()).boxed()
                    } else {
                        proptest::collection::btree_set(0..i, 0..=i.min(3))
                            .prop_map(|deps| deps.into_iter().collect())
                            .boxed()
                    }
                })
                .collect::<Vec<_>>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_entity_name_generator(name in entity_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.'));
        }

        #[test]
        fn test_dag_generator_only_points_backwards(graph in dag(10)) {
            for (i, deps) in graph.iter().enumerate() {
                prop_assert!(deps.iter().all(|&d| d < i));
            }
        }

        #[test]
        fn test_sha256_hash_generator(hash in sha256_hash()) {
            prop_assert_eq!(hash.len(), 64);
        }
    }
}
