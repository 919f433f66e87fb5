//! Build environment setup
//!
//! Describes one external build step to the toolchain. Everything a
//! compiler or processor needs is passed as `SF_*` environment variables
//! so that wrapper scripts stay independent of the invoking tool.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::platform::Environment;

/// Separator for path lists in environment variables
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: &str = ";";
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: &str = ":";

/// Directory name for processor output, a sibling of the output directory
pub const GENERATED_DIR: &str = "generated";

/// Inputs of a single processor or compile step
#[derive(Debug, Clone, PartialEq)]
pub struct BuildEnvironment {
    /// Qualified node id (`suite:project`)
    pub node: String,
    pub suite: String,
    pub project: String,
    /// Project directory; the step runs here
    pub project_dir: PathBuf,
    /// Absolute source directories
    pub source_dirs: Vec<PathBuf>,
    /// Where processors write generated sources, next to the output
    /// directory so they never become part of the node's output
    pub generated_dir: PathBuf,
    /// Outputs of dependency nodes
    pub classpath: Vec<PathBuf>,
    /// Outputs of annotation processor distributions
    pub processor_path: Vec<PathBuf>,
    /// Step output directory
    pub output_dir: PathBuf,
    pub java_compliance: Option<String>,
    pub target: Environment,
    pub jobs: usize,
}

impl BuildEnvironment {
    pub fn new(node: &str, project_dir: PathBuf, output_dir: PathBuf, target: Environment) -> Self {
        let (suite, project) = node.split_once(':').unwrap_or(("", node));
        Self {
            node: node.to_string(),
            suite: suite.to_string(),
            project: project.to_string(),
            generated_dir: output_dir.with_file_name(GENERATED_DIR),
            project_dir,
            source_dirs: Vec::new(),
            classpath: Vec::new(),
            processor_path: Vec::new(),
            output_dir,
            java_compliance: None,
            target,
            jobs: num_cpus::get(),
        }
    }

    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Convert to environment variable map for process execution
    pub fn to_env_map(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        env.insert("SF_NODE".to_string(), self.node.clone());
        env.insert("SF_SUITE".to_string(), self.suite.clone());
        env.insert("SF_PROJECT".to_string(), self.project.clone());
        env.insert(
            "SF_PROJECT_DIR".to_string(),
            self.project_dir.display().to_string(),
        );
        env.insert("SF_SOURCE_DIRS".to_string(), join_paths(&self.source_dirs));
        env.insert(
            "SF_GENERATED_DIR".to_string(),
            self.generated_dir.display().to_string(),
        );
        env.insert("SF_CLASSPATH".to_string(), join_paths(&self.classpath));
        env.insert(
            "SF_PROCESSOR_PATH".to_string(),
            join_paths(&self.processor_path),
        );
        env.insert(
            "SF_OUTPUT_DIR".to_string(),
            self.output_dir.display().to_string(),
        );
        env.insert("SF_JDK".to_string(), self.target.jdk.to_string());
        env.insert("SF_OS".to_string(), self.target.os.clone());
        env.insert("SF_ARCH".to_string(), self.target.arch.clone());
        env.insert("SF_JOBS".to_string(), self.jobs.to_string());

        if let Some(ref compliance) = self.java_compliance {
            env.insert("SF_JAVA_COMPLIANCE".to_string(), compliance.clone());
        }

        env
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(PATH_LIST_SEPARATOR)
}
