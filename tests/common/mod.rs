//! Common test utilities and helpers
//!
//! Integration tests lay suites out side by side in a temporary directory,
//! the way they are checked out in practice: `<root>/<suite>/suite.toml`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;
use tempfile::TempDir;

use suiteforge::core::builder::{BuildReport, Executor, ExecutorOptions, SilentObserver};
use suiteforge::core::fingerprint::FingerprintCache;
use suiteforge::core::graph::Graph;
use suiteforge::core::platform::Environment;
use suiteforge::core::variant::{resolve, ResolvedGraph};
use suiteforge::error::ForgeError;
use suiteforge::infra::artifact_store::ArtifactStore;
use suiteforge::infra::dirs::{SuiteforgeDirs, ENV_CACHE_DIR, ENV_CONFIG_DIR, ENV_DATA_DIR};
use suiteforge::infra::download::DownloadManager;
use suiteforge::infra::toolchain::CommandToolchain;
use suiteforge::registry::{load_suite_dir, ConflictPolicy, DirectorySuiteSource, Registry};

/// Compile step copying every source directory into the output directory
pub const COPY_COMPILER: &str = r#"set -e
mkdir -p "$SF_OUTPUT_DIR"
for dir in $(echo "$SF_SOURCE_DIRS" | tr ':' ' '); do
  if [ -d "$dir" ]; then cp -R "$dir"/. "$SF_OUTPUT_DIR"/; fi
done
echo "$SF_NODE" >> "$SF_PROJECT_DIR/../../build.log"
"#;

/// Suites checked out under one temporary root
pub struct TestWorkspace {
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Directory holding the suite checkouts
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("suites")
    }

    /// Directory of suite `name`
    pub fn suite_dir(&self, name: &str) -> PathBuf {
        self.root().join(name)
    }

    /// Write `<root>/<dir>/suite.toml`
    pub fn suite(&self, dir: &str, toml: &str) -> &Self {
        self.file(&format!("{dir}/suite.toml"), toml)
    }

    /// Write a file relative to the suites root
    pub fn file(&self, relative: &str, content: &str) -> &Self {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
        self
    }

    /// Tool directories isolated inside the workspace
    pub fn dirs(&self) -> SuiteforgeDirs {
        SuiteforgeDirs::under(&self.dir.path().join("home"))
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.dir.path().join("dist")
    }

    /// Load `primary` and its imports from the workspace
    pub fn registry(&self, primary: &str, policy: ConflictPolicy) -> Result<Registry, ForgeError> {
        let entry = load_suite_dir(&self.suite_dir(primary))?;
        let source = DirectorySuiteSource::new(vec![self.root()]);
        Ok(Registry::load(vec![entry], &source, policy)?)
    }

    /// Registry, graph and variant resolution in one step
    pub fn resolve(&self, primary: &str, env: &Environment) -> Result<ResolvedGraph, ForgeError> {
        let registry = self.registry(primary, ConflictPolicy::Strict)?;
        let graph = Graph::build(&registry)?;
        Ok(resolve(&graph, &registry, env)?)
    }

    /// Executor compiling with [`COPY_COMPILER`]
    pub fn executor(&self, options: ExecutorOptions) -> Executor {
        let dirs = self.dirs();
        let store = ArtifactStore::new(
            dirs.downloads_dir(),
            DownloadManager::with_config(2, 10),
            None,
        );
        let toolchain = CommandToolchain::new(Some(copy_compiler()), None);
        Executor::new(
            Arc::new(store),
            Arc::new(FingerprintCache::new(dirs.build_cache_dir())),
            Arc::new(toolchain),
            options,
        )
    }

    /// Build every node of `primary` for `env`
    pub async fn build(&self, primary: &str, env: &Environment) -> BuildReport {
        let resolved = self.resolve(primary, env).expect("suites resolve");
        self.executor(ExecutorOptions {
            jobs: 4,
            dist_dir: Some(self.dist_dir()),
            ..ExecutorOptions::default()
        })
        .execute(resolved, &SilentObserver)
        .await
    }

    /// Node ids the compile step ran for, in completion order
    pub fn compiled(&self) -> Vec<String> {
        std::fs::read_to_string(self.root().join("build.log"))
            .unwrap_or_default()
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    pub fn clear_compiled(&self) {
        let _ = std::fs::remove_file(self.root().join("build.log"));
    }

    /// Write a global config.toml using [`COPY_COMPILER`]
    pub fn write_config(&self, extra: &str) {
        let dirs = self.dirs();
        std::fs::create_dir_all(dirs.config_dir()).expect("Failed to create config dir");
        let config = format!(
            "[toolchain]\ncompiler = [\"sh\", \"-c\", '''\n{COPY_COMPILER}''']\n\n{extra}"
        );
        std::fs::write(dirs.global_config_path(), config).expect("Failed to write config");
    }

    /// Run the suiteforge binary with tool directories inside the workspace
    pub fn run_cli(&self, args: &[&str]) -> Output {
        let dirs = self.dirs();
        Command::new(env!("CARGO_BIN_EXE_suiteforge"))
            .current_dir(self.dir.path())
            .env(ENV_CACHE_DIR, dirs.cache_dir())
            .env(ENV_CONFIG_DIR, dirs.config_dir())
            .env(ENV_DATA_DIR, dirs.data_dir())
            .env_remove("RUST_LOG")
            .env_remove("SUITEFORGE_JDK")
            .args(args)
            .output()
            .expect("Failed to execute suiteforge")
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

pub fn copy_compiler() -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), COPY_COMPILER.to_string()]
}

pub fn env(jdk: u32) -> Environment {
    Environment::new(jdk, "linux", "amd64")
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}
