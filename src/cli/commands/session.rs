//! Shared command setup
//!
//! Every command starts the same way: read the global configuration, load
//! the primary suite and its imports, and build the dependency graph.
//! Structural problems surface here, before anything is fetched or built.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::commands::SessionArgs;
use crate::config::defaults::LOCK_FILE;
use crate::core::builder::{Executor, ExecutorOptions};
use crate::core::fingerprint::FingerprintCache;
use crate::core::global_config::GlobalConfig;
use crate::core::graph::{Graph, NodeId};
use crate::core::lock::SuitesLock;
use crate::core::platform::{host_arch, host_os, Environment};
use crate::core::variant::{resolve, ResolvedGraph};
use crate::error::{ConfigError, ForgeError, GraphError};
use crate::infra::artifact_store::ArtifactStore;
use crate::infra::dirs::SuiteforgeDirs;
use crate::infra::download::DownloadManager;
use crate::infra::toolchain::CommandToolchain;
use crate::registry::{load_suite_dir, ConflictPolicy, DirectorySuiteSource, Registry, SuiteSource};

/// Loaded suites and their graph
#[derive(Debug)]
pub struct Session {
    pub config: GlobalConfig,
    pub dirs: SuiteforgeDirs,
    pub suite_dir: PathBuf,
    pub registry: Registry,
    pub graph: Graph,
}

impl Session {
    /// Load using the platform directories and global config
    pub fn load(args: &SessionArgs) -> Result<Self, ForgeError> {
        let dirs = SuiteforgeDirs::new();
        let config = GlobalConfig::load(&dirs)?;
        Self::load_with(args, dirs, config)
    }

    pub fn load_with(
        args: &SessionArgs,
        dirs: SuiteforgeDirs,
        config: GlobalConfig,
    ) -> Result<Self, ForgeError> {
        let suite_dir =
            std::fs::canonicalize(&args.suite_dir).map_err(|e| ConfigError::ReadError {
                path: args.suite_dir.display().to_string(),
                error: e.to_string(),
            })?;
        let primary = load_suite_dir(&suite_dir)?;
        let source = DirectorySuiteSource::new(search_roots(args, &config, &suite_dir));

        let policy = ConflictPolicy::select(
            args.conflict_policy.as_deref(),
            config.build.conflict_policy.as_deref(),
            primary.descriptor.version_conflict_resolution.as_deref(),
        )?;

        let mut entries = vec![primary];
        for name in &args.dynamic_imports {
            entries.push(source.load(name, None)?);
        }
        let registry = Registry::load(entries, &source, policy)?;
        let graph = Graph::build(&registry)?;

        tracing::info!(
            suites = registry.len(),
            nodes = graph.len(),
            %policy,
            "suites loaded"
        );

        Ok(Self {
            config,
            dirs,
            suite_dir,
            registry,
            graph,
        })
    }

    pub fn primary_suite(&self) -> Option<&str> {
        self.registry.primary().map(|suite| suite.name())
    }

    pub fn lock_path(&self) -> PathBuf {
        self.suite_dir.join(LOCK_FILE)
    }

    /// Check the resolution against `suites.lock`, or rewrite the lock
    ///
    /// With `locked`, a missing lock file is an error.
    pub fn sync_lock(&self, locked: bool) -> Result<(), ForgeError> {
        let fresh = SuitesLock::from_registry(&self.registry);
        let path = self.lock_path();
        match SuitesLock::load(&path)? {
            Some(existing) if locked => existing.verify(&fresh)?,
            None if locked => {
                return Err(ConfigError::Missing(format!(
                    "{} (required by --locked)",
                    path.display()
                ))
                .into());
            }
            Some(existing) if existing == fresh => {}
            _ => {
                fresh.save(&path)?;
                tracing::info!(path = %path.display(), "lock file written");
            }
        }
        Ok(())
    }

    /// Target environment from flags, then config, then the host
    pub fn environment(&self, args: &SessionArgs) -> Result<Environment, ConfigError> {
        let jdk = args.jdk.or(self.config.build.jdk).ok_or_else(|| {
            ConfigError::Missing("JDK version (--jdk or [build] jdk in config.toml)".to_string())
        })?;
        Ok(Environment::new(
            jdk,
            args.os.as_deref().unwrap_or(host_os()),
            args.arch.as_deref().unwrap_or(host_arch()),
        ))
    }

    /// Resolve the whole graph for `env`, then keep `targets` and their dependencies
    pub fn resolve(
        &self,
        env: &Environment,
        targets: &[String],
    ) -> Result<ResolvedGraph, ForgeError> {
        let resolved = resolve(&self.graph, &self.registry, env)?;
        if targets.is_empty() {
            return Ok(resolved);
        }
        let roots = self.find_all(&resolved.graph, targets)?;
        Ok(resolved.restricted_to(&roots))
    }

    /// The unresolved graph restricted to `targets`
    pub fn restricted(&self, targets: &[String]) -> Result<Graph, GraphError> {
        if targets.is_empty() {
            return Ok(self.graph.clone());
        }
        let roots = self.find_all(&self.graph, targets)?;
        Ok(self.graph.restricted_to(&roots))
    }

    fn find_all(&self, graph: &Graph, targets: &[String]) -> Result<Vec<NodeId>, GraphError> {
        targets
            .iter()
            .map(|target| graph.find(target, self.primary_suite()))
            .collect()
    }

    /// Effective job count: the flag, then config, then the CPU count
    pub fn jobs(&self, requested: Option<usize>) -> usize {
        requested
            .filter(|&jobs| jobs > 0)
            .unwrap_or_else(|| self.config.build_jobs())
    }

    pub fn toolchain(&self) -> CommandToolchain {
        CommandToolchain::new(
            self.config.toolchain.compiler.clone(),
            self.config.toolchain.processor.clone(),
        )
    }

    pub fn executor(&self, options: ExecutorOptions) -> Executor {
        let downloader =
            DownloadManager::with_config(self.config.max_retries(), self.config.base_delay_ms());
        let store = ArtifactStore::new(
            self.dirs.downloads_dir(),
            downloader,
            self.config.download.maven_mirror.clone(),
        );
        let cache = FingerprintCache::new(self.dirs.build_cache_dir());
        Executor::new(
            Arc::new(store),
            Arc::new(cache),
            Arc::new(self.toolchain()),
            options,
        )
    }
}

/// Roots searched for imported suites, in order
///
/// Explicit roots come first, then configured ones, then the directory the
/// primary suite is checked out in.
fn search_roots(args: &SessionArgs, config: &GlobalConfig, suite_dir: &Path) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = args
        .search_roots
        .iter()
        .chain(&config.search.roots)
        .cloned()
        .collect();
    if let Some(parent) = suite_dir.parent() {
        roots.push(parent.to_path_buf());
    }
    roots.dedup();
    roots
}
