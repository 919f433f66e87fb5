//! Build execution
//!
//! Runs a resolved graph: libraries are fetched through the artifact
//! store, projects run their processors and compile step through the
//! toolchain, distributions are assembled. Nodes whose fingerprint is
//! already committed in the build cache are not rebuilt.
//!
//! Scheduling keeps at most `jobs` nodes in flight. A node starts only once
//! every dependency completed; among ready nodes, the earlier one in build
//! order starts first. A failed node never starts its dependents; whether
//! unrelated nodes still start depends on the [`FailMode`].

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::core::assemble::{assemble, DistributionManifest};
use crate::core::build_env::BuildEnvironment;
use crate::core::descriptor::LibraryDescriptor;
use crate::core::fingerprint::{Fingerprint, FingerprintBuilder, FingerprintCache};
use crate::core::graph::{EdgeKind, Node, NodeId, NodeKind};
use crate::core::variant::{
    DistributionPlan, NodePlan, PlannedSource, ProjectPlan, ResolvedGraph,
};
use crate::error::{ArtifactError, ForgeError, NodeError, ToolchainError};
use crate::infra::artifact_store::{ArtifactStore, Fetched};
use crate::infra::filesystem;
use crate::infra::toolchain::{BuildStep, Toolchain};

const MANIFEST_FILE: &str = "manifest.json";

/// What happens to unrelated work after a node fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailMode {
    /// Nodes not yet started are cancelled
    FailFast,
    /// Independent subtrees keep building
    #[default]
    BestEffort,
}

/// Executor settings
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub jobs: usize,
    pub fail_mode: FailMode,
    /// Rebuild even when the fingerprint is cached
    pub force: bool,
    /// Where finished distributions are exported, one directory each
    pub dist_dir: Option<PathBuf>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            fail_mode: FailMode::default(),
            force: false,
            dist_dir: None,
        }
    }
}

/// Outcome of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NodeStatus {
    Built,
    Cached,
    Failed { error: String },
    Skipped { failed_dependency: NodeId },
    Cancelled,
}

impl NodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Built | Self::Cached)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Cached => "cached",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub node: NodeId,
    pub kind: NodeKind,
    #[serde(flatten)]
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub duration_ms: u64,
}

/// Result of one build invocation
#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub environment: String,
    /// Per-node results in build order
    pub nodes: Vec<NodeReport>,
    #[serde(skip)]
    errors: Vec<(NodeId, NodeError)>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.nodes.iter().all(|n| n.status.is_success())
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node == *id)
    }

    /// Every node failure, in build order
    pub fn errors(&self) -> &[(NodeId, NodeError)] {
        &self.errors
    }

    pub fn count(&self, label: &str) -> usize {
        self.nodes.iter().filter(|n| n.status.label() == label).count()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// The error this report amounts to, if any
    pub fn failure(&self) -> Option<ForgeError> {
        if self.is_success() {
            return None;
        }
        Some(ForgeError::BuildFailed {
            failed: self.errors.len().max(1),
            integrity: self.errors.iter().any(|(_, e)| e.is_integrity()),
            assembly_only: !self.errors.is_empty()
                && self.errors.iter().all(|(_, e)| e.is_assembly()),
        })
    }
}

/// Receives progress notifications from the scheduler
pub trait BuildObserver {
    fn node_started(&self, _node: &NodeId) {}
    fn node_finished(&self, _report: &NodeReport) {}
}

/// Observer that ignores everything
pub struct SilentObserver;

impl BuildObserver for SilentObserver {}

/// A finished node as seen by its dependents
#[derive(Debug, Clone)]
struct Completed {
    fingerprint: Fingerprint,
    /// Project result root, distribution tree or library file
    output: PathBuf,
    /// Output plus the classpath of every regular dependency
    classpath: Vec<PathBuf>,
    from_cache: bool,
}

struct Context {
    store: Arc<ArtifactStore>,
    cache: Arc<FingerprintCache>,
    toolchain: Arc<dyn Toolchain>,
    resolved: Arc<ResolvedGraph>,
    options: ExecutorOptions,
}

/// Builds resolved graphs
pub struct Executor {
    store: Arc<ArtifactStore>,
    cache: Arc<FingerprintCache>,
    toolchain: Arc<dyn Toolchain>,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(
        store: Arc<ArtifactStore>,
        cache: Arc<FingerprintCache>,
        toolchain: Arc<dyn Toolchain>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            store,
            cache,
            toolchain,
            options,
        }
    }

    /// Build every node of `resolved`
    pub async fn execute(
        &self,
        resolved: ResolvedGraph,
        observer: &dyn BuildObserver,
    ) -> BuildReport {
        let resolved = Arc::new(resolved);
        let ctx = Arc::new(Context {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            toolchain: Arc::clone(&self.toolchain),
            resolved: Arc::clone(&resolved),
            options: self.options.clone(),
        });
        let jobs = self.options.jobs.max(1);
        let graph = &resolved.graph;

        tracing::info!(nodes = graph.len(), jobs, environment = %resolved.environment, "starting build");

        let mut waiting: Vec<NodeId> = graph.build_order().to_vec();
        let mut completed: HashMap<NodeId, Completed> = HashMap::new();
        let mut broken: HashSet<NodeId> = HashSet::new();
        let mut reports: Vec<NodeReport> = Vec::new();
        let mut errors: Vec<(NodeId, NodeError)> = Vec::new();
        let mut running: HashMap<tokio::task::Id, (NodeId, Instant)> = HashMap::new();
        let mut join_set: JoinSet<Result<Completed, NodeError>> = JoinSet::new();
        let mut cancelled = false;

        loop {
            // Waiting nodes are in build order, so a skip reaches every
            // dependent within the same pass.
            let mut still_waiting = Vec::with_capacity(waiting.len());
            for id in waiting {
                let Some(node) = graph.node(&id) else {
                    continue;
                };
                let report = |status| NodeReport {
                    node: id.clone(),
                    kind: node.kind,
                    status,
                    fingerprint: None,
                    output: None,
                    duration_ms: 0,
                };

                if let Some(failed) = node.dependencies().into_iter().find(|d| broken.contains(*d)) {
                    tracing::warn!(node = %id, failed_dependency = %failed, "skipping node due to failed dependency");
                    let skipped = report(NodeStatus::Skipped {
                        failed_dependency: failed.clone(),
                    });
                    observer.node_finished(&skipped);
                    reports.push(skipped);
                    broken.insert(id);
                    continue;
                }
                if cancelled {
                    let entry = report(NodeStatus::Cancelled);
                    observer.node_finished(&entry);
                    reports.push(entry);
                    broken.insert(id);
                    continue;
                }
                let ready = node.dependencies().iter().all(|d| completed.contains_key(*d));
                if ready && running.len() < jobs {
                    observer.node_started(&id);
                    let handle = join_set.spawn(build_node(
                        Arc::clone(&ctx),
                        node.clone(),
                        completed.clone(),
                    ));
                    running.insert(handle.id(), (id, Instant::now()));
                } else {
                    still_waiting.push(id);
                }
            }
            waiting = still_waiting;

            let Some(joined) = join_set.join_next_with_id().await else {
                // Nothing in flight and nothing could start
                for id in waiting.drain(..) {
                    let kind = graph.node(&id).map_or(NodeKind::Project, |n| n.kind);
                    reports.push(NodeReport {
                        node: id,
                        kind,
                        status: NodeStatus::Cancelled,
                        fingerprint: None,
                        output: None,
                        duration_ms: 0,
                    });
                }
                break;
            };

            let (task_id, result) = match joined {
                Ok((task_id, result)) => (task_id, result),
                Err(join_error) => {
                    let task_id = join_error.id();
                    (
                        task_id,
                        Err(NodeError::Worker {
                            node: running
                                .get(&task_id)
                                .map_or_else(String::new, |(id, _)| id.to_string()),
                            error: join_error.to_string(),
                        }),
                    )
                }
            };
            let Some((id, started)) = running.remove(&task_id) else {
                continue;
            };
            let kind = graph.node(&id).map_or(NodeKind::Project, |n| n.kind);
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let report = match result {
                Ok(done) => {
                    let status = if done.from_cache {
                        NodeStatus::Cached
                    } else {
                        NodeStatus::Built
                    };
                    tracing::info!(node = %id, status = status.label(), fingerprint = %done.fingerprint.short(), "node finished");
                    let report = NodeReport {
                        node: id.clone(),
                        kind,
                        status,
                        fingerprint: Some(done.fingerprint.clone()),
                        output: Some(done.output.clone()),
                        duration_ms,
                    };
                    completed.insert(id, done);
                    report
                }
                Err(error) => {
                    tracing::error!(node = %id, %error, "node failed");
                    if self.options.fail_mode == FailMode::FailFast {
                        cancelled = true;
                    }
                    broken.insert(id.clone());
                    let report = NodeReport {
                        node: id.clone(),
                        kind,
                        status: NodeStatus::Failed {
                            error: error.to_string(),
                        },
                        fingerprint: None,
                        output: None,
                        duration_ms,
                    };
                    errors.push((id, error));
                    report
                }
            };
            observer.node_finished(&report);
            reports.push(report);
        }

        let position = |id: &NodeId| graph.position(id).unwrap_or(usize::MAX);
        reports.sort_by_key(|r| position(&r.node));
        errors.sort_by_key(|(id, _)| position(id));

        let report = BuildReport {
            environment: resolved.environment.to_string(),
            nodes: reports,
            errors,
        };
        tracing::info!(
            built = report.count("built"),
            cached = report.count("cached"),
            failed = report.count("failed"),
            skipped = report.count("skipped"),
            cancelled = report.count("cancelled"),
            "build finished"
        );
        report
    }

    /// Fetch every library of `resolved`, at most `jobs` at a time
    pub async fn fetch_libraries(
        &self,
        resolved: &ResolvedGraph,
    ) -> Vec<(NodeId, Result<Fetched, ArtifactError>)> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.options.jobs.max(1)));
        let mut join_set = JoinSet::new();

        for node in resolved.graph.nodes() {
            let Some(NodePlan::Library(library)) = resolved.plan(&node.id) else {
                continue;
            };
            let id = node.id.clone();
            let library = library.clone();
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = match store.fetch(id.as_str(), &library).await {
                    Ok(fetched) => store
                        .fetch_sources(id.as_str(), &library)
                        .await
                        .map(|_| fetched),
                    Err(e) => Err(e),
                };
                (id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "fetch task failed"),
            }
        }
        results.sort_by_key(|(id, _)| resolved.graph.position(id).unwrap_or(usize::MAX));
        results
    }
}

/// Build one node; runs as a scheduler task
async fn build_node(
    ctx: Arc<Context>,
    node: Node,
    completed: HashMap<NodeId, Completed>,
) -> Result<Completed, NodeError> {
    let env = &ctx.resolved.environment;
    let mut fingerprint = FingerprintBuilder::new(&node.id, node.kind, env);
    for dep in node.dependencies() {
        if let Some(done) = completed.get(dep) {
            fingerprint.dependency(dep, &done.fingerprint);
        }
    }

    match ctx.resolved.plan(&node.id) {
        Some(NodePlan::Library(library)) => {
            build_library(&ctx, &node, library, fingerprint, &completed).await
        }
        Some(NodePlan::Project(plan)) => {
            build_project(&ctx, &node, plan, fingerprint, &completed).await
        }
        Some(NodePlan::Distribution(plan)) => {
            build_distribution(&ctx, &node, plan, fingerprint, &completed).await
        }
        None => Err(NodeError::Worker {
            node: node.id.to_string(),
            error: "no build plan".to_string(),
        }),
    }
}

/// Classpath contributed by the regular dependencies of `node`
fn dependency_classpath(node: &Node, completed: &HashMap<NodeId, Completed>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    node.dependencies_of(EdgeKind::Dependency)
        .filter_map(|dep| completed.get(dep))
        .flat_map(|done| done.classpath.iter().cloned())
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

async fn build_library(
    ctx: &Context,
    node: &Node,
    library: &LibraryDescriptor,
    mut fingerprint: FingerprintBuilder,
    completed: &HashMap<NodeId, Completed>,
) -> Result<Completed, NodeError> {
    let fetched = ctx.store.fetch(node.id.as_str(), library).await?;
    let sources = ctx.store.fetch_sources(node.id.as_str(), library).await?;
    if let Some(checksum) = library.checksum() {
        fingerprint.field("checksum", &checksum.to_string());
    }
    if let Some(checksum) = library.sources().and_then(|sources| sources.checksum()) {
        fingerprint.field("sources", &checksum.to_string());
    }
    let mut classpath = vec![fetched.path.clone()];
    classpath.extend(dependency_classpath(node, completed));
    Ok(Completed {
        fingerprint: fingerprint.finish(),
        output: fetched.path,
        classpath,
        from_cache: fetched.from_cache && sources.map_or(true, |sources| sources.from_cache),
    })
}

fn result_root(output_dir: &Path, output: Option<&str>) -> PathBuf {
    match output {
        Some(sub) if !sub.is_empty() && sub != "." => output_dir.join(sub),
        _ => output_dir.to_path_buf(),
    }
}

async fn build_project(
    ctx: &Context,
    node: &Node,
    plan: &ProjectPlan,
    mut fingerprint: FingerprintBuilder,
    completed: &HashMap<NodeId, Completed>,
) -> Result<Completed, NodeError> {
    let processors: Vec<&NodeId> = node.dependencies_of(EdgeKind::Processor).collect();
    let command = plan.build_command.as_deref();

    for dir in &plan.source_dirs {
        let key = dir
            .strip_prefix(&plan.dir)
            .map_or_else(|_| dir.display().to_string(), filesystem::to_slash);
        fingerprint.tree(&key, dir)?;
    }
    fingerprint.field("compile", &ctx.toolchain.identity(BuildStep::Compile, command));
    if !processors.is_empty() {
        fingerprint.field("processor", &ctx.toolchain.identity(BuildStep::Processor, None));
    }
    fingerprint.field("compliance", plan.java_compliance.as_deref().unwrap_or(""));
    fingerprint.field("output", plan.output.as_deref().unwrap_or(""));
    for result in &plan.results {
        fingerprint.field("result", result);
    }
    let fingerprint = fingerprint.finish();

    let mut classpath = Vec::new();
    let dependencies = dependency_classpath(node, completed);

    if !ctx.options.force {
        if ctx.cache.lookup(&node.id, &fingerprint).await.is_some() {
            tracing::debug!(node = %node.id, fingerprint = %fingerprint.short(), "build cache hit");
            let output = result_root(&ctx.cache.output_dir(&fingerprint), plan.output.as_deref());
            classpath.push(output.clone());
            classpath.extend(dependencies);
            return Ok(Completed {
                fingerprint,
                output,
                classpath,
                from_cache: true,
            });
        }
    }

    let entry = ctx.cache.begin(&node.id, node.kind, &fingerprint).await?;
    let output_dir = entry.output_dir();

    let mut build_env = BuildEnvironment::new(
        node.id.as_str(),
        plan.dir.clone(),
        output_dir.clone(),
        ctx.resolved.environment.clone(),
    )
    .with_jobs(ctx.options.jobs.max(1));
    build_env.source_dirs = plan.source_dirs.clone();
    build_env.classpath = dependencies.clone();
    build_env.processor_path = processors
        .iter()
        .filter_map(|p| completed.get(*p))
        .map(|done| done.output.clone())
        .collect();
    build_env.java_compliance = plan.java_compliance.clone();

    if !processors.is_empty() {
        filesystem::create_dir_all(&build_env.generated_dir)?;
        run_step(ctx, &node.id, BuildStep::Processor, None, &build_env).await?;
        let generated = build_env.generated_dir.clone();
        build_env.source_dirs.push(generated);
    }
    run_step(ctx, &node.id, BuildStep::Compile, command, &build_env).await?;

    let output = result_root(&output_dir, plan.output.as_deref());
    for result in &plan.results {
        if !output.join(result).exists() {
            return Err(NodeError::MissingResult {
                node: node.id.to_string(),
                path: result.clone(),
            });
        }
    }

    let record = entry.commit()?;
    tracing::debug!(node = %node.id, files = record.files, "build recorded");

    let output = result_root(&ctx.cache.output_dir(&fingerprint), plan.output.as_deref());
    classpath.push(output.clone());
    classpath.extend(dependencies);
    Ok(Completed {
        fingerprint,
        output,
        classpath,
        from_cache: false,
    })
}

async fn run_step(
    ctx: &Context,
    node: &NodeId,
    step: BuildStep,
    command: Option<&[String]>,
    env: &BuildEnvironment,
) -> Result<(), NodeError> {
    let toolchain = Arc::clone(&ctx.toolchain);
    let command = command.map(<[String]>::to_vec);
    let env = env.clone();
    let failed = |error: ToolchainError| NodeError::StepFailed {
        node: node.to_string(),
        step: step.to_string(),
        error,
    };

    tracing::info!(node = %node, %step, "running");
    tokio::task::spawn_blocking(move || toolchain.run(step, command.as_deref(), &env))
        .await
        .map_err(|e| NodeError::Worker {
            node: node.to_string(),
            error: e.to_string(),
        })?
        .map_err(failed)
}

async fn build_distribution(
    ctx: &Context,
    node: &Node,
    plan: &DistributionPlan,
    mut fingerprint: FingerprintBuilder,
    completed: &HashMap<NodeId, Completed>,
) -> Result<Completed, NodeError> {
    fingerprint.field("native", if plan.native { "true" } else { "false" });
    for id in &plan.exclude {
        fingerprint.field("exclude", id.as_str());
    }
    for entry in &plan.layout {
        fingerprint.field("dest", &entry.dest);
        for (source, declared) in entry.sources.iter().zip(&entry.declared) {
            fingerprint.field("source", declared);
            if let PlannedSource::File { path } = source {
                fingerprint.tree(declared, path)?;
            }
        }
    }
    let fingerprint = fingerprint.finish();

    let cached = !ctx.options.force && ctx.cache.lookup(&node.id, &fingerprint).await.is_some();
    if cached {
        tracing::debug!(node = %node.id, fingerprint = %fingerprint.short(), "build cache hit");
    } else {
        let entry = ctx.cache.begin(&node.id, node.kind, &fingerprint).await?;
        let outputs: HashMap<NodeId, PathBuf> = completed
            .iter()
            .map(|(id, done)| (id.clone(), done.output.clone()))
            .collect();
        let manifest = assemble(
            &node.id,
            plan,
            &ctx.resolved.graph,
            &outputs,
            &ctx.resolved.environment,
            &entry.output_dir(),
        )?;
        write_manifest(&entry.dir().join(MANIFEST_FILE), &manifest)?;
        entry.commit()?;
    }

    let output = ctx.cache.output_dir(&fingerprint);
    if let Some(dist_dir) = &ctx.options.dist_dir {
        export(&output, &ctx.cache.entry_dir(&fingerprint), dist_dir, &node.id)?;
    }

    Ok(Completed {
        fingerprint,
        classpath: vec![output.clone()],
        output,
        from_cache: cached,
    })
}

fn write_manifest(path: &Path, manifest: &DistributionManifest) -> Result<(), NodeError> {
    let json = manifest.to_json().map_err(|e| crate::error::FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    filesystem::write_file(path, json.as_bytes())?;
    Ok(())
}

/// Copy a finished distribution to `<dist_dir>/<name>` with its manifest
fn export(output: &Path, entry: &Path, dist_dir: &Path, id: &NodeId) -> Result<(), NodeError> {
    let target = dist_dir.join(id.name());
    filesystem::remove_all(&target)?;
    filesystem::create_dir_all(&target)?;
    filesystem::copy_tree(output, &target)?;
    let manifest = entry.join(MANIFEST_FILE);
    if manifest.is_file() {
        filesystem::copy_file(&manifest, &dist_dir.join(format!("{}.{MANIFEST_FILE}", id.name())))?;
    }
    tracing::debug!(distribution = %id, target = %target.display(), "distribution exported");
    Ok(())
}
