//! Variant resolution
//!
//! Binds a graph to one build environment: every overlaid project is
//! replaced by the single applicable overlay (or kept as is), and every
//! platform-conditional branch is selected. The result carries a plan per
//! node so that nothing downstream looks at descriptors or the environment
//! again.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::core::descriptor::{
    DistributionDescriptor, Entity, LayoutEntry, LayoutSource, LibraryDescriptor,
    ProjectDescriptor,
};
use crate::core::graph::{lookup, resolve_reference, EdgeKind, Graph, Node, NodeId};
use crate::core::platform::{restriction_matches, select_branch, Environment};
use crate::error::{GraphError, VariantError};
use crate::registry::{RegisteredSuite, Registry};

/// How a project is realized in this environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum ResolvedProject {
    /// The project's own sources
    Base { project: NodeId },
    /// An overlay's sources stand in for the project
    Overlaid { project: NodeId, overlay: NodeId },
}

impl ResolvedProject {
    /// The overlay in effect, if any
    pub fn overlay(&self) -> Option<&NodeId> {
        match self {
            Self::Base { .. } => None,
            Self::Overlaid { overlay, .. } => Some(overlay),
        }
    }
}

/// Everything needed to build one project
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectPlan {
    pub variant: ResolvedProject,
    /// Directory the build runs in
    pub dir: PathBuf,
    pub source_dirs: Vec<PathBuf>,
    pub java_compliance: Option<String>,
    pub build_command: Option<Vec<String>>,
    /// Subdirectory of the build output that is the project's result
    pub output: Option<String>,
    /// Paths, relative to the build output, that must exist afterwards
    pub results: Vec<String>,
}

/// A layout source with references resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlannedSource {
    File { path: PathBuf },
    Node { id: NodeId, subpath: Option<String> },
    Text { content: String },
}

/// One layout entry after branch selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedEntry {
    pub dest: String,
    pub sources: Vec<PlannedSource>,
    /// Declared form of each source, for the manifest
    pub declared: Vec<String>,
}

/// Everything needed to assemble one distribution
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionPlan {
    pub native: bool,
    pub dependencies: Vec<NodeId>,
    pub dist_dependencies: Vec<NodeId>,
    pub exclude: Vec<NodeId>,
    /// Base entries followed by the selected branch's entries
    pub layout: Vec<PlannedEntry>,
}

impl DistributionPlan {
    /// Nodes referenced from `dependency:` layout sources
    pub fn layout_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.layout
            .iter()
            .flat_map(|entry| &entry.sources)
            .filter_map(|source| match source {
                PlannedSource::Node { id, .. } => Some(id),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodePlan {
    Library(LibraryDescriptor),
    Project(ProjectPlan),
    Distribution(DistributionPlan),
}

/// A graph bound to one environment
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    pub graph: Graph,
    pub environment: Environment,
    plans: HashMap<NodeId, NodePlan>,
}

impl ResolvedGraph {
    pub fn plan(&self, id: &NodeId) -> Option<&NodePlan> {
        self.plans.get(id)
    }

    pub fn project(&self, id: &NodeId) -> Option<&ProjectPlan> {
        match self.plans.get(id) {
            Some(NodePlan::Project(plan)) => Some(plan),
            _ => None,
        }
    }

    pub fn distribution(&self, id: &NodeId) -> Option<&DistributionPlan> {
        match self.plans.get(id) {
            Some(NodePlan::Distribution(plan)) => Some(plan),
            _ => None,
        }
    }

    /// Projects realized through an overlay
    pub fn overlaid(&self) -> impl Iterator<Item = (&NodeId, &NodeId)> {
        self.graph.nodes().iter().filter_map(|node| {
            self.project(&node.id)
                .and_then(|plan| plan.variant.overlay())
                .map(|overlay| (&node.id, overlay))
        })
    }

    /// Keep only `roots` and what they depend on
    #[must_use]
    pub fn restricted_to(&self, roots: &[NodeId]) -> Self {
        let graph = self.graph.restricted_to(roots);
        let plans = self
            .plans
            .iter()
            .filter(|(id, _)| graph.contains(id))
            .map(|(id, plan)| (id.clone(), plan.clone()))
            .collect();
        Self {
            graph,
            environment: self.environment.clone(),
            plans,
        }
    }
}

/// Overlay bookkeeping for one resolution
struct Overlays {
    /// overlay id -> target id
    targets: HashMap<NodeId, NodeId>,
    /// target id -> chosen overlay
    chosen: HashMap<NodeId, NodeId>,
}

impl Overlays {
    fn rewire(&self, id: &NodeId) -> NodeId {
        self.targets.get(id).cloned().unwrap_or_else(|| id.clone())
    }
}

fn overlay_applies(project: &ProjectDescriptor, env: &Environment) -> bool {
    project.compliance().map_or(true, |c| c.matches(env.jdk))
        && restriction_matches(project.os.as_deref(), project.arch.as_deref(), env)
}

/// Bind `graph` to `env`
pub fn resolve(
    graph: &Graph,
    registry: &Registry,
    env: &Environment,
) -> Result<ResolvedGraph, VariantError> {
    let overlays = select_overlays(graph, registry, env)?;

    let mut plans = HashMap::new();
    for node in graph.nodes() {
        if overlays.targets.contains_key(&node.id) {
            continue;
        }
        let (suite, entity) = lookup(registry, &node.id).ok_or_else(|| {
            GraphError::UnknownReference {
                from: node.id.to_string(),
                reference: node.id.to_string(),
            }
        })?;
        let plan = match entity {
            Entity::Library(library) => NodePlan::Library(library.clone()),
            Entity::Project(project) => NodePlan::Project(plan_project(
                &node.id, suite, project, &overlays, registry, env,
            )?),
            Entity::Distribution(distribution) => NodePlan::Distribution(plan_distribution(
                &node.id,
                suite,
                distribution,
                &overlays,
                registry,
                env,
            )?),
        };
        plans.insert(node.id.clone(), plan);
    }

    let mut nodes = Vec::new();
    for node in graph.nodes() {
        if overlays.targets.contains_key(&node.id) {
            continue;
        }
        // Layout edges of unselected branches are dropped
        let layout_targets: HashSet<&NodeId> = match plans.get(&node.id) {
            Some(NodePlan::Distribution(plan)) => plan.layout_nodes().collect(),
            _ => HashSet::new(),
        };
        let mut resolved = Node::new(node.id.clone(), node.kind);
        let absorbed = overlays
            .chosen
            .get(&node.id)
            .and_then(|overlay| graph.node(overlay));
        for edge in node.edges.iter().chain(absorbed.into_iter().flat_map(|o| &o.edges)) {
            let target = overlays.rewire(&edge.target);
            if target == node.id {
                continue;
            }
            if edge.kind == EdgeKind::Layout && !layout_targets.contains(&target) {
                continue;
            }
            resolved.add_edge(target, edge.kind);
        }
        nodes.push(resolved);
    }
    let resolved_graph = Graph::from_nodes(nodes)?;

    for (target, overlay) in &overlays.chosen {
        tracing::info!(project = %target, %overlay, environment = %env, "overlay selected");
    }

    Ok(ResolvedGraph {
        graph: resolved_graph,
        environment: env.clone(),
        plans,
    })
}

fn select_overlays(
    graph: &Graph,
    registry: &Registry,
    env: &Environment,
) -> Result<Overlays, VariantError> {
    let mut targets = HashMap::new();
    let mut candidates: Vec<(NodeId, Vec<NodeId>)> = Vec::new();

    for node in graph.nodes() {
        let Some((suite, Entity::Project(project))) = lookup(registry, &node.id) else {
            continue;
        };
        let Some(target) = &project.overlay_target else {
            continue;
        };
        let (target, _) = resolve_reference(registry, suite.name(), &node.id, target)?;
        targets.insert(node.id.clone(), target.clone());

        if !overlay_applies(project, env) {
            continue;
        }
        match candidates.iter_mut().find(|(t, _)| *t == target) {
            Some((_, list)) => list.push(node.id.clone()),
            None => candidates.push((target, vec![node.id.clone()])),
        }
    }

    let mut chosen = HashMap::new();
    for (target, applicable) in candidates {
        if applicable.len() > 1 {
            return Err(VariantError::AmbiguousOverlay {
                target: target.to_string(),
                candidates: applicable.iter().map(ToString::to_string).collect(),
                environment: env.to_string(),
            });
        }
        if let Some(overlay) = applicable.into_iter().next() {
            chosen.insert(target, overlay);
        }
    }

    Ok(Overlays { targets, chosen })
}

fn plan_project(
    id: &NodeId,
    suite: &RegisteredSuite,
    project: &ProjectDescriptor,
    overlays: &Overlays,
    registry: &Registry,
    env: &Environment,
) -> Result<ProjectPlan, VariantError> {
    let (output, results) = if project.platform.is_empty() {
        (project.output.clone(), project.results.clone())
    } else {
        let branch = select_branch(&project.platform, env).ok_or_else(|| {
            VariantError::UnsupportedPlatform {
                entity: id.to_string(),
                environment: env.to_string(),
            }
        })?;
        let results = if branch.results.is_empty() {
            project.results.clone()
        } else {
            branch.results.clone()
        };
        (branch.output.clone().or_else(|| project.output.clone()), results)
    };

    let overlay = overlays
        .chosen
        .get(id)
        .and_then(|overlay_id| match lookup(registry, overlay_id) {
            Some((overlay_suite, Entity::Project(overlay))) => {
                Some((overlay_id.clone(), overlay_suite, overlay))
            }
            _ => None,
        });

    let plan = match overlay {
        Some((overlay_id, overlay_suite, overlay)) => {
            let dir = overlay_suite.dir.join(overlay.relative_dir());
            ProjectPlan {
                variant: ResolvedProject::Overlaid {
                    project: id.clone(),
                    overlay: overlay_id,
                },
                source_dirs: overlay.source_dirs.iter().map(|s| dir.join(s)).collect(),
                dir,
                java_compliance: overlay
                    .java_compliance
                    .clone()
                    .or_else(|| project.java_compliance.clone()),
                build_command: overlay
                    .build_command
                    .clone()
                    .or_else(|| project.build_command.clone()),
                output,
                results,
            }
        }
        None => {
            let dir = suite.dir.join(project.relative_dir());
            ProjectPlan {
                variant: ResolvedProject::Base {
                    project: id.clone(),
                },
                source_dirs: project.source_dirs.iter().map(|s| dir.join(s)).collect(),
                dir,
                java_compliance: project.java_compliance.clone(),
                build_command: project.build_command.clone(),
                output,
                results,
            }
        }
    };
    Ok(plan)
}

fn plan_distribution(
    id: &NodeId,
    suite: &RegisteredSuite,
    distribution: &DistributionDescriptor,
    overlays: &Overlays,
    registry: &Registry,
    env: &Environment,
) -> Result<DistributionPlan, VariantError> {
    let mut entries: Vec<&LayoutEntry> = distribution.layout.iter().collect();
    if !distribution.platform.is_empty() {
        let branch = select_branch(&distribution.platform, env).ok_or_else(|| {
            VariantError::UnsupportedPlatform {
                entity: id.to_string(),
                environment: env.to_string(),
            }
        })?;
        entries.extend(branch.layout.iter());
    }

    let resolve = |reference: &str| -> Result<NodeId, VariantError> {
        let (target, _) = resolve_reference(registry, suite.name(), id, reference)?;
        Ok(overlays.rewire(&target))
    };

    let mut layout = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut sources = Vec::new();
        for source in entry.source.as_slice() {
            sources.push(match source {
                LayoutSource::File(path) => PlannedSource::File {
                    path: suite.dir.join(path),
                },
                LayoutSource::Dependency { reference, subpath } => PlannedSource::Node {
                    id: resolve(reference)?,
                    subpath: subpath.clone(),
                },
                LayoutSource::Text(content) => PlannedSource::Text {
                    content: content.clone(),
                },
            });
        }
        layout.push(PlannedEntry {
            dest: entry.dest.clone(),
            sources,
            declared: entry
                .source
                .as_slice()
                .iter()
                .map(ToString::to_string)
                .collect(),
        });
    }

    let resolve_all = |references: &[String]| -> Result<Vec<NodeId>, VariantError> {
        references.iter().map(|r| resolve(r)).collect()
    };

    Ok(DistributionPlan {
        native: distribution.native,
        dependencies: resolve_all(&distribution.dependencies)?,
        dist_dependencies: resolve_all(&distribution.dist_dependencies)?,
        exclude: resolve_all(&distribution.exclude)?,
        layout,
    })
}
