//! Dependency graph construction
//!
//! One node per library, project and distribution of every registered
//! suite, with edges pointing from a node to what it needs. The build
//! order is a post-order DFS: seeds are distributions in registry order,
//! then the remaining nodes; children are visited in declaration order, so
//! independent nodes keep a deterministic relative order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write as _};

use crate::core::descriptor::Entity;
use crate::error::GraphError;
use crate::registry::{RegisteredSuite, Registry};

/// Qualified node name, `suite:name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(suite: &str, name: &str) -> Self {
        Self(format!("{suite}:{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn suite(&self) -> &str {
        self.0.split_once(':').map_or("", |(suite, _)| suite)
    }

    pub fn name(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Library,
    Project,
    Distribution,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Library => "library",
            Self::Project => "project",
            Self::Distribution => "distribution",
        })
    }
}

/// Why one node depends on another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Regular dependency; its output is an input
    Dependency,
    /// Ordering only
    BuildOrder,
    /// Annotation processor distribution
    Processor,
    /// Distribution built before and linked against
    DistDependency,
    /// Referenced from a layout entry
    Layout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub target: NodeId,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub edges: Vec<Edge>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            edges: Vec::new(),
        }
    }

    /// Add an edge unless an identical one exists
    pub fn add_edge(&mut self, target: NodeId, kind: EdgeKind) {
        if !self.edges.iter().any(|e| e.target == target && e.kind == kind) {
            self.edges.push(Edge { target, kind });
        }
    }

    /// Distinct dependency ids in declaration order
    pub fn dependencies(&self) -> Vec<&NodeId> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .map(|e| &e.target)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Dependencies reached through edges of `kind`
    pub fn dependencies_of(&self, kind: EdgeKind) -> impl Iterator<Item = &NodeId> {
        self.edges
            .iter()
            .filter(move |e| e.kind == kind)
            .map(|e| &e.target)
    }
}

/// A validated, acyclic dependency graph with its build order
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    order: Vec<NodeId>,
}

/// Resolve a `name` or `suite:name` reference made inside `from_suite`
pub fn resolve_reference(
    registry: &Registry,
    from_suite: &str,
    from: &NodeId,
    reference: &str,
) -> Result<(NodeId, NodeKind), GraphError> {
    let (suite_name, name) = reference
        .split_once(':')
        .unwrap_or((from_suite, reference));

    let unknown = || GraphError::UnknownReference {
        from: from.to_string(),
        reference: reference.to_string(),
    };

    let suite = registry.get(suite_name).ok_or_else(unknown)?;
    let kind = match suite.descriptor.entity(name).ok_or_else(unknown)? {
        Entity::Library(_) => NodeKind::Library,
        Entity::Project(_) => NodeKind::Project,
        Entity::Distribution(_) => NodeKind::Distribution,
    };
    Ok((NodeId::new(suite_name, name), kind))
}

/// The suite and descriptor entity behind a node id
pub fn lookup<'r>(registry: &'r Registry, id: &NodeId) -> Option<(&'r RegisteredSuite, Entity<'r>)> {
    let suite = registry.get(id.suite())?;
    let entity = suite.descriptor.entity(id.name())?;
    Some((suite, entity))
}

fn expect_kind(
    from: &NodeId,
    reference: &str,
    found: NodeKind,
    allowed: &[NodeKind],
    what: &str,
) -> Result<(), GraphError> {
    if allowed.contains(&found) {
        Ok(())
    } else {
        Err(GraphError::InvalidReference {
            from: from.to_string(),
            reference: reference.to_string(),
            reason: format!("{what} must name a {}, found a {found}", join_kinds(allowed)),
        })
    }
}

fn join_kinds(kinds: &[NodeKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

const ANY: &[NodeKind] = &[NodeKind::Library, NodeKind::Project, NodeKind::Distribution];
const PACKAGEABLE: &[NodeKind] = &[NodeKind::Library, NodeKind::Project];
const LIBRARIES: &[NodeKind] = &[NodeKind::Library];
const PROJECTS: &[NodeKind] = &[NodeKind::Project];
const DISTRIBUTIONS: &[NodeKind] = &[NodeKind::Distribution];

/// Resolve `reference`, check its kind and record the edge
fn link(
    registry: &Registry,
    suite: &str,
    node: &mut Node,
    reference: &str,
    kind: EdgeKind,
    allowed: &[NodeKind],
    what: &str,
) -> Result<(), GraphError> {
    let (target, found) = resolve_reference(registry, suite, &node.id, reference)?;
    expect_kind(&node.id, reference, found, allowed, what)?;
    node.add_edge(target, kind);
    Ok(())
}

impl Graph {
    /// Build the graph of every entity in `registry`
    pub fn build(registry: &Registry) -> Result<Self, GraphError> {
        let mut nodes = Vec::new();

        for suite in registry.suites() {
            let name = suite.name();
            let descriptor = &suite.descriptor;
            for library in &descriptor.libraries {
                let mut node = Node::new(NodeId::new(name, &library.name), NodeKind::Library);
                for dep in &library.dependencies {
                    link(registry, name, &mut node, dep, EdgeKind::Dependency, LIBRARIES, "a library dependency")?;
                }
                nodes.push(node);
            }

            for project in &descriptor.projects {
                let mut node = Node::new(NodeId::new(name, &project.name), NodeKind::Project);
                for dep in &project.dependencies {
                    link(registry, name, &mut node, dep, EdgeKind::Dependency, ANY, "a dependency")?;
                }
                for dep in &project.build_dependencies {
                    link(registry, name, &mut node, dep, EdgeKind::BuildOrder, ANY, "a build dependency")?;
                }
                for processor in &project.annotation_processors {
                    link(
                        registry,
                        name,
                        &mut node,
                        processor,
                        EdgeKind::Processor,
                        DISTRIBUTIONS,
                        "an annotation processor",
                    )?;
                }
                if let Some(target) = &project.overlay_target {
                    let (_, found) = resolve_reference(registry, name, &node.id, target)?;
                    expect_kind(&node.id, target, found, PROJECTS, "an overlay target")?;
                }
                nodes.push(node);
            }

            for distribution in &descriptor.distributions {
                let mut node =
                    Node::new(NodeId::new(name, &distribution.name), NodeKind::Distribution);
                for dep in &distribution.dependencies {
                    link(registry, name, &mut node, dep, EdgeKind::Dependency, PACKAGEABLE, "a distribution dependency")?;
                }
                for dep in &distribution.dist_dependencies {
                    link(
                        registry,
                        name,
                        &mut node,
                        dep,
                        EdgeKind::DistDependency,
                        DISTRIBUTIONS,
                        "a dist dependency",
                    )?;
                }
                for reference in distribution.layout_references() {
                    link(registry, name, &mut node, reference, EdgeKind::Layout, ANY, "a layout dependency")?;
                }
                for excluded in &distribution.exclude {
                    resolve_reference(registry, name, &node.id, excluded)?;
                }
                nodes.push(node);
            }
        }

        let graph = Self::from_nodes(nodes)?;
        tracing::debug!(nodes = graph.len(), "dependency graph built");
        Ok(graph)
    }

    /// Validate `nodes` and compute their build order
    ///
    /// Every edge must point at a node in the list.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, GraphError> {
        let index: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();

        for node in &nodes {
            for edge in &node.edges {
                if !index.contains_key(&edge.target) {
                    return Err(GraphError::UnknownReference {
                        from: node.id.to_string(),
                        reference: edge.target.to_string(),
                    });
                }
            }
        }

        let mut graph = Self {
            nodes,
            index,
            order: Vec::new(),
        };
        graph.order = graph.topological_order()?;
        Ok(graph)
    }

    fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut visited = vec![false; self.nodes.len()];
        let mut on_path = vec![false; self.nodes.len()];
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        let seeds = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == NodeKind::Distribution)
            .chain(
                self.nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| n.kind != NodeKind::Distribution),
            )
            .map(|(i, _)| i);

        for seed in seeds {
            self.visit(seed, &mut visited, &mut on_path, &mut path, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        node: usize,
        visited: &mut [bool],
        on_path: &mut [bool],
        path: &mut Vec<usize>,
        order: &mut Vec<NodeId>,
    ) -> Result<(), GraphError> {
        if on_path[node] {
            let start = path.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..]
                .iter()
                .map(|&n| self.nodes[n].id.to_string())
                .collect();
            cycle.push(self.nodes[node].id.to_string());
            return Err(GraphError::CyclicDependency { cycle });
        }
        if visited[node] {
            return Ok(());
        }

        on_path[node] = true;
        path.push(node);

        for dep in self.nodes[node].dependencies() {
            self.visit(self.index[dep], visited, on_path, path, order)?;
        }

        path.pop();
        on_path[node] = false;
        visited[node] = true;
        order.push(self.nodes[node].id.clone());
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    /// Dependencies strictly before dependents
    pub fn build_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Position of `id` in the build order
    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.order.iter().position(|n| n == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Find a node by `suite:name`, or by bare name preferring `primary_suite`
    pub fn find(&self, target: &str, primary_suite: Option<&str>) -> Result<NodeId, GraphError> {
        if target.contains(':') {
            let id = NodeId(target.to_string());
            return if self.contains(&id) {
                Ok(id)
            } else {
                Err(GraphError::UnknownTarget(target.to_string()))
            };
        }

        let matches: Vec<&NodeId> = self
            .nodes
            .iter()
            .map(|n| &n.id)
            .filter(|id| id.name() == target)
            .collect();
        if let Some(id) = matches.iter().find(|id| Some(id.suite()) == primary_suite) {
            return Ok((*id).clone());
        }
        match matches.as_slice() {
            [] => Err(GraphError::UnknownTarget(target.to_string())),
            [id] => Ok((*id).clone()),
            candidates => Err(GraphError::AmbiguousTarget {
                target: target.to_string(),
                candidates: candidates.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    /// `roots` and everything they transitively depend on
    pub fn closure(&self, roots: &[NodeId]) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&NodeId> = roots.iter().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.node(id) {
                stack.extend(node.dependencies());
            }
        }
        seen
    }

    /// Subgraph of `roots` and their transitive dependencies
    pub fn restricted_to(&self, roots: &[NodeId]) -> Self {
        let keep = self.closure(roots);
        let nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| keep.contains(&n.id))
            .cloned()
            .collect();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();
        let order = self
            .order
            .iter()
            .filter(|id| keep.contains(*id))
            .cloned()
            .collect();
        Self {
            nodes,
            index,
            order,
        }
    }

    /// Render in Graphviz DOT format
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph suites {\n    rankdir=BT;\n");
        for node in &self.nodes {
            let shape = match node.kind {
                NodeKind::Library => "ellipse",
                NodeKind::Project => "box",
                NodeKind::Distribution => "folder",
            };
            let _ = writeln!(out, "    \"{}\" [shape={shape}];", node.id);
        }
        for node in &self.nodes {
            for edge in &node.edges {
                let style = match edge.kind {
                    EdgeKind::Dependency | EdgeKind::DistDependency => "",
                    EdgeKind::BuildOrder => " [style=dashed]",
                    EdgeKind::Processor => " [style=dotted, label=\"processor\"]",
                    EdgeKind::Layout => " [style=dotted]",
                };
                let _ = writeln!(out, "    \"{}\" -> \"{}\"{style};", node.id, edge.target);
            }
        }
        out.push_str("}\n");
        out
    }
}
