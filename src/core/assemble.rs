//! Distribution assembly
//!
//! Materializes a distribution from built outputs. A distribution with a
//! layout gets exactly its layout; one without gets the outputs of the
//! projects and libraries it transitively packages, minus exclusions and
//! whatever its distribution dependencies already provide.
//!
//! Layout rules:
//! - entries apply in declared order, base entries before the selected
//!   platform branch's entries;
//! - of several entries with the same destination only the last applies;
//! - a destination ending in `/` (or `./`) is a directory: a whole
//!   dependency output is merged into it, anything else is placed under
//!   its own file name;
//! - any other destination is a file or tree path that the source
//!   replaces.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::core::graph::{EdgeKind, Graph, NodeId, NodeKind};
use crate::core::platform::Environment;
use crate::core::variant::{DistributionPlan, PlannedEntry, PlannedSource};
use crate::error::AssemblyError;
use crate::infra::download::{compute_checksum, ChecksumAlgorithm};
use crate::infra::filesystem;

/// Where built outputs can be found
pub trait OutputLookup {
    /// Output of `id`: a directory for projects and distributions, the
    /// artifact file for libraries
    fn output_of(&self, id: &NodeId) -> Option<&Path>;
}

impl OutputLookup for HashMap<NodeId, PathBuf> {
    fn output_of(&self, id: &NodeId) -> Option<&Path> {
        self.get(id).map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub dest: String,
    pub sources: Vec<String>,
}

/// Record of what went where
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionManifest {
    pub distribution: NodeId,
    pub environment: String,
    pub entries: Vec<ManifestEntry>,
    /// Every materialized file and its SHA-256
    pub files: BTreeMap<String, String>,
}

impl DistributionManifest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Destination of a layout entry, relative to the distribution root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Destination {
    /// `/`-joined components, empty for the root
    path: String,
    directory: bool,
}

impl Destination {
    fn parse(distribution: &NodeId, dest: &str) -> Result<Self, AssemblyError> {
        let invalid = || AssemblyError::InvalidDestination {
            distribution: distribution.to_string(),
            destination: dest.to_string(),
        };
        if dest.is_empty() || dest.starts_with('/') || Path::new(dest).is_absolute() {
            return Err(invalid());
        }

        let directory = dest.ends_with('/') || dest == ".";
        let mut parts = Vec::new();
        for part in dest.split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => return Err(invalid()),
                other => parts.push(other),
            }
        }
        if parts.is_empty() && !directory {
            return Err(invalid());
        }
        Ok(Self {
            path: parts.join("/"),
            directory,
        })
    }

    fn resolve(&self, root: &Path) -> PathBuf {
        self.path
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(root.to_path_buf(), |acc, part| acc.join(part))
    }
}

/// Assemble distribution `id` into `dest`
///
/// `dest` is cleared first. Returns the manifest; writing it is up to the
/// caller.
pub fn assemble(
    id: &NodeId,
    plan: &DistributionPlan,
    graph: &Graph,
    outputs: &dyn OutputLookup,
    env: &Environment,
    dest: &Path,
) -> Result<DistributionManifest, AssemblyError> {
    filesystem::remove_all(dest)?;
    filesystem::create_dir_all(dest)?;

    let entries = if plan.layout.is_empty() {
        package_dependencies(id, plan, graph, outputs, dest)?
    } else {
        apply_layout(id, &plan.layout, outputs, dest)?
    };

    let mut files = BTreeMap::new();
    for relative in filesystem::list_files(dest)? {
        let content = filesystem::read_file(&dest.join(&relative))?;
        files.insert(
            filesystem::to_slash(&relative),
            compute_checksum(ChecksumAlgorithm::Sha256, &content),
        );
    }

    tracing::debug!(distribution = %id, entries = entries.len(), files = files.len(), "distribution assembled");

    Ok(DistributionManifest {
        distribution: id.clone(),
        environment: env.to_string(),
        entries,
        files,
    })
}

fn apply_layout(
    id: &NodeId,
    layout: &[PlannedEntry],
    outputs: &dyn OutputLookup,
    root: &Path,
) -> Result<Vec<ManifestEntry>, AssemblyError> {
    let destinations = layout
        .iter()
        .map(|entry| Destination::parse(id, &entry.dest))
        .collect::<Result<Vec<_>, _>>()?;

    let mut manifest = Vec::new();
    for (index, (entry, destination)) in layout.iter().zip(&destinations).enumerate() {
        if destinations[index + 1..].contains(destination) {
            tracing::debug!(distribution = %id, dest = %entry.dest, "layout entry overridden by a later one");
            continue;
        }
        let target = destination.resolve(root);
        if !destination.directory {
            filesystem::remove_all(&target)?;
        }
        for (source, declared) in entry.sources.iter().zip(&entry.declared) {
            place(id, source, declared, destination, &target, outputs)?;
        }
        manifest.push(ManifestEntry {
            dest: entry.dest.clone(),
            sources: entry.declared.clone(),
        });
    }
    Ok(manifest)
}

fn place(
    id: &NodeId,
    source: &PlannedSource,
    declared: &str,
    destination: &Destination,
    target: &Path,
    outputs: &dyn OutputLookup,
) -> Result<(), AssemblyError> {
    let missing = || AssemblyError::MissingSource {
        distribution: id.to_string(),
        source_spec: declared.to_string(),
    };

    let (from, merge) = match source {
        PlannedSource::Text { content } => {
            if destination.directory {
                return Err(AssemblyError::InvalidDestination {
                    distribution: id.to_string(),
                    destination: format!("{} (string sources need a file destination)", destination.path),
                });
            }
            filesystem::write_file(target, content.as_bytes())?;
            return Ok(());
        }
        PlannedSource::File { path } => (path.clone(), false),
        PlannedSource::Node {
            id: dependency,
            subpath,
        } => {
            let output = outputs
                .output_of(dependency)
                .ok_or_else(|| AssemblyError::UnbuiltDependency {
                    distribution: id.to_string(),
                    dependency: dependency.to_string(),
                })?;
            match subpath {
                Some(subpath) => {
                    let inside = join_inside(output, subpath).ok_or_else(|| {
                        AssemblyError::InvalidSource {
                            distribution: id.to_string(),
                            source_spec: declared.to_string(),
                        }
                    })?;
                    (inside, false)
                }
                None => (output.to_path_buf(), true),
            }
        }
    };

    if !from.exists() {
        return Err(missing());
    }

    if destination.directory {
        filesystem::create_dir_all(target)?;
        if merge && from.is_dir() {
            filesystem::copy_tree(&from, target)?;
        } else {
            let name = from.file_name().ok_or_else(missing)?;
            filesystem::copy_tree(&from, &target.join(name))?;
        }
    } else {
        filesystem::remove_all(target)?;
        filesystem::copy_tree(&from, target)?;
    }
    Ok(())
}

/// Library and project nodes reachable from `roots` through `edges`
fn packaged(graph: &Graph, roots: &[NodeId], edges: &[EdgeKind]) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut result = HashSet::new();
    let mut stack: Vec<NodeId> = roots.to_vec();
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let Some(node) = graph.node(&id) else {
            continue;
        };
        if matches!(node.kind, NodeKind::Library | NodeKind::Project) {
            result.insert(id.clone());
        }
        stack.extend(
            node.edges
                .iter()
                .filter(|e| edges.contains(&e.kind))
                .map(|e| e.target.clone()),
        );
    }
    result
}

/// `base` joined with a relative `subpath` that stays below `base`
fn join_inside(base: &Path, subpath: &str) -> Option<PathBuf> {
    if subpath.starts_with('/') || Path::new(subpath).is_absolute() {
        return None;
    }
    let mut path = base.to_path_buf();
    for part in subpath.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return None,
            other => path.push(other),
        }
    }
    Some(path)
}

fn package_dependencies(
    id: &NodeId,
    plan: &DistributionPlan,
    graph: &Graph,
    outputs: &dyn OutputLookup,
    root: &Path,
) -> Result<Vec<ManifestEntry>, AssemblyError> {
    const CONTENT: &[EdgeKind] = &[EdgeKind::Dependency];
    const PROVIDED: &[EdgeKind] = &[EdgeKind::Dependency, EdgeKind::DistDependency];

    let mut excluded = packaged(graph, &plan.exclude, CONTENT);
    excluded.extend(packaged(graph, &plan.dist_dependencies, PROVIDED));
    let content = packaged(graph, &plan.dependencies, CONTENT);

    let mut manifest = Vec::new();
    for node_id in graph.build_order() {
        if !content.contains(node_id) || excluded.contains(node_id) {
            continue;
        }
        let output = outputs
            .output_of(node_id)
            .ok_or_else(|| AssemblyError::UnbuiltDependency {
                distribution: id.to_string(),
                dependency: node_id.to_string(),
            })?;
        let dest = if output.is_dir() {
            filesystem::copy_tree(output, root)?;
            "./".to_string()
        } else {
            let name = output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| AssemblyError::MissingSource {
                    distribution: id.to_string(),
                    source_spec: format!("dependency:{node_id}"),
                })?;
            filesystem::copy_file(output, &root.join(&name))?;
            name
        };
        manifest.push(ManifestEntry {
            dest,
            sources: vec![format!("dependency:{node_id}")],
        });
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Node;
    use tempfile::TempDir;

    fn env() -> Environment {
        Environment::new(11, "windows", "amd64")
    }

    fn dist() -> NodeId {
        NodeId::new("s", "D")
    }

    fn entry(dest: &str, sources: Vec<PlannedSource>, declared: &[&str]) -> PlannedEntry {
        PlannedEntry {
            dest: dest.to_string(),
            sources,
            declared: declared.iter().map(ToString::to_string).collect(),
        }
    }

    fn layout_plan(layout: Vec<PlannedEntry>) -> DistributionPlan {
        DistributionPlan {
            native: true,
            dependencies: Vec::new(),
            dist_dependencies: Vec::new(),
            exclude: Vec::new(),
            layout,
        }
    }

    fn empty_graph() -> Graph {
        Graph::from_nodes(vec![Node::new(dist(), NodeKind::Distribution)]).unwrap()
    }

    fn no_outputs() -> HashMap<NodeId, PathBuf> {
        HashMap::new()
    }

    fn file(path: PathBuf) -> PlannedSource {
        PlannedSource::File { path }
    }

    #[test]
    fn test_later_entry_for_same_destination_wins() {
        let temp = TempDir::new().unwrap();
        let suite = temp.path().join("suite");
        std::fs::create_dir_all(&suite).unwrap();
        std::fs::write(suite.join("a"), "generic").unwrap();
        std::fs::write(suite.join("b"), "windows").unwrap();

        let plan = layout_plan(vec![
            entry("./", vec![file(suite.join("a"))], &["file:a"]),
            entry("./", vec![file(suite.join("b"))], &["file:b"]),
        ]);
        let out = temp.path().join("out");
        let manifest = assemble(
            &dist(),
            &plan,
            &empty_graph(),
            &no_outputs(),
            &env(),
            &out,
        )
        .unwrap();

        assert!(!out.join("a").exists());
        assert_eq!(std::fs::read_to_string(out.join("b")).unwrap(), "windows");
        assert_eq!(
            manifest.entries,
            vec![ManifestEntry {
                dest: "./".into(),
                sources: vec!["file:b".into()]
            }]
        );
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.environment, "jdk11 windows/amd64");
    }

    #[test]
    fn test_dependency_output_merged_into_directory() {
        let temp = TempDir::new().unwrap();
        let built = temp.path().join("built");
        std::fs::create_dir_all(built.join("Release")).unwrap();
        std::fs::write(built.join("Release/node"), "elf").unwrap();
        std::fs::write(built.join("README"), "hi").unwrap();

        let native = NodeId::new("s", "native");
        let outputs: HashMap<NodeId, PathBuf> = [(native.clone(), built)].into_iter().collect();
        let plan = layout_plan(vec![
            entry(
                "bin/",
                vec![PlannedSource::Node {
                    id: native.clone(),
                    subpath: Some("Release/node".into()),
                }],
                &["dependency:native/Release/node"],
            ),
            entry(
                "share/",
                vec![PlannedSource::Node {
                    id: native,
                    subpath: None,
                }],
                &["dependency:native"],
            ),
            entry(
                "VERSION",
                vec![PlannedSource::Text {
                    content: "1.0".into(),
                }],
                &["string:1.0"],
            ),
        ]);
        let out = temp.path().join("out");
        let manifest = assemble(&dist(), &plan, &empty_graph(), &outputs, &env(), &out).unwrap();

        assert!(out.join("bin/node").is_file());
        assert!(out.join("share/Release/node").is_file());
        assert!(out.join("share/README").is_file());
        assert_eq!(std::fs::read_to_string(out.join("VERSION")).unwrap(), "1.0");
        let files: Vec<_> = manifest.files.keys().cloned().collect();
        assert_eq!(
            files,
            vec!["VERSION", "bin/node", "share/README", "share/Release/node"]
        );
    }

    #[test]
    fn test_missing_file_source_names_the_source() {
        let temp = TempDir::new().unwrap();
        let plan = layout_plan(vec![entry(
            "./",
            vec![file(temp.path().join("nope"))],
            &["file:nope"],
        )]);
        let err = assemble(
            &dist(),
            &plan,
            &empty_graph(),
            &no_outputs(),
            &env(),
            &temp.path().join("out"),
        )
        .unwrap_err();
        match err {
            AssemblyError::MissingSource {
                distribution,
                source_spec,
            } => {
                assert_eq!(distribution, "s:D");
                assert_eq!(source_spec, "file:nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_escaping_destination_rejected() {
        let temp = TempDir::new().unwrap();
        for dest in ["../evil", "/abs", "a/../../b", ""] {
            let plan = layout_plan(vec![entry(
                dest,
                vec![PlannedSource::Text {
                    content: "x".into(),
                }],
                &["string:x"],
            )]);
            let err = assemble(
                &dist(),
                &plan,
                &empty_graph(),
                &no_outputs(),
                &env(),
                &temp.path().join("out"),
            )
            .unwrap_err();
            assert!(
                matches!(err, AssemblyError::InvalidDestination { .. }),
                "{dest}: {err:?}"
            );
        }
    }

    #[test]
    fn test_dependency_subpath_cannot_leave_the_output() {
        let temp = TempDir::new().unwrap();
        let built = temp.path().join("built");
        std::fs::create_dir_all(&built).unwrap();
        std::fs::write(temp.path().join("secret"), "outside").unwrap();

        let native = NodeId::new("s", "native");
        let outputs: HashMap<NodeId, PathBuf> = [(native.clone(), built)].into_iter().collect();
        for subpath in ["../secret", "bin/../../secret", "/etc/passwd"] {
            let declared = format!("dependency:native/{subpath}");
            let plan = layout_plan(vec![entry(
                "lib/",
                vec![PlannedSource::Node {
                    id: native.clone(),
                    subpath: Some(subpath.into()),
                }],
                &[declared.as_str()],
            )]);
            let out = temp.path().join("out");
            let err = assemble(&dist(), &plan, &empty_graph(), &outputs, &env(), &out).unwrap_err();
            match err {
                AssemblyError::InvalidSource { source_spec, .. } => {
                    assert_eq!(source_spec, declared);
                }
                other => panic!("{subpath}: unexpected error: {other:?}"),
            }
            assert!(!out.join("lib/secret").exists());
        }
    }

    #[test]
    fn test_unbuilt_dependency_reported() {
        let temp = TempDir::new().unwrap();
        let plan = layout_plan(vec![entry(
            "lib/",
            vec![PlannedSource::Node {
                id: NodeId::new("s", "p"),
                subpath: None,
            }],
            &["dependency:p"],
        )]);
        let err = assemble(
            &dist(),
            &plan,
            &empty_graph(),
            &no_outputs(),
            &env(),
            &temp.path().join("out"),
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::UnbuiltDependency { dependency, .. } if dependency == "s:p"));
    }

    #[test]
    fn test_packaging_without_layout_honors_exclusions() {
        let temp = TempDir::new().unwrap();
        let id = |n: &str| NodeId::new("s", n);

        let lib = Node::new(id("LIB"), NodeKind::Library);
        let mut api = Node::new(id("api"), NodeKind::Project);
        api.add_edge(id("LIB"), EdgeKind::Dependency);
        let mut core = Node::new(id("core"), NodeKind::Project);
        core.add_edge(id("api"), EdgeKind::Dependency);
        let mut impl_ = Node::new(id("impl"), NodeKind::Project);
        impl_.add_edge(id("core"), EdgeKind::Dependency);
        let mut base = Node::new(id("BASE"), NodeKind::Distribution);
        base.add_edge(id("api"), EdgeKind::Dependency);
        let mut d = Node::new(dist(), NodeKind::Distribution);
        d.add_edge(id("impl"), EdgeKind::Dependency);
        d.add_edge(id("BASE"), EdgeKind::DistDependency);
        let graph = Graph::from_nodes(vec![lib, api, core, impl_, base, d]).unwrap();

        let mut outputs = HashMap::new();
        for name in ["api", "core", "impl"] {
            let dir = temp.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{name}.class")), name).unwrap();
            outputs.insert(id(name), dir);
        }
        let jar = temp.path().join("lib-1.0.jar");
        std::fs::write(&jar, "jar").unwrap();
        outputs.insert(id("LIB"), jar);

        let plan = DistributionPlan {
            native: false,
            dependencies: vec![id("impl")],
            dist_dependencies: vec![id("BASE")],
            exclude: vec![id("core")],
            layout: Vec::new(),
        };
        let out = temp.path().join("out");
        let manifest = assemble(&dist(), &plan, &graph, &outputs, &env(), &out).unwrap();

        // api and LIB come with BASE; core is excluded
        let files: Vec<_> = manifest.files.keys().cloned().collect();
        assert_eq!(files, vec!["impl.class"]);
        assert_eq!(manifest.entries.len(), 1);
    }

    #[test]
    fn test_assembly_is_idempotent() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a"), "a").unwrap();
        let plan = layout_plan(vec![entry(
            "docs/a.txt",
            vec![file(temp.path().join("a"))],
            &["file:a"],
        )]);
        let out = temp.path().join("out");
        let first = assemble(&dist(), &plan, &empty_graph(), &no_outputs(), &env(), &out).unwrap();
        let second = assemble(&dist(), &plan, &empty_graph(), &no_outputs(), &env(), &out).unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
        assert!(out.join("docs/a.txt").is_file());
    }
}
