//! The package dependency graph.
//!
//! The graph is built and validated eagerly, before any binding begins. A
//! package that cannot be placed in the graph (unknown or incompatible
//! dependencies, cycles, duplicate names) is marked as failed, and every
//! package that transitively depends on it is marked as blocked. The
//! remaining packages are grouped into topological layers.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use semver::{Version, VersionReq};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    package::{PkgId, Workspace},
    symbol::Symbol,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("detected a dependency cycle: {}", display_cycle(.cycle))]
    CyclicDependency { cycle: Box<[Box<str>]> },
    #[error("package `{package}` depends on unknown package `{dependency}`")]
    UnknownDependency {
        package: Box<str>,
        dependency: Box<str>,
    },
    #[error("package name `{name}` is used by several packages: {}", .paths.join(", "))]
    DuplicatePackage {
        name: Box<str>,
        paths: Box<[Box<str>]>,
    },
    #[error(
        "package `{package}` requires `{dependency}` {required}, but found version {found}"
    )]
    IncompatibleVersion {
        package: Box<str>,
        dependency: Box<str>,
        required: VersionReq,
        found: Version,
    },
}

fn display_cycle(cycle: &[Box<str>]) -> String {
    let mut names = cycle.iter().map(AsRef::as_ref).collect::<Vec<&str>>();
    if let Some(first) = cycle.first() {
        names.push(first);
    }
    names.join(" -> ")
}

/// The standing of a package after graph resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The package can be processed once its layer is reached.
    Ready,
    /// The package itself is at fault.
    Failed,
    /// The package depends, possibly transitively, on a failed package.
    Blocked { by: PkgId },
}

#[derive(Debug, Clone)]
pub struct PackageGraph {
    /// Edges point from a package to the packages it depends on. The node
    /// with index `i` is the package with [`PkgId`] `i`.
    graph: DiGraph<PkgId, ()>,
    status: Box<[Status]>,
    errors: Box<[GraphError]>,
    /// Every package reachable from a package, with its shortest distance.
    ancestors: Box<[BTreeMap<PkgId, usize>]>,
    layers: Box<[Box<[PkgId]>]>,
}

impl PackageGraph {
    pub fn resolve(workspace: &Workspace) -> Self {
        let mut builder = Builder::new(workspace);
        builder.add_edges();
        builder.find_cycles();
        builder.finish()
    }

    pub fn errors(&self) -> &[GraphError] {
        &self.errors
    }

    pub fn status(&self, id: PkgId) -> Status {
        self.status[id.index()]
    }

    /// Groups of ready packages; every package comes after all of its
    /// dependencies, and packages in the same layer are independent.
    pub fn layers(&self) -> &[Box<[PkgId]>] {
        &self.layers
    }

    /// The ready packages in topological order.
    pub fn order(&self) -> impl Iterator<Item = PkgId> + '_ {
        self.layers.iter().flat_map(|layer| layer.iter().copied())
    }

    /// All packages that `id` depends on, directly or transitively, mapped
    /// to their shortest dependency distance from `id`.
    pub fn ancestors(&self, id: PkgId) -> &BTreeMap<PkgId, usize> {
        &self.ancestors[id.index()]
    }

    pub fn distance(&self, from: PkgId, to: PkgId) -> Option<usize> {
        match from == to {
            true => Some(0),
            false => self.ancestors(from).get(&to).copied(),
        }
    }

    /// The direct dependencies of `id`, in [`PkgId`] order.
    pub fn dependencies(&self, id: PkgId) -> Vec<PkgId> {
        let mut deps = self
            .graph
            .neighbors(NodeIndex::new(id.index()))
            .map(|node| self.graph[node])
            .collect::<Vec<_>>();
        deps.sort();
        deps.dedup();
        deps
    }
}

struct Builder<'a> {
    workspace: &'a Workspace,
    graph: DiGraph<PkgId, ()>,
    by_name: BTreeMap<Symbol, Vec<PkgId>>,
    failed: BTreeSet<PkgId>,
    errors: Vec<GraphError>,
}

impl<'a> Builder<'a> {
    fn new(workspace: &'a Workspace) -> Self {
        let mut graph = DiGraph::with_capacity(workspace.len(), 0);
        let mut by_name = BTreeMap::<Symbol, Vec<PkgId>>::new();

        for (id, package) in workspace.packages() {
            graph.add_node(id);
            by_name.entry(package.name).or_default().push(id);
        }

        let mut builder = Self {
            workspace,
            graph,
            by_name,
            failed: BTreeSet::new(),
            errors: Vec::new(),
        };

        let duplicates = builder
            .by_name
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(name, ids)| (*name, ids.clone()))
            .collect::<Vec<_>>();

        for (name, ids) in duplicates {
            builder.errors.push(GraphError::DuplicatePackage {
                name: workspace.interner.get(name).into(),
                paths: ids
                    .iter()
                    .map(|id| workspace.package(*id).path.clone())
                    .collect(),
            });
            builder.failed.extend(ids);
        }

        builder
    }

    fn add_edges(&mut self) {
        let workspace = self.workspace;
        let interner = &workspace.interner;

        for (id, package) in workspace.packages() {
            for (dep_name, required) in &package.dependencies {
                let Some(dep) = self
                    .by_name
                    .get(dep_name)
                    .and_then(|ids| ids.first().copied())
                else {
                    self.errors.push(GraphError::UnknownDependency {
                        package: interner.get(package.name).into(),
                        dependency: interner.get(*dep_name).into(),
                    });
                    self.failed.insert(id);
                    continue;
                };

                let found = &workspace.package(dep).version;
                // `*` would reject prereleases, but an absent requirement
                // accepts any version.
                let unconstrained = required.comparators.is_empty();
                if !unconstrained && !required.matches(found) {
                    self.errors.push(GraphError::IncompatibleVersion {
                        package: interner.get(package.name).into(),
                        dependency: interner.get(*dep_name).into(),
                        required: required.clone(),
                        found: found.clone(),
                    });
                    self.failed.insert(id);
                }

                self.graph.update_edge(
                    NodeIndex::new(id.index()),
                    NodeIndex::new(dep.index()),
                    (),
                );
            }
        }
    }

    fn find_cycles(&mut self) {
        let mut sccs = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0])
            })
            .map(|scc| {
                scc.into_iter()
                    .map(|node| self.graph[node])
                    .collect::<BTreeSet<_>>()
            })
            .collect::<Vec<_>>();
        sccs.sort();

        for members in sccs {
            let cycle = self
                .cycle_through(&members)
                .into_iter()
                .map(|id| self.workspace.name(id).into())
                .collect();
            self.errors.push(GraphError::CyclicDependency { cycle });
            self.failed.extend(members);
        }
    }

    /// Finds the shortest cycle within a strongly connected component that
    /// starts at its first member.
    fn cycle_through(&self, members: &BTreeSet<PkgId>) -> Vec<PkgId> {
        let Some(&start) = members.first() else {
            return Vec::new();
        };

        let mut parents = BTreeMap::<PkgId, PkgId>::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let mut successors = self
                .graph
                .neighbors(NodeIndex::new(current.index()))
                .map(|node| self.graph[node])
                .filter(|id| members.contains(id))
                .collect::<Vec<_>>();
            successors.sort();

            for next in successors {
                if next == start {
                    let mut cycle = vec![current];
                    while let Some(parent) =
                        cycle.last().and_then(|last| parents.get(last))
                    {
                        cycle.push(*parent);
                    }
                    cycle.reverse();
                    return cycle;
                }

                if !parents.contains_key(&next) && next != start {
                    parents.insert(next, current);
                    queue.push_back(next);
                }
            }
        }

        // unreachable for a genuine strongly connected component
        members.iter().copied().collect()
    }

    fn finish(self) -> PackageGraph {
        let count = self.workspace.len();

        let ancestors = (0..count)
            .map(|index| self.bfs_distances(PkgId::from_index(index)))
            .collect::<Box<[_]>>();

        let status = (0..count)
            .map(|index| {
                let id = PkgId::from_index(index);
                if self.failed.contains(&id) {
                    return Status::Failed;
                }

                ancestors[index]
                    .iter()
                    .filter(|(ancestor, _)| self.failed.contains(ancestor))
                    .min_by_key(|(ancestor, distance)| (**distance, **ancestor))
                    .map_or(Status::Ready, |(by, _)| Status::Blocked { by: *by })
            })
            .collect::<Box<[_]>>();

        let layers = self.layers(&status);

        for (index, status) in status.iter().enumerate() {
            if let Status::Blocked { by } = status {
                warn!(
                    package = self.workspace.name(PkgId::from_index(index)),
                    blocked_by = self.workspace.name(*by),
                    "package is blocked by a failed dependency"
                );
            }
        }

        debug!(
            packages = count,
            layers = layers.len(),
            errors = self.errors.len(),
            "resolved package graph"
        );

        PackageGraph {
            graph: self.graph,
            status,
            errors: self.errors.into_boxed_slice(),
            ancestors,
            layers,
        }
    }

    fn bfs_distances(&self, from: PkgId) -> BTreeMap<PkgId, usize> {
        let mut distances = BTreeMap::new();
        let mut queue = VecDeque::from([(from, 0)]);

        while let Some((current, distance)) = queue.pop_front() {
            for node in self.graph.neighbors(NodeIndex::new(current.index())) {
                let next = self.graph[node];
                if next != from && !distances.contains_key(&next) {
                    distances.insert(next, distance + 1);
                    queue.push_back((next, distance + 1));
                }
            }
        }

        distances
    }

    /// Computes the layer of every ready package: packages without
    /// dependencies are in layer 0, and every other package sits one layer
    /// above its deepest dependency.
    fn layers(&self, status: &[Status]) -> Box<[Box<[PkgId]>]> {
        let mut depth = vec![None::<usize>; status.len()];
        let ready = (0..status.len())
            .map(PkgId::from_index)
            .filter(|id| status[id.index()] == Status::Ready)
            .collect::<Vec<_>>();

        // ready packages only depend on ready packages, and the ready
        // subgraph is acyclic, so repeatedly sweeping terminates
        let mut remaining = ready.clone();
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|id| {
                let deps = self
                    .graph
                    .neighbors(NodeIndex::new(id.index()))
                    .map(|node| depth[self.graph[node].index()])
                    .collect::<Option<Vec<_>>>();

                match deps {
                    Some(deps) => {
                        depth[id.index()] =
                            Some(deps.into_iter().max().map_or(0, |d| d + 1));
                        false
                    }
                    None => true,
                }
            });

            if remaining.len() == before {
                break;
            }
        }

        let mut layers = Vec::<Vec<PkgId>>::new();
        for id in ready {
            let Some(layer) = depth[id.index()] else { continue };
            if layers.len() <= layer {
                layers.resize_with(layer + 1, Vec::new);
            }
            layers[layer].push(id);
        }

        layers
            .into_iter()
            .map(Vec::into_boxed_slice)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{WorkspaceBuilder, boxed, find};

    fn names(workspace: &Workspace, ids: &[PkgId]) -> Vec<String> {
        ids.iter()
            .map(|id| workspace.name(*id).to_owned())
            .collect()
    }

    #[test]
    fn three_level_chain_is_layered() {
        let workspace = WorkspaceBuilder::new()
            .package("app", &["middle", "base"])
            .package("middle", &["base"])
            .package("base", &[])
            .build();
        let graph = PackageGraph::resolve(&workspace);

        assert!(graph.errors().is_empty());
        let order = graph.order().collect::<Vec<_>>();
        assert_eq!(names(&workspace, &order), ["base", "middle", "app"]);
        assert_eq!(graph.layers().len(), 3);

        let app = order[2];
        let base = order[0];
        assert_eq!(graph.distance(app, base), Some(1));
        assert_eq!(graph.ancestors(app).len(), 2);
        assert_eq!(graph.distance(base, app), None);
    }

    #[test]
    fn order_is_topologically_valid() {
        let workspace = WorkspaceBuilder::new()
            .package("e", &["c", "d"])
            .package("d", &["a"])
            .package("c", &["b", "a"])
            .package("b", &["a"])
            .package("a", &[])
            .package("z", &[])
            .build();
        let graph = PackageGraph::resolve(&workspace);
        let order = graph.order().collect::<Vec<_>>();
        assert_eq!(order.len(), 6);

        for (position, id) in order.iter().enumerate() {
            for ancestor in graph.ancestors(*id).keys() {
                let ancestor_position =
                    order.iter().position(|other| other == ancestor).unwrap();
                assert!(ancestor_position < position);
            }
        }

        let first_layer = names(&workspace, &graph.layers()[0]);
        assert_eq!(first_layer, ["a", "z"]);
    }

    #[test]
    fn cycles_fail_and_block_dependents_only() {
        let workspace = WorkspaceBuilder::new()
            .package("a", &["b"])
            .package("b", &["c"])
            .package("c", &["a"])
            .package("user", &["a"])
            .package("sibling", &["base"])
            .package("base", &[])
            .build();
        let graph = PackageGraph::resolve(&workspace);

        assert_eq!(
            graph.errors(),
            [GraphError::CyclicDependency {
                cycle: boxed(&["a", "b", "c"]),
            }]
        );
        assert_eq!(
            graph.errors()[0].to_string(),
            "detected a dependency cycle: a -> b -> c -> a"
        );

        let find = |name: &str| find(&workspace, name);

        assert_eq!(graph.status(find("a")), Status::Failed);
        assert_eq!(graph.status(find("c")), Status::Failed);
        assert_eq!(
            graph.status(find("user")),
            Status::Blocked { by: find("a") }
        );
        assert_eq!(graph.status(find("sibling")), Status::Ready);

        let order = graph.order().collect::<Vec<_>>();
        assert_eq!(names(&workspace, &order), ["base", "sibling"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let workspace = WorkspaceBuilder::new().package("loop", &["loop"]).build();
        let graph = PackageGraph::resolve(&workspace);

        assert_eq!(
            graph.errors(),
            [GraphError::CyclicDependency {
                cycle: boxed(&["loop"]),
            }]
        );
        assert_eq!(graph.order().count(), 0);
    }

    #[test]
    fn unknown_and_incompatible_dependencies() {
        let workspace = WorkspaceBuilder::new()
            .package("app", &["ghost"])
            .package("tool", &["base"])
            .package("base", &[])
            .version("base", "2.0.0")
            .requirement("tool", "base", "^1")
            .build();
        let graph = PackageGraph::resolve(&workspace);

        assert_eq!(graph.errors().len(), 2);
        assert!(graph.errors().contains(&GraphError::UnknownDependency {
            package: "app".into(),
            dependency: "ghost".into(),
        }));
        assert!(matches!(
            graph.errors()[1],
            GraphError::IncompatibleVersion { .. }
        ));
        assert_eq!(names(&workspace, &graph.order().collect::<Vec<_>>()), ["base"]);
    }

    #[test]
    fn absent_requirements_accept_prereleases() {
        let workspace = WorkspaceBuilder::new()
            .package("base", &[])
            .version("base", "0.2.0-dev.1")
            .package("app", &["base"])
            .package("pinned", &["base"])
            .requirement("pinned", "base", "^0.1")
            .build();
        let graph = PackageGraph::resolve(&workspace);

        assert!(matches!(
            &graph.errors()[..],
            [GraphError::IncompatibleVersion { package, .. }] if package.as_ref() == "pinned"
        ));
        assert_eq!(
            names(&workspace, &graph.order().collect::<Vec<_>>()),
            ["base", "app"]
        );
    }

    #[test]
    fn duplicate_package_names() {
        let workspace = WorkspaceBuilder::new()
            .package_at("base", "one/base", &[])
            .package_at("base", "two/base", &[])
            .package("app", &["base"])
            .build();
        let graph = PackageGraph::resolve(&workspace);

        assert_eq!(
            graph.errors(),
            [GraphError::DuplicatePackage {
                name: "base".into(),
                paths: boxed(&["one/base", "two/base"]),
            }]
        );
        assert_eq!(graph.order().count(), 0);
    }
}
