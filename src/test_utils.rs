//! Shared test utilities.
//!
//! [`WorkspaceBuilder`] assembles a [`Workspace`] in memory, without going
//! through the filesystem loader, and the `*_SCHEMA` constants are the
//! schema files of the standard base/app fixture.

use std::{collections::BTreeMap, sync::Arc};

use semver::{Version, VersionReq};

use crate::{
    ast::unbound::{self, SchemaFile},
    codegen::{Artifact, BackendKind, Context, Layout, emit_modules},
    env::{SymbolTable, View, bind::bind_package},
    graph::PackageGraph,
    package::{
        Module, ModulePath, Package, PkgId, Workspace,
        metadata::OutputMetadata,
    },
    symbol::StringInterner,
};

/// `Color`, `Point` and the `PBase` interface, at the root of `base`.
pub const IBASE_SCHEMA: &str = r#"
[[decl]]
kind = "enum"
name = "Color"
cases = ["RED", "GREEN", "BLUE"]

[[decl]]
kind = "struct"
name = "Point"
fields = [
    { name = "x", type = "int" },
    { name = "y", type = "int" },
    { name = "color", type = "Color" },
]

[[decl]]
kind = "interface"
name = "PBase"
entry = "process"
operations = [
    { name = "ping", role = "provided", returns = "bool" },
    { name = "move_to", role = "provided", params = [{ name = "target", type = "Point" }] },
    { name = "log", role = "required", params = [{ name = "msg", type = "string" }] },
]
"#;

/// `Dims`, in the `geometry` subdirectory of `base`.
pub const DIMS_SCHEMA: &str = r#"
[[decl]]
kind = "struct"
name = "Dims"
fields = [
    { name = "width", type = "int" },
    { name = "height", type = "int" },
]
"#;

/// `Rectangle`, at the root of `app`.
pub const IAPP_SCHEMA: &str = r#"
[[decl]]
kind = "struct"
name = "Rectangle"
fields = [
    { name = "topLeft", type = "Point" },
    { name = "bottomRight", type = "Point" },
    { name = "size", type = "geometry.Dims" },
]
"#;

pub const FLAT_POINT_SCHEMA: &str = r#"
[[decl]]
kind = "struct"
name = "Point"
fields = [{ name = "x", type = "int" }]
"#;

pub const DEEP_POINT_SCHEMA: &str = r#"
[[decl]]
kind = "struct"
name = "Point"
fields = [{ name = "x", type = "int" }, { name = "z", type = "double" }]
"#;

/// `Line`, with one field of each `Point`.
pub const LINES_SCHEMA: &str = r#"
[[decl]]
kind = "struct"
name = "Line"
fields = [
    { name = "flat", type = "base::.Point" },
    { name = "deep", type = "geometry.Point" },
]
"#;

struct PackageDraft {
    name: Box<str>,
    path: Box<str>,
    version: Version,
    dependencies: BTreeMap<Box<str>, VersionReq>,
    output: OutputMetadata,
    modules: Vec<(Box<str>, Box<str>, Box<str>)>,
}

#[derive(Default)]
pub struct WorkspaceBuilder {
    drafts: Vec<PackageDraft>,
}

impl WorkspaceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The base/app fixture: `app` depends on `base`, and `base` declares
    /// a module in the `geometry` subdirectory.
    pub fn base_and_app() -> Self {
        Self::new()
            .package("base", &[])
            .module("base", "", "IBase", IBASE_SCHEMA)
            .module("base", "geometry", "Dims", DIMS_SCHEMA)
            .package("app", &["base"])
            .module("app", "", "IApp", IAPP_SCHEMA)
    }

    /// `base` declares a `Point` at its root and another in `geometry`, and
    /// `app` refers to both from `Lines`.
    pub fn shadowed_points() -> Self {
        Self::new()
            .package("base", &[])
            .module("base", "", "Flat", FLAT_POINT_SCHEMA)
            .module("base", "geometry", "Shapes", DEEP_POINT_SCHEMA)
            .package("app", &["base"])
            .module("app", "", "Lines", LINES_SCHEMA)
    }

    /// Adds a package whose path is its name.
    pub fn package(self, name: &str, deps: &[&str]) -> Self {
        self.package_at(name, name, deps)
    }

    pub fn package_at(mut self, name: &str, path: &str, deps: &[&str]) -> Self {
        self.drafts.push(PackageDraft {
            name: name.into(),
            path: path.into(),
            version: Version::new(0, 1, 0),
            dependencies: deps
                .iter()
                .map(|dep| ((*dep).into(), VersionReq::STAR))
                .collect(),
            output: OutputMetadata::default(),
            modules: Vec::new(),
        });
        self
    }

    /// Adds a schema module to the most recently added package called
    /// `package`. `dir` uses `/` as a separator.
    pub fn module(
        mut self,
        package: &str,
        dir: &str,
        name: &str,
        schema: &str,
    ) -> Self {
        self.draft(package)
            .modules
            .push((dir.into(), name.into(), schema.into()));
        self
    }

    pub fn version(mut self, package: &str, version: &str) -> Self {
        self.draft(package).version = Version::parse(version).unwrap();
        self
    }

    pub fn requirement(
        mut self,
        package: &str,
        dependency: &str,
        requirement: &str,
    ) -> Self {
        self.draft(package)
            .dependencies
            .insert(dependency.into(), VersionReq::parse(requirement).unwrap());
        self
    }

    pub fn output(
        mut self,
        package: &str,
        f: impl FnOnce(&mut OutputMetadata),
    ) -> Self {
        f(&mut self.draft(package).output);
        self
    }

    fn draft(&mut self, name: &str) -> &mut PackageDraft {
        self.drafts
            .iter_mut()
            .rev()
            .find(|draft| draft.name.as_ref() == name)
            .unwrap_or_else(|| panic!("no package called `{name}`"))
    }

    pub fn build(self) -> Workspace {
        let mut interner = StringInterner::new();

        let packages = self
            .drafts
            .into_iter()
            .map(|draft| {
                let modules = draft
                    .modules
                    .into_iter()
                    .map(|(dir, name, schema)| {
                        let dir = dir
                            .split('/')
                            .filter(|segment| !segment.is_empty())
                            .map(|segment| interner.intern(segment))
                            .collect::<Vec<_>>();
                        let content: unbound::Module =
                            SchemaFile::from_toml(&schema)
                                .unwrap()
                                .lower(&mut interner)
                                .unwrap();

                        Module {
                            name: interner.intern(&name),
                            dir: ModulePath::new(dir),
                            content,
                        }
                    })
                    .collect();

                Package {
                    name: interner.intern(&draft.name),
                    version: draft.version,
                    path: draft.path,
                    dependencies: draft
                        .dependencies
                        .into_iter()
                        .map(|(name, req)| (interner.intern(&name), req))
                        .collect(),
                    output: draft.output,
                    modules,
                }
            })
            .collect();

        Workspace::new(interner, packages)
    }
}

/// Finds a package by name.
pub fn find(workspace: &Workspace, name: &str) -> PkgId {
    workspace
        .package_ids()
        .find(|id| workspace.name(*id) == name)
        .unwrap_or_else(|| panic!("no package called `{name}`"))
}

pub fn boxed(items: &[&str]) -> Box<[Box<str>]> {
    items.iter().map(|item| (*item).into()).collect()
}

/// A workspace in which every package has been bound.
pub struct Bound {
    pub workspace: Workspace,
    pub graph: PackageGraph,
    pub table: SymbolTable,
}

impl Bound {
    /// Binds every package of `workspace`, panicking on any error.
    pub fn new(workspace: Workspace) -> Self {
        let graph = PackageGraph::resolve(&workspace);
        assert!(graph.errors().is_empty(), "{:?}", graph.errors());
        let mut table = SymbolTable::with_capacity(workspace.len());

        for id in graph.order() {
            let package = bind_package(id, &workspace, &graph, &table).unwrap();
            table.insert(id, Arc::new(package));
        }

        Self {
            workspace,
            graph,
            table,
        }
    }

    pub fn id(&self, name: &str) -> PkgId {
        find(&self.workspace, name)
    }

    pub fn view(&self, name: &str) -> View<'_> {
        let id = self.id(name);
        View::new(
            &self.workspace.interner,
            &self.table,
            id,
            self.table.get(id).unwrap(),
        )
    }

    /// Emits the modules of `name` with a native layout.
    pub fn emit(&self, name: &str, kind: BackendKind) -> Vec<Artifact> {
        let cx = Context::new(self.view(name), Layout::native(), kind);
        emit_modules(kind.backend(), &cx).unwrap()
    }
}

/// The contents of the artifact at `path`.
pub fn contents<'a>(artifacts: &'a [Artifact], path: &str) -> &'a str {
    artifacts
        .iter()
        .find(|artifact| artifact.path.as_ref() == path)
        .unwrap_or_else(|| panic!("no artifact at {path}"))
        .contents
        .as_str()
}
