//! Packages, their modules, and the workspace that holds them.

use std::collections::BTreeMap;

use metadata::OutputMetadata;
use semver::{Version, VersionReq};

use crate::{
    ast::unbound,
    symbol::{StringInterner, Symbol},
};

pub mod loader;
pub mod metadata;

pub const PACKAGE_METADATA_FILE: &str = "portgen.toml";
pub const PACKAGE_SCHEMA_DIR: &str = "schema";
pub const SCHEMA_FILE_EXTENSION: &str = "toml";

/// The index of a package in its [`Workspace`].
///
/// Packages are stored in lexical order of their paths, so comparing two
/// [`PkgId`] values compares the paths of their packages.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct PkgId(usize);

impl PkgId {
    pub fn index(self) -> usize {
        self.0
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index)
    }
}

#[derive(Debug, Clone)]
pub struct Package<T> {
    pub name: Symbol,
    pub version: Version,
    /// The path of the package relative to the workspace root, using `/` as
    /// a separator. The root package has the empty path.
    pub path: Box<str>,
    pub dependencies: BTreeMap<Symbol, VersionReq>,
    pub output: OutputMetadata,
    pub modules: Box<[Module<T>]>,
}

/// A single schema file and the declarations it contains.
#[derive(Debug, Clone)]
pub struct Module<T> {
    /// The file stem of the schema file, e.g. `IBase`.
    pub name: Symbol,
    /// The subdirectory of the schema file below the schema root.
    pub dir: ModulePath,
    pub content: T,
}

/// A subdirectory path such as `geometry` or `shapes/solid`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath(Box<[Symbol]>);

impl ModulePath {
    pub fn new(segments: impl Into<Box<[Symbol]>>) -> Self {
        Self(segments.into())
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Symbol] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn display<'a>(&'a self, interner: &'a StringInterner) -> String {
        self.0
            .iter()
            .map(|segment| interner.get(*segment))
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl<T> Package<T> {
    /// Builds a new package with the same metadata as `self` by mapping each
    /// module through `f`. Every error produced by `f` is collected; if there
    /// are any, no package is produced.
    pub fn try_map_modules<F, U, E>(&self, mut f: F) -> Result<Package<U>, Vec<E>>
    where
        F: FnMut(usize, &Module<T>) -> Result<U, Vec<E>>,
    {
        let mut modules = Vec::with_capacity(self.modules.len());
        let mut errors = Vec::new();

        for (index, module) in self.modules.iter().enumerate() {
            match f(index, module) {
                Ok(content) => modules.push(Module {
                    name: module.name,
                    dir: module.dir.clone(),
                    content,
                }),
                Err(errs) => errors.extend(errs),
            }
        }

        match errors.is_empty() {
            true => Ok(Package {
                name: self.name,
                version: self.version.clone(),
                path: self.path.clone(),
                dependencies: self.dependencies.clone(),
                output: self.output.clone(),
                modules: modules.into_boxed_slice(),
            }),
            false => Err(errors),
        }
    }
}

/// The complete set of parsed packages for one generator invocation.
///
/// The interner is populated while the workspace is built and is read-only
/// afterwards.
#[derive(Debug)]
pub struct Workspace {
    pub interner: StringInterner,
    packages: Box<[Package<unbound::Module>]>,
}

impl Workspace {
    pub fn new(
        interner: StringInterner,
        mut packages: Vec<Package<unbound::Module>>,
    ) -> Self {
        packages.sort_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| interner.get(a.name).cmp(interner.get(b.name)))
        });

        Self {
            interner,
            packages: packages.into_boxed_slice(),
        }
    }

    pub fn package(&self, id: PkgId) -> &Package<unbound::Module> {
        self.packages
            .get(id.0)
            .expect("Package IDs are valid by construction")
    }

    pub fn package_ids(&self) -> impl Iterator<Item = PkgId> + use<> {
        (0..self.packages.len()).map(PkgId)
    }

    pub fn packages(
        &self,
    ) -> impl Iterator<Item = (PkgId, &Package<unbound::Module>)> {
        self.packages
            .iter()
            .enumerate()
            .map(|(index, package)| (PkgId(index), package))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn name(&self, id: PkgId) -> &str {
        self.interner.get(self.package(id).name)
    }
}
