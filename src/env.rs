//! The global symbol table of bound packages.
//!
//! The table is filled one topological layer at a time. While a layer is
//! being processed the table is only read, so every worker can borrow it;
//! the results of the layer are inserted after the layer barrier.

use std::{collections::BTreeSet, sync::Arc};

use crate::{
    ast::bound::{self, ModuleRef, TypeDef, TypeId},
    package::{Module, Package, PkgId},
    symbol::StringInterner,
};

pub mod bind;

pub type BoundPackage = Package<bound::Module>;

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    packages: Vec<Option<Arc<BoundPackage>>>,
    /// Bound packages whose artifacts could not be emitted.
    unemitted: BTreeSet<PkgId>,
}

impl SymbolTable {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            packages: vec![None; len],
            unemitted: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, id: PkgId, package: Arc<BoundPackage>) {
        if self.packages.len() <= id.index() {
            self.packages.resize(id.index() + 1, None);
        }

        self.packages[id.index()] = Some(package);
    }

    pub fn get(&self, id: PkgId) -> Option<&Arc<BoundPackage>> {
        self.packages.get(id.index()).and_then(Option::as_ref)
    }

    /// Records that the bound package `id` has no artifacts, so that its
    /// dependents cannot refer to them.
    pub fn mark_unemitted(&mut self, id: PkgId) {
        self.unemitted.insert(id);
    }
}

/// A read-only view of the symbol table from the perspective of one package,
/// which may not have been inserted into the table yet.
#[derive(Debug, Clone, Copy)]
pub struct View<'a> {
    pub interner: &'a StringInterner,
    table: &'a SymbolTable,
    current: PkgId,
    package: &'a BoundPackage,
}

impl<'a> View<'a> {
    pub fn new(
        interner: &'a StringInterner,
        table: &'a SymbolTable,
        current: PkgId,
        package: &'a BoundPackage,
    ) -> Self {
        Self {
            interner,
            table,
            current,
            package,
        }
    }

    /// Returns a view of the same table from the perspective of `id`, which
    /// must already be in the table.
    pub fn rebased(&self, id: PkgId) -> View<'a> {
        View {
            package: self.package(id),
            current: id,
            ..*self
        }
    }

    pub fn current(&self) -> PkgId {
        self.current
    }

    pub fn current_package(&self) -> &'a BoundPackage {
        self.package
    }

    pub fn package(&self, id: PkgId) -> &'a BoundPackage {
        match id == self.current {
            true => self.package,
            false => self
                .table
                .get(id)
                .expect("Ancestor packages are bound before their dependents"),
        }
    }

    pub fn module(&self, module: ModuleRef) -> &'a Module<bound::Module> {
        self.package(module.package)
            .modules
            .get(module.module)
            .expect("Module references are valid by construction")
    }

    pub fn type_def(&self, id: TypeId) -> &'a TypeDef {
        self.module(id.module)
            .content
            .types
            .get(id.index)
            .expect("Type IDs are valid by construction")
    }

    /// Whether the artifacts of `id` exist, as far as this view knows.
    pub fn is_emitted(&self, id: PkgId) -> bool {
        !self.table.unemitted.contains(&id)
    }

    pub fn name(&self, symbol: crate::symbol::Symbol) -> &'a str {
        self.interner.get(symbol)
    }
}
