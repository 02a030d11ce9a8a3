//! Bound schema modules, in which every type reference has been resolved.

use std::collections::BTreeSet;

use crate::{package::PkgId, symbol::Symbol};

use super::{EnumDecl, FunctionDecl, InterfaceDecl, StructDecl};

/// A reference to a module of some package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleRef {
    pub package: PkgId,
    /// The index of the module in its package.
    pub module: usize,
}

/// The canonical identity of a type definition.
///
/// This is a plain key into the symbol table: the package that holds the
/// reference does not own the definition it points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId {
    pub module: ModuleRef,
    /// The index of the definition in [`Module::types`].
    pub index: usize,
}

pub type TypeExpr = super::TypeExpr<TypeId>;
pub type Field = super::Field<TypeId>;
pub type Operation = super::Operation<TypeId>;
pub type InterfaceDef = InterfaceDecl<TypeId>;
pub type FunctionDef = FunctionDecl<TypeId>;

#[derive(Debug, Clone)]
pub enum TypeDef {
    Enum(EnumDecl),
    Struct(StructDecl<TypeId>),
}

impl TypeDef {
    pub fn name(&self) -> Symbol {
        match self {
            TypeDef::Enum(decl) => decl.name,
            TypeDef::Struct(decl) => decl.name,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Type definitions in declaration order.
    pub types: Box<[TypeDef]>,
    /// Indices into `types` in an order where every type is defined after
    /// the types it contains by value.
    pub layout: Box<[usize]>,
    pub interfaces: Box<[InterfaceDef]>,
    pub functions: Box<[FunctionDef]>,
    /// The other modules whose types this module refers to.
    pub imports: BTreeSet<ModuleRef>,
}

impl Module {
    pub fn laid_out_types(&self) -> impl Iterator<Item = &TypeDef> {
        self.layout.iter().map(|index| &self.types[*index])
    }
}
