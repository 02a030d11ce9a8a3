//! Schema declarations.
//!
//! The declaration types here are generic over the name type `N` of the
//! type expressions they contain, so that the same structure can be used
//! before binding ([`unbound`]) and after it ([`bound`]).

use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;

pub mod bound;
pub mod ty;
pub mod unbound;

pub use ty::{Primitive, TypeExpr};

/// The name of the implicit lifecycle operation that starts a component.
pub const START_OPERATION: &str = "start";
/// The name of the implicit lifecycle operation that stops a component.
pub const STOP_OPERATION: &str = "stop";

#[derive(Debug, Clone)]
pub enum Decl<N> {
    Enum(EnumDecl),
    Struct(StructDecl<N>),
    Interface(InterfaceDecl<N>),
    Function(FunctionDecl<N>),
}

impl<N> Decl<N> {
    pub fn name(&self) -> Symbol {
        match self {
            Decl::Enum(decl) => decl.name,
            Decl::Struct(decl) => decl.name,
            Decl::Interface(decl) => decl.name,
            Decl::Function(decl) => decl.name,
        }
    }

    pub fn kind(&self) -> DeclKind {
        match self {
            Decl::Enum(_) => DeclKind::Enum,
            Decl::Struct(_) => DeclKind::Struct,
            Decl::Interface(_) => DeclKind::Interface,
            Decl::Function(_) => DeclKind::Function,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclKind {
    Enum,
    Struct,
    Interface,
    Function,
}

impl DeclKind {
    /// Whether declarations of this kind can be used as types.
    pub fn is_type(self) -> bool {
        matches!(self, DeclKind::Enum | DeclKind::Struct)
    }
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: Symbol,
    pub cases: Box<[EnumCase]>,
}

#[derive(Debug, Clone, Copy)]
pub struct EnumCase {
    pub name: Symbol,
    /// An explicit discriminant. Cases without one follow the target
    /// language's implicit numbering.
    pub value: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct StructDecl<N> {
    pub name: Symbol,
    pub fields: Box<[Field<N>]>,
}

/// A named and typed slot: a struct field or an operation parameter.
#[derive(Debug, Clone)]
pub struct Field<N> {
    pub name: Symbol,
    pub ty: TypeExpr<N>,
}

#[derive(Debug, Clone)]
pub struct InterfaceDecl<N> {
    pub name: Symbol,
    /// The default processing entry point, if any.
    pub entry: Option<Symbol>,
    pub operations: Box<[Operation<N>]>,
}

impl<N> InterfaceDecl<N> {
    pub fn provided(&self) -> impl Iterator<Item = &Operation<N>> {
        self.operations
            .iter()
            .filter(|op| op.role == OperationRole::Provided)
    }

    pub fn required(&self) -> impl Iterator<Item = &Operation<N>> {
        self.operations
            .iter()
            .filter(|op| op.role == OperationRole::Required)
    }
}

#[derive(Debug, Clone)]
pub struct Operation<N> {
    pub name: Symbol,
    pub role: OperationRole,
    pub params: Box<[Field<N>]>,
    pub returns: Option<TypeExpr<N>>,
}

/// Which side of a component boundary an operation belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OperationRole {
    /// Implemented by the component and callable by others.
    Provided,
    /// Called by the component on one of its collaborators.
    Required,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl<N> {
    pub name: Symbol,
    pub params: Box<[Field<N>]>,
    pub returns: Option<TypeExpr<N>>,
    pub body: Option<Literal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Box<str>),
}

impl Literal {
    /// Whether this literal can be returned from a function with the given
    /// result type.
    pub fn fits<N>(&self, ty: &TypeExpr<N>) -> bool {
        use Primitive as P;

        let TypeExpr::Primitive(primitive) = ty else {
            return false;
        };

        match self {
            Literal::Bool(_) => *primitive == P::Bool,
            Literal::Int(_) => matches!(
                primitive,
                P::Int8
                    | P::Int16
                    | P::Int32
                    | P::Int64
                    | P::UInt8
                    | P::UInt16
                    | P::UInt32
                    | P::UInt64
                    | P::Float32
                    | P::Float64
            ),
            Literal::Float(_) => matches!(primitive, P::Float32 | P::Float64),
            Literal::String(_) => *primitive == P::String,
        }
    }
}
