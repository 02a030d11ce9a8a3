//! Unbound schema modules.
//!
//! A schema file is first deserialized into a [`SchemaFile`], which mirrors
//! the on-disk descriptor exactly, and is then lowered into a [`Module`] by
//! interning its names and parsing its type expressions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::symbol::{StringInterner, Symbol};

use super::{
    EnumCase, EnumDecl, Field, FunctionDecl, InterfaceDecl, Literal,
    Operation, OperationRole, StructDecl,
    ty::{TypeExpr, TypePath, parse_type_expr},
};

pub type Decl = super::Decl<TypePath>;

/// The declarations of a single schema file, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub decls: Box<[Decl]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    #[serde(default)]
    pub decl: Vec<RawDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawDecl {
    Enum {
        name: Box<str>,
        cases: Vec<RawCase>,
    },
    Struct {
        name: Box<str>,
        #[serde(default)]
        fields: Vec<RawField>,
    },
    Interface {
        name: Box<str>,
        #[serde(default)]
        entry: Option<Box<str>>,
        #[serde(default)]
        operations: Vec<RawOperation>,
    },
    Function {
        name: Box<str>,
        #[serde(default)]
        params: Vec<RawField>,
        #[serde(default)]
        returns: Option<Box<str>>,
        #[serde(default)]
        body: Option<Literal>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCase {
    Name(Box<str>),
    Valued {
        name: Box<str>,
        #[serde(default)]
        value: Option<i64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawField {
    pub name: Box<str>,
    #[serde(rename = "type")]
    pub ty: Box<str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOperation {
    pub name: Box<str>,
    pub role: OperationRole,
    #[serde(default)]
    pub params: Vec<RawField>,
    #[serde(default)]
    pub returns: Option<Box<str>>,
}

#[derive(Debug, Clone, Error)]
pub enum LowerError {
    #[error("malformed type expression `{source_text}` in `{decl}`: {message}")]
    TypeSyntax {
        decl: Box<str>,
        source_text: Box<str>,
        message: String,
    },
    #[error("`{name}` is not a valid identifier")]
    InvalidIdentifier { name: Box<str> },
}

impl SchemaFile {
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    /// Lowers `self` into a [`Module`], collecting every error.
    pub fn lower(
        self,
        interner: &mut StringInterner,
    ) -> Result<Module, Vec<LowerError>> {
        let mut lowerer = Lowerer {
            interner,
            errors: Vec::new(),
        };

        let decls = self
            .decl
            .into_iter()
            .map(|decl| lowerer.lower_decl(decl))
            .collect::<Vec<_>>();

        match lowerer.errors.is_empty() {
            true => Ok(Module {
                decls: decls.into_iter().flatten().collect(),
            }),
            false => Err(lowerer.errors),
        }
    }
}

struct Lowerer<'a> {
    interner: &'a mut StringInterner,
    errors: Vec<LowerError>,
}

impl Lowerer<'_> {
    fn lower_decl(&mut self, decl: RawDecl) -> Option<Decl> {
        match decl {
            RawDecl::Enum { name, cases } => {
                let cases = cases
                    .into_iter()
                    .map(|case| {
                        let (name, value) = match case {
                            RawCase::Name(name) => (name, None),
                            RawCase::Valued { name, value } => (name, value),
                        };

                        Some(EnumCase {
                            name: self.ident(&name)?,
                            value,
                        })
                    })
                    .collect::<Vec<_>>()
                    .into_iter()
                    .collect::<Option<Box<[_]>>>()?;

                Some(Decl::Enum(EnumDecl {
                    name: self.ident(&name)?,
                    cases,
                }))
            }
            RawDecl::Struct { name, fields } => {
                let fields = self.fields(&name, fields)?;
                Some(Decl::Struct(StructDecl {
                    name: self.ident(&name)?,
                    fields,
                }))
            }
            RawDecl::Interface {
                name,
                entry,
                operations,
            } => {
                let operations = operations
                    .into_iter()
                    .map(|op| {
                        Some(Operation {
                            name: self.ident(&op.name)?,
                            role: op.role,
                            params: self.fields(&name, op.params)?,
                            returns: self.opt_ty(&name, op.returns)?,
                        })
                    })
                    .collect::<Vec<_>>()
                    .into_iter()
                    .collect::<Option<Box<[_]>>>()?;

                let entry = match entry {
                    Some(entry) => Some(self.ident(&entry)?),
                    None => None,
                };

                Some(Decl::Interface(InterfaceDecl {
                    name: self.ident(&name)?,
                    entry,
                    operations,
                }))
            }
            RawDecl::Function {
                name,
                params,
                returns,
                body,
            } => {
                let params = self.fields(&name, params);
                let returns = self.opt_ty(&name, returns);

                Some(Decl::Function(FunctionDecl {
                    name: self.ident(&name)?,
                    params: params?,
                    returns: returns?,
                    body,
                }))
            }
        }
    }

    /// Lowers a list of fields. Every field is visited so that all of their
    /// errors are reported.
    fn fields(
        &mut self,
        decl: &str,
        fields: Vec<RawField>,
    ) -> Option<Box<[Field<TypePath>]>> {
        fields
            .into_iter()
            .map(|RawField { name, ty }| {
                let name = self.ident(&name);
                let ty = self.ty(decl, &ty);
                Some(Field { name: name?, ty: ty? })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    fn opt_ty(
        &mut self,
        decl: &str,
        ty: Option<Box<str>>,
    ) -> Option<Option<TypeExpr<TypePath>>> {
        match ty {
            Some(ty) => self.ty(decl, &ty).map(Some),
            None => Some(None),
        }
    }

    fn ty(&mut self, decl: &str, source: &str) -> Option<TypeExpr<TypePath>> {
        match parse_type_expr(source, self.interner) {
            Ok(ty) => Some(ty),
            Err(message) => {
                self.errors.push(LowerError::TypeSyntax {
                    decl: decl.into(),
                    source_text: source.into(),
                    message,
                });
                None
            }
        }
    }

    fn ident(&mut self, name: &str) -> Option<Symbol> {
        match is_identifier(name) {
            true => Some(self.interner.intern(name)),
            false => {
                self.errors
                    .push(LowerError::InvalidIdentifier { name: name.into() });
                None
            }
        }
    }
}

/// Whether `name` can be used verbatim as an identifier in every target.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
