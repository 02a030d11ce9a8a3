//! Type expressions and their textual syntax.
//!
//! A [`TypeExpr`] is parameterized by its name type `N`: the loader produces
//! `TypeExpr<TypePath>` (textual references), and the binder turns these into
//! `TypeExpr<TypeId>` (resolved references into the symbol table).
//!
//! # Syntax
//! ```text
//! ty    ::= "array" "<" ty "," NUM ">"
//!         | "list" "<" ty ">"
//!         | "optional" "<" ty ">"
//!         | path
//! path  ::= (IDENT "::")? "."? (IDENT ".")* IDENT
//! ```
//! A path consisting of a single identifier that names a [`Primitive`] is
//! parsed as that primitive. A leading `.` pins the path to the root
//! subdirectory, so `.Point` and `base::.Point` never match `geometry.Point`.

use recursion::{Collapsible, MappableFrame, PartiallyApplied};
use winnow::{
    PResult, Parser,
    ascii::{digit1, multispace0},
    combinator::{alt, delimited, opt, preceded, repeat, terminated},
    token::{one_of, take_while},
};

use crate::symbol::{StringInterner, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
}

impl Primitive {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "bool" => Self::Bool,
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int" | "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint8" => Self::UInt8,
            "uint16" => Self::UInt16,
            "uint" | "uint32" => Self::UInt32,
            "uint64" => Self::UInt64,
            "float" | "float32" => Self::Float32,
            "double" | "float64" => Self::Float64,
            "string" => Self::String,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeExpr<N> {
    Primitive(Primitive),
    Named(N),
    /// A fixed-length array `array<T, N>`.
    Array { element: Box<Self>, len: usize },
    /// A variable-length sequence `list<T>`.
    List(Box<Self>),
    Optional(Box<Self>),
}

/// An unresolved reference to a named type, as written in a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypePath<S = Symbol> {
    pub package: Option<S>,
    /// Whether `dir` is exact even when it is empty.
    pub rooted: bool,
    pub dir: Box<[S]>,
    pub name: S,
}

impl<S> TypePath<S> {
    /// Whether this path only matches declarations in the subdirectory
    /// `dir`, rather than in any subdirectory.
    pub fn has_exact_dir(&self) -> bool {
        self.rooted || !self.dir.is_empty()
    }
}

impl<N> TypeExpr<N> {
    /// Returns the named references that this type contains *by value*, i.e.
    /// not behind a [`TypeExpr::List`] indirection.
    pub fn inline_names(&self) -> Vec<&N> {
        let mut names = Vec::new();
        let mut current = self;

        loop {
            match current {
                TypeExpr::Primitive(_) | TypeExpr::List(_) => break,
                TypeExpr::Named(name) => {
                    names.push(name);
                    break;
                }
                TypeExpr::Array { element, .. } => current = element,
                TypeExpr::Optional(inner) => current = inner,
            }
        }

        names
    }

    /// Returns every named reference in this type.
    pub fn names(&self) -> Vec<&N> {
        let mut names = Vec::new();
        let mut current = self;

        loop {
            match current {
                TypeExpr::Primitive(_) => break,
                TypeExpr::Named(name) => {
                    names.push(name);
                    break;
                }
                TypeExpr::Array { element, .. } => current = element,
                TypeExpr::List(inner) | TypeExpr::Optional(inner) => {
                    current = inner
                }
            }
        }

        names
    }
}

impl<N> Collapsible for TypeExpr<N> {
    type FrameToken = TypeExprFrame<PartiallyApplied, N>;

    fn into_frame(self) -> <Self::FrameToken as MappableFrame>::Frame<Self> {
        match self {
            TypeExpr::Primitive(primitive) => TypeExprFrame::Primitive(primitive),
            TypeExpr::Named(name) => TypeExprFrame::Named(name),
            TypeExpr::Array { element, len } => TypeExprFrame::Array {
                element: *element,
                len,
            },
            TypeExpr::List(inner) => TypeExprFrame::List(*inner),
            TypeExpr::Optional(inner) => TypeExprFrame::Optional(*inner),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TypeExprFrame<A, N> {
    Primitive(Primitive),
    Named(N),
    Array { element: A, len: usize },
    List(A),
    Optional(A),
}

impl<N> MappableFrame for TypeExprFrame<PartiallyApplied, N> {
    type Frame<X> = TypeExprFrame<X, N>;

    fn map_frame<A, B>(
        input: Self::Frame<A>,
        mut f: impl FnMut(A) -> B,
    ) -> Self::Frame<B> {
        match input {
            TypeExprFrame::Primitive(primitive) => {
                TypeExprFrame::Primitive(primitive)
            }
            TypeExprFrame::Named(name) => TypeExprFrame::Named(name),
            TypeExprFrame::Array { element, len } => TypeExprFrame::Array {
                element: f(element),
                len,
            },
            TypeExprFrame::List(inner) => TypeExprFrame::List(f(inner)),
            TypeExprFrame::Optional(inner) => TypeExprFrame::Optional(f(inner)),
        }
    }
}

// PARSING

/// Parses a textual type expression, interning every name it contains.
pub fn parse_type_expr(
    source: &str,
    interner: &mut StringInterner,
) -> Result<TypeExpr<TypePath>, String> {
    let raw = delimited(multispace0, type_expr, multispace0)
        .parse(source)
        .map_err(|error| error.to_string())?;

    Ok(intern_names(raw, interner))
}

fn intern_names(
    expr: TypeExpr<TypePath<&str>>,
    interner: &mut StringInterner,
) -> TypeExpr<TypePath> {
    use recursion::CollapsibleExt;

    expr.collapse_frames(|frame| match frame {
        TypeExprFrame::Primitive(primitive) => TypeExpr::Primitive(primitive),
        TypeExprFrame::Named(TypePath {
            package,
            rooted,
            dir,
            name,
        }) => TypeExpr::Named(TypePath {
            package: package.map(|package| interner.intern(package)),
            rooted,
            dir: dir.iter().map(|segment| interner.intern(segment)).collect(),
            name: interner.intern(name),
        }),
        TypeExprFrame::Array { element, len } => TypeExpr::Array {
            element: Box::new(element),
            len,
        },
        TypeExprFrame::List(inner) => TypeExpr::List(Box::new(inner)),
        TypeExprFrame::Optional(inner) => TypeExpr::Optional(Box::new(inner)),
    })
}

fn ident<'s>(input: &mut &'s str) -> PResult<&'s str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn open<'s>(keyword: &'static str) -> impl Parser<&'s str, (), winnow::error::ContextError> {
    (keyword, multispace0, '<', multispace0).void()
}

fn close(input: &mut &str) -> PResult<()> {
    (multispace0, '>').void().parse_next(input)
}

fn type_expr<'s>(input: &mut &'s str) -> PResult<TypeExpr<TypePath<&'s str>>> {
    alt((
        delimited(
            open("array"),
            (
                type_expr,
                preceded(
                    (multispace0, ',', multispace0),
                    digit1.try_map(str::parse::<usize>),
                ),
            ),
            close,
        )
        .map(|(element, len)| TypeExpr::Array {
            element: Box::new(element),
            len,
        }),
        delimited(open("list"), type_expr, close)
            .map(|inner| TypeExpr::List(Box::new(inner))),
        delimited(open("optional"), type_expr, close)
            .map(|inner| TypeExpr::Optional(Box::new(inner))),
        path.map(|path| {
            let unqualified = path.package.is_none() && !path.has_exact_dir();
            match unqualified.then(|| Primitive::from_keyword(path.name)) {
                Some(Some(primitive)) => TypeExpr::Primitive(primitive),
                _ => TypeExpr::Named(path),
            }
        }),
    ))
    .parse_next(input)
}

fn path<'s>(input: &mut &'s str) -> PResult<TypePath<&'s str>> {
    let package = opt(terminated(ident, "::")).parse_next(input)?;
    let rooted = opt('.').parse_next(input)?.is_some();
    let (dir, name): (Vec<&str>, &str) =
        (repeat(0.., terminated(ident, '.')), ident).parse_next(input)?;

    Ok(TypePath {
        package,
        rooted,
        dir: dir.into_boxed_slice(),
        name,
    })
}
