//! Code generation.
//!
//! Every target language is a [`Backend`] over the same bound model. Where
//! the artifacts of a module end up, and therefore how other modules refer
//! to them, is decided by a [`Layout`]: regenerating the ancestors of a
//! package is just emission with a layout that routes them into the
//! package's own output tree.

use std::collections::{BTreeMap, BTreeSet};

use pretty::RcDoc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    ast::{
        Literal, Primitive, TypeExpr,
        bound::{FunctionDef, ModuleRef, TypeDef},
    },
    env::{BoundPackage, View},
    graph::PackageGraph,
    package::{Module, PkgId},
    symbol::{StringInterner, Symbol},
};

use mock::{MockPlan, MockScaffold};
use regen::Regeneration;

pub mod c;
pub mod cpp;
pub mod csharp;
pub mod mock;
pub mod regen;

pub type Doc = RcDoc<'static, ()>;

/// The maximum line width passed to the pretty printer.
const WIDTH: usize = 80;

/// The file name suffix of mock artifacts.
pub const MOCK_SUFFIX: &str = "Mock";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    C,
    Cpp,
    CSharp,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] =
        [BackendKind::C, BackendKind::Cpp, BackendKind::CSharp];

    pub fn default_extension(self) -> &'static str {
        match self {
            BackendKind::C => "h",
            BackendKind::Cpp => "h",
            BackendKind::CSharp => "cs",
        }
    }

    pub fn accepted_extensions(self) -> &'static [&'static str] {
        match self {
            BackendKind::C => &["h", "hh", "hpp", "hxx", "inc"],
            BackendKind::Cpp => &["h", "hh", "hpp", "hxx", "h++", "ipp"],
            BackendKind::CSharp => &["cs"],
        }
    }

    pub fn backend(self) -> &'static dyn Backend {
        match self {
            BackendKind::C => &c::CBackend,
            BackendKind::Cpp => &cpp::CppBackend,
            BackendKind::CSharp => &csharp::CSharpBackend,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BackendKind::C => "c",
            BackendKind::Cpp => "cpp",
            BackendKind::CSharp => "csharp",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error(
        "`{extension}` is not a valid {backend} extension (package `{package}`)"
    )]
    UnsupportedExtension {
        package: Box<str>,
        backend: BackendKind,
        extension: Box<str>,
    },
    #[error("cannot emit `{item}` from `{module}` for {backend}: {reason}")]
    EmissionFailure {
        module: Box<str>,
        backend: BackendKind,
        item: Box<str>,
        reason: Box<str>,
    },
    #[error("package `{package}` emits more than one artifact to `{path}`")]
    PathCollision { package: Box<str>, path: Box<str> },
}

/// A single generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// The output path relative to the output root, using `/` as a
    /// separator.
    pub path: Box<str>,
    pub contents: String,
    pub backend: BackendKind,
    /// The package that declares the module this artifact was emitted from.
    pub origin: PkgId,
    /// The package that this artifact was emitted into, if it is not the
    /// origin.
    pub consumer: Option<PkgId>,
    pub extension: Box<str>,
}

/// Where a name appears in the generated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePosition {
    /// A type, interface or function.
    Declaration,
    /// A field, operation or parameter.
    Member,
    /// An enum case.
    Case,
    /// A subdirectory segment.
    Directory,
}

/// A target language.
pub trait Backend: Sync {
    fn kind(&self) -> BackendKind;

    /// Whether `name` cannot be used verbatim at `position`.
    fn reserves(&self, name: &str, position: NamePosition) -> bool;

    /// Renders the declarations of `module`.
    fn render_module(
        &self,
        cx: &Context<'_>,
        module: ModuleRef,
    ) -> Result<String, EmitError>;

    /// Renders the mock scaffolds of the interfaces in `module`.
    fn render_mocks(
        &self,
        cx: &Context<'_>,
        module: ModuleRef,
        mocks: &[MockScaffold<'_>],
    ) -> Result<String, EmitError>;
}

// LAYOUT

#[derive(Debug, Clone, Copy)]
struct Route<'a> {
    consumer: PkgId,
    package: &'a BoundPackage,
    ancestors: &'a BTreeMap<PkgId, usize>,
}

/// Decides which output tree the artifacts of each module are written to.
#[derive(Debug, Clone, Copy, Default)]
pub struct Layout<'a> {
    route: Option<Route<'a>>,
}

impl<'a> Layout<'a> {
    /// Every module is emitted into the output tree of its own package.
    pub fn native() -> Self {
        Self::default()
    }

    /// The modules of `consumer` and of all its `ancestors` are emitted into
    /// the output tree of `consumer`, using its extensions.
    pub fn routed(
        consumer: PkgId,
        package: &'a BoundPackage,
        ancestors: &'a BTreeMap<PkgId, usize>,
    ) -> Self {
        Self {
            route: Some(Route {
                consumer,
                package,
                ancestors,
            }),
        }
    }

    /// The package whose output tree holds the artifacts of `owner`.
    pub fn host(&self, view: &View<'a>, owner: PkgId) -> (PkgId, &'a BoundPackage) {
        match self.route {
            Some(route)
                if route.consumer == owner
                    || route.ancestors.contains_key(&owner) =>
            {
                (route.consumer, route.package)
            }
            _ => (owner, view.package(owner)),
        }
    }

    pub fn artifact_path(
        &self,
        view: &View<'a>,
        module: ModuleRef,
        kind: BackendKind,
        suffix: &str,
    ) -> Box<str> {
        let (_, host) = self.host(view, module.package);
        artifact_path(host, view.interner, view.module(module), kind, suffix)
    }
}

/// The extension used for the artifacts of `kind` in the output tree of
/// `package`.
pub fn extension(package: &BoundPackage, kind: BackendKind) -> &str {
    package
        .output
        .extensions
        .get(kind)
        .unwrap_or(kind.default_extension())
}

/// Checks the extension overrides of every backend that `package` emits.
pub fn validate_extensions(
    interner: &StringInterner,
    package: &BoundPackage,
) -> Vec<EmitError> {
    package
        .output
        .backends
        .iter()
        .filter_map(|&kind| {
            let extension = package.output.extensions.get(kind)?;
            let accepted = kind.accepted_extensions();
            match accepted.iter().any(|accepted| *accepted == extension) {
                true => None,
                false => Some(EmitError::UnsupportedExtension {
                    package: interner.get(package.name).into(),
                    backend: kind,
                    extension: extension.into(),
                }),
            }
        })
        .collect()
}

/// The path of the artifact of `module` in the output tree of `host`.
pub fn artifact_path<T>(
    host: &BoundPackage,
    interner: &StringInterner,
    module: &Module<T>,
    kind: BackendKind,
    suffix: &str,
) -> Box<str> {
    let file = format!(
        "{}{suffix}.{}",
        interner.get(module.name),
        extension(host, kind)
    );

    output_root(host)
        .into_iter()
        .chain(module.dir.segments().iter().map(|s| interner.get(*s)))
        .chain(std::iter::once(file.as_str()))
        .collect::<Vec<_>>()
        .join("/")
        .into_boxed_str()
}

/// The path segments of the output root of `package`, relative to the
/// workspace.
fn output_root(package: &BoundPackage) -> Vec<&str> {
    package
        .path
        .split('/')
        .chain(package.output.directory.split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect()
}

// CONTEXT

/// Everything a backend needs to render one module.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub view: View<'a>,
    pub layout: Layout<'a>,
    pub kind: BackendKind,
    /// The module being rendered, which type references are relative to.
    pub scope: Option<ModuleRef>,
}

impl<'a> Context<'a> {
    pub fn new(view: View<'a>, layout: Layout<'a>, kind: BackendKind) -> Self {
        Self {
            view,
            layout,
            kind,
            scope: None,
        }
    }

    /// The same context, rendering `module`.
    pub fn within(&self, module: ModuleRef) -> Self {
        Self {
            scope: Some(module),
            ..*self
        }
    }

    pub fn name(&self, symbol: Symbol) -> &'a str {
        self.view.interner.get(symbol)
    }

    pub fn module(&self, module: ModuleRef) -> &'a Module<crate::ast::bound::Module> {
        self.view.module(module)
    }

    pub fn type_name(&self, id: crate::ast::bound::TypeId) -> &'a str {
        self.name(self.view.type_def(id).name())
    }

    /// The path of the artifact of `module` under this context's layout.
    pub fn path(&self, module: ModuleRef) -> Box<str> {
        self.layout.artifact_path(&self.view, module, self.kind, "")
    }

    /// The artifact paths of every module imported by `module`.
    pub fn include_paths(&self, module: ModuleRef) -> Vec<Box<str>> {
        self.module(module)
            .content
            .imports
            .iter()
            .map(|import| self.path(*import))
            .collect()
    }

    /// `module` and every module it imports, directly or transitively.
    pub fn closure(&self, module: ModuleRef) -> BTreeSet<ModuleRef> {
        let mut closure = BTreeSet::from([module]);
        let mut pending = vec![module];

        while let Some(next) = pending.pop() {
            for &import in &self.module(next).content.imports {
                if closure.insert(import) {
                    pending.push(import);
                }
            }
        }

        closure
    }

    /// Fails if two of the modules visible from `module` declare names with
    /// the same `key`, which the target language would not tell apart.
    pub fn check_distinct<K: Ord>(
        &self,
        module: ModuleRef,
        key: impl Fn(ModuleRef, Symbol) -> K,
    ) -> Result<(), EmitError> {
        let mut owners = BTreeMap::new();

        for visible in self.closure(module) {
            let content = &self.module(visible).content;
            let names = content
                .types
                .iter()
                .map(TypeDef::name)
                .chain(content.interfaces.iter().map(|interface| interface.name))
                .chain(content.functions.iter().map(|function| function.name));

            for name in names {
                match owners.insert(key(visible, name), visible) {
                    Some(other) if other != visible => {
                        return Err(self.failure(
                            module,
                            name,
                            format!(
                                "`{}` is declared by both `{}` and `{}`",
                                self.name(name),
                                self.origin(other.min(visible)),
                                self.origin(other.max(visible))
                            ),
                        ));
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// A human-readable name for `module`, such as `base:geometry/Dims`.
    pub fn origin(&self, module: ModuleRef) -> String {
        let package = self.name(self.view.package(module.package).name);
        let module = self.module(module);
        let name = self.name(module.name);

        match module.dir.is_root() {
            true => format!("{package}:{name}"),
            false => format!(
                "{package}:{}/{name}",
                module.dir.display(self.view.interner)
            ),
        }
    }

    pub fn failure(
        &self,
        module: ModuleRef,
        item: Symbol,
        reason: impl Into<Box<str>>,
    ) -> EmitError {
        EmitError::EmissionFailure {
            module: self.origin(module).into(),
            backend: self.kind,
            item: self.name(item).into(),
            reason: reason.into(),
        }
    }

    fn artifact(
        &self,
        module: ModuleRef,
        path: Box<str>,
        host: (PkgId, &BoundPackage),
        contents: String,
    ) -> Artifact {
        trace!(%path, backend = %self.kind, "rendered artifact");

        Artifact {
            path,
            contents,
            backend: self.kind,
            origin: module.package,
            consumer: Some(host.0).filter(|host| *host != module.package),
            extension: extension(host.1, self.kind).into(),
        }
    }
}

// EMISSION

/// Emits every artifact of the current package of `view`: its own modules,
/// the regenerated modules of its ancestors if it asks for them, and its
/// mocks, for each of its backends.
///
/// Either every artifact is emitted or none is.
pub fn emit_package(
    view: View<'_>,
    graph: &PackageGraph,
) -> Result<Vec<Artifact>, Vec<EmitError>> {
    let package = view.current_package();
    let mut errors = validate_extensions(view.interner, package);
    if !errors.is_empty() {
        return Err(errors);
    }

    let regeneration = Regeneration::for_package(&view, graph);
    let layout = regeneration
        .as_ref()
        .map_or_else(Layout::native, Regeneration::layout);
    let plan = MockPlan::for_package(&view, graph);
    let mut artifacts = Vec::new();

    for &kind in package.output.backends.iter() {
        let backend = kind.backend();
        let cx = Context::new(view, layout, kind);

        errors.extend(missing_artifacts(&cx));

        let mut results = vec![emit_modules(backend, &cx)];
        if let Some(regeneration) = &regeneration {
            results.push(regeneration.emit(backend, &view));
        }
        results.push(emit_mocks(backend, &cx, &plan));

        for result in results {
            match result {
                Ok(emitted) => artifacts.extend(emitted),
                Err(failed) => errors.extend(failed),
            }
        }
    }

    errors.extend(find_collisions(view.interner, package, &artifacts));

    match errors.is_empty() {
        true => {
            debug!(
                package = view.name(package.name),
                artifacts = artifacts.len(),
                "emitted package"
            );
            Ok(artifacts)
        }
        false => Err(errors),
    }
}

/// Emits one artifact for every module of the current package of `cx`.
pub fn emit_modules(
    backend: &dyn Backend,
    cx: &Context<'_>,
) -> Result<Vec<Artifact>, Vec<EmitError>> {
    let current = cx.view.current();
    let host = cx.layout.host(&cx.view, current);
    let mut artifacts = Vec::new();
    let mut errors = Vec::new();

    for index in 0..cx.view.current_package().modules.len() {
        let module = ModuleRef {
            package: current,
            module: index,
        };

        let reserved = reserved_names(backend, cx, module);
        if !reserved.is_empty() {
            errors.extend(reserved);
            continue;
        }

        match backend.render_module(cx, module) {
            Ok(contents) => {
                artifacts.push(cx.artifact(module, cx.path(module), host, contents))
            }
            Err(error) => errors.push(error),
        }
    }

    match errors.is_empty() {
        true => Ok(artifacts),
        false => Err(errors),
    }
}

/// Emits the mock artifacts in `plan` into the output tree of the current
/// package of `cx`.
pub fn emit_mocks(
    backend: &dyn Backend,
    cx: &Context<'_>,
    plan: &MockPlan,
) -> Result<Vec<Artifact>, Vec<EmitError>> {
    let current = cx.view.current();
    let host = (current, cx.view.current_package());
    let mut artifacts = Vec::new();
    let mut errors = Vec::new();

    for entry in plan.entries() {
        if entry.module.package != current {
            let mut failed = reserved_names(backend, cx, entry.module);
            failed.extend(missing_artifact(cx, entry.module, entry.module));
            if !failed.is_empty() {
                errors.extend(failed);
                continue;
            }
        }

        let content = &cx.module(entry.module).content;
        let scaffolds = content
            .interfaces
            .iter()
            .flat_map(|interface| {
                entry.roles.iter().map(move |role| {
                    MockScaffold::for_interface(interface, *role, cx.view.interner)
                })
            })
            .collect::<Vec<_>>();

        match backend.render_mocks(cx, entry.module, &scaffolds) {
            Ok(contents) => {
                let path = artifact_path(
                    host.1,
                    cx.view.interner,
                    cx.module(entry.module),
                    cx.kind,
                    MOCK_SUFFIX,
                );
                artifacts.push(cx.artifact(entry.module, path, host, contents));
            }
            Err(error) => errors.push(error),
        }
    }

    match errors.is_empty() {
        true => Ok(artifacts),
        false => Err(errors),
    }
}

/// Finds the imports of the current package of `cx` that refer to another
/// package's artifacts which do not exist: the other package does not emit
/// this backend, or its emission failed. Imports routed into the current
/// package are emitted alongside it and always exist.
pub fn missing_artifacts(cx: &Context<'_>) -> Vec<EmitError> {
    let current = cx.view.current();
    let mut errors = Vec::new();

    for index in 0..cx.view.current_package().modules.len() {
        let module = ModuleRef {
            package: current,
            module: index,
        };

        errors.extend(
            cx.module(module)
                .content
                .imports
                .iter()
                .filter_map(|import| missing_artifact(cx, module, *import)),
        );
    }

    errors
}

/// Fails if `module` includes the artifact of `import` from another output
/// tree in which it was never written.
fn missing_artifact(
    cx: &Context<'_>,
    module: ModuleRef,
    import: ModuleRef,
) -> Option<EmitError> {
    let (host, package) = cx.layout.host(&cx.view, import.package);
    let missing = host != cx.view.current()
        && (!package.output.backends.contains(&cx.kind)
            || !cx.view.is_emitted(host));

    missing.then(|| {
        cx.failure(
            module,
            cx.module(import).name,
            format!("`{}` has no {} artifact", cx.origin(import), cx.kind),
        )
    })
}

/// Finds the names declared in `module` that `backend` cannot emit
/// verbatim.
pub fn reserved_names(
    backend: &dyn Backend,
    cx: &Context<'_>,
    module: ModuleRef,
) -> Vec<EmitError> {
    use NamePosition as P;

    let module_def = cx.module(module);
    let content = &module_def.content;
    let mut names = module_def
        .dir
        .segments()
        .iter()
        .map(|segment| (*segment, P::Directory))
        .collect::<Vec<_>>();

    for def in content.types.iter() {
        names.push((def.name(), P::Declaration));
        match def {
            TypeDef::Enum(decl) => {
                names.extend(decl.cases.iter().map(|case| (case.name, P::Case)))
            }
            TypeDef::Struct(decl) => names
                .extend(decl.fields.iter().map(|field| (field.name, P::Member))),
        }
    }

    for interface in content.interfaces.iter() {
        names.push((interface.name, P::Declaration));
        names.extend(interface.entry.map(|entry| (entry, P::Member)));
        for op in interface.operations.iter() {
            names.push((op.name, P::Member));
            names.extend(op.params.iter().map(|param| (param.name, P::Member)));
        }
    }

    for function in content.functions.iter() {
        names.push((function.name, P::Declaration));
        names.extend(function.params.iter().map(|param| (param.name, P::Member)));
    }

    let mut reported = BTreeSet::new();
    names
        .into_iter()
        .filter(|(name, position)| backend.reserves(cx.name(*name), *position))
        .filter(|(name, _)| reported.insert(*name))
        .map(|(name, _)| {
            cx.failure(
                module,
                name,
                format!("`{}` is a reserved word", cx.name(name)),
            )
        })
        .collect()
}

/// Finds every pair of artifacts with the same path.
pub fn find_collisions(
    interner: &StringInterner,
    package: &BoundPackage,
    artifacts: &[Artifact],
) -> Vec<EmitError> {
    let mut seen = std::collections::BTreeSet::new();
    let mut reported = std::collections::BTreeSet::new();

    artifacts
        .iter()
        .filter(|artifact| {
            !seen.insert(&artifact.path) && reported.insert(&artifact.path)
        })
        .map(|artifact| EmitError::PathCollision {
            package: interner.get(package.name).into(),
            path: artifact.path.clone(),
        })
        .collect()
}

// TEXT

/// Renders a document, ending it with a newline.
pub fn render(doc: Doc) -> String {
    format!("{}\n", doc.pretty(WIDTH))
}

/// Lays out `items` on separate lines, indented between `head` and `tail`.
pub fn block(head: Doc, items: Vec<Doc>, tail: &'static str) -> Doc {
    match items.is_empty() {
        true => head.append(RcDoc::hardline()).append(tail),
        false => head
            .append(
                RcDoc::hardline()
                    .append(RcDoc::intersperse(items, RcDoc::hardline()))
                    .nest(4),
            )
            .append(RcDoc::hardline())
            .append(tail),
    }
}

/// Separates top-level sections with blank lines, skipping empty ones.
pub fn sections(sections: Vec<Option<Doc>>) -> Doc {
    RcDoc::intersperse(
        sections.into_iter().flatten(),
        RcDoc::hardline().append(RcDoc::hardline()),
    )
}

/// A line comment naming the origin of a generated file.
pub fn banner(prefix: &str, origin: &str) -> Doc {
    RcDoc::text(format!(
        "{prefix} Generated by portgen from {origin}. Do not edit."
    ))
}

/// Escapes a string for use in a C-family string literal.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }

    escaped
}

/// Renders `literal` as a C-family literal of the primitive type `ty`.
pub fn literal(literal: &Literal, ty: Primitive) -> String {
    let float_suffix = match ty {
        Primitive::Float32 => "f",
        _ => "",
    };

    match literal {
        Literal::Bool(value) => value.to_string(),
        Literal::Int(value) if float_suffix.is_empty() => value.to_string(),
        Literal::Int(value) => format!("{value}.0{float_suffix}"),
        Literal::Float(value) => format!("{value:?}{float_suffix}"),
        Literal::String(value) => format!("\"{}\"", escape(value)),
    }
}

/// Whether `literal` is representable in the primitive type `ty`.
fn in_range(literal: &Literal, ty: Primitive) -> bool {
    use Primitive as P;

    match (literal, ty) {
        (Literal::Int(value), P::Int8) => i8::try_from(*value).is_ok(),
        (Literal::Int(value), P::Int16) => i16::try_from(*value).is_ok(),
        (Literal::Int(value), P::Int32) => i32::try_from(*value).is_ok(),
        (Literal::Int(value), P::UInt8) => u8::try_from(*value).is_ok(),
        (Literal::Int(value), P::UInt16) => u16::try_from(*value).is_ok(),
        (Literal::Int(value), P::UInt32) => u32::try_from(*value).is_ok(),
        (Literal::Int(value), P::UInt64) => u64::try_from(*value).is_ok(),
        (Literal::Float(value), P::Float32) => {
            value.is_finite() && value.abs() <= f64::from(f32::MAX)
        }
        (Literal::Float(value), _) => value.is_finite(),
        _ => true,
    }
}

/// Renders the literal body of `function` for the result type it declares,
/// if it has a body.
pub fn function_body(
    cx: &Context<'_>,
    module: ModuleRef,
    function: &FunctionDef,
) -> Result<Option<String>, EmitError> {
    let Some(body) = &function.body else {
        return Ok(None);
    };

    match &function.returns {
        Some(ty @ TypeExpr::Primitive(primitive)) if body.fits(ty) => {
            match in_range(body, *primitive) {
                true => Ok(Some(literal(body, *primitive))),
                false => Err(cx.failure(
                    module,
                    function.name,
                    "the body is out of range for the result type",
                )),
            }
        }
        Some(_) => Err(cx.failure(
            module,
            function.name,
            "the body does not match the result type",
        )),
        None => Err(cx.failure(
            module,
            function.name,
            "a function without a result type cannot have a body",
        )),
    }
}
