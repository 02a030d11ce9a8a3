//! The C# backend.
//!
//! Every module gets a file-scoped namespace named after its package and
//! subdirectories, so the artifacts of a module refer to their imports with
//! `using` directives rather than paths. A type whose name is declared in
//! more than one of those namespaces is referred to by its `global::`
//! qualified name instead. Free functions live in a static class named after
//! the module.

use std::collections::BTreeSet;

use convert_case::{Case, Casing};
use pretty::RcDoc;
use recursion::CollapsibleExt;

use crate::{
    ast::{
        EnumDecl, Primitive, StructDecl,
        bound::{
            Field, FunctionDef, InterfaceDef, ModuleRef, TypeDef, TypeExpr,
            TypeId,
        },
        ty::TypeExprFrame,
    },
    symbol::Symbol,
};

use super::{
    Backend, BackendKind, Context, Doc, EmitError, NamePosition, banner, block,
    c::REQUIRED_SUFFIX,
    function_body,
    mock::{MockMethod, MockRole, MockScaffold, surface},
    render, sections,
};

/// The reserved keywords of C#. Contextual keywords are valid identifiers.
const KEYWORDS: &[&str] = &[
    "abstract", "as", "base", "bool", "break", "byte", "case", "catch",
    "char", "checked", "class", "const", "continue", "decimal", "default",
    "delegate", "do", "double", "else", "enum", "event", "explicit",
    "extern", "false", "finally", "fixed", "float", "for", "foreach", "goto",
    "if", "implicit", "in", "int", "interface", "internal", "is", "lock",
    "long", "namespace", "new", "null", "object", "operator", "out",
    "override", "params", "private", "protected", "public", "readonly",
    "ref", "return", "sbyte", "sealed", "short", "sizeof", "stackalloc",
    "static", "string", "struct", "switch", "this", "throw", "true", "try",
    "typeof", "uint", "ulong", "unchecked", "unsafe", "ushort", "using",
    "virtual", "void", "volatile", "while",
];

pub struct CSharpBackend;

impl Backend for CSharpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CSharp
    }

    fn reserves(&self, name: &str, position: NamePosition) -> bool {
        match position {
            // Namespace segments are Pascal cased.
            NamePosition::Directory => false,
            _ => KEYWORDS.contains(&name),
        }
    }

    fn render_module(
        &self,
        cx: &Context<'_>,
        module: ModuleRef,
    ) -> Result<String, EmitError> {
        let cx = &cx.within(module);
        let content = &cx.module(module).content;
        let mut items = Vec::new();

        for def in content.laid_out_types() {
            items.push(match def {
                TypeDef::Enum(decl) => enumeration(cx, decl),
                TypeDef::Struct(decl) => record(cx, decl),
            });
        }

        for interface in content.interfaces.iter() {
            items.extend(interfaces(cx, interface));
        }

        if !content.functions.is_empty() {
            items.push(functions(cx, module)?);
        }

        Ok(render(file(cx, module, items)))
    }

    fn render_mocks(
        &self,
        cx: &Context<'_>,
        module: ModuleRef,
        mocks: &[MockScaffold<'_>],
    ) -> Result<String, EmitError> {
        let cx = &cx.within(module);
        let items = mocks.iter().map(|mock| mock_class(cx, mock)).collect();
        Ok(render(file(cx, module, items)))
    }
}

/// The banner, the `using` directives and the namespace of `module`,
/// followed by `items`.
fn file(cx: &Context<'_>, module: ModuleRef, items: Vec<Doc>) -> Doc {
    let own = namespace(cx, module);
    let imported = cx
        .module(module)
        .content
        .imports
        .iter()
        .map(|import| namespace(cx, *import))
        .filter(|namespace| *namespace != own)
        .collect::<BTreeSet<_>>();

    let usings = std::iter::once("System.Collections.Generic".to_owned())
        .chain(imported)
        .map(|namespace| RcDoc::text(format!("using {namespace};")));

    let mut docs = vec![
        Some(banner("//", &cx.origin(module))),
        Some(RcDoc::intersperse(usings, RcDoc::hardline())),
        Some(RcDoc::text(format!("namespace {own};"))),
    ];
    docs.extend(items.into_iter().map(Some));
    sections(docs)
}

/// The namespace of `module`: its package name followed by its directory
/// segments, each in Pascal case.
pub fn namespace(cx: &Context<'_>, module: ModuleRef) -> String {
    let package = cx.name(cx.view.package(module.package).name);

    std::iter::once(package)
        .chain(
            cx.module(module)
                .dir
                .segments()
                .iter()
                .map(|segment| cx.name(*segment)),
        )
        .map(|segment| segment.to_case(Case::Pascal))
        .collect::<Vec<_>>()
        .join(".")
}

/// Whether more than one of the namespaces visible from `scope` declares a
/// type or interface called `name`.
fn is_ambiguous(cx: &Context<'_>, scope: ModuleRef, name: Symbol) -> bool {
    let imports = &cx.module(scope).content.imports;
    let visible = std::iter::once(scope)
        .chain(imports.iter().copied())
        .map(|module| namespace(cx, module))
        .collect::<BTreeSet<_>>();
    let packages = std::iter::once(scope.package)
        .chain(imports.iter().map(|import| import.package))
        .collect::<BTreeSet<_>>();

    let declaring = packages
        .into_iter()
        .flat_map(|package| {
            (0..cx.view.package(package).modules.len())
                .map(move |module| ModuleRef { package, module })
        })
        .filter(|module| {
            let content = &cx.module(*module).content;
            content.types.iter().any(|def| def.name() == name)
                || content.interfaces.iter().any(|interface| interface.name == name)
        })
        .map(|module| namespace(cx, module))
        .filter(|namespace| visible.contains(namespace))
        .collect::<BTreeSet<_>>();

    declaring.len() > 1
}

/// The name of `id` as seen from the scope of `cx`.
fn type_name(cx: &Context<'_>, id: TypeId) -> String {
    let name = cx.type_name(id);
    let Some(scope) = cx.scope else {
        return name.to_owned();
    };

    let target = namespace(cx, id.module);
    let qualify = target != namespace(cx, scope)
        && is_ambiguous(cx, scope, cx.view.type_def(id).name());

    match qualify {
        true => format!("global::{target}.{name}"),
        false => name.to_owned(),
    }
}

/// A C# block, with the braces on their own lines.
fn braced(head: String, items: Vec<Doc>) -> Doc {
    block(
        RcDoc::text(head).append(RcDoc::hardline()).append("{"),
        items,
        "}",
    )
}

// DECLARATIONS

fn enumeration(cx: &Context<'_>, decl: &EnumDecl) -> Doc {
    let cases = decl
        .cases
        .iter()
        .map(|case| {
            let name = cx.name(case.name);
            RcDoc::text(match case.value {
                Some(value) => format!("{name} = {value},"),
                None => format!("{name},"),
            })
        })
        .collect();

    braced(format!("public enum {}", cx.name(decl.name)), cases)
}

fn record(cx: &Context<'_>, decl: &StructDecl<TypeId>) -> Doc {
    let name = cx.name(decl.name);
    let fields = decl
        .fields
        .iter()
        .map(|field| (cx.name(field.name), cs_type(cx, &field.ty)))
        .collect::<Vec<_>>();

    let mut members = fields
        .iter()
        .map(|(field, ty)| RcDoc::text(format!("public {ty} {field};")))
        .collect::<Vec<_>>();

    if !fields.is_empty() {
        let params = fields
            .iter()
            .map(|(field, ty)| format!("{ty} {field}"))
            .collect::<Vec<_>>()
            .join(", ");
        let assignments = fields
            .iter()
            .map(|(field, _)| RcDoc::text(format!("this.{field} = {field};")))
            .collect();

        members.push(braced(format!("public {name}({params})"), assignments));
    }

    braced(format!("public record struct {name}"), members)
}

fn interfaces(cx: &Context<'_>, interface: &InterfaceDef) -> Vec<Doc> {
    let name = cx.name(interface.name);
    let provided = surface(interface, cx.view.interner)
        .iter()
        .map(|method| {
            RcDoc::text(format!(
                "{};",
                signature(cx, &method.name, method.params, method.returns)
            ))
        })
        .collect::<Vec<_>>();

    let required = interface
        .required()
        .map(|op| {
            RcDoc::text(format!(
                "{};",
                signature(cx, cx.name(op.name), &op.params, op.returns.as_ref())
            ))
        })
        .collect::<Vec<_>>();

    let mut interfaces = vec![braced(format!("public interface {name}"), provided)];
    if !required.is_empty() {
        interfaces.push(braced(
            format!("public interface {name}{REQUIRED_SUFFIX}"),
            required,
        ));
    }

    interfaces
}

/// The static class holding the free functions of `module`.
fn functions(cx: &Context<'_>, module: ModuleRef) -> Result<Doc, EmitError> {
    let module_def = cx.module(module);
    let content = &module_def.content;
    let class = cx.name(module_def.name);

    let clashes = content
        .types
        .iter()
        .map(TypeDef::name)
        .chain(content.interfaces.iter().map(|interface| interface.name))
        .any(|name| cx.name(name) == class);
    if clashes {
        return Err(cx.failure(
            module,
            module_def.name,
            "the class holding the functions of a module is named after the \
             module, which already declares a type with that name",
        ));
    }

    let methods = content
        .functions
        .iter()
        .map(|function| function_def(cx, module, function))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(braced(format!("public static class {class}"), methods))
}

fn function_def(
    cx: &Context<'_>,
    module: ModuleRef,
    function: &FunctionDef,
) -> Result<Doc, EmitError> {
    let head = format!(
        "public static {}",
        signature(
            cx,
            cx.name(function.name),
            &function.params,
            function.returns.as_ref()
        )
    );

    let body = match (function_body(cx, module, function)?, &function.returns) {
        (Some(literal), _) => vec![RcDoc::text(format!("return {literal};"))],
        (None, Some(_)) => vec![RcDoc::text("return default;")],
        (None, None) => Vec::new(),
    };

    Ok(braced(head, body))
}

fn signature(
    cx: &Context<'_>,
    name: &str,
    params: &[Field],
    returns: Option<&TypeExpr>,
) -> String {
    let params = params
        .iter()
        .map(|param| format!("{} {}", cs_type(cx, &param.ty), cx.name(param.name)))
        .collect::<Vec<_>>()
        .join(", ");

    format!("{} {name}({params})", result_type(cx, returns))
}

// MOCKS

/// A recording mock: every method counts its calls in `{method}_calls` and
/// returns the value of `{method}_returns`.
fn mock_class(cx: &Context<'_>, mock: &MockScaffold<'_>) -> Doc {
    let head = match mock.role {
        MockRole::Collaborator => format!(
            "public class {} : {}",
            mock.name,
            cx.name(mock.interface.name)
        ),
        MockRole::Component => format!("public class {}", mock.name),
    };

    let mut members = Vec::new();
    for method in &mock.methods {
        members.push(RcDoc::text(format!("public int {}_calls;", method.name)));
        if let Some(returns) = method.returns {
            members.push(RcDoc::text(format!(
                "public {} {}_returns;",
                cs_type(cx, returns),
                method.name
            )));
        }
    }

    members.extend(mock.methods.iter().map(|method| mock_method(cx, method)));
    braced(head, members)
}

fn mock_method(cx: &Context<'_>, method: &MockMethod<'_>) -> Doc {
    let mut body = vec![RcDoc::text(format!("{}_calls++;", method.name))];
    if method.returns.is_some() {
        body.push(RcDoc::text(format!("return {}_returns;", method.name)));
    }

    braced(
        format!(
            "public {}",
            signature(cx, &method.name, method.params, method.returns)
        ),
        body,
    )
}

// TYPES

fn cs_type(cx: &Context<'_>, ty: &TypeExpr) -> String {
    ty.clone().collapse_frames(|frame| match frame {
        TypeExprFrame::Primitive(primitive) => primitive_name(primitive).to_owned(),
        TypeExprFrame::Named(id) => type_name(cx, id),
        TypeExprFrame::Array { element, .. } => format!("{element}[]"),
        TypeExprFrame::List(inner) => format!("List<{inner}>"),
        TypeExprFrame::Optional(inner) => format!("{inner}?"),
    })
}

fn result_type(cx: &Context<'_>, returns: Option<&TypeExpr>) -> String {
    returns.map_or_else(|| "void".to_owned(), |ty| cs_type(cx, ty))
}

fn primitive_name(primitive: Primitive) -> &'static str {
    match primitive {
        Primitive::Bool => "bool",
        Primitive::Int8 => "sbyte",
        Primitive::Int16 => "short",
        Primitive::Int32 => "int",
        Primitive::Int64 => "long",
        Primitive::UInt8 => "byte",
        Primitive::UInt16 => "ushort",
        Primitive::UInt32 => "uint",
        Primitive::UInt64 => "ulong",
        Primitive::Float32 => "float",
        Primitive::Float64 => "double",
        Primitive::String => "string",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codegen::{Layout, emit_mocks, mock::MockPlan},
        test_utils::{Bound, WorkspaceBuilder, contents},
    };

    #[test]
    fn geometry_module() {
        let bound = Bound::new(WorkspaceBuilder::base_and_app().build());
        let artifacts = bound.emit("base", BackendKind::CSharp);

        assert_eq!(
            contents(&artifacts, "base/src/geometry/Dims.cs"),
            "\
// Generated by portgen from base:geometry/Dims. Do not edit.

using System.Collections.Generic;

namespace Base.Geometry;

public record struct Dims
{
    public int width;
    public int height;
    public Dims(int width, int height)
    {
        this.width = width;
        this.height = height;
    }
}
"
        );
    }

    #[test]
    fn dependents_use_the_namespaces_of_their_imports() {
        let bound = Bound::new(WorkspaceBuilder::base_and_app().build());
        let artifacts = bound.emit("app", BackendKind::CSharp);
        let app = contents(&artifacts, "app/src/IApp.cs");

        assert!(app.contains(
            "using System.Collections.Generic;\nusing Base;\nusing Base.Geometry;\n\nnamespace App;\n"
        ));
        assert!(app.contains("public record struct Rectangle\n{\n"));
        assert!(app.contains("    public Point topLeft;\n"));
        assert!(app.contains("    public Dims size;\n"));
    }

    #[test]
    fn names_declared_in_two_namespaces_are_qualified() {
        let bound = Bound::new(WorkspaceBuilder::shadowed_points().build());
        let artifacts = bound.emit("app", BackendKind::CSharp);
        let lines = contents(&artifacts, "app/src/Lines.cs");

        assert!(lines.contains("using Base;\nusing Base.Geometry;\n"));
        assert!(lines.contains(
            "    public global::Base.Point flat;\n    public global::Base.Geometry.Point deep;\n"
        ));

        // A module still refers to its own declarations by their bare name.
        let base = bound.emit("base", BackendKind::CSharp);
        assert!(
            contents(&base, "base/src/geometry/Shapes.cs")
                .contains("    public Point(int x, double z)\n")
        );
    }

    #[test]
    fn keywords_are_rejected() {
        let schema = r#"
        [[decl]]
        kind = "interface"
        name = "Channel"
        operations = [
            { name = "send", role = "provided", params = [{ name = "params", type = "string" }] },
        ]

        [[decl]]
        kind = "struct"
        name = "Frame"
        fields = [{ name = "from", type = "int" }, { name = "base", type = "int" }]
        "#;
        let bound = Bound::new(
            WorkspaceBuilder::new()
                .package("net", &[])
                .module("net", "", "Channel", schema)
                .build(),
        );
        let cx = Context::new(bound.view("net"), Layout::native(), BackendKind::CSharp);
        let errors = crate::codegen::emit_modules(&CSharpBackend, &cx).unwrap_err();

        let items = errors
            .iter()
            .map(|error| match error {
                EmitError::EmissionFailure { item, .. } => item.as_ref(),
                other => panic!("unexpected error {other}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(items, ["base", "params"]);
    }

    #[test]
    fn interfaces_and_enums() {
        let bound = Bound::new(WorkspaceBuilder::base_and_app().build());
        let artifacts = bound.emit("base", BackendKind::CSharp);
        let base = contents(&artifacts, "base/src/IBase.cs");

        assert!(base.contains("public enum Color\n{\n    RED,\n    GREEN,\n    BLUE,\n}\n"));
        assert!(base.contains(
            "\
public interface PBase
{
    void start();
    void stop();
    void process();
    bool ping();
    void move_to(Point target);
}
"
        ));
        assert!(base.contains(
            "public interface PBaseRequired\n{\n    void log(string msg);\n}\n"
        ));
    }

    #[test]
    fn functions_live_in_a_static_class() {
        let schema = r#"
        [[decl]]
        kind = "function"
        name = "scale"
        returns = "float"
        body = 2

        [[decl]]
        kind = "function"
        name = "lookup"
        params = [{ name = "keys", type = "list<string>" }]
        returns = "optional<int>"

        [[decl]]
        kind = "function"
        name = "reset"
        "#;
        let bound = Bound::new(
            WorkspaceBuilder::new()
                .package("math-utils", &[])
                .module("math-utils", "ops", "Scaling", schema)
                .build(),
        );
        let artifacts = bound.emit("math-utils", BackendKind::CSharp);
        let scaling = contents(&artifacts, "math-utils/src/ops/Scaling.cs");

        assert!(scaling.contains("namespace MathUtils.Ops;\n"));
        assert!(scaling.contains(
            "\
public static class Scaling
{
    public static float scale()
    {
        return 2.0f;
    }
    public static int? lookup(List<string> keys)
    {
        return default;
    }
    public static void reset()
    {
    }
}
"
        ));
    }

    #[test]
    fn function_class_clashes_fail() {
        let schema = r#"
        [[decl]]
        kind = "enum"
        name = "Mode"
        cases = ["ON"]

        [[decl]]
        kind = "function"
        name = "current"
        returns = "Mode"
        "#;
        let bound = Bound::new(
            WorkspaceBuilder::new()
                .package("modes", &[])
                .module("modes", "", "Mode", schema)
                .build(),
        );
        let cx = Context::new(bound.view("modes"), Layout::native(), BackendKind::CSharp);
        let errors = crate::codegen::emit_modules(&CSharpBackend, &cx).unwrap_err();

        assert!(matches!(
            &errors[..],
            [EmitError::EmissionFailure { item, .. }] if item.as_ref() == "Mode"
        ));
    }

    #[test]
    fn recording_mocks() {
        let bound = Bound::new(WorkspaceBuilder::base_and_app().build());
        let view = bound.view("base");
        let cx = Context::new(view, Layout::native(), BackendKind::CSharp);
        let plan = MockPlan::for_package(&view, &bound.graph);

        let artifacts = emit_mocks(&CSharpBackend, &cx, &plan).unwrap();
        let mocks = contents(&artifacts, "base/src/IBaseMock.cs");

        assert!(mocks.contains("namespace Base;\n"));
        assert!(mocks.contains("public class PBaseProvidedMock : PBase\n{\n"));
        assert!(mocks.contains(
            "\
    public bool ping()
    {
        ping_calls++;
        return ping_returns;
    }
"
        ));
        assert!(mocks.contains("public class PBaseComponentMock\n{\n"));
        assert!(mocks.contains("    public void client_process()\n"));
    }
}
