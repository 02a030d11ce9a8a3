//! The C++ backend.
//!
//! Interfaces become abstract classes and mocks are Google Mock classes.
//! Modules in a subdirectory are wrapped in a namespace named after it, and
//! types from another namespace are referred to by their qualified name.

use pretty::RcDoc;
use recursion::CollapsibleExt;

use crate::ast::{
    EnumDecl, Primitive, StructDecl,
    bound::{
        Field, FunctionDef, InterfaceDef, ModuleRef, TypeDef, TypeExpr, TypeId,
    },
    ty::TypeExprFrame,
};

use super::{
    Backend, BackendKind, Context, Doc, EmitError, NamePosition, banner, block,
    c::REQUIRED_SUFFIX,
    function_body,
    mock::{MockMethod, MockRole, MockScaffold, surface},
    render, sections,
};

const SYSTEM_INCLUDES: [&str; 5] = ["array", "cstdint", "optional", "string", "vector"];

/// Keywords of C++20, including the alternative operator tokens.
const KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "and_eq", "asm", "auto", "bitand", "bitor",
    "bool", "break", "case", "catch", "char", "char8_t", "char16_t",
    "char32_t", "class", "co_await", "co_return", "co_yield", "compl",
    "concept", "const", "const_cast", "consteval", "constexpr", "constinit",
    "continue", "decltype", "default", "delete", "do", "double",
    "dynamic_cast", "else", "enum", "explicit", "export", "extern", "false",
    "float", "for", "friend", "goto", "if", "inline", "int", "long",
    "mutable", "namespace", "new", "noexcept", "not", "not_eq", "nullptr",
    "operator", "or", "or_eq", "private", "protected", "public", "register",
    "reinterpret_cast", "requires", "return", "short", "signed", "sizeof",
    "static", "static_assert", "static_cast", "struct", "switch", "template",
    "this", "thread_local", "throw", "true", "try", "typedef", "typeid",
    "typename", "union", "unsigned", "using", "virtual", "void", "volatile",
    "wchar_t", "while", "xor", "xor_eq",
];

pub struct CppBackend;

impl Backend for CppBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpp
    }

    fn reserves(&self, name: &str, _: NamePosition) -> bool {
        KEYWORDS.contains(&name)
    }

    fn render_module(
        &self,
        cx: &Context<'_>,
        module: ModuleRef,
    ) -> Result<String, EmitError> {
        let cx = &cx.within(module);
        cx.check_distinct(module, |visible, name| {
            (cx.module(visible).dir.segments(), name)
        })?;

        let content = &cx.module(module).content;
        let mut items = Vec::new();

        for def in content.laid_out_types() {
            items.push(match def {
                TypeDef::Enum(decl) => enumeration(cx, decl),
                TypeDef::Struct(decl) => structure(cx, decl),
            });
        }

        for interface in content.interfaces.iter() {
            items.extend(interface_classes(cx, interface));
        }

        for function in content.functions.iter() {
            items.push(function_decl(cx, module, function)?);
        }

        let system = SYSTEM_INCLUDES
            .iter()
            .map(|header| format!("#include <{header}>"))
            .collect::<Vec<_>>();
        let includes = cx
            .include_paths(module)
            .into_iter()
            .map(|path| format!("#include \"{path}\""))
            .collect::<Vec<_>>();

        let mut docs = vec![
            Some(banner("//", &cx.origin(module))),
            Some(RcDoc::text("#pragma once")),
            Some(lines(system)),
            (!includes.is_empty()).then(|| lines(includes)),
        ];
        docs.extend(namespaced(cx, module, items));

        Ok(render(sections(docs)))
    }

    fn render_mocks(
        &self,
        cx: &Context<'_>,
        module: ModuleRef,
        mocks: &[MockScaffold<'_>],
    ) -> Result<String, EmitError> {
        let cx = &cx.within(module);
        let mut docs = vec![
            Some(banner("//", &cx.origin(module))),
            Some(RcDoc::text("#pragma once")),
            Some(RcDoc::text("#include \"gmock/gmock.h\"")),
            Some(RcDoc::text(format!("#include \"{}\"", cx.path(module)))),
        ];
        let classes = mocks.iter().map(|mock| mock_class(cx, mock)).collect();
        docs.extend(namespaced(cx, module, classes));

        Ok(render(sections(docs)))
    }
}

/// Opens and closes the namespace of the directory of `module` around
/// `items`, unless it is at the root.
fn namespaced(
    cx: &Context<'_>,
    module: ModuleRef,
    items: Vec<Doc>,
) -> Vec<Option<Doc>> {
    let dir = cx.module(module).dir.segments();
    if dir.is_empty() {
        return items.into_iter().map(Some).collect();
    }

    let name = dir
        .iter()
        .map(|segment| cx.name(*segment))
        .collect::<Vec<_>>()
        .join("::");

    std::iter::once(RcDoc::text(format!("namespace {name} {{")))
        .chain(items)
        .chain(std::iter::once(RcDoc::text(format!("}}  // namespace {name}"))))
        .map(Some)
        .collect()
}

/// The name of `id` as seen from the scope of `cx`: bare within the same
/// namespace, fully qualified otherwise.
fn type_name(cx: &Context<'_>, id: TypeId) -> String {
    let dir = cx.module(id.module).dir.segments();
    let local = cx
        .scope
        .is_some_and(|scope| cx.module(scope).dir.segments() == dir);

    match local {
        true => cx.type_name(id).to_owned(),
        false => dir
            .iter()
            .map(|segment| cx.name(*segment))
            .chain(std::iter::once(cx.type_name(id)))
            .fold(String::new(), |path, segment| format!("{path}::{segment}")),
    }
}

fn lines(lines: Vec<String>) -> Doc {
    RcDoc::intersperse(lines.into_iter().map(RcDoc::text), RcDoc::hardline())
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

    block(
        RcDoc::text(format!("enum class {} {{", cx.name(decl.name))),
        cases,
        "};",
    )
}

/// A struct with its fields, a value-initializing default constructor and,
/// if it has fields, a field-wise constructor.
fn structure(cx: &Context<'_>, decl: &StructDecl<TypeId>) -> Doc {
    let name = cx.name(decl.name);
    let fields = decl
        .fields
        .iter()
        .map(|field| (cx.name(field.name), cpp_type(cx, &field.ty)))
        .collect::<Vec<_>>();

    let mut members = fields
        .iter()
        .map(|(field, ty)| RcDoc::text(format!("{ty} {field};")))
        .collect::<Vec<_>>();

    match fields.is_empty() {
        true => members.push(RcDoc::text(format!("{name}() {{}}"))),
        false => {
            let defaults = fields
                .iter()
                .map(|(field, _)| format!("{field}()"))
                .collect::<Vec<_>>()
                .join(", ");
            let params = fields
                .iter()
                .map(|(field, ty)| format!("{ty} {field}"))
                .collect::<Vec<_>>()
                .join(", ");
            let inits = fields
                .iter()
                .map(|(field, _)| format!("{field}({field})"))
                .collect::<Vec<_>>()
                .join(", ");

            members.push(RcDoc::text(format!("{name}() : {defaults} {{}}")));
            members.push(RcDoc::text(format!("{name}({params}) : {inits} {{}}")));
        }
    }

    block(RcDoc::text(format!("struct {name} {{")), members, "};")
}

fn interface_classes(cx: &Context<'_>, interface: &InterfaceDef) -> Vec<Doc> {
    let name = cx.name(interface.name);
    let provided = surface(interface, cx.view.interner)
        .iter()
        .map(|method| {
            pure_virtual(cx, method.operation, method.params, method.returns)
        })
        .collect::<Vec<_>>();

    let required = interface
        .required()
        .map(|op| pure_virtual(cx, cx.name(op.name), &op.params, op.returns.as_ref()))
        .collect::<Vec<_>>();

    let mut classes = vec![abstract_class(name, provided)];
    if !required.is_empty() {
        classes.push(abstract_class(&format!("{name}{REQUIRED_SUFFIX}"), required));
    }

    classes
}

fn abstract_class(name: &str, methods: Vec<Doc>) -> Doc {
    let mut members = vec![RcDoc::text(format!("virtual ~{name}() = default;"))];
    members.extend(methods);

    class(format!("class {name} {{"), members)
}

/// A class whose members are all public.
fn class(head: String, members: Vec<Doc>) -> Doc {
    block(
        RcDoc::text(head).append(RcDoc::hardline()).append("public:"),
        members,
        "};",
    )
}

fn pure_virtual(
    cx: &Context<'_>,
    name: &str,
    params: &[Field],
    returns: Option<&TypeExpr>,
) -> Doc {
    RcDoc::text(format!(
        "virtual {} {name}({}) = 0;",
        result_type(cx, returns),
        parameters(cx, params)
    ))
}

fn function_decl(
    cx: &Context<'_>,
    module: ModuleRef,
    function: &FunctionDef,
) -> Result<Doc, EmitError> {
    let signature = format!(
        "{} {}({})",
        result_type(cx, function.returns.as_ref()),
        cx.name(function.name),
        parameters(cx, &function.params)
    );

    Ok(match function_body(cx, module, function)? {
        Some(body) => block(
            RcDoc::text(format!("inline {signature} {{")),
            vec![RcDoc::text(format!("return {body};"))],
            "}",
        ),
        None => RcDoc::text(format!("{signature};")),
    })
}

// MOCKS

/// A Google Mock class. Collaborator mocks override the provided surface of
/// the interface; component mocks only declare the client methods.
fn mock_class(cx: &Context<'_>, mock: &MockScaffold<'_>) -> Doc {
    let (head, specifiers) = match mock.role {
        MockRole::Collaborator => (
            format!(
                "class {} : public {} {{",
                mock.name,
                cx.name(mock.interface.name)
            ),
            ", (override)",
        ),
        MockRole::Component => (format!("class {} {{", mock.name), ""),
    };

    let members = mock
        .methods
        .iter()
        .map(|method| {
            RcDoc::text(format!(
                "MOCK_METHOD({}, {}, ({}){specifiers});",
                protected(result_type(cx, method.returns)),
                method.name,
                mock_parameters(cx, method)
            ))
        })
        .collect();

    class(head, members)
}

/// Parameters as Google Mock expects them: types that contain a comma are
/// parenthesized, which leaves no room for the parameter name.
fn mock_parameters(cx: &Context<'_>, method: &MockMethod<'_>) -> String {
    method
        .params
        .iter()
        .map(|param| {
            let ty = cpp_type(cx, &param.ty);
            match ty.contains(',') {
                true => format!("({ty})"),
                false => format!("{ty} {}", cx.name(param.name)),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn protected(ty: String) -> String {
    match ty.contains(',') {
        true => format!("({ty})"),
        false => ty,
    }
}

// TYPES

fn cpp_type(cx: &Context<'_>, ty: &TypeExpr) -> String {
    ty.clone().collapse_frames(|frame| match frame {
        TypeExprFrame::Primitive(primitive) => primitive_name(primitive).to_owned(),
        TypeExprFrame::Named(id) => type_name(cx, id),
        TypeExprFrame::Array { element, len } => {
            format!("std::array<{element}, {len}>")
        }
        TypeExprFrame::List(inner) => format!("std::vector<{inner}>"),
        TypeExprFrame::Optional(inner) => format!("std::optional<{inner}>"),
    })
}

fn result_type(cx: &Context<'_>, returns: Option<&TypeExpr>) -> String {
    returns.map_or_else(|| "void".to_owned(), |ty| cpp_type(cx, ty))
}

fn parameters(cx: &Context<'_>, params: &[Field]) -> String {
    params
        .iter()
        .map(|param| format!("{} {}", cpp_type(cx, &param.ty), cx.name(param.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn primitive_name(primitive: Primitive) -> &'static str {
    match primitive {
        Primitive::Bool => "bool",
        Primitive::Int8 => "std::int8_t",
        Primitive::Int16 => "std::int16_t",
        Primitive::Int32 => "std::int32_t",
        Primitive::Int64 => "std::int64_t",
        Primitive::UInt8 => "std::uint8_t",
        Primitive::UInt16 => "std::uint16_t",
        Primitive::UInt32 => "std::uint32_t",
        Primitive::UInt64 => "std::uint64_t",
        Primitive::Float32 => "float",
        Primitive::Float64 => "double",
        Primitive::String => "std::string",
    }
}
