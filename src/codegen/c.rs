//! The C backend.
//!
//! Interfaces become tables of function pointers that take the component
//! as an untyped `self` argument. Mocks are plain structs that count calls
//! and hold canned results, with `static inline` stubs that fit the
//! function pointer slots.

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
    function_body,
    mock::{MockMethod, MockRole, MockScaffold, surface},
    render, sections,
};

/// The suffix of the table of required operations of an interface.
pub const REQUIRED_SUFFIX: &str = "Required";

/// Keywords of C11 and C23, and the macros of `<stdbool.h>`.
const KEYWORDS: &[&str] = &[
    "_Alignas", "_Alignof", "_Atomic", "_Bool", "_Complex", "_Generic",
    "_Imaginary", "_Noreturn", "_Static_assert", "_Thread_local", "alignas",
    "alignof", "auto", "bool", "break", "case", "char", "const", "constexpr",
    "continue", "default", "do", "double", "else", "enum", "extern", "false",
    "float", "for", "goto", "if", "inline", "int", "long", "nullptr",
    "register", "restrict", "return", "short", "signed", "sizeof", "static",
    "static_assert", "struct", "switch", "thread_local", "true", "typedef",
    "typeof", "typeof_unqual", "union", "unsigned", "void", "volatile",
    "while",
];

pub struct CBackend;

impl Backend for CBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::C
    }

    fn reserves(&self, name: &str, position: NamePosition) -> bool {
        match position {
            // Cases are prefixed with their enum and directories never
            // appear in the source.
            NamePosition::Case | NamePosition::Directory => false,
            NamePosition::Declaration | NamePosition::Member => {
                KEYWORDS.contains(&name)
            }
        }
    }

    fn render_module(
        &self,
        cx: &Context<'_>,
        module: ModuleRef,
    ) -> Result<String, EmitError> {
        cx.check_distinct(module, |_, name| name)?;

        let content = &cx.module(module).content;
        let mut items = Vec::new();

        for def in content.laid_out_types() {
            items.push(match def {
                TypeDef::Enum(decl) => enumeration(cx, module, decl)?,
                TypeDef::Struct(decl) => structure(cx, module, decl)?,
            });
        }

        for interface in content.interfaces.iter() {
            items.extend(vtables(cx, module, interface)?);
        }

        for function in content.functions.iter() {
            items.push(function_decl(cx, module, function)?);
        }

        let includes = cx
            .include_paths(module)
            .into_iter()
            .map(|path| format!("#include \"{path}\""))
            .collect();

        Ok(render(guarded(cx, module, "H", includes, items)))
    }

    fn render_mocks(
        &self,
        cx: &Context<'_>,
        module: ModuleRef,
        mocks: &[MockScaffold<'_>],
    ) -> Result<String, EmitError> {
        let mut items = Vec::new();

        for mock in mocks {
            let fail = |reason: &str| {
                cx.failure(module, mock.interface.name, reason.to_owned())
            };

            items.push(mock_struct(cx, mock).map_err(fail)?);
            for method in &mock.methods {
                items.push(mock_stub(cx, mock, method).map_err(fail)?);
            }

            if mock.role == MockRole::Collaborator {
                items.push(mock_vtable(cx, mock));
            }
        }

        let includes = vec![format!("#include \"{}\"", cx.path(module))];
        Ok(render(guarded(cx, module, "MOCK_H", includes, items)))
    }
}

/// Wraps `items` in an include guard, after the banner and the includes.
fn guarded(
    cx: &Context<'_>,
    module: ModuleRef,
    suffix: &str,
    includes: Vec<String>,
    items: Vec<Doc>,
) -> Doc {
    let guard = guard(&cx.origin(module), suffix);

    let mut docs = vec![
        Some(banner("//", &cx.origin(module))),
        Some(lines([format!("#ifndef {guard}"), format!("#define {guard}")])),
        Some(lines([
            "#include <stdbool.h>".to_owned(),
            "#include <stdint.h>".to_owned(),
        ])),
        (!includes.is_empty()).then(|| lines(includes)),
    ];

    docs.extend(items.into_iter().map(Some));
    docs.push(Some(RcDoc::text(format!("#endif /* {guard} */"))));
    sections(docs)
}

/// The include guard of an artifact, derived from the origin of its module
/// so that it does not depend on where the artifact is written.
fn guard(origin: &str, suffix: &str) -> String {
    let origin = origin
        .chars()
        .map(|c| match c.is_ascii_alphanumeric() {
            true => c.to_ascii_uppercase(),
            false => '_',
        })
        .collect::<String>();

    format!("PORTGEN_{origin}_{suffix}")
}

fn lines(lines: impl IntoIterator<Item = String>) -> Doc {
    RcDoc::intersperse(lines.into_iter().map(RcDoc::text), RcDoc::hardline())
}

// DECLARATIONS

fn enumeration(
    cx: &Context<'_>,
    module: ModuleRef,
    decl: &EnumDecl,
) -> Result<Doc, EmitError> {
    if decl.cases.is_empty() {
        return Err(cx.failure(module, decl.name, "C enums cannot be empty"));
    }

    let name = cx.name(decl.name);
    let cases = decl
        .cases
        .iter()
        .map(|case| {
            let case_name = format!("{name}_{}", cx.name(case.name));
            RcDoc::text(match case.value {
                Some(value) => format!("{case_name} = {value},"),
                None => format!("{case_name},"),
            })
        })
        .collect();

    Ok(block(RcDoc::text(format!("enum {name} {{")), cases, "};"))
}

fn structure(
    cx: &Context<'_>,
    module: ModuleRef,
    decl: &StructDecl<TypeId>,
) -> Result<Doc, EmitError> {
    if decl.fields.is_empty() {
        return Err(cx.failure(
            module,
            decl.name,
            "C structs must have at least one field",
        ));
    }

    let fields = decl
        .fields
        .iter()
        .map(|field| {
            let declarator = declarator(cx, &field.ty).map_err(|reason| {
                cx.failure(
                    module,
                    decl.name,
                    format!("field `{}`: {reason}", cx.name(field.name)),
                )
            })?;
            Ok(RcDoc::text(format!(
                "{};",
                declarator.declare(cx.name(field.name))
            )))
        })
        .collect::<Result<Vec<_>, EmitError>>()?;

    Ok(block(
        RcDoc::text(format!("struct {} {{", cx.name(decl.name))),
        fields,
        "};",
    ))
}

/// The table of provided operations of `interface`, followed by the table
/// of its required operations if it has any.
fn vtables(
    cx: &Context<'_>,
    module: ModuleRef,
    interface: &InterfaceDef,
) -> Result<Vec<Doc>, EmitError> {
    let name = cx.name(interface.name);
    let fail = |operation: &str, reason: &str| {
        cx.failure(
            module,
            interface.name,
            format!("operation `{operation}`: {reason}"),
        )
    };

    let provided = surface(interface, cx.view.interner)
        .iter()
        .map(|method| {
            slot(cx, method.operation, method.params, method.returns)
                .map_err(|reason| fail(method.operation, reason))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let required = interface
        .required()
        .map(|op| {
            let operation = cx.name(op.name);
            slot(cx, operation, &op.params, op.returns.as_ref())
                .map_err(|reason| fail(operation, reason))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut tables = vec![block(
        RcDoc::text(format!("struct {name} {{")),
        provided,
        "};",
    )];

    if !required.is_empty() {
        tables.push(block(
            RcDoc::text(format!("struct {name}{REQUIRED_SUFFIX} {{")),
            required,
            "};",
        ));
    }

    Ok(tables)
}

/// A function pointer member taking the component as `self`.
fn slot(
    cx: &Context<'_>,
    name: &str,
    params: &[Field],
    returns: Option<&TypeExpr>,
) -> Result<Doc, &'static str> {
    let result = result_type(cx, returns)?;
    let params = parameters(cx, Some("void *self"), params)?;

    Ok(RcDoc::text(format!(
        "{};",
        prefixed(&result, &format!("(*{name})({params})"))
    )))
}

fn function_decl(
    cx: &Context<'_>,
    module: ModuleRef,
    function: &FunctionDef,
) -> Result<Doc, EmitError> {
    let name = cx.name(function.name);
    let fail = |reason: &str| cx.failure(module, function.name, reason.to_owned());

    let result = result_type(cx, function.returns.as_ref()).map_err(fail)?;
    let params = parameters(cx, None, &function.params).map_err(fail)?;
    let signature = prefixed(&result, &format!("{name}({params})"));

    Ok(match function_body(cx, module, function)? {
        Some(body) => block(
            RcDoc::text(format!("static inline {signature} {{")),
            vec![RcDoc::text(format!("return {body};"))],
            "}",
        ),
        None => RcDoc::text(format!("{signature};")),
    })
}

// MOCKS

fn mock_struct(
    cx: &Context<'_>,
    mock: &MockScaffold<'_>,
) -> Result<Doc, &'static str> {
    let mut members = Vec::new();

    for method in &mock.methods {
        members.push(RcDoc::text(format!("int {}_calls;", method.name)));

        if let Some(returns) = method.returns {
            let declarator = declarator(cx, returns)?;
            members.push(RcDoc::text(format!(
                "{};",
                declarator.declare(&format!("{}_returns", method.name))
            )));
        }
    }

    Ok(block(
        RcDoc::text(format!("struct {} {{", mock.name)),
        members,
        "};",
    ))
}

/// A stub that records a call to `method` and returns its canned result.
fn mock_stub(
    cx: &Context<'_>,
    mock: &MockScaffold<'_>,
    method: &MockMethod<'_>,
) -> Result<Doc, &'static str> {
    let result = result_type(cx, method.returns)?;
    let params = parameters(cx, Some("void *self"), method.params)?;
    let signature =
        prefixed(&result, &format!("{}_{}({params})", mock.name, method.name));

    let mut body = vec![RcDoc::text(format!(
        "struct {0} *mock = (struct {0} *)self;",
        mock.name
    ))];
    body.extend(
        method
            .params
            .iter()
            .map(|param| RcDoc::text(format!("(void){};", cx.name(param.name)))),
    );
    body.push(RcDoc::text(format!("mock->{}_calls++;", method.name)));

    if method.returns.is_some() {
        body.push(RcDoc::text(format!("return mock->{}_returns;", method.name)));
    }

    Ok(block(
        RcDoc::text(format!("static inline {signature} {{")),
        body,
        "}",
    ))
}

/// A function returning the provided table of the interface, filled with
/// the stubs of `mock`.
fn mock_vtable(cx: &Context<'_>, mock: &MockScaffold<'_>) -> Doc {
    let interface = cx.name(mock.interface.name);
    let slots = mock
        .methods
        .iter()
        .map(|method| {
            RcDoc::text(format!(
                ".{} = {}_{},",
                method.operation, mock.name, method.name
            ))
        })
        .collect();

    block(
        RcDoc::text(format!(
            "static inline struct {interface} {}_vtable(void) {{",
            mock.name
        )),
        vec![
            block(
                RcDoc::text(format!("struct {interface} vtable = {{")),
                slots,
                "};",
            ),
            RcDoc::text("return vtable;"),
        ],
        "}",
    )
}

// TYPES

/// A C type split around the name it declares, so that `int32_t xs[4]` is
/// the base `int32_t` and the suffix `[4]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Declarator {
    base: String,
    suffix: String,
}

impl Declarator {
    fn plain(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            suffix: String::new(),
        }
    }

    fn declare(&self, name: &str) -> String {
        format!("{}{}", prefixed(&self.base, name), self.suffix)
    }
}

/// Joins a type and the declarator that follows it, without a space after a
/// pointer.
fn prefixed(base: &str, rest: &str) -> String {
    match base.ends_with('*') {
        true => format!("{base}{rest}"),
        false => format!("{base} {rest}"),
    }
}

fn declarator(cx: &Context<'_>, ty: &TypeExpr) -> Result<Declarator, &'static str> {
    ty.clone().try_collapse_frames(|frame| match frame {
        TypeExprFrame::Primitive(primitive) => {
            Ok(Declarator::plain(primitive_name(primitive)))
        }
        TypeExprFrame::Named(id) => Ok(Declarator::plain(match cx.view.type_def(id) {
            TypeDef::Enum(_) => format!("enum {}", cx.type_name(id)),
            TypeDef::Struct(_) => format!("struct {}", cx.type_name(id)),
        })),
        TypeExprFrame::Array { element, len } => Ok(Declarator {
            base: element.base,
            suffix: format!("[{len}]{}", element.suffix),
        }),
        TypeExprFrame::List(_) => Err("variable-length lists have no C representation"),
        TypeExprFrame::Optional(_) => {
            Err("optional values have no C representation")
        }
    })
}

fn result_type(
    cx: &Context<'_>,
    returns: Option<&TypeExpr>,
) -> Result<String, &'static str> {
    let Some(returns) = returns else {
        return Ok("void".to_owned());
    };

    let declarator = declarator(cx, returns)?;
    match declarator.suffix.is_empty() {
        true => Ok(declarator.base),
        false => Err("C functions cannot return arrays"),
    }
}

fn parameters(
    cx: &Context<'_>,
    receiver: Option<&str>,
    params: &[Field],
) -> Result<String, &'static str> {
    let mut rendered = receiver.map(str::to_owned).into_iter().collect::<Vec<_>>();

    for param in params {
        rendered.push(declarator(cx, &param.ty)?.declare(cx.name(param.name)));
    }

    Ok(match rendered.is_empty() {
        true => "void".to_owned(),
        false => rendered.join(", "),
    })
}

fn primitive_name(primitive: Primitive) -> &'static str {
    match primitive {
        Primitive::Bool => "bool",
        Primitive::Int8 => "int8_t",
        Primitive::Int16 => "int16_t",
        Primitive::Int32 => "int32_t",
        Primitive::Int64 => "int64_t",
        Primitive::UInt8 => "uint8_t",
        Primitive::UInt16 => "uint16_t",
        Primitive::UInt32 => "uint32_t",
        Primitive::UInt64 => "uint64_t",
        Primitive::Float32 => "float",
        Primitive::Float64 => "double",
        Primitive::String => "const char *",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codegen::{Layout, emit_mocks, emit_modules, mock::MockPlan},
        test_utils::{Bound, WorkspaceBuilder, contents},
    };

    fn emit_one(name: &str, schema: &str) -> Result<String, Vec<EmitError>> {
        let bound = Bound::new(
            WorkspaceBuilder::new()
                .package("pkg", &[])
                .module("pkg", "", name, schema)
                .build(),
        );
        let cx = Context::new(bound.view("pkg"), Layout::native(), BackendKind::C);
        emit_modules(&CBackend, &cx)
            .map(|mut artifacts| artifacts.remove(0).contents)
    }

    #[test]
    fn base_header() {
        let bound = Bound::new(WorkspaceBuilder::base_and_app().build());
        let artifacts = bound.emit("base", BackendKind::C);
        let header = contents(&artifacts, "base/src/IBase.h");

        assert_eq!(
            header,
            "\
// Generated by portgen from base:IBase. Do not edit.

#ifndef PORTGEN_BASE_IBASE_H
#define PORTGEN_BASE_IBASE_H

#include <stdbool.h>
#include <stdint.h>

enum Color {
    Color_RED,
    Color_GREEN,
    Color_BLUE,
};

struct Point {
    int32_t x;
    int32_t y;
    enum Color color;
};

struct PBase {
    void (*start)(void *self);
    void (*stop)(void *self);
    void (*process)(void *self);
    bool (*ping)(void *self);
    void (*move_to)(void *self, struct Point target);
};

struct PBaseRequired {
    void (*log)(void *self, const char *msg);
};

#endif /* PORTGEN_BASE_IBASE_H */
"
        );
    }

    #[test]
    fn dependent_headers_include_their_imports() {
        let bound = Bound::new(WorkspaceBuilder::base_and_app().build());
        let artifacts = bound.emit("app", BackendKind::C);
        let header = contents(&artifacts, "app/src/IApp.h");

        assert!(header.contains(
            "#include \"base/src/IBase.h\"\n#include \"base/src/geometry/Dims.h\"\n"
        ));
        assert!(header.contains(
            "struct Rectangle {\n    struct Point topLeft;\n    struct Point bottomRight;\n    struct Dims size;\n};\n"
        ));
    }

    #[test]
    fn enum_values_arrays_and_functions() {
        let schema = r#"
        [[decl]]
        kind = "enum"
        name = "Level"
        cases = ["LOW", { name = "HIGH", value = 7 }]

        [[decl]]
        kind = "struct"
        name = "Grid"
        fields = [{ name = "cells", type = "array<array<uint8, 3>, 2>" }]

        [[decl]]
        kind = "function"
        name = "greeting"
        returns = "string"
        body = "hi"

        [[decl]]
        kind = "function"
        name = "reset"
        params = [{ name = "grid", type = "Grid" }]
        "#;
        let header = emit_one("Things", schema).unwrap();

        assert!(header.contains("    Level_HIGH = 7,\n"));
        assert!(header.contains("    uint8_t cells[2][3];\n"));
        assert!(header.contains(
            "static inline const char *greeting(void) {\n    return \"hi\";\n}\n"
        ));
        assert!(header.contains("void reset(struct Grid grid);\n"));
    }

    #[test]
    fn unrepresentable_types_fail() {
        let schema = r#"
        [[decl]]
        kind = "struct"
        name = "Bag"
        fields = [{ name = "items", type = "list<int>" }]
        "#;
        let errors = emit_one("Bag", schema).unwrap_err();
        assert!(matches!(
            &errors[..],
            [EmitError::EmissionFailure { item, backend: BackendKind::C, .. }]
                if item.as_ref() == "Bag"
        ));

        let schema = r#"
        [[decl]]
        kind = "function"
        name = "corners"
        returns = "array<int, 4>"
        "#;
        assert!(emit_one("Corners", schema).is_err());

        let schema = r#"
        [[decl]]
        kind = "function"
        name = "answer"
        returns = "bool"
        body = 42
        "#;
        assert!(emit_one("Answer", schema).is_err());
    }

    #[test]
    fn keywords_are_rejected_before_rendering() {
        let schema = r#"
        [[decl]]
        kind = "struct"
        name = "Slot"
        fields = [{ name = "default", type = "int" }, { name = "class", type = "bool" }]

        [[decl]]
        kind = "enum"
        name = "Mode"
        cases = ["auto", "manual"]
        "#;
        let errors = emit_one("Slot", schema).unwrap_err();

        // Cases are always prefixed, and `class` is only reserved in C++.
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            EmitError::EmissionFailure { item, reason, .. }
                if item.as_ref() == "default" && reason.contains("reserved word")
        ));
    }

    #[test]
    fn declarations_with_one_name_cannot_meet() {
        let bound = Bound::new(WorkspaceBuilder::shadowed_points().build());
        let cx = Context::new(bound.view("app"), Layout::native(), BackendKind::C);
        let errors = emit_modules(&CBackend, &cx).unwrap_err();

        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "cannot emit `Point` from `app:Lines` for c: `Point` is declared by \
             both `base:Flat` and `base:geometry/Shapes`"
        );

        // Each base module on its own is fine.
        assert_eq!(bound.emit("base", BackendKind::C).len(), 2);
    }

    #[test]
    fn collaborator_mocks_fill_the_vtable() {
        let bound = Bound::new(WorkspaceBuilder::base_and_app().build());
        let view = bound.view("base");
        let cx = Context::new(view, Layout::native(), BackendKind::C);
        let plan = MockPlan::for_package(&view, &bound.graph);

        let artifacts = emit_mocks(&CBackend, &cx, &plan).unwrap();
        let mocks = contents(&artifacts, "base/src/IBaseMock.h");

        assert!(mocks.contains("#ifndef PORTGEN_BASE_IBASE_MOCK_H\n"));
        assert!(mocks.contains("#include \"base/src/IBase.h\"\n"));
        assert!(mocks.contains("    int ping_calls;\n    bool ping_returns;\n"));
        assert!(mocks.contains(
            "\
static inline void PBaseProvidedMock_move_to(void *self, struct Point target) {
    struct PBaseProvidedMock *mock = (struct PBaseProvidedMock *)self;
    (void)target;
    mock->move_to_calls++;
}
"
        ));
        assert!(mocks.contains(
            "\
static inline struct PBase PBaseProvidedMock_vtable(void) {
    struct PBase vtable = {
        .start = PBaseProvidedMock_start,
        .stop = PBaseProvidedMock_stop,
        .process = PBaseProvidedMock_process,
        .ping = PBaseProvidedMock_ping,
        .move_to = PBaseProvidedMock_move_to,
    };
    return vtable;
}
"
        ));
        assert!(mocks.contains("PBaseComponentMock_client_process(void *self)"));
        assert!(!mocks.contains("PBaseComponentMock_vtable"));
    }

    #[test]
    fn guards_ignore_the_output_location() {
        assert_eq!(guard("base:geometry/Dims", "H"), "PORTGEN_BASE_GEOMETRY_DIMS_H");
        assert_eq!(guard("my-pkg:IApp", "MOCK_H"), "PORTGEN_MY_PKG_IAPP_MOCK_H");
    }
}
