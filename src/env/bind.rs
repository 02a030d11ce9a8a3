//! Type binding.
//!
//! Binding a package resolves every [`TypePath`] in its modules to the
//! [`TypeId`] of a canonical definition, either in the package itself or in
//! one of its (already bound) ancestors. A reference is resolved against
//! 1. the declarations in the same subdirectory of the same package, and
//!    otherwise;
//! 2. the declarations of the package and all of its ancestors, preferring
//!    the nearest ones by dependency distance.
//!
//! A `pkg::` qualifier restricts the search to one visible package, and a
//! `dir.` qualifier restricts it to one exact subdirectory. A name is never
//! shadowed: if the same subdirectory and name are declared by more than one
//! visible package, the reference is an error.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{DiGraph, NodeIndex};
use recursion::CollapsibleExt;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    ast::{
        Decl, Field, FunctionDecl, InterfaceDecl, Operation, START_OPERATION,
        STOP_OPERATION, StructDecl,
        bound::{self, ModuleRef, TypeDef, TypeId},
        ty::{TypeExpr, TypeExprFrame, TypePath},
        unbound,
    },
    graph::PackageGraph,
    package::{Module, ModulePath, Package, PkgId, Workspace},
    symbol::{StringInterner, Symbol},
};

use super::{BoundPackage, SymbolTable};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error(
        "unresolved type `{reference}` in module `{module}` of package `{package}`"
    )]
    UnresolvedType {
        package: Box<str>,
        module: Box<str>,
        reference: Box<str>,
    },
    #[error(
        "`{name}` is declared more than once in package `{package}`: {}",
        .locations.join(", ")
    )]
    DuplicateDeclaration {
        package: Box<str>,
        name: Box<str>,
        locations: Box<[Box<str>]>,
    },
    #[error(
        "ambiguous type `{reference}` in module `{module}` of package `{package}` could refer to {}",
        .candidates.join(" or ")
    )]
    AmbiguousType {
        package: Box<str>,
        module: Box<str>,
        reference: Box<str>,
        candidates: Box<[Box<str>]>,
    },
    #[error(
        "structs in package `{package}` contain each other by value: {}",
        .cycle.join(", ")
    )]
    RecursiveStruct {
        package: Box<str>,
        cycle: Box<[Box<str>]>,
    },
}

/// Binds the package `id`. Every ancestor of `id` must already be in
/// `table`.
pub fn bind_package(
    id: PkgId,
    workspace: &Workspace,
    graph: &PackageGraph,
    table: &SymbolTable,
) -> Result<BoundPackage, Vec<BindError>> {
    let mut binder = Binder::new(id, workspace, graph, table);
    binder.check_declarations();

    let package = binder.package;
    let bound = package
        .try_map_modules(|index, module| binder.bind_module(index, module));

    let mut errors = std::mem::take(&mut binder.errors);
    match bound {
        Ok(bound) => {
            errors.extend(binder.check_recursion(&bound));
            match errors.is_empty() {
                true => {
                    debug!(
                        package = workspace.name(id),
                        modules = bound.modules.len(),
                        "bound package"
                    );
                    Ok(bound)
                }
                false => Err(errors),
            }
        }
        Err(module_errors) => {
            errors.extend(module_errors);
            Err(errors)
        }
    }
}

/// A visible type definition that a name may resolve to.
#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    id: TypeId,
    package_name: Symbol,
    module_name: Symbol,
    dir: &'a ModulePath,
    /// The dependency distance from the package being bound.
    distance: usize,
}

struct Binder<'a> {
    id: PkgId,
    package: &'a Package<unbound::Module>,
    interner: &'a StringInterner,
    candidates: BTreeMap<Symbol, Vec<Candidate<'a>>>,
    errors: Vec<BindError>,
}

impl<'a> Binder<'a> {
    fn new(
        id: PkgId,
        workspace: &'a Workspace,
        graph: &PackageGraph,
        table: &'a SymbolTable,
    ) -> Self {
        let package = workspace.package(id);
        let mut candidates = BTreeMap::<Symbol, Vec<Candidate<'a>>>::new();

        for (index, module) in package.modules.iter().enumerate() {
            let types = module
                .content
                .decls
                .iter()
                .filter(|decl| decl.kind().is_type());

            for (type_index, decl) in types.enumerate() {
                candidates.entry(decl.name()).or_default().push(Candidate {
                    id: TypeId {
                        module: ModuleRef {
                            package: id,
                            module: index,
                        },
                        index: type_index,
                    },
                    package_name: package.name,
                    module_name: module.name,
                    dir: &module.dir,
                    distance: 0,
                });
            }
        }

        for (&ancestor, &distance) in graph.ancestors(id) {
            let Some(bound) = table.get(ancestor) else {
                continue;
            };

            for (index, module) in bound.modules.iter().enumerate() {
                for (type_index, def) in module.content.types.iter().enumerate()
                {
                    candidates.entry(def.name()).or_default().push(Candidate {
                        id: TypeId {
                            module: ModuleRef {
                                package: ancestor,
                                module: index,
                            },
                            index: type_index,
                        },
                        package_name: bound.name,
                        module_name: module.name,
                        dir: &module.dir,
                        distance,
                    });
                }
            }
        }

        Self {
            id,
            package,
            interner: &workspace.interner,
            candidates,
            errors: Vec::new(),
        }
    }

    fn package_name(&self) -> Box<str> {
        self.interner.get(self.package.name).into()
    }

    fn location(&self, candidate: &Candidate<'_>) -> Box<str> {
        location(
            self.interner,
            candidate.package_name,
            candidate.dir,
            candidate.module_name,
        )
    }

    fn module_location(&self, index: usize) -> Box<str> {
        let module = &self.package.modules[index];
        location(self.interner, self.package.name, &module.dir, module.name)
    }

    fn duplicate(&mut self, name: String, locations: Vec<Box<str>>) {
        self.errors.push(BindError::DuplicateDeclaration {
            package: self.package_name(),
            name: name.into(),
            locations: locations.into_boxed_slice(),
        });
    }

    // DECLARATIONS

    /// Checks that declaration names are unique within each scope, that no
    /// type redeclares an ancestor's type, and that the members of each
    /// declaration have distinct names.
    fn check_declarations(&mut self) {
        let package = self.package;
        let modules = &package.modules;

        let mut scopes = BTreeMap::<(&ModulePath, Symbol), Vec<usize>>::new();
        for (index, module) in modules.iter().enumerate() {
            for decl in &module.content.decls {
                scopes
                    .entry((&module.dir, decl.name()))
                    .or_default()
                    .push(index);
            }
        }

        for ((dir, name), indices) in scopes {
            if indices.len() > 1 {
                let locations = indices
                    .into_iter()
                    .map(|index| self.module_location(index))
                    .collect();
                self.duplicate(dotted(self.interner, dir, name), locations);
            }
        }

        let redeclarations = self
            .candidates
            .values()
            .flat_map(|candidates| {
                candidates
                    .iter()
                    .filter(|own| own.distance == 0)
                    .flat_map(move |own| {
                        candidates
                            .iter()
                            .filter(move |other| {
                                other.distance > 0 && other.dir == own.dir
                            })
                            .map(move |other| (*own, *other))
                    })
            })
            .collect::<Vec<_>>();

        for (own, ancestor) in redeclarations {
            let name = dotted(self.interner, own.dir, self.own_type_name(own.id));
            let locations = vec![self.location(&own), self.location(&ancestor)];
            self.duplicate(name, locations);
        }

        for (index, module) in modules.iter().enumerate() {
            for decl in &module.content.decls {
                self.check_members(index, decl);
            }
        }
    }

    fn own_type_name(&self, id: TypeId) -> Symbol {
        self.package.modules[id.module.module]
            .content
            .decls
            .iter()
            .filter(|decl| decl.kind().is_type())
            .nth(id.index)
            .map(Decl::name)
            .expect("Type IDs are valid by construction")
    }

    fn check_members(&mut self, module: usize, decl: &unbound::Decl) {
        let interner = self.interner;
        let get = move |symbol: Symbol| interner.get(symbol);

        match decl {
            Decl::Enum(decl) => {
                let names = decl.cases.iter().map(|case| get(case.name));
                self.check_unique(module, decl.name, names);
            }
            Decl::Struct(decl) => {
                let names = decl.fields.iter().map(|field| get(field.name));
                self.check_unique(module, decl.name, names);
            }
            Decl::Interface(decl) => {
                let names = [START_OPERATION, STOP_OPERATION]
                    .into_iter()
                    .chain(decl.entry.map(get))
                    .chain(decl.operations.iter().map(|op| get(op.name)))
                    .collect::<Vec<_>>();
                self.check_unique(module, decl.name, names);

                for op in &decl.operations {
                    let names = op.params.iter().map(|param| get(param.name));
                    let owner = format!("{}.{}", get(decl.name), get(op.name));
                    self.check_unique_in(module, owner, names);
                }
            }
            Decl::Function(decl) => {
                let names = decl.params.iter().map(|param| get(param.name));
                self.check_unique(module, decl.name, names);
            }
        }
    }

    fn check_unique<'n>(
        &mut self,
        module: usize,
        owner: Symbol,
        names: impl IntoIterator<Item = &'n str>,
    ) {
        let owner = self.interner.get(owner).to_owned();
        self.check_unique_in(module, owner, names);
    }

    fn check_unique_in<'n>(
        &mut self,
        module: usize,
        owner: String,
        names: impl IntoIterator<Item = &'n str>,
    ) {
        let mut seen = BTreeSet::new();
        let mut reported = BTreeSet::new();

        for name in names {
            if !seen.insert(name) && reported.insert(name) {
                let location = self.module_location(module);
                self.duplicate(format!("{owner}.{name}"), vec![location]);
            }
        }
    }

    // MODULES

    fn bind_module(
        &mut self,
        index: usize,
        module: &Module<unbound::Module>,
    ) -> Result<bound::Module, Vec<BindError>> {
        let scope = ModuleRef {
            package: self.id,
            module: index,
        };
        let errors_before = self.errors.len();

        let mut types = Vec::new();
        let mut interfaces = Vec::new();
        let mut functions = Vec::new();

        for decl in &module.content.decls {
            match decl {
                Decl::Enum(decl) => types.push(Some(TypeDef::Enum(decl.clone()))),
                Decl::Struct(decl) => {
                    let fields = self.bind_fields(scope, &decl.fields);
                    types.push(fields.map(|fields| {
                        TypeDef::Struct(StructDecl {
                            name: decl.name,
                            fields,
                        })
                    }));
                }
                Decl::Interface(decl) => {
                    interfaces.push(self.bind_interface(scope, decl))
                }
                Decl::Function(decl) => {
                    functions.push(self.bind_function(scope, decl))
                }
            }
        }

        if self.errors.len() > errors_before {
            return Err(self.errors.split_off(errors_before));
        }

        let types = types.into_iter().flatten().collect::<Box<[_]>>();
        let layout = layout(scope, &types);
        let mut module = bound::Module {
            types,
            layout,
            interfaces: interfaces.into_iter().flatten().collect(),
            functions: functions.into_iter().flatten().collect(),
            imports: BTreeSet::new(),
        };
        module.imports = imports(scope, &module);

        trace!(
            package = self.interner.get(self.package.name),
            module = self.interner.get(self.package.modules[index].name),
            imports = module.imports.len(),
            "bound module"
        );

        Ok(module)
    }

    fn bind_interface(
        &mut self,
        scope: ModuleRef,
        decl: &InterfaceDecl<TypePath>,
    ) -> Option<bound::InterfaceDef> {
        let operations = decl
            .operations
            .iter()
            .map(|op| {
                let params = self.bind_fields(scope, &op.params);
                let returns = self.bind_returns(scope, op.returns.as_ref());

                Some(Operation {
                    name: op.name,
                    role: op.role,
                    params: params?,
                    returns: returns?,
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect::<Option<Box<[_]>>>()?;

        Some(InterfaceDecl {
            name: decl.name,
            entry: decl.entry,
            operations,
        })
    }

    fn bind_function(
        &mut self,
        scope: ModuleRef,
        decl: &FunctionDecl<TypePath>,
    ) -> Option<bound::FunctionDef> {
        let params = self.bind_fields(scope, &decl.params);
        let returns = self.bind_returns(scope, decl.returns.as_ref());

        Some(FunctionDecl {
            name: decl.name,
            params: params?,
            returns: returns?,
            body: decl.body.clone(),
        })
    }

    fn bind_fields(
        &mut self,
        scope: ModuleRef,
        fields: &[Field<TypePath>],
    ) -> Option<Box<[bound::Field]>> {
        fields
            .iter()
            .map(|field| {
                Some(Field {
                    name: field.name,
                    ty: self.bind_ty(scope, &field.ty)?,
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    fn bind_returns(
        &mut self,
        scope: ModuleRef,
        returns: Option<&TypeExpr<TypePath>>,
    ) -> Option<Option<bound::TypeExpr>> {
        match returns {
            Some(ty) => self.bind_ty(scope, ty).map(Some),
            None => Some(None),
        }
    }

    fn bind_ty(
        &mut self,
        scope: ModuleRef,
        ty: &TypeExpr<TypePath>,
    ) -> Option<bound::TypeExpr> {
        ty.clone()
            .try_collapse_frames(|frame| match frame {
                TypeExprFrame::Primitive(primitive) => {
                    Ok(TypeExpr::Primitive(primitive))
                }
                TypeExprFrame::Named(path) => {
                    self.resolve(scope, &path).map(TypeExpr::Named).ok_or(())
                }
                TypeExprFrame::Array { element, len } => Ok(TypeExpr::Array {
                    element: Box::new(element),
                    len,
                }),
                TypeExprFrame::List(inner) => Ok(TypeExpr::List(Box::new(inner))),
                TypeExprFrame::Optional(inner) => {
                    Ok(TypeExpr::Optional(Box::new(inner)))
                }
            })
            .ok()
    }

    // RESOLUTION

    fn resolve(&mut self, scope: ModuleRef, path: &TypePath) -> Option<TypeId> {
        let package = self.package;
        let dir = &package.modules[scope.module].dir;

        let matching = self
            .candidates
            .get(&path.name)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter(|candidate| {
                path.package.is_none_or(|package| package == candidate.package_name)
            })
            .filter(|candidate| {
                !path.has_exact_dir() || candidate.dir.segments() == &*path.dir
            })
            .copied()
            .collect::<Vec<_>>();

        // same package, same subdirectory
        if !path.has_exact_dir() {
            let local = matching.iter().find(|candidate| {
                candidate.id.module.package == self.id && candidate.dir == dir
            });

            if let Some(local) = local {
                return Some(local.id);
            }
        }

        if matching.is_empty() {
            self.errors.push(BindError::UnresolvedType {
                package: self.package_name(),
                module: self.module_location(scope.module),
                reference: display_path(self.interner, path),
            });
            return None;
        }

        // redeclarations by the package itself are reported with its
        // declarations, so only clashes between ancestors are checked here
        let mut packages_by_dir = BTreeMap::<&ModulePath, Vec<Candidate>>::new();
        for candidate in matching.iter().filter(|c| c.distance > 0) {
            packages_by_dir.entry(candidate.dir).or_default().push(*candidate);
        }

        if let Some(clash) = packages_by_dir.values().find(|c| c.len() > 1) {
            let locations = clash
                .iter()
                .map(|candidate| self.location(candidate))
                .collect();
            let name = dotted(self.interner, clash[0].dir, path.name);
            self.duplicate(name, locations);
            return None;
        }

        let nearest = matching
            .iter()
            .map(|candidate| candidate.distance)
            .min()
            .unwrap_or_default();
        let at_nearest = matching
            .iter()
            .filter(|candidate| candidate.distance == nearest)
            .collect::<Vec<_>>();

        match at_nearest.as_slice() {
            [candidate] => Some(candidate.id),
            candidates => {
                let candidates = candidates
                    .iter()
                    .map(|candidate| {
                        let package = self.interner.get(candidate.package_name);
                        let name = dotted(self.interner, candidate.dir, path.name);
                        format!("{package}::{name}").into_boxed_str()
                    })
                    .collect();

                self.errors.push(BindError::AmbiguousType {
                    package: self.package_name(),
                    module: self.module_location(scope.module),
                    reference: display_path(self.interner, path),
                    candidates,
                });
                None
            }
        }
    }

    // RECURSION

    /// Finds structs of this package that contain each other by value. Types
    /// of ancestors can never refer back into this package, so only local
    /// types need to be considered.
    fn check_recursion(&self, package: &BoundPackage) -> Vec<BindError> {
        let mut graph = DiGraph::<TypeId, ()>::new();
        let mut nodes = BTreeMap::<TypeId, NodeIndex>::new();

        for (index, module) in package.modules.iter().enumerate() {
            for type_index in 0..module.content.types.len() {
                let id = TypeId {
                    module: ModuleRef {
                        package: self.id,
                        module: index,
                    },
                    index: type_index,
                };
                nodes.insert(id, graph.add_node(id));
            }
        }

        for (&id, &node) in &nodes {
            let TypeDef::Struct(decl) = type_def(package, id) else {
                continue;
            };

            for field in &decl.fields {
                for target in field.ty.inline_names() {
                    if let Some(&target) = nodes.get(target) {
                        graph.update_edge(node, target, ());
                    }
                }
            }
        }

        let mut cycles = petgraph::algo::tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .map(|scc| {
                let mut ids = scc.into_iter().map(|node| graph[node]).collect::<Vec<_>>();
                ids.sort();
                ids
            })
            .collect::<Vec<_>>();
        cycles.sort();

        cycles
            .into_iter()
            .map(|ids| BindError::RecursiveStruct {
                package: self.package_name(),
                cycle: ids
                    .into_iter()
                    .map(|id| {
                        let module = &package.modules[id.module.module];
                        let name = type_def(package, id).name();
                        dotted(self.interner, &module.dir, name).into_boxed_str()
                    })
                    .collect(),
            })
            .collect()
    }
}

fn type_def(package: &BoundPackage, id: TypeId) -> &TypeDef {
    &package.modules[id.module.module].content.types[id.index]
}

/// Orders the types of a module so that every type comes after the types of
/// the same module that it contains by value, keeping declaration order
/// wherever possible.
fn layout(scope: ModuleRef, types: &[TypeDef]) -> Box<[usize]> {
    fn visit(
        index: usize,
        scope: ModuleRef,
        types: &[TypeDef],
        visited: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        if std::mem::replace(&mut visited[index], true) {
            return;
        }

        if let TypeDef::Struct(decl) = &types[index] {
            for field in &decl.fields {
                for id in field.ty.inline_names() {
                    if id.module == scope {
                        visit(id.index, scope, types, visited, order);
                    }
                }
            }
        }

        order.push(index);
    }

    let mut visited = vec![false; types.len()];
    let mut order = Vec::with_capacity(types.len());
    for index in 0..types.len() {
        visit(index, scope, types, &mut visited, &mut order);
    }

    order.into_boxed_slice()
}

/// Collects the other modules that `module` refers to.
fn imports(scope: ModuleRef, module: &bound::Module) -> BTreeSet<ModuleRef> {
    let struct_fields = module.types.iter().flat_map(|def| match def {
        TypeDef::Struct(decl) => decl.fields.as_ref(),
        TypeDef::Enum(_) => &[],
    });

    let operation_types = module
        .interfaces
        .iter()
        .flat_map(|interface| interface.operations.iter())
        .flat_map(|op| {
            op.params
                .iter()
                .map(|param| &param.ty)
                .chain(op.returns.as_ref())
        });

    let function_types = module.functions.iter().flat_map(|function| {
        function
            .params
            .iter()
            .map(|param| &param.ty)
            .chain(function.returns.as_ref())
    });

    struct_fields
        .map(|field| &field.ty)
        .chain(operation_types)
        .chain(function_types)
        .flat_map(TypeExpr::names)
        .map(|id| id.module)
        .filter(|module| *module != scope)
        .collect()
}

fn location(
    interner: &StringInterner,
    package: Symbol,
    dir: &ModulePath,
    module: Symbol,
) -> Box<str> {
    let package = interner.get(package);
    let module = interner.get(module);

    match dir.is_root() {
        true => format!("{package}:{module}"),
        false => format!("{package}:{}/{module}", dir.display(interner)),
    }
    .into_boxed_str()
}

/// Formats a name in the same way as a `dir.Name` reference.
fn dotted(interner: &StringInterner, dir: &ModulePath, name: Symbol) -> String {
    dir.segments()
        .iter()
        .chain(std::iter::once(&name))
        .map(|segment| interner.get(*segment))
        .collect::<Vec<_>>()
        .join(".")
}

fn display_path(interner: &StringInterner, path: &TypePath) -> Box<str> {
    let dir = match path.rooted && path.dir.is_empty() {
        true => ".",
        false => "",
    };
    let name = path
        .dir
        .iter()
        .chain(std::iter::once(&path.name))
        .map(|segment| interner.get(*segment))
        .collect::<Vec<_>>()
        .join(".");

    match path.package {
        Some(package) => format!("{}::{dir}{name}", interner.get(package)),
        None => format!("{dir}{name}"),
    }
    .into_boxed_str()
}
