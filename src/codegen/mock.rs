//! Mock scaffolding for interfaces.
//!
//! A mock only ever instruments the surface a component exposes: its
//! provided operations, the `start` and `stop` lifecycle operations, and the
//! entry point. Required operations are called *by* the component and are
//! never mocked.

use crate::{
    ast::{
        START_OPERATION, STOP_OPERATION,
        bound::{Field, InterfaceDef, ModuleRef, TypeExpr},
    },
    env::View,
    graph::PackageGraph,
    package::PkgId,
    symbol::StringInterner,
};

/// The prefix of the methods of a [`MockRole::Component`] mock.
pub const CLIENT_PREFIX: &str = "client_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MockRole {
    /// Stands in for a collaborator that provides the interface.
    Collaborator,
    /// Drives the component under test from the outside.
    Component,
}

impl MockRole {
    pub fn class_suffix(self) -> &'static str {
        match self {
            MockRole::Collaborator => "ProvidedMock",
            MockRole::Component => "ComponentMock",
        }
    }

    pub fn method_prefix(self) -> &'static str {
        match self {
            MockRole::Collaborator => "",
            MockRole::Component => CLIENT_PREFIX,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockMethod<'a> {
    /// The name of the mock method, including the role prefix.
    pub name: String,
    /// The name of the instrumented operation.
    pub operation: &'a str,
    pub params: &'a [Field],
    pub returns: Option<&'a TypeExpr>,
}

#[derive(Debug, Clone)]
pub struct MockScaffold<'a> {
    pub interface: &'a InterfaceDef,
    pub role: MockRole,
    /// The name of the mock class, e.g. `PBaseProvidedMock`.
    pub name: String,
    /// The instrumented methods: `start`, `stop`, the entry point if there is
    /// one, and then every provided operation in declaration order.
    pub methods: Vec<MockMethod<'a>>,
}

impl<'a> MockScaffold<'a> {
    pub fn for_interface(
        interface: &'a InterfaceDef,
        role: MockRole,
        interner: &'a StringInterner,
    ) -> Self {
        Self {
            interface,
            role,
            name: format!(
                "{}{}",
                interner.get(interface.name),
                role.class_suffix()
            ),
            methods: methods(interface, role.method_prefix(), interner),
        }
    }
}

/// The methods that a component implementing `interface` exposes, in the
/// order in which every backend lays them out.
pub fn surface<'a>(
    interface: &'a InterfaceDef,
    interner: &'a StringInterner,
) -> Vec<MockMethod<'a>> {
    methods(interface, "", interner)
}

fn methods<'a>(
    interface: &'a InterfaceDef,
    prefix: &str,
    interner: &'a StringInterner,
) -> Vec<MockMethod<'a>> {
    let lifecycle = |operation: &'a str| MockMethod {
        name: format!("{prefix}{operation}"),
        operation,
        params: &[],
        returns: None,
    };

    [START_OPERATION, STOP_OPERATION]
        .into_iter()
        .chain(interface.entry.map(|entry| interner.get(entry)))
        .map(lifecycle)
        .chain(interface.provided().map(|op| {
            let operation = interner.get(op.name);
            MockMethod {
                name: format!("{prefix}{operation}"),
                operation,
                params: &op.params,
                returns: op.returns.as_ref(),
            }
        }))
        .collect()
}

/// One module whose interfaces are mocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEntry {
    pub module: ModuleRef,
    pub roles: Box<[MockRole]>,
}

/// The mocks that a package emits into its own output tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockPlan {
    entries: Vec<MockEntry>,
}

impl MockPlan {
    /// The interfaces of the current package of `view` get mocks in both
    /// roles. If the package enables `mock_dependencies`, the interfaces of
    /// its direct dependencies get collaborator mocks as well.
    pub fn for_package(view: &View<'_>, graph: &PackageGraph) -> Self {
        let id = view.current();
        let package = view.current_package();

        let mut entries = modules_with_interfaces(view, id)
            .map(|module| MockEntry {
                module,
                roles: [MockRole::Collaborator, MockRole::Component].into(),
            })
            .collect::<Vec<_>>();

        if package.output.mock_dependencies {
            for dependency in graph.dependencies(id) {
                entries.extend(modules_with_interfaces(view, dependency).map(
                    |module| MockEntry {
                        module,
                        roles: [MockRole::Collaborator].into(),
                    },
                ));
            }
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[MockEntry] {
        &self.entries
    }
}

fn modules_with_interfaces<'v>(
    view: &View<'v>,
    id: PkgId,
) -> impl Iterator<Item = ModuleRef> + 'v {
    view.package(id)
        .modules
        .iter()
        .enumerate()
        .filter(|(_, module)| !module.content.interfaces.is_empty())
        .map(move |(index, _)| ModuleRef {
            package: id,
            module: index,
        })
}
