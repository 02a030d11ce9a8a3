//! Binding and emission over the package graph.
//!
//! Packages are processed one topological layer at a time. Within a layer,
//! every package is bound and emitted by its own worker thread; the workers
//! only share the symbol table of the layers before them, which is extended
//! once every worker of the layer has finished.

use std::{
    collections::BTreeSet,
    num::NonZeroUsize,
    sync::Arc,
    thread,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    codegen::{Artifact, EmitError, emit_package},
    env::{
        BoundPackage, SymbolTable, View,
        bind::{BindError, bind_package},
    },
    graph::{GraphError, PackageGraph, Status},
    package::{PkgId, Workspace},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("failed to bind package `{package}`")]
    Bind {
        package: Box<str>,
        errors: Vec<BindError>,
    },
    #[error("failed to emit package `{package}`")]
    Emit {
        package: Box<str>,
        errors: Vec<EmitError>,
    },
    #[error("skipped package `{package}` because `{by}` failed")]
    Blocked { package: Box<str>, by: Box<str> },
}

impl Failure {
    /// The individual errors behind this failure, as display strings.
    pub fn details(&self) -> Vec<String> {
        match self {
            Failure::Bind { errors, .. } => {
                errors.iter().map(ToString::to_string).collect()
            }
            Failure::Emit { errors, .. } => {
                errors.iter().map(ToString::to_string).collect()
            }
            Failure::Graph(_) | Failure::Blocked { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// The maximum number of worker threads per layer.
    pub jobs: NonZeroUsize,
    /// Whether to emit artifacts, or only to bind.
    pub emit: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            jobs: thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            emit: true,
        }
    }
}

/// The outcome of a pipeline run.
#[derive(Debug, Default)]
pub struct Report {
    /// The artifacts of every package that succeeded, in topological order.
    pub artifacts: Vec<Artifact>,
    pub failures: Vec<Failure>,
    /// The number of packages that were bound.
    pub bound: usize,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Outcome {
    Done {
        package: BoundPackage,
        artifacts: Vec<Artifact>,
    },
    BindFailed(Vec<BindError>),
    EmitFailed {
        package: BoundPackage,
        errors: Vec<EmitError>,
    },
}

/// Resolves the package graph of `workspace`, then binds and (optionally)
/// emits every package whose dependencies were bound successfully.
pub fn run(workspace: &Workspace, options: Options) -> Report {
    let graph = PackageGraph::resolve(workspace);
    info!(
        packages = workspace.len(),
        layers = graph.layers().len(),
        "resolved package graph"
    );

    let mut report = Report::default();
    report
        .failures
        .extend(graph.errors().iter().cloned().map(Failure::from));

    for id in workspace.package_ids() {
        if let Status::Blocked { by } = graph.status(id) {
            report.failures.push(blocked(workspace, id, by));
        }
    }

    let mut table = SymbolTable::with_capacity(workspace.len());
    // Packages that failed to bind.
    let mut failed = BTreeSet::new();

    for (index, layer) in graph.layers().iter().enumerate() {
        let mut ready = Vec::with_capacity(layer.len());

        for &id in layer.iter() {
            match nearest_failure(&graph, &failed, id) {
                Some(by) => {
                    warn!(package = workspace.name(id), by = workspace.name(by), "blocked");
                    report.failures.push(blocked(workspace, id, by));
                }
                None => ready.push(id),
            }
        }

        info!(layer = index, packages = ready.len(), "processing layer");
        let outcomes = process_layer(workspace, &graph, &table, &ready, options);

        for (id, outcome) in outcomes {
            let name = workspace.name(id);

            match outcome {
                Outcome::Done { package, artifacts } => {
                    report.artifacts.extend(artifacts);
                    report.bound += 1;
                    table.insert(id, Arc::new(package));
                }
                Outcome::BindFailed(errors) => {
                    warn!(package = name, errors = errors.len(), "failed to bind");
                    failed.insert(id);
                    report.failures.push(Failure::Bind {
                        package: name.into(),
                        errors,
                    });
                }
                Outcome::EmitFailed { package, errors } => {
                    warn!(package = name, errors = errors.len(), "failed to emit");
                    report.bound += 1;
                    table.insert(id, Arc::new(package));
                    table.mark_unemitted(id);
                    report.failures.push(Failure::Emit {
                        package: name.into(),
                        errors,
                    });
                }
            }
        }
    }

    info!(
        artifacts = report.artifacts.len(),
        failures = report.failures.len(),
        "finished pipeline"
    );
    report
}

fn blocked(workspace: &Workspace, id: PkgId, by: PkgId) -> Failure {
    Failure::Blocked {
        package: workspace.name(id).into(),
        by: workspace.name(by).into(),
    }
}

/// The closest ancestor of `id` that failed to bind, if any.
fn nearest_failure(
    graph: &PackageGraph,
    failed: &BTreeSet<PkgId>,
    id: PkgId,
) -> Option<PkgId> {
    graph
        .ancestors(id)
        .iter()
        .filter(|(ancestor, _)| failed.contains(*ancestor))
        .min_by_key(|(ancestor, distance)| (**distance, **ancestor))
        .map(|(ancestor, _)| *ancestor)
}

/// Processes the packages of one layer, at most `options.jobs` at a time.
/// Outcomes are returned in the order of `ready`.
fn process_layer(
    workspace: &Workspace,
    graph: &PackageGraph,
    table: &SymbolTable,
    ready: &[PkgId],
    options: Options,
) -> Vec<(PkgId, Outcome)> {
    if options.jobs.get() == 1 {
        return ready
            .iter()
            .map(|&id| (id, process(workspace, graph, table, id, options.emit)))
            .collect();
    }

    let mut outcomes = Vec::with_capacity(ready.len());

    for chunk in ready.chunks(options.jobs.get()) {
        thread::scope(|scope| {
            let handles = chunk
                .iter()
                .map(|&id| {
                    let handle = scope.spawn(move || {
                        process(workspace, graph, table, id, options.emit)
                    });
                    (id, handle)
                })
                .collect::<Vec<_>>();

            for (id, handle) in handles {
                match handle.join() {
                    Ok(outcome) => outcomes.push((id, outcome)),
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
        });
    }

    outcomes
}

fn process(
    workspace: &Workspace,
    graph: &PackageGraph,
    table: &SymbolTable,
    id: PkgId,
    emit: bool,
) -> Outcome {
    let package = match bind_package(id, workspace, graph, table) {
        Ok(package) => package,
        Err(errors) => return Outcome::BindFailed(errors),
    };

    if !emit {
        return Outcome::Done {
            package,
            artifacts: Vec::new(),
        };
    }

    let view = View::new(&workspace.interner, table, id, &package);
    let result = emit_package(view, graph);
    debug!(package = workspace.name(id), ok = result.is_ok(), "processed package");

    match result {
        Ok(artifacts) => Outcome::Done { package, artifacts },
        Err(errors) => Outcome::EmitFailed { package, errors },
    }
}
