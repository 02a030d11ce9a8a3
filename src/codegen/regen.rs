//! Regeneration of ancestor packages into the output tree of a dependent.
//!
//! A package with `regenerate_dependencies` set owns a private copy of the
//! artifacts of every package it transitively depends on. The copies are
//! produced by the ordinary backends under a [`Layout`] routed to the
//! dependent, so they keep the subdirectories of their origin, take the
//! extensions of the dependent, and refer to each other (and are referred
//! to by the dependent) by their new paths.

use tracing::debug;

use crate::{
    env::View,
    graph::PackageGraph,
    package::PkgId,
};

use super::{Artifact, Backend, Context, EmitError, Layout, emit_modules};

#[derive(Debug, Clone)]
pub struct Regeneration<'a> {
    consumer: PkgId,
    /// Every ancestor of the consumer, in ID order.
    ancestors: Vec<PkgId>,
    layout: Layout<'a>,
}

impl<'a> Regeneration<'a> {
    /// Plans the regeneration of the ancestors of the current package of
    /// `view`, if it enables `regenerate_dependencies`.
    pub fn for_package(view: &View<'a>, graph: &'a PackageGraph) -> Option<Self> {
        let consumer = view.current();
        let package = view.current_package();

        if !package.output.regenerate_dependencies {
            return None;
        }

        let ancestors = graph.ancestors(consumer);
        Some(Self {
            consumer,
            ancestors: ancestors.keys().copied().collect(),
            layout: Layout::routed(consumer, package, ancestors),
        })
    }

    /// The layout under which the consumer and its ancestors are emitted.
    pub fn layout(&self) -> Layout<'a> {
        self.layout
    }

    /// Emits the modules of every ancestor into the output tree of the
    /// consumer.
    pub fn emit(
        &self,
        backend: &dyn Backend,
        view: &View<'a>,
    ) -> Result<Vec<Artifact>, Vec<EmitError>> {
        let mut artifacts = Vec::new();
        let mut errors = Vec::new();

        for &ancestor in &self.ancestors {
            let cx = Context::new(view.rebased(ancestor), self.layout, backend.kind());
            match emit_modules(backend, &cx) {
                Ok(emitted) => artifacts.extend(emitted),
                Err(failed) => errors.extend(failed),
            }
        }

        debug!(
            consumer = self.consumer.index(),
            ancestors = self.ancestors.len(),
            artifacts = artifacts.len(),
            backend = %backend.kind(),
            "regenerated dependencies"
        );

        match errors.is_empty() {
            true => Ok(artifacts),
            false => Err(errors),
        }
    }
}
