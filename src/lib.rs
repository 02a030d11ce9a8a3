//! Code generation for declarative component interfaces.
//!
//! A workspace holds packages of schema modules. Every package is resolved
//! against its dependencies, bound, and emitted as C, C++ or C# sources
//! together with mock scaffolding for its interfaces.

pub mod ast;
pub mod codegen;
pub mod driver;
pub mod env;
pub mod graph;
pub mod package;
pub mod pipeline;
pub mod symbol;

#[cfg(test)]
pub mod test_utils;
