//! Directed multigraph and the pure algorithms the validator and executor
//! run over it.

pub mod algo;
#[allow(clippy::module_inception)]
mod graph;

pub use graph::Graph;
