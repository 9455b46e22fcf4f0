//! Workflow definition entities consumed by the engine.
//!
//! These are plain data rows owned by the persistence layer. The engine reads
//! them to materialize a [`Graph`](crate::graph::Graph), never writes them.

mod edge;
mod id;
mod node;
mod workflow;

pub use edge::EdgeRow;
pub use id::{EdgeId, ExecutionId, NodeId, WorkflowId};
pub use node::{NodeKind, NodeRow, Position, RetryPolicy};
pub use workflow::WorkflowRow;
