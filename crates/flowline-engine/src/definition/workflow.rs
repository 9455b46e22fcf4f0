//! Workflow rows.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::WorkflowId;

/// A persisted workflow definition header, consumed read-only by the engine.
///
/// The version increments on every edit; validation results are cached per
/// `(id, version)` pair so stale results are never served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRow {
    /// Workflow identifier.
    pub id: WorkflowId,
    /// Monotonic definition version.
    pub version: i64,
    /// Display name.
    pub name: String,
    /// Declared workflow-scope variables, keyed by name.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl WorkflowRow {
    /// Creates a workflow row at version 1 with no variables.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            version: 1,
            name: name.into(),
            variables: Map::new(),
        }
    }

    /// Declares a workflow variable.
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}
