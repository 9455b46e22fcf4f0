//! Executor configuration.

use derive_builder::Builder;

/// Configuration for the [`WorkflowExecutor`](crate::execute::WorkflowExecutor).
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ExecutorConfig {
    /// Maximum number of nodes executing concurrently within a level.
    #[builder(default = "10")]
    pub max_concurrent_nodes: usize,

    /// Whether resolved inputs and outputs are stored on node records.
    /// Disable when payloads are large or sensitive.
    #[builder(default = "true")]
    pub record_node_io: bool,
}

impl ExecutorConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_concurrent_nodes {
            if max == 0 {
                return Err("max_concurrent_nodes must be at least 1".into());
            }
        }
        Ok(())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 10,
            record_node_io: true,
        }
    }
}
