//! Node kind to processor registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::NodeKind;
use crate::processor::builtin::{
    AdapterProcessor, AgentProcessor, AggregatorProcessor, ConditionProcessor, EchoInvoker,
    Invoker, ParallelProcessor, ToolProcessor, TriggerProcessor,
};
use crate::processor::{Processor, ProcessorError};

/// Tracing target for registry operations.
const TRACING_TARGET: &str = "flowline_engine::processor";

/// Maps node kinds to processor instances.
///
/// Processors are stateless and shared, so the registry stores one `Arc` per
/// kind rather than a factory. Registering a kind twice replaces the earlier
/// processor, which is how callers override a builtin.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<NodeKind, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every builtin processor, wired to the given
    /// invoker for tool and agent nodes.
    pub fn with_builtins(invoker: Arc<dyn Invoker>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TriggerProcessor));
        registry.register(Arc::new(ToolProcessor::new(invoker.clone())));
        registry.register(Arc::new(AgentProcessor::new(invoker)));
        registry.register(Arc::new(ConditionProcessor));
        registry.register(Arc::new(AdapterProcessor));
        registry.register(Arc::new(ParallelProcessor));
        registry.register(Arc::new(AggregatorProcessor));
        registry
    }

    /// Registers a processor under its declared kind, replacing any earlier
    /// registration.
    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        let kind = processor.kind();
        if self.processors.insert(kind, processor).is_some() {
            tracing::debug!(
                target: TRACING_TARGET,
                kind = %kind,
                "Replaced registered processor"
            );
        }
    }

    /// Resolves the processor for a node kind.
    pub fn resolve(&self, kind: NodeKind) -> Result<Arc<dyn Processor>, ProcessorError> {
        self.processors
            .get(&kind)
            .cloned()
            .ok_or(ProcessorError::NotFound { kind })
    }

    /// Returns whether a processor is registered for the kind.
    pub fn contains(&self, kind: NodeKind) -> bool {
        self.processors.contains_key(&kind)
    }

    /// Creates a registry with every builtin, using the echo invoker.
    pub fn echo() -> Self {
        Self::with_builtins(Arc::new(EchoInvoker))
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("kinds", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_cover_every_kind() {
        let registry = ProcessorRegistry::echo();
        for kind in [
            NodeKind::Trigger,
            NodeKind::Tool,
            NodeKind::Agent,
            NodeKind::Condition,
            NodeKind::Adapter,
            NodeKind::Parallel,
            NodeKind::Aggregator,
        ] {
            assert!(registry.contains(kind), "missing processor for {kind}");
        }
    }

    #[test]
    fn test_resolve_unregistered_kind() {
        let registry = ProcessorRegistry::new();
        let Err(error) = registry.resolve(NodeKind::Tool) else {
            panic!("resolved a processor from an empty registry");
        };
        assert!(matches!(
            error,
            ProcessorError::NotFound {
                kind: NodeKind::Tool
            }
        ));
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = ProcessorRegistry::echo();
        registry.register(Arc::new(TriggerProcessor));
        assert!(registry.contains(NodeKind::Trigger));
    }
}
