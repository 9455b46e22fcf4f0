//! Workflow validation: the multi-level DAG validator, its result model, and
//! the TTL-based result cache.

mod cache;
mod result;
mod validator;

pub use cache::{CacheError, CacheStore, MemoryCacheStore, ValidationCache};
pub use result::{
    TopologySummary, ValidationCode, ValidationIssue, ValidationResult, WarningCode,
};
pub use validator::{DagValidator, ValidationLevel, ValidatorConfig, ValidatorConfigBuilder};
