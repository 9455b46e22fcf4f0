#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod definition;
mod error;
pub mod execute;
pub mod graph;
pub mod processor;
pub mod validate;

#[doc(hidden)]
pub mod prelude;

pub use error::{EngineError, EngineResult};

/// Tracing target for engine operations.
pub const TRACING_TARGET: &str = "flowline_engine";
