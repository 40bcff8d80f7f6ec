//! Domain model for lapse
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{dotted_class_name, LocalAddress, Pid};

pub use errors::{
    AgentError, ClassFormatError, ConfigError, HostError, ReportError, RewriteError, SinkError,
};
