//! # Code Execution
//!
//! Runs untrusted code snippets inside single-use containers. Every run gets a
//! fresh container, a wall-clock deadline, and a forced removal on the way out,
//! whatever the program did.
//!
//! Program-level failures (compile errors, non-zero exits, timeouts) are
//! reported through [`ExecutionOutcome`]; only infrastructure problems surface
//! as [`Error`].

mod docker;
mod error;
mod executor;
mod languages;
pub mod sandbox;
mod service;
mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

#[cfg(test)]
mod tests;

pub use docker::DockerRuntime;
pub use error::Error;
pub use executor::CodeExecutor;
pub use languages::{executor_for, CExecutor, CppExecutor, JavaScriptExecutor, LanguageExecutor};
pub use sandbox::{ContainerRuntime, ContainerSpec, Sandbox};
pub use service::CodeExecutionService;
pub use types::{
    check_source, ExecutionOutcome, ExecutionResult, Language, ResourceLimits, DEFAULT_DEADLINE,
    MAX_SOURCE_BYTES, TIME_LIMIT_MESSAGE,
};

/// Result type for code execution operations
pub type Result<T> = std::result::Result<T, Error>;
