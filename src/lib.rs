//! # rpc-code-runner
//!
//! Runs submitted programs through a queue: every worker process accepts
//! HTTP submissions, publishes them to a shared RabbitMQ work queue, and
//! consumes jobs from that queue one at a time, executing each in a fresh
//! Docker sandbox. A [`Supervisor`] keeps the pool of workers alive.

pub mod config;
pub mod supervisor;
pub mod worker;

pub use config::{ConfigError, Overrides, RunnerConfig};
pub use supervisor::{ProcessLauncher, Supervisor, SupervisorError, SupervisorReport};
pub use worker::Worker;
