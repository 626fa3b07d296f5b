//! # Code Execution RPC
//!
//! Request/reply over a message broker. A [`JobProducer`] publishes an
//! [`ExecutionJob`] to a shared work queue and waits on a private reply queue;
//! a [`JobConsumer`] takes one job at a time, runs it in a sandbox and
//! publishes the [`JobReply`] back, tagged with the job's correlation id.

pub mod broker;
mod consumer;
mod error;
mod message;
mod producer;

pub use consumer::JobConsumer;
pub use error::Error;
pub use message::{ExecutionJob, JobReply};
pub use producer::JobProducer;

/// Well-known name of the shared work queue
pub const DEFAULT_QUEUE: &str = "rpcCodeExecutionQueue";

/// Result type for RPC operations
pub type Result<T> = std::result::Result<T, Error>;
