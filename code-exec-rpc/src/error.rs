use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Broker channel closed: {0}")]
    ChannelClosed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Execution error: {0}")]
    Execution(#[from] code_exec::Error),

    #[error("Malformed job: {0}")]
    MalformedJob(String),

    #[error("Job rejected: {0}")]
    Rejected(String),

    #[error("No reply within {0:?}")]
    ReplyTimeout(Duration),
}

impl Error {
    /// Errors caused by the submission itself rather than the pipeline
    pub fn is_client_error(&self) -> bool {
        match self {
            Error::Execution(e) => e.is_configuration(),
            Error::Rejected(_) => true,
            _ => false,
        }
    }
}
