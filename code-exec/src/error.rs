use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Source code too large: {size} bytes (limit {limit})")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Configuration errors are the caller's fault and never reach a sandbox.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedLanguage(_) | Error::SourceTooLarge { .. }
        )
    }
}

impl From<tokio::sync::AcquireError> for Error {
    fn from(e: tokio::sync::AcquireError) -> Self {
        Error::System(format!("Failed to acquire execution permit: {}", e))
    }
}
