use clap::Args;
use code_exec::{ResourceLimits, DEFAULT_DEADLINE};
use code_exec_rpc::DEFAULT_QUEUE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable carrying a worker's configuration from the supervisor
pub const WORKER_CONFIG_ENV: &str = "CODE_RUNNER_WORKER_CONFIG";

/// Upper bound on the default worker count
pub const MAX_DEFAULT_WORKERS: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid worker handoff: {0}")]
    Handoff(#[from] serde_json::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Address every worker's HTTP endpoint binds to
    pub listen: SocketAddr,

    pub amqp_url: String,

    /// Name of the shared work queue
    pub queue: String,

    /// Number of worker processes; defaults to the CPU count, capped
    pub workers: Option<usize>,

    /// Wall-clock budget per program
    pub deadline_ms: u64,

    /// Extra time a submission waits for its reply beyond the deadline
    pub reply_margin_ms: u64,

    /// Pause before replacing a worker that exited
    pub restart_delay_ms: u64,

    /// Pull language images when a worker starts
    pub prepare_images: bool,

    pub limits: ResourceLimits,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3010)),
            amqp_url: "amqp://localhost:5672".to_string(),
            queue: DEFAULT_QUEUE.to_string(),
            workers: None,
            deadline_ms: DEFAULT_DEADLINE.as_millis() as u64,
            reply_margin_ms: 8000,
            restart_delay_ms: 250,
            prepare_images: true,
            limits: ResourceLimits::default(),
        }
    }
}

/// Settings that may be given on the command line or in the environment,
/// taking precedence over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Address to accept submissions on
    #[arg(short, long, env = "CODE_RUNNER_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// RabbitMQ connection URL
    #[arg(long, env = "AMQP_URL")]
    pub amqp_url: Option<String>,

    /// Number of worker processes
    #[arg(short, long, env = "CODE_RUNNER_WORKERS")]
    pub workers: Option<usize>,

    /// Execution deadline in milliseconds
    #[arg(long, env = "CODE_RUNNER_DEADLINE_MS")]
    pub deadline_ms: Option<u64>,
}

impl RunnerConfig {
    /// Read `path` if given; every field missing from the file keeps its default.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                Ok(toml::from_str(&contents)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if let Some(amqp_url) = overrides.amqp_url {
            self.amqp_url = amqp_url;
        }
        if let Some(workers) = overrides.workers {
            self.workers = Some(workers);
        }
        if let Some(deadline_ms) = overrides.deadline_ms {
            self.deadline_ms = deadline_ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deadline_ms == 0 {
            return Err(ConfigError::Invalid("deadline_ms must be positive".into()));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.queue.is_empty() {
            return Err(ConfigError::Invalid("queue name is empty".into()));
        }
        if self.limits.output_limit == 0 {
            return Err(ConfigError::Invalid("limits.output_limit must be positive".into()));
        }
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(MAX_DEFAULT_WORKERS)
        })
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.deadline_ms.saturating_add(self.reply_margin_ms))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Serialized form passed to worker processes in [`WORKER_CONFIG_ENV`]
    pub fn to_env_value(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_env_value(value: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(value)?)
    }

    /// Configuration handed down by the supervisor
    pub fn from_env() -> Result<Self, ConfigError> {
        let value = std::env::var(WORKER_CONFIG_ENV)
            .map_err(|_| ConfigError::MissingEnvVar(WORKER_CONFIG_ENV.to_string()))?;
        let config = Self::from_env_value(&value)?;
        config.validate()?;
        Ok(config)
    }
}
