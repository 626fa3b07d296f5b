use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Wall-clock budget for one program, measured from container start.
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(2000);

/// Output reported in place of logs when a program overruns its deadline.
pub const TIME_LIMIT_MESSAGE: &str =
    "Time Limit Exceed!! 😔 \n \n - Optimize your code \n - Avoid infinite loops";

/// Largest accepted source, in bytes. The base64 form travels in a single
/// environment string, which the kernel caps at 128 KiB.
pub const MAX_SOURCE_BYTES: usize = 64 * 1024;

/// Fails with [`Error::SourceTooLarge`] when `code` exceeds [`MAX_SOURCE_BYTES`].
pub fn check_source(code: &str) -> Result<(), Error> {
    if code.len() > MAX_SOURCE_BYTES {
        return Err(Error::SourceTooLarge {
            size: code.len(),
            limit: MAX_SOURCE_BYTES,
        });
    }
    Ok(())
}

/// Supported programming languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Js,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::C, Language::Cpp, Language::Js];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Js => "js",
        }
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" => Ok(Language::C),
            "cpp" => Ok(Language::Cpp),
            "js" => Ok(Language::Js),
            _ => Err(Error::UnsupportedLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a program run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    TimedOut,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failure => "failure",
            ExecutionOutcome::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Execution result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Combined stdout and stderr, or the time limit message
    pub output: String,
    pub outcome: ExecutionOutcome,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            outcome: ExecutionOutcome::Success,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            outcome: ExecutionOutcome::Failure,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            output: TIME_LIMIT_MESSAGE.to_string(),
            outcome: ExecutionOutcome::TimedOut,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Resource limits applied to every sandbox container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum memory (bytes)
    pub memory: i64,
    /// CPU quota in units of 10^-9 CPUs
    pub nano_cpus: i64,
    /// Maximum number of processes
    pub pids: i64,
    /// Run without any network interface
    pub network_disabled: bool,
    /// Maximum captured output (bytes)
    pub output_limit: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: 256 * 1024 * 1024, // 256MB
            nano_cpus: 1_000_000_000,
            pids: 64,
            network_disabled: true,
            output_limit: 64 * 1024, // 64KB
        }
    }
}
