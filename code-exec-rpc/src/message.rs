use code_exec::{ExecutionOutcome, ExecutionResult};
use serde::{Deserialize, Serialize};

use crate::{error::Error, Result};

/// Body of a message on the work queue.
///
/// The language stays a raw tag here so an unknown language can be answered
/// with a rejection instead of being treated as a malformed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionJob {
    pub code: String,
    pub language: String,
}

impl ExecutionJob {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::MalformedJob(e.to_string()))
    }
}

/// Body of a message on a reply queue.
///
/// `result` and `success` are the fields existing clients read; `outcome`
/// keeps timeouts distinguishable from failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReply {
    pub result: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobReply {
    /// Reply for a job the worker refused to run
    pub fn rejected(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            result: reason.clone(),
            success: false,
            outcome: None,
            error: Some(reason),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn into_result(self) -> Result<ExecutionResult> {
        if let Some(reason) = self.error {
            return Err(Error::Rejected(reason));
        }
        let outcome = match (self.outcome, self.success) {
            (Some(outcome), _) => outcome,
            (None, true) => ExecutionOutcome::Success,
            (None, false) => ExecutionOutcome::Failure,
        };
        Ok(ExecutionResult {
            output: self.result,
            outcome,
        })
    }
}

impl From<ExecutionResult> for JobReply {
    fn from(result: ExecutionResult) -> Self {
        Self {
            success: result.is_success(),
            result: result.output,
            outcome: Some(result.outcome),
            error: None,
        }
    }
}
