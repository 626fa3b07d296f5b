use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    languages::executor_for,
    sandbox::{ContainerRuntime, Sandbox},
    types::{check_source, ExecutionResult, Language, ResourceLimits, DEFAULT_DEADLINE},
    Result,
};

/// Runs one program per call in a fresh sandbox and always removes it.
pub struct CodeExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    limits: ResourceLimits,
    deadline: Duration,
}

impl CodeExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, limits: ResourceLimits) -> Self {
        Self {
            runtime,
            limits,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Pull every language image that is not present yet, so no run pays for
    /// a pull inside its deadline.
    pub async fn prepare_images(&self) -> Result<()> {
        for language in Language::ALL {
            let image = executor_for(language).image();
            self.runtime.ensure_image(&image).await?;
        }
        Ok(())
    }

    /// Execute `code` in a new sandbox.
    ///
    /// Compile errors, non-zero exits and deadline overruns are reported in
    /// the result's outcome. `Err` means the sandbox itself could not be run.
    pub async fn run(&self, code: &str, language: Language) -> Result<ExecutionResult> {
        check_source(code)?;
        let executor = executor_for(language);
        let name = format!("sandbox-{}", Uuid::new_v4());
        let spec = executor.container_spec(name, code, &self.limits);

        let sandbox = Sandbox::create(self.runtime.clone(), &spec).await?;
        let result = self.supervise(&sandbox).await;

        // Removal failures are logged by the sandbox; the run's result stands.
        let _ = sandbox.remove().await;

        if let Ok(result) = &result {
            info!(%language, outcome = %result.outcome, "Code execution finished");
        }
        result
    }

    async fn supervise(&self, sandbox: &Sandbox) -> Result<ExecutionResult> {
        sandbox.start().await?;
        let started = Instant::now();

        // Whichever branch loses is dropped, so a run has exactly one outcome.
        tokio::select! {
            status = sandbox.wait() => {
                let status = status?;
                let output = sandbox.logs(self.limits.output_limit).await?;
                debug!(
                    sandbox = %sandbox.id(),
                    status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Sandbox exited"
                );
                Ok(if status == 0 {
                    ExecutionResult::success(output)
                } else {
                    ExecutionResult::failure(output)
                })
            }
            _ = time::sleep(self.deadline) => {
                warn!(
                    sandbox = %sandbox.id(),
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Deadline elapsed, stopping sandbox"
                );
                if let Err(e) = sandbox.stop().await {
                    // Forced removal still kills it.
                    warn!(sandbox = %sandbox.id(), "Failed to stop sandbox: {}", e);
                }
                Ok(ExecutionResult::timed_out())
            }
        }
    }

    /// Parse a language tag and run; unknown tags fail before any sandbox exists.
    pub async fn run_tagged(&self, code: &str, language: &str) -> Result<ExecutionResult> {
        let language: Language = language.parse()?;
        self.run(code, language).await
    }
}

impl std::fmt::Debug for CodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeExecutor")
            .field("limits", &self.limits)
            .field("deadline", &self.deadline)
            .finish()
    }
}
