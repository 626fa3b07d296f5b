use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use crate::{
    error::Error,
    executor::CodeExecutor,
    types::{check_source, ExecutionResult, Language},
};

/// Admission-limited front of a [`CodeExecutor`].
///
/// A worker instance builds this with a single slot, so it never has more
/// than one sandbox executing at a time.
#[derive(Clone)]
pub struct CodeExecutionService {
    executor: Arc<CodeExecutor>,
    semaphore: Arc<Semaphore>,
    max_concurrent_executions: usize,
}

impl CodeExecutionService {
    pub fn new(executor: CodeExecutor, max_concurrent_executions: usize) -> Self {
        Self {
            executor: Arc::new(executor),
            semaphore: Arc::new(Semaphore::new(max_concurrent_executions)),
            max_concurrent_executions,
        }
    }

    /// Run `code` once a slot is free. The language tag and source size are
    /// checked before waiting for a slot.
    pub async fn execute(&self, code: &str, language: &str) -> Result<ExecutionResult, Error> {
        let language: Language = language.parse()?;
        check_source(code)?;

        // Acquire execution permit
        let _permit = self.semaphore.acquire().await?;

        debug!(%language, "Starting code execution");
        let result = self.executor.run(code, language).await;

        if let Err(e) = &result {
            error!(%language, "Code execution failed: {}", e);
        }
        result
    }

    pub fn executor(&self) -> &CodeExecutor {
        &self.executor
    }

    pub fn get_available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent_executions(&self) -> usize {
        self.max_concurrent_executions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Script, ScriptedRuntime};
    use crate::{ExecutionOutcome, ResourceLimits};
    use std::time::Duration;

    fn service(runtime: Arc<ScriptedRuntime>, slots: usize) -> CodeExecutionService {
        CodeExecutionService::new(CodeExecutor::new(runtime, ResourceLimits::default()), slots)
    }

    #[tokio::test]
    async fn test_single_slot_serializes_runs() -> Result<(), Error> {
        let runtime = Arc::new(ScriptedRuntime::new(|_| {
            Script::exits(0, "done\n").running_for(Duration::from_millis(50))
        }));
        let service = service(runtime.clone(), 1);

        let mut handles = vec![];
        for _ in 0..4 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.execute("console.log('done')", "js").await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap()?;
            assert_eq!(result.outcome, ExecutionOutcome::Success);
        }

        assert_eq!(runtime.peak_running(), 1);
        assert_eq!(runtime.removed(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_language_skips_sandbox() {
        let runtime = Arc::new(ScriptedRuntime::default());
        let service = service(runtime.clone(), 1);

        let result = service.execute("print(1)", "python").await;
        assert!(matches!(result, Err(Error::UnsupportedLanguage(_))));
        assert_eq!(runtime.created(), 0);
        assert_eq!(service.get_available_slots(), 1);
    }

    #[tokio::test]
    async fn test_execution_limit() {
        let service = service(Arc::new(ScriptedRuntime::default()), 2);
        assert_eq!(service.get_available_slots(), 2);
        assert_eq!(service.max_concurrent_executions(), 2);
    }
}
