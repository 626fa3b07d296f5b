pub mod defaults {
    use crate::{CodeExecutor, ContainerRuntime, ResourceLimits};
    use std::sync::Arc;
    use tokio::time::Duration;

    pub fn default_test_limits() -> ResourceLimits {
        ResourceLimits {
            memory: 64 * 1024 * 1024, // 64MB
            nano_cpus: 500_000_000,
            pids: 16,
            network_disabled: true,
            output_limit: 4 * 1024, // 4KB
        }
    }

    /// Short deadline so timeout tests stay fast
    pub fn test_deadline() -> Duration {
        Duration::from_millis(200)
    }

    pub fn test_executor(runtime: Arc<dyn ContainerRuntime>) -> CodeExecutor {
        CodeExecutor::new(runtime, default_test_limits()).with_deadline(test_deadline())
    }
}
