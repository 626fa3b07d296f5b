//! Runs against a real Docker daemon: `cargo test -p code-exec -- --ignored`

use super::fixtures::code_samples::*;
use crate::{CodeExecutor, DockerRuntime, ExecutionOutcome, Language, ResourceLimits, Result};
use std::sync::Arc;
use tokio::time::Duration;

async fn docker_executor() -> Result<CodeExecutor> {
    let executor = CodeExecutor::new(Arc::new(DockerRuntime::connect()?), ResourceLimits::default());
    executor.prepare_images().await?;
    Ok(executor)
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_docker_js_sum() -> Result<()> {
    let result = docker_executor().await?.run(JS_SUM, Language::Js).await?;
    assert_eq!(result.outcome, ExecutionOutcome::Success);
    assert_eq!(result.output, "2\n");
    Ok(())
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_docker_js_infinite_loop() -> Result<()> {
    let result = docker_executor()
        .await?
        .run(JS_INFINITE_LOOP, Language::Js)
        .await?;
    assert_eq!(result.outcome, ExecutionOutcome::TimedOut);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_docker_js_error_output() -> Result<()> {
    let result = docker_executor().await?.run(JS_THROWS, Language::Js).await?;
    assert_eq!(result.outcome, ExecutionOutcome::Failure);
    assert!(result.output.contains("boom"));
    Ok(())
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_docker_c_exit_code() -> Result<()> {
    // Compiling inside the container is slower than the default deadline on cold hosts.
    let executor = docker_executor().await?.with_deadline(Duration::from_secs(20));
    let result = executor.run(C_EXIT_ONE, Language::C).await?;
    assert_eq!(result.outcome, ExecutionOutcome::Failure);

    let result = executor.run(C_HELLO, Language::C).await?;
    assert_eq!(result.output, "Hello from C!\n");
    Ok(())
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn test_docker_cpp_hello() -> Result<()> {
    let executor = docker_executor().await?.with_deadline(Duration::from_secs(20));
    let result = executor.run(CPP_HELLO, Language::Cpp).await?;
    assert_eq!(result.outcome, ExecutionOutcome::Success);
    assert_eq!(result.output, "Hello from C++!\n");
    Ok(())
}
