use crate::{
    sandbox::Sandbox,
    testing::{Script, ScriptedRuntime},
    tests::utils::defaults::default_test_limits,
    ContainerSpec, Result,
};
use std::sync::Arc;
use tokio::time::Duration;

fn spec() -> ContainerSpec {
    crate::executor_for(crate::Language::Js).container_spec(
        "sandbox-under-test".to_string(),
        "console.log('hi')",
        &default_test_limits(),
    )
}

#[tokio::test]
async fn test_sandbox_lifecycle() -> Result<()> {
    let runtime = Arc::new(ScriptedRuntime::with_script(Script::exits(0, "hi\n")));
    let sandbox = Sandbox::create(runtime.clone(), &spec()).await?;

    sandbox.start().await?;
    assert_eq!(sandbox.wait().await?, 0);
    assert_eq!(sandbox.logs(1024).await?, "hi\n");
    sandbox.remove().await?;

    assert_eq!(runtime.removed(), 1);
    assert_eq!(runtime.live(), 0);
    Ok(())
}

#[tokio::test]
async fn test_sandbox_logs_truncated() -> Result<()> {
    let runtime = Arc::new(ScriptedRuntime::with_script(Script::exits(0, "x".repeat(100))));
    let sandbox = Sandbox::create(runtime.clone(), &spec()).await?;
    sandbox.start().await?;
    sandbox.wait().await?;

    let logs = sandbox.logs(10).await?;
    assert!(logs.starts_with("xxxxxxxxxx\n"));
    assert!(logs.ends_with("[output truncated]\n"));
    sandbox.remove().await
}

#[tokio::test]
async fn test_sandbox_stop_ends_wait() -> Result<()> {
    let runtime = Arc::new(ScriptedRuntime::with_script(Script::hangs("")));
    let sandbox = Arc::new(Sandbox::create(runtime.clone(), &spec()).await?);
    sandbox.start().await?;
    assert_eq!(runtime.running(), 1);

    let waiter = {
        let sandbox = sandbox.clone();
        tokio::spawn(async move { sandbox.wait().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    sandbox.stop().await?;

    let status = waiter.await.unwrap()?;
    assert_eq!(status, crate::testing::STOPPED_EXIT_CODE);
    assert_eq!(runtime.running(), 0);

    Arc::try_unwrap(sandbox)
        .ok()
        .expect("waiter released its handle")
        .remove()
        .await
}

#[tokio::test]
async fn test_dropped_sandbox_is_removed() -> Result<()> {
    let runtime = Arc::new(ScriptedRuntime::with_script(Script::hangs("")));
    {
        let sandbox = Sandbox::create(runtime.clone(), &spec()).await?;
        sandbox.start().await?;
    }

    // Removal runs on a spawned task.
    for _ in 0..50 {
        if runtime.live() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(runtime.live(), 0);
    assert_eq!(runtime.removed(), 1);
    Ok(())
}
