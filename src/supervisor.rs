//! Worker pool supervision.
//!
//! The supervisor keeps a fixed number of worker slots filled. A worker that
//! exits for any reason is replaced after a short delay; on shutdown every
//! worker is asked to terminate and the supervisor waits for all of them.

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{ConfigError, RunnerConfig, WORKER_CONFIG_ENV};

/// How long a worker gets to exit after SIGTERM before it is killed
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to launch worker: {0}")]
    Launch(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Starts worker instances
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, slot: usize) -> Result<Box<dyn WorkerInstance>, SupervisorError>;
}

/// A running worker
#[async_trait]
pub trait WorkerInstance: Send {
    /// OS process id, when there is one
    fn id(&self) -> Option<u32>;

    /// Wait for the worker to exit. Returns its exit code, or `None` when it
    /// was killed by a signal.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Ask the worker to stop and wait until it has
    async fn terminate(&mut self) -> std::io::Result<()>;
}

/// Launches workers by re-executing a program with the `worker` subcommand
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    config_env: String,
}

impl ProcessLauncher {
    /// Re-run the current executable as a worker with `config`
    pub fn current_exe(config: &RunnerConfig) -> Result<Self, SupervisorError> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec!["worker".to_string()],
            config_env: config.to_env_value()?,
        })
    }

    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        config: &RunnerConfig,
    ) -> Result<Self, SupervisorError> {
        Ok(Self {
            program: program.into(),
            args,
            config_env: config.to_env_value()?,
        })
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, _slot: usize) -> Result<Box<dyn WorkerInstance>, SupervisorError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_CONFIG_ENV, &self.config_env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        Ok(Box::new(ProcessWorker { child }))
    }
}

struct ProcessWorker {
    child: Child,
}

#[async_trait]
impl WorkerInstance for ProcessWorker {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    async fn terminate(&mut self) -> std::io::Result<()> {
        let Some(pid) = self.child.id() else {
            // Already reaped
            return Ok(());
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, "Failed to signal worker: {}", e);
        }
        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(status) => status.map(|_| ()),
            Err(_) => {
                warn!(pid, "Worker ignored SIGTERM, killing it");
                self.child.kill().await
            }
        }
    }
}

/// Counts from a finished [`Supervisor::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupervisorReport {
    pub launched: usize,
    pub restarts: usize,
}

#[derive(Default)]
struct Counters {
    launched: AtomicUsize,
    restarts: AtomicUsize,
}

pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    workers: usize,
    restart_delay: Duration,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, workers: usize, restart_delay: Duration) -> Self {
        Self {
            launcher,
            workers,
            restart_delay,
        }
    }

    /// Keep the pool filled until `shutdown` resolves, then stop every worker.
    pub async fn run<F>(self, shutdown: F) -> SupervisorReport
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let mut slots = JoinSet::new();

        info!(workers = self.workers, "Starting worker pool");
        for slot in 0..self.workers {
            slots.spawn(supervise_slot(
                self.launcher.clone(),
                slot,
                self.restart_delay,
                stop_rx.clone(),
                counters.clone(),
            ));
        }

        shutdown.await;
        info!("Shutting down worker pool");
        stop_tx.send_replace(true);
        while let Some(joined) = slots.join_next().await {
            if let Err(e) = joined {
                error!("Worker slot task failed: {}", e);
            }
        }

        SupervisorReport {
            launched: counters.launched.load(Ordering::SeqCst),
            restarts: counters.restarts.load(Ordering::SeqCst),
        }
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

async fn supervise_slot(
    launcher: Arc<dyn WorkerLauncher>,
    slot: usize,
    restart_delay: Duration,
    mut stop: watch::Receiver<bool>,
    counters: Arc<Counters>,
) {
    let mut first = true;
    loop {
        if !first {
            tokio::select! {
                _ = tokio::time::sleep(restart_delay) => {}
                _ = stopped(&mut stop) => return,
            }
        }
        first = false;

        let mut worker = match launcher.launch(slot).await {
            Ok(worker) => worker,
            Err(e) => {
                error!(slot, "{}", e);
                continue;
            }
        };
        counters.launched.fetch_add(1, Ordering::SeqCst);
        info!(slot, pid = ?worker.id(), "Worker started");

        let exit = tokio::select! {
            exit = worker.wait() => Some(exit),
            _ = stopped(&mut stop) => None,
        };
        match exit {
            Some(exit) => {
                warn!(slot, pid = ?worker.id(), ?exit, "Worker exited, restarting");
                counters.restarts.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                if let Err(e) = worker.terminate().await {
                    error!(slot, "Failed to terminate worker: {}", e);
                }
                return;
            }
        }
    }
}
