use clap::{Parser, Subcommand};
use rpc_code_runner::{worker, Overrides, ProcessLauncher, RunnerConfig, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "CODE_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run and supervise the worker pool (default)
    Supervise,
    /// Run a single worker; started by the supervisor
    Worker,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Supervise) {
        Command::Worker => worker::run(RunnerConfig::from_env()?).await,
        Command::Supervise => {
            let mut config = RunnerConfig::load(cli.config.as_deref())?;
            config.apply(cli.overrides);
            config.validate()?;

            let launcher = ProcessLauncher::current_exe(&config)?;
            let supervisor = Supervisor::new(
                Arc::new(launcher),
                config.worker_count(),
                config.restart_delay(),
            );
            info!(listen = %config.listen, amqp_url = %config.amqp_url, "Starting code runner");
            let report = supervisor.run(shutdown_signal()).await;
            info!(
                launched = report.launched,
                restarts = report.restarts,
                "Code runner stopped"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
