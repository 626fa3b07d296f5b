use anyhow::{anyhow, Context};
use code_exec::{CodeExecutionService, CodeExecutor, ContainerRuntime, DockerRuntime};
use code_exec_rpc::{
    broker::{AmqpBroker, Broker},
    JobConsumer, JobProducer,
};
use code_exec_server::{bind_listener, create_app, run_server};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::RunnerConfig;

/// One worker instance: a job consumer and an HTTP endpoint sharing a broker.
///
/// Each worker runs at most one sandbox at a time. The first of its two tasks
/// to stop takes the whole worker down with an error, leaving recovery to the
/// supervisor.
pub struct Worker {
    config: RunnerConfig,
    broker: Arc<dyn Broker>,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Worker {
    pub fn new(
        config: RunnerConfig,
        broker: Arc<dyn Broker>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            config,
            broker,
            runtime,
        }
    }

    /// Worker backed by RabbitMQ at `config.amqp_url` and the local Docker daemon
    pub fn connect(config: RunnerConfig) -> anyhow::Result<Self> {
        let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
        let broker = AmqpBroker::new(config.amqp_url.clone());
        Ok(Self::new(config, Arc::new(broker), Arc::new(runtime)))
    }

    pub async fn run(self, listener: TcpListener) -> anyhow::Result<()> {
        let executor = CodeExecutor::new(self.runtime.clone(), self.config.limits.clone())
            .with_deadline(self.config.deadline());
        if self.config.prepare_images {
            executor
                .prepare_images()
                .await
                .context("Failed to prepare sandbox images")?;
        }

        let consumer = JobConsumer::new(
            self.broker.clone(),
            self.config.queue.clone(),
            CodeExecutionService::new(executor, 1),
        );
        let producer = JobProducer::new(self.broker.clone(), self.config.queue.clone())
            .with_reply_timeout(self.config.reply_timeout());
        let app = create_app(producer);

        info!(pid = std::process::id(), queue = %self.config.queue, "Worker ready");
        tokio::select! {
            result = consumer.run() => match result {
                Ok(()) => Err(anyhow!("Job consumer stopped")),
                Err(e) => Err(e).context("Job consumer failed"),
            },
            result = run_server(app, listener) => match result {
                Ok(()) => Err(anyhow!("HTTP server stopped")),
                Err(e) => Err(e).context("HTTP server failed"),
            },
        }
    }
}

/// Entry point of a worker process
pub async fn run(config: RunnerConfig) -> anyhow::Result<()> {
    let listener = bind_listener(config.listen)
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    Worker::connect(config)?.run(listener).await
}
