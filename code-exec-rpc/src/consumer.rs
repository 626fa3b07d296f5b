use code_exec::CodeExecutionService;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    broker::{AckMode, Broker, Delivery, OutgoingMessage, Session},
    error::Error,
    message::{ExecutionJob, JobReply},
    Result,
};

/// Drains the work queue one job at a time.
pub struct JobConsumer {
    broker: Arc<dyn Broker>,
    queue: String,
    service: CodeExecutionService,
}

impl JobConsumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        queue: impl Into<String>,
        service: CodeExecutionService,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            service,
        }
    }

    pub fn service(&self) -> &CodeExecutionService {
        &self.service
    }

    /// Consume jobs until something goes wrong. Only returns with an error.
    /// A job whose run failed in the pipeline is rejected without requeue
    /// first, so it is lost rather than retried on the next worker.
    pub async fn run(&self) -> Result<()> {
        let session = self.broker.open().await?;
        session.set_prefetch(1).await?;
        session.declare_work_queue(&self.queue).await?;
        let mut deliveries = session.consume(&self.queue, AckMode::Manual).await?;
        info!(queue = %self.queue, "Waiting for execution jobs");

        while let Some(delivery) = deliveries.next().await {
            self.handle(session.as_ref(), delivery?).await?;
        }
        Err(Error::ChannelClosed(format!(
            "consumer on '{}' was cancelled",
            self.queue
        )))
    }

    async fn handle(&self, session: &dyn Session, delivery: Delivery) -> Result<()> {
        let (reply_to, correlation_id) =
            match (delivery.reply_to.clone(), delivery.correlation_id.clone()) {
                (Some(reply_to), Some(correlation_id)) => (reply_to, correlation_id),
                _ => {
                    error!("Rejecting job without reply_to/correlation_id");
                    delivery.reject().await?;
                    return Err(Error::MalformedJob(
                        "missing reply_to or correlation_id".to_string(),
                    ));
                }
            };
        let job = match ExecutionJob::from_bytes(&delivery.body) {
            Ok(job) => job,
            Err(e) => {
                error!(%correlation_id, "Rejecting job: {}", e);
                delivery.reject().await?;
                return Err(e);
            }
        };
        debug!(%correlation_id, language = %job.language, "Received execution job");

        let reply = match self.service.execute(&job.code, &job.language).await {
            Ok(result) => JobReply::from(result),
            Err(e) if e.is_configuration() => {
                warn!(%correlation_id, "Refusing job: {}", e);
                JobReply::rejected(e.to_string())
            }
            Err(e) => {
                error!(%correlation_id, "Dropping job after execution failure: {}", e);
                if let Err(reject) = delivery.reject().await {
                    warn!(%correlation_id, "Failed to reject job: {}", reject);
                }
                return Err(e.into());
            }
        };

        let message = OutgoingMessage {
            body: reply.to_bytes()?,
            correlation_id: Some(correlation_id.clone()),
            ..Default::default()
        };
        session.publish(&reply_to, message).await?;
        delivery.ack().await?;
        debug!(%correlation_id, success = reply.success, "Replied to execution job");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::{JobProducer, DEFAULT_QUEUE};
    use code_exec::testing::{Fault, Script, ScriptedRuntime};
    use code_exec::{CodeExecutor, ExecutionOutcome, ResourceLimits, TIME_LIMIT_MESSAGE};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn consumer(broker: &MemoryBroker, runtime: Arc<ScriptedRuntime>) -> JobConsumer {
        let executor = CodeExecutor::new(runtime, ResourceLimits::default())
            .with_deadline(Duration::from_millis(200));
        JobConsumer::new(
            Arc::new(broker.clone()),
            DEFAULT_QUEUE,
            CodeExecutionService::new(executor, 1),
        )
    }

    fn spawn_consumer(broker: &MemoryBroker, runtime: Arc<ScriptedRuntime>) -> JoinHandle<Result<()>> {
        let consumer = consumer(broker, runtime);
        tokio::spawn(async move { consumer.run().await })
    }

    fn producer(broker: &MemoryBroker) -> JobProducer {
        JobProducer::new(Arc::new(broker.clone()), DEFAULT_QUEUE)
            .with_reply_timeout(Duration::from_secs(5))
    }

    async fn publish_raw(broker: &MemoryBroker, message: OutgoingMessage) {
        let session = broker.open().await.unwrap();
        session.declare_work_queue(DEFAULT_QUEUE).await.unwrap();
        session.publish(DEFAULT_QUEUE, message).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_submissions_get_their_own_results() {
        let broker = MemoryBroker::new();
        let runtime = Arc::new(ScriptedRuntime::echo(Duration::from_millis(5)));
        spawn_consumer(&broker, runtime.clone());
        spawn_consumer(&broker, runtime.clone());

        let mut handles = vec![];
        for i in 0..8 {
            let producer = producer(&broker);
            handles.push(tokio::spawn(async move {
                let code = format!("console.log({})", i);
                let result = producer.submit(&code, "js").await.unwrap();
                (code, result)
            }));
        }
        for handle in handles {
            let (code, result) = handle.await.unwrap();
            assert_eq!(result.output, code);
            assert!(result.is_success());
        }

        // Two consumers, each with one job in flight at most
        assert!(runtime.peak_running() <= 2);
        assert_eq!(runtime.live(), 0);
    }

    #[tokio::test]
    async fn test_one_job_in_flight_per_consumer() {
        let broker = MemoryBroker::new();
        let runtime = Arc::new(ScriptedRuntime::echo(Duration::from_millis(20)));
        spawn_consumer(&broker, runtime.clone());

        let mut handles = vec![];
        for _ in 0..4 {
            let producer = producer(&broker);
            handles.push(tokio::spawn(async move { producer.submit("1", "c").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(runtime.peak_running(), 1);
        assert_eq!(runtime.created(), 4);
    }

    #[tokio::test]
    async fn test_timeout_outcome_reaches_producer() {
        let broker = MemoryBroker::new();
        let runtime = Arc::new(ScriptedRuntime::with_script(Script::hangs("")));
        spawn_consumer(&broker, runtime.clone());

        let result = producer(&broker).submit("while(true){}", "js").await.unwrap();
        assert_eq!(result.outcome, ExecutionOutcome::TimedOut);
        assert_eq!(result.output, TIME_LIMIT_MESSAGE);
        assert_eq!(runtime.stopped(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_language_gets_rejection_reply() {
        let broker = MemoryBroker::new();
        let runtime = Arc::new(ScriptedRuntime::default());
        let worker = spawn_consumer(&broker, runtime.clone());

        // Bypass the producer's own language check
        let session = broker.open().await.unwrap();
        let reply_queue = session.declare_reply_queue().await.unwrap();
        let mut replies = session.consume(&reply_queue, AckMode::Auto).await.unwrap();
        publish_raw(
            &broker,
            OutgoingMessage {
                body: ExecutionJob::new("print(1)", "python").to_bytes().unwrap(),
                correlation_id: Some("job-1".to_string()),
                reply_to: Some(reply_queue),
                persistent: true,
            },
        )
        .await;

        let reply = replies.next().await.unwrap().unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("job-1"));
        let reply = JobReply::from_bytes(&reply.body).unwrap();
        assert!(!reply.success);
        assert!(matches!(reply.into_result(), Err(Error::Rejected(_))));

        assert_eq!(runtime.created(), 0);
        assert!(!worker.is_finished());
    }

    #[tokio::test]
    async fn test_malformed_job_is_fatal_and_not_requeued() {
        let broker = MemoryBroker::new();
        let runtime = Arc::new(ScriptedRuntime::default());
        let worker = spawn_consumer(&broker, runtime.clone());

        publish_raw(
            &broker,
            OutgoingMessage {
                body: b"not json".to_vec(),
                correlation_id: Some("job-1".to_string()),
                reply_to: Some("nowhere".to_string()),
                persistent: true,
            },
        )
        .await;
        let result = worker.await.unwrap();
        assert!(matches!(result, Err(Error::MalformedJob(_))));

        // A replacement consumer does not see the rejected job again
        let replacement = spawn_consumer(&broker, runtime.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!replacement.is_finished());
        assert_eq!(runtime.created(), 0);
    }

    #[tokio::test]
    async fn test_job_without_reply_to_is_fatal() {
        let broker = MemoryBroker::new();
        let worker = spawn_consumer(&broker, Arc::new(ScriptedRuntime::default()));

        publish_raw(
            &broker,
            OutgoingMessage {
                body: ExecutionJob::new("1", "js").to_bytes().unwrap(),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(worker.await.unwrap(), Err(Error::MalformedJob(_))));
    }

    #[tokio::test]
    async fn test_failed_job_is_not_redelivered() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker).with_reply_timeout(Duration::from_millis(500));
        let submission = tokio::spawn(async move { producer.submit("console.log(7)", "js").await });

        // Every replacement fails the same way; only the first sees the job
        let mut crashes = 0;
        for _ in 0..3 {
            let broken = Arc::new(ScriptedRuntime::default());
            broken.fail_on(Fault::Start);
            let worker = spawn_consumer(&broker, broken.clone());
            match tokio::time::timeout(Duration::from_millis(100), worker).await {
                Ok(crashed) => {
                    assert!(matches!(crashed.unwrap(), Err(Error::Execution(_))));
                    assert_eq!(broken.removed(), 1);
                    crashes += 1;
                }
                Err(_) => assert_eq!(broken.created(), 0),
            }
        }
        assert_eq!(crashes, 1);

        // The caller gets no reply and times out
        let err = submission.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ReplyTimeout(_)));
    }
}
