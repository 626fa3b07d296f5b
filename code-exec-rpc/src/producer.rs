use code_exec::{check_source, ExecutionResult, Language, DEFAULT_DEADLINE};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    broker::{AckMode, Broker, OutgoingMessage, Session},
    error::Error,
    message::{ExecutionJob, JobReply},
    Result,
};

/// Slack on top of the execution deadline for queueing, container setup and
/// the round trip through the broker.
pub const DEFAULT_REPLY_MARGIN: Duration = Duration::from_secs(8);

/// Publishes jobs to the work queue and waits for their replies.
#[derive(Clone)]
pub struct JobProducer {
    broker: Arc<dyn Broker>,
    queue: String,
    reply_timeout: Duration,
}

impl JobProducer {
    pub fn new(broker: Arc<dyn Broker>, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
            reply_timeout: DEFAULT_DEADLINE + DEFAULT_REPLY_MARGIN,
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Submit one program and wait for its result.
    ///
    /// An unknown language or oversized source fails before anything is
    /// published. Every call
    /// gets its own session and reply queue, both torn down on return. The
    /// work queue is declared too, so a job published before any worker has
    /// started is kept rather than dropped.
    pub async fn submit(&self, code: &str, language: &str) -> Result<ExecutionResult> {
        let language: Language = language.parse()?;
        check_source(code)?;
        let body = ExecutionJob::new(code, language.as_str()).to_bytes()?;

        let session = self.broker.open().await?;
        let result = self.round_trip(session.as_ref(), body).await;
        if let Err(e) = session.close().await {
            warn!("Failed to close producer session: {}", e);
        }
        result
    }

    async fn round_trip(&self, session: &dyn Session, body: Vec<u8>) -> Result<ExecutionResult> {
        session.declare_work_queue(&self.queue).await?;
        let reply_queue = session.declare_reply_queue().await?;
        let correlation_id = Uuid::new_v4().to_string();

        // Subscribe first so a fast reply cannot be missed
        let mut replies = session.consume(&reply_queue, AckMode::Auto).await?;
        let job = OutgoingMessage {
            body,
            correlation_id: Some(correlation_id.clone()),
            reply_to: Some(reply_queue),
            persistent: true,
        };
        session.publish(&self.queue, job).await?;
        debug!(%correlation_id, queue = %self.queue, "Published execution job");

        let deadline = Instant::now() + self.reply_timeout;
        loop {
            let delivery = match timeout_at(deadline, replies.next()).await {
                Ok(Some(delivery)) => delivery?,
                Ok(None) => {
                    return Err(Error::ChannelClosed(
                        "reply consumer cancelled".to_string(),
                    ))
                }
                Err(_) => {
                    warn!(%correlation_id, "No reply within {:?}", self.reply_timeout);
                    return Err(Error::ReplyTimeout(self.reply_timeout));
                }
            };

            if delivery.correlation_id.as_deref() != Some(correlation_id.as_str()) {
                debug!(
                    expected = %correlation_id,
                    received = ?delivery.correlation_id,
                    "Ignoring unmatched reply"
                );
                continue;
            }
            return JobReply::from_bytes(&delivery.body)?.into_result();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::DEFAULT_QUEUE;
    use code_exec::ExecutionOutcome;

    /// Answers every job on the work queue with `reply`, after first sending
    /// a reply with a foreign correlation id.
    async fn answer_with_noise(broker: MemoryBroker, reply: JobReply) {
        let session = broker.open().await.unwrap();
        session.declare_work_queue(DEFAULT_QUEUE).await.unwrap();
        let mut jobs = session.consume(DEFAULT_QUEUE, AckMode::Manual).await.unwrap();
        while let Some(Ok(job)) = jobs.next().await {
            let reply_to = job.reply_to.clone().unwrap();
            let stale = OutgoingMessage {
                body: JobReply::from(ExecutionResult::failure("stale")).to_bytes().unwrap(),
                correlation_id: Some(Uuid::new_v4().to_string()),
                ..Default::default()
            };
            session.publish(&reply_to, stale).await.unwrap();
            let answer = OutgoingMessage {
                body: reply.to_bytes().unwrap(),
                correlation_id: job.correlation_id.clone(),
                ..Default::default()
            };
            session.publish(&reply_to, answer).await.unwrap();
            job.ack().await.unwrap();
        }
    }

    async fn declared_broker() -> MemoryBroker {
        let broker = MemoryBroker::new();
        let session = broker.open().await.unwrap();
        session.declare_work_queue(DEFAULT_QUEUE).await.unwrap();
        // The queue outlives the session that declared it
        session.close().await.unwrap();
        broker
    }

    #[tokio::test]
    async fn test_unmatched_replies_are_ignored() {
        let broker = declared_broker().await;
        tokio::spawn(answer_with_noise(
            broker.clone(),
            JobReply::from(ExecutionResult::success("2\n")),
        ));

        let producer = JobProducer::new(Arc::new(broker), DEFAULT_QUEUE);
        let result = producer.submit("console.log(1 + 1)", "js").await.unwrap();
        assert_eq!(result.output, "2\n");
        assert_eq!(result.outcome, ExecutionOutcome::Success);
    }

    #[tokio::test]
    async fn test_rejection_is_surfaced() {
        let broker = declared_broker().await;
        tokio::spawn(answer_with_noise(
            broker.clone(),
            JobReply::rejected("Language not supported: js"),
        ));

        let producer = JobProducer::new(Arc::new(broker), DEFAULT_QUEUE);
        let err = producer.submit("1", "js").await.unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_reply_timeout_removes_reply_queue() {
        let broker = declared_broker().await;
        let producer = JobProducer::new(Arc::new(broker.clone()), DEFAULT_QUEUE)
            .with_reply_timeout(Duration::from_millis(50));

        let err = producer.submit("while(true){}", "js").await.unwrap_err();
        assert!(matches!(err, Error::ReplyTimeout(t) if t == Duration::from_millis(50)));

        // The job is still waiting for a worker; its reply queue is gone
        let session = broker.open().await.unwrap();
        session.set_prefetch(1).await.unwrap();
        let mut jobs = session.consume(DEFAULT_QUEUE, AckMode::Manual).await.unwrap();
        let job = jobs.next().await.unwrap().unwrap();
        assert!(!broker.has_queue(job.reply_to.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn test_unsupported_language_publishes_nothing() {
        let broker = declared_broker().await;
        let producer = JobProducer::new(Arc::new(broker.clone()), DEFAULT_QUEUE)
            .with_reply_timeout(Duration::from_millis(50));

        let err = producer.submit("print(1)", "python").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Execution(code_exec::Error::UnsupportedLanguage(ref tag)) if tag == "python"
        ));

        let session = broker.open().await.unwrap();
        let mut jobs = session.consume(DEFAULT_QUEUE, AckMode::Auto).await.unwrap();
        let next = tokio::time::timeout(Duration::from_millis(50), jobs.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_oversized_source_publishes_nothing() {
        let broker = declared_broker().await;
        let producer = JobProducer::new(Arc::new(broker.clone()), DEFAULT_QUEUE)
            .with_reply_timeout(Duration::from_millis(50));

        let code = "x".repeat(code_exec::MAX_SOURCE_BYTES + 1);
        let err = producer.submit(&code, "js").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Execution(code_exec::Error::SourceTooLarge { .. })
        ));
        assert!(err.is_client_error());

        let session = broker.open().await.unwrap();
        let mut jobs = session.consume(DEFAULT_QUEUE, AckMode::Auto).await.unwrap();
        let next = tokio::time::timeout(Duration::from_millis(50), jobs.next()).await;
        assert!(next.is_err());
    }

    #[test]
    fn test_default_reply_timeout() {
        let producer = JobProducer::new(Arc::new(MemoryBroker::new()), DEFAULT_QUEUE);
        assert_eq!(producer.reply_timeout(), Duration::from_secs(10));
        assert_eq!(producer.queue(), DEFAULT_QUEUE);
    }
}
