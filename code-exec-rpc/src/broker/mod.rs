//! Message broker seam.
//!
//! Producers and consumers only need a handful of operations: a durable,
//! shared work queue, exclusive server-named reply queues, per-consumer
//! prefetch, and publish with `correlation_id`/`reply_to` properties.
//! [`AmqpBroker`] provides them over RabbitMQ. An in-process `MemoryBroker`
//! is available to tests behind the `test-util` feature.

mod amqp;
#[cfg(any(test, feature = "test-util"))]
mod memory;

pub use amqp::AmqpBroker;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryBroker;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::fmt;

use crate::Result;

/// Opens broker sessions. One session per producer call, one per consumer.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Session>>;
}

/// Whether deliveries need an explicit ack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Deliveries stay unacknowledged until `ack`/`reject`; an unacked
    /// delivery goes back to the queue when its session goes away.
    Manual,
    /// Deliveries count as acknowledged on receipt
    Auto,
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// One connection + channel to the broker
#[async_trait]
pub trait Session: Send + Sync {
    /// Declare the shared work queue; survives broker restarts
    async fn declare_work_queue(&self, name: &str) -> Result<()>;

    /// Declare an exclusive, auto-delete queue with a server-chosen name
    async fn declare_reply_queue(&self) -> Result<String>;

    /// Cap unacknowledged deliveries for consumers on this session
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    async fn consume(&self, queue: &str, mode: AckMode) -> Result<DeliveryStream>;

    /// Publish to `queue` through the default exchange
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()>;

    /// Close the session; its exclusive queues are deleted
    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Written to disk by the broker, so it survives a broker restart
    pub persistent: bool,
}

/// Settles a delivery with the broker
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Drop the message without requeueing it
    async fn reject(&self) -> Result<()>;
}

pub struct Delivery {
    pub body: Vec<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(
        body: Vec<u8>,
        correlation_id: Option<String>,
        reply_to: Option<String>,
        acker: Box<dyn Acknowledge>,
    ) -> Self {
        Self {
            body,
            correlation_id,
            reply_to,
            acker,
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn reject(self) -> Result<()> {
        self.acker.reject().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", &self.reply_to)
            .finish()
    }
}
