use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::debug;
use uuid::Uuid;

use super::{AckMode, Acknowledge, Broker, Delivery, DeliveryStream, OutgoingMessage, Session};
use crate::Result;

/// RabbitMQ over AMQP 0-9-1
#[derive(Debug, Clone)]
pub struct AmqpBroker {
    uri: String,
}

impl AmqpBroker {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn open(&self) -> Result<Box<dyn Session>> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        debug!(channel = channel.id(), "Opened broker session");
        Ok(Box::new(AmqpSession {
            connection,
            channel,
        }))
    }
}

struct AmqpSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl Session for AmqpSession {
    async fn declare_work_queue(&self, name: &str) -> Result<()> {
        let options = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };
        self.channel
            .queue_declare(name, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn declare_reply_queue(&self) -> Result<String> {
        let options = QueueDeclareOptions {
            exclusive: true,
            auto_delete: true,
            ..Default::default()
        };
        let queue = self
            .channel
            .queue_declare("", options, FieldTable::default())
            .await?;
        Ok(queue.name().as_str().to_string())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, mode: AckMode) -> Result<DeliveryStream> {
        let options = BasicConsumeOptions {
            no_ack: mode == AckMode::Auto,
            ..Default::default()
        };
        let tag = format!("code-exec-{}", Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(queue, &tag, options, FieldTable::default())
            .await?;

        let stream = consumer.map(|delivery| -> Result<Delivery> {
            let delivery = delivery?;
            let properties = &delivery.properties;
            let correlation_id = properties
                .correlation_id()
                .as_ref()
                .map(|id| id.as_str().to_string());
            let reply_to = properties
                .reply_to()
                .as_ref()
                .map(|queue| queue.as_str().to_string());
            Ok(Delivery::new(
                delivery.data,
                correlation_id,
                reply_to,
                Box::new(AmqpAcker(delivery.acker)),
            ))
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()> {
        let properties = publish_properties(&message);
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channel.close(200, "OK").await?;
        self.connection.close(200, "OK").await?;
        Ok(())
    }
}

/// Delivery mode 2 marks a message persistent
const PERSISTENT: u8 = 2;

fn publish_properties(message: &OutgoingMessage) -> BasicProperties {
    let mut properties = BasicProperties::default().with_content_type("application/json".into());
    if let Some(correlation_id) = &message.correlation_id {
        properties = properties.with_correlation_id(correlation_id.as_str().into());
    }
    if let Some(reply_to) = &message.reply_to {
        properties = properties.with_reply_to(reply_to.as_str().into());
    }
    if message.persistent {
        properties = properties.with_delivery_mode(PERSISTENT);
    }
    properties
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        self.0
            .reject(BasicRejectOptions { requeue: false })
            .await?;
        Ok(())
    }
}
