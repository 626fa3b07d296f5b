//! In-process broker.
//!
//! Queues are FIFO and shared by every session opened from the same
//! [`MemoryBroker`]. Manual-ack deliveries hold a prefetch slot until they
//! are settled, and a delivery dropped without `ack`/`reject` goes back to
//! its queue, which is what a broker does when a consumer's channel dies.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tracing::debug;
use uuid::Uuid;

use super::{AckMode, Acknowledge, Broker, Delivery, DeliveryStream, OutgoingMessage, Session};
use crate::{error::Error, Result};

struct MemoryQueue {
    tx: mpsc::UnboundedSender<OutgoingMessage>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutgoingMessage>>,
}

impl MemoryQueue {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    fn push(&self, message: OutgoingMessage) {
        // The receiver lives as long as the queue itself
        let _ = self.tx.send(message);
    }
}

#[derive(Default)]
struct Registry {
    queues: HashMap<String, Arc<MemoryQueue>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    registry: Arc<Mutex<Registry>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is currently declared
    pub fn has_queue(&self, name: &str) -> bool {
        lock(&self.registry).queues.contains_key(name)
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("MemoryBroker")
            .field("queues", &registry.queues.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open(&self) -> Result<Box<dyn Session>> {
        let (closed, _) = watch::channel(false);
        Ok(Box::new(MemorySession {
            registry: self.registry.clone(),
            prefetch: Mutex::new(None),
            owned: Mutex::new(Vec::new()),
            closed,
        }))
    }
}

struct MemorySession {
    registry: Arc<Mutex<Registry>>,
    prefetch: Mutex<Option<Arc<Semaphore>>>,
    /// Exclusive queues deleted with the session
    owned: Mutex<Vec<String>>,
    closed: watch::Sender<bool>,
}

impl MemorySession {
    fn shutdown(&self) {
        self.closed.send_replace(true);
        let owned: Vec<String> = lock(&self.owned).drain(..).collect();
        if owned.is_empty() {
            return;
        }
        let mut registry = lock(&self.registry);
        for name in owned {
            registry.queues.remove(&name);
        }
    }

    fn queue(&self, name: &str) -> Option<Arc<MemoryQueue>> {
        lock(&self.registry).queues.get(name).cloned()
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn declare_work_queue(&self, name: &str) -> Result<()> {
        lock(&self.registry)
            .queues
            .entry(name.to_string())
            .or_insert_with(MemoryQueue::new);
        Ok(())
    }

    async fn declare_reply_queue(&self) -> Result<String> {
        let name = format!("amq.gen-{}", Uuid::new_v4().simple());
        lock(&self.registry)
            .queues
            .insert(name.clone(), MemoryQueue::new());
        lock(&self.owned).push(name.clone());
        Ok(name)
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        // Zero means unlimited
        *lock(&self.prefetch) = (count > 0).then(|| Arc::new(Semaphore::new(count as usize)));
        Ok(())
    }

    async fn consume(&self, queue: &str, mode: AckMode) -> Result<DeliveryStream> {
        let queue = self
            .queue(queue)
            .ok_or_else(|| Error::ChannelClosed(format!("no queue '{}'", queue)))?;
        let manual = mode == AckMode::Manual;
        let state = Consumer {
            queue,
            prefetch: if manual { lock(&self.prefetch).clone() } else { None },
            closed: self.closed.subscribe(),
            manual,
        };

        let deliveries = stream::unfold(state, |mut state| async move {
            let delivery = state.next().await?;
            Some((Ok(delivery), state))
        });
        Ok(deliveries.boxed())
    }

    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()> {
        match self.queue(queue) {
            Some(target) => target.push(message),
            None => debug!(queue, "Dropping unroutable message"),
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

struct Consumer {
    queue: Arc<MemoryQueue>,
    prefetch: Option<Arc<Semaphore>>,
    closed: watch::Receiver<bool>,
    manual: bool,
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // A dropped sender counts as closed too
    let _ = closed.wait_for(|closed| *closed).await;
}

impl Consumer {
    async fn next(&mut self) -> Option<Delivery> {
        let permit = match self.prefetch.clone() {
            Some(limit) => tokio::select! {
                permit = limit.acquire_owned() => Some(permit.ok()?),
                _ = wait_closed(&mut self.closed) => return None,
            },
            None => None,
        };

        let message = {
            let mut rx = tokio::select! {
                rx = self.queue.rx.lock() => rx,
                _ = wait_closed(&mut self.closed) => return None,
            };
            tokio::select! {
                message = rx.recv() => message?,
                _ = wait_closed(&mut self.closed) => return None,
            }
        };

        let acker: Box<dyn Acknowledge> = if self.manual {
            Box::new(MemoryAcker {
                queue: self.queue.clone(),
                unsettled: Mutex::new(Some(message.clone())),
                _permit: permit,
            })
        } else {
            Box::new(AutoAck)
        };
        Some(Delivery::new(
            message.body,
            message.correlation_id,
            message.reply_to,
            acker,
        ))
    }
}

struct AutoAck;

#[async_trait]
impl Acknowledge for AutoAck {
    async fn ack(&self) -> Result<()> {
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        Ok(())
    }
}

struct MemoryAcker {
    queue: Arc<MemoryQueue>,
    unsettled: Mutex<Option<OutgoingMessage>>,
    _permit: Option<OwnedSemaphorePermit>,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        lock(&self.unsettled).take();
        Ok(())
    }

    async fn reject(&self) -> Result<()> {
        lock(&self.unsettled).take();
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        let unsettled = self
            .unsettled
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(message) = unsettled {
            debug!(
                correlation_id = ?message.correlation_id,
                "Requeueing unacknowledged delivery"
            );
            self.queue.push(message);
        }
    }
}
