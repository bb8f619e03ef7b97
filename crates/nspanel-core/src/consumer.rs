//! Consumer registry.
//!
//! Consumers form a chain of responsibility: each queued message is offered
//! to the registered consumers in registration order until one accepts it.
//! The registry is driven by an external tick and consumes at most one
//! message per call.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::message::Message;
use crate::queue::MessageQueue;

/// Handler of queued messages.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Consumer name used in logs.
    fn name(&self) -> &str;

    /// Try to handle a message.
    ///
    /// Returns `true` when the message was handled and must not be offered
    /// to any other consumer.
    async fn consume(&self, message: &Message) -> bool;
}

/// What a single [`ConsumerRegistry::consume`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The queue was empty.
    Empty,
    /// The named consumer accepted the message.
    Handled(String),
    /// No consumer is registered; the message was dropped.
    NoConsumers,
    /// No consumer accepted the message; it was dropped.
    Unhandled,
}

/// Ordered set of consumers draining one queue.
pub struct ConsumerRegistry {
    queue: Arc<MessageQueue>,
    consumers: RwLock<Vec<Arc<dyn Consumer>>>,
}

impl ConsumerRegistry {
    pub fn new(queue: Arc<MessageQueue>) -> Self {
        Self {
            queue,
            consumers: RwLock::new(Vec::new()),
        }
    }

    /// Register a consumer after all previously registered ones.
    pub fn register(&self, consumer: Arc<dyn Consumer>) {
        tracing::debug!(consumer = consumer.name(), "Registered messages consumer");
        self.consumers.write().push(consumer);
    }

    pub fn len(&self) -> usize {
        self.consumers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.read().is_empty()
    }

    /// The queue this registry drains.
    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Consume at most one queued message.
    pub async fn consume(&self) -> ConsumeOutcome {
        let Some(message) = self.queue.dequeue() else {
            return ConsumeOutcome::Empty;
        };

        // Snapshot so no lock is held across the await points below
        let consumers: Vec<Arc<dyn Consumer>> = self.consumers.read().clone();

        if consumers.is_empty() {
            tracing::error!(
                category = "consumer",
                payload = %message.to_json(),
                "No consumer is registered, message could not be handled"
            );
            return ConsumeOutcome::NoConsumers;
        }

        for consumer in &consumers {
            if consumer.consume(&message).await {
                tracing::debug!(
                    category = "consumer",
                    consumer = consumer.name(),
                    message_type = message.type_name(),
                    "Message was handled"
                );
                return ConsumeOutcome::Handled(consumer.name().to_string());
            }
        }

        tracing::error!(
            category = "consumer",
            payload = %message.to_json(),
            "Message could not be handled"
        );
        ConsumeOutcome::Unhandled
    }
}
