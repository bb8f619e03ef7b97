//! FIFO buffer of messages awaiting consumption.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::message::Message;

/// Unbounded in-memory message queue.
///
/// Ordering is strictly first-in first-out. There is no priority,
/// deduplication or backpressure.
#[derive(Debug, Default)]
pub struct MessageQueue {
    queue: Mutex<VecDeque<Message>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a message to the tail of the queue.
    pub fn append(&self, message: Message) {
        tracing::debug!(
            category = "queue",
            payload = %message.to_json(),
            "Appended new message into consumers queue"
        );
        self.queue.lock().push_back(message);
    }

    /// Pop the message at the head of the queue.
    pub fn dequeue(&self) -> Option<Message> {
        let message = self.queue.lock().pop_front()?;
        tracing::debug!(
            category = "queue",
            payload = %message.to_json(),
            "Dequeued message from consumers queue"
        );
        Some(message)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Shared queue handle.
pub type SharedQueue = Arc<MessageQueue>;
