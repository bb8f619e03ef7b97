//! Consumer Registry Tests
//!
//! Tests dispatch of queued messages including:
//! - FIFO order, one message per consume call
//! - Dropping messages when no consumer is registered
//! - First accepting consumer stops the chain
//! - Dropping messages no consumer accepts

use async_trait::async_trait;
use nspanel_core::{
    Capability, CapabilityState, ConsumeOutcome, Consumer, ConsumerRegistry, Message,
    MessageQueue, WriteDeviceState,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

/// Records every message offered to it.
struct Recording {
    name: String,
    accept: bool,
    seen: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl Recording {
    fn new(name: &str, accept: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            accept,
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Consumer for Recording {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&self, message: &Message) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Message::WriteDeviceState(m) = message {
            self.seen.lock().push(m.identifier.clone());
        }
        self.accept
    }
}

fn message(identifier: &str) -> Message {
    Message::from(WriteDeviceState {
        connector: Uuid::new_v4(),
        identifier: identifier.to_string(),
        state: vec![CapabilityState {
            capability: Capability::Brightness,
            name: None,
            attribute: "brightness".to_string(),
            value: serde_json::json!(42),
        }],
    })
}

#[tokio::test]
async fn test_messages_are_consumed_in_fifo_order() {
    let queue = Arc::new(MessageQueue::new());
    let registry = ConsumerRegistry::new(queue.clone());
    let consumer = Recording::new("recorder", true);
    registry.register(consumer.clone());

    for id in ["first", "second", "third"] {
        queue.append(message(id));
    }

    registry.consume().await;
    assert_eq!(consumer.seen(), vec!["first"]);

    registry.consume().await;
    registry.consume().await;
    assert_eq!(consumer.seen(), vec!["first", "second", "third"]);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_message_dropped_without_consumers() {
    let queue = Arc::new(MessageQueue::new());
    let registry = ConsumerRegistry::new(queue.clone());

    queue.append(message("orphan"));

    assert_eq!(registry.consume().await, ConsumeOutcome::NoConsumers);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_first_accepting_consumer_stops_the_chain() {
    let queue = Arc::new(MessageQueue::new());
    let registry = ConsumerRegistry::new(queue.clone());

    let declining = Recording::new("declining", false);
    let accepting = Recording::new("accepting", true);
    let never = Recording::new("never", true);
    registry.register(declining.clone());
    registry.register(accepting.clone());
    registry.register(never.clone());

    queue.append(message("device"));

    assert_eq!(
        registry.consume().await,
        ConsumeOutcome::Handled("accepting".to_string())
    );
    assert_eq!(declining.calls.load(Ordering::SeqCst), 1);
    assert_eq!(accepting.calls.load(Ordering::SeqCst), 1);
    assert_eq!(never.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unhandled_message_is_dropped_not_requeued() {
    let queue = Arc::new(MessageQueue::new());
    let registry = ConsumerRegistry::new(queue.clone());

    let first = Recording::new("first", false);
    let second = Recording::new("second", false);
    registry.register(first.clone());
    registry.register(second.clone());

    queue.append(message("nobody-wants-me"));

    assert_eq!(registry.consume().await, ConsumeOutcome::Unhandled);
    assert!(queue.is_empty());
    assert_eq!(first.seen(), vec!["nobody-wants-me"]);
    assert_eq!(second.seen(), vec!["nobody-wants-me"]);

    // Nothing is left to retry
    assert_eq!(registry.consume().await, ConsumeOutcome::Empty);
}
