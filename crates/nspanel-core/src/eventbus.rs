//! Event bus for bridge notifications.
//!
//! Publishing is fire-and-forget: an event without subscribers is dropped
//! and a slow subscriber loses older events instead of blocking publishers.

use crate::event::{BridgeEvent, EventMetadata};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(BridgeEvent, EventMetadata)>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event with default metadata.
    ///
    /// Returns `true` if there was at least one subscriber.
    pub async fn publish(&self, event: BridgeEvent) -> bool {
        self.publish_with_source(event, "bridge").await
    }

    /// Publish an event with a custom source.
    pub async fn publish_with_source(&self, event: BridgeEvent, source: impl Into<String>) -> bool {
        let metadata = EventMetadata::new(source);
        tracing::trace!(event = event.type_name(), source = %metadata.source, "Publishing event");
        self.tx.send((event, metadata)).is_ok()
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a filter.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&BridgeEvent) -> bool + Send + 'static,
    {
        FilteredReceiver::new(self.tx.subscribe(), filter)
    }

    /// Subscribe to directive request/response events only.
    pub fn directive_events(&self) -> FilteredReceiver<fn(&BridgeEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), BridgeEvent::is_directive_event)
    }

    /// Subscribe to discovery events only.
    pub fn discovery_events(&self) -> FilteredReceiver<fn(&BridgeEvent) -> bool> {
        FilteredReceiver::new(self.tx.subscribe(), BridgeEvent::is_discovery_event)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(BridgeEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(BridgeEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event receiver lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(BridgeEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&BridgeEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(BridgeEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&BridgeEvent) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<(BridgeEvent, EventMetadata)>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next event matching the filter.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(BridgeEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(BridgeEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn received() -> BridgeEvent {
        BridgeEvent::DirectiveReceived {
            connector: None,
            message_id: "id".to_string(),
            method: "POST".to_string(),
            path: "/do-directive".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert!(!bus.publish(received()).await);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert!(bus.publish(received()).await);

        assert_eq!(rx1.recv().await.unwrap().0.type_name(), "DirectiveReceived");
        assert_eq!(rx2.recv().await.unwrap().0.type_name(), "DirectiveReceived");
    }

    #[tokio::test]
    async fn test_discovery_filter_skips_directive_events() {
        let bus = EventBus::new();
        let mut rx = bus.discovery_events();

        bus.publish(received()).await;
        bus.publish(BridgeEvent::DiscoveryFinished {
            connector: Uuid::nil(),
            results: Vec::new(),
        })
        .await;

        let (event, meta) = rx.recv().await.unwrap();
        assert_eq!(event.type_name(), "DiscoveryFinished");
        assert_eq!(meta.source, "bridge");
        assert!(rx.try_recv().is_none());
    }
}
