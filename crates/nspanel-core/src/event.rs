//! Notifications published for external observers.
//!
//! Events are informational. They never take part in consuming messages or
//! in producing a directive response.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::DiscoveredSubDevice;

/// Bridge event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    /// A directive request reached the router.
    DirectiveReceived {
        connector: Option<Uuid>,
        message_id: String,
        method: String,
        path: String,
    },
    /// The router produced a response for a directive request.
    DirectiveResponded {
        connector: Option<Uuid>,
        message_id: String,
        status: u16,
        body: serde_json::Value,
    },
    /// A discovery run over all gateways of a connector completed.
    DiscoveryFinished {
        connector: Uuid,
        results: Vec<GatewayDiscovery>,
    },
}

impl BridgeEvent {
    /// Get the event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            BridgeEvent::DirectiveReceived { .. } => "DirectiveReceived",
            BridgeEvent::DirectiveResponded { .. } => "DirectiveResponded",
            BridgeEvent::DiscoveryFinished { .. } => "DiscoveryFinished",
        }
    }

    pub fn is_directive_event(event: &BridgeEvent) -> bool {
        matches!(
            event,
            BridgeEvent::DirectiveReceived { .. } | BridgeEvent::DirectiveResponded { .. }
        )
    }

    pub fn is_discovery_event(event: &BridgeEvent) -> bool {
        matches!(event, BridgeEvent::DiscoveryFinished { .. })
    }
}

/// Discovery outcome of one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayDiscovery {
    /// Gateway identifier
    pub gateway: String,
    /// Sub-devices reported by the gateway (empty on failure)
    pub devices: Vec<DiscoveredSubDevice>,
    /// Number of messages enqueued for this gateway
    pub enqueued: usize,
    /// Serial numbers of stored sub-devices the gateway no longer lists
    #[serde(default)]
    pub removed: Vec<String>,
    /// Failure description, if the gateway could not be discovered
    pub error: Option<String>,
}

impl GatewayDiscovery {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub id: Uuid,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub source: String,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now().timestamp_millis(),
            source: source.into(),
        }
    }
}
