//! Core types for the NS Panel bridge.
//!
//! This crate defines the foundational pieces shared by the device and API
//! crates:
//! - **MessageQueue**: FIFO buffer of [`Message`]s awaiting processing
//! - **ConsumerRegistry**: chain of [`Consumer`]s draining the queue one
//!   message per tick
//! - **EventBus**: fire-and-forget notifications for external observers
//! - Protocol codes, connector configuration and error kinds

pub mod codes;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod message;
pub mod queue;

pub use codes::{Capability, Category, DataType, Permission};
pub use config::{ConnectorConfig, GatewayConfig};
pub use consumer::{ConsumeOutcome, Consumer, ConsumerRegistry};
pub use error::{Error, Result};
pub use event::{BridgeEvent, EventMetadata, GatewayDiscovery};
pub use eventbus::{EventBus, EventBusReceiver, FilteredReceiver, SharedEventBus};
pub use message::{
    CapabilityState, DiscoveredCapability, DiscoveredSubDevice, Message, StoreSubDevice,
    WriteDeviceState,
};
pub use queue::{MessageQueue, SharedQueue};

/// Product name announced in the `Server` header.
pub const PRODUCT_NAME: &str = "NS Panel Bridge";

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
