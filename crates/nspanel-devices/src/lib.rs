//! Panel device side of the NS Panel bridge.
//!
//! - **taxonomy**: bundled category and capability catalogs
//! - **lan_api**: HTTP client for the gateway LAN API
//! - **discovery**: periodic sub-device discovery feeding the message queue
//! - **store**: in-memory device store and the consumers writing to it

pub mod discovery;
pub mod lan_api;
pub mod store;
pub mod taxonomy;

pub use discovery::{DiscoveryClient, DiscoveryReport, DiscoveryState};
pub use lan_api::{LanApiClient, LanApiError};
pub use store::{Channel, Device, DeviceStateConsumer, DeviceStore, Property, SubDeviceConsumer};
pub use taxonomy::{TaxonomyError, TaxonomyStore};
