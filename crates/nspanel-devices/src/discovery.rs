//! Sub-device discovery over the gateway LAN API.
//!
//! A discovery run queries every gateway of a connector concurrently. Each
//! gateway is isolated: a failing gateway contributes an error entry to the
//! report and nothing to the queue, while the others proceed normally.
//!
//! A sub-device is enqueued unless the device store already mirrors it, so a
//! dropped store message is retried on the next run. Stored sub-devices a
//! gateway no longer lists are removed.
//!
//! Per gateway the run moves through
//! `Idle -> Requesting -> Parsing -> Enqueuing -> Idle`, or
//! `Requesting -> Failed -> Idle` on any failure.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use nspanel_core::{
    BridgeEvent, ConnectorConfig, DiscoveredSubDevice, EventBus, GatewayConfig, GatewayDiscovery,
    MessageQueue, StoreSubDevice,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, trace, warn};
use uuid::Uuid;

use crate::lan_api::{LanApiClient, LanApiError, SubDeviceRecord};
use crate::store::DeviceStore;
use crate::taxonomy::TaxonomyStore;

/// Discovery state of one gateway within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryState {
    Idle,
    Requesting,
    Parsing,
    Enqueuing,
    Failed,
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoveryState::Idle => "idle",
            DiscoveryState::Requesting => "requesting",
            DiscoveryState::Parsing => "parsing",
            DiscoveryState::Enqueuing => "enqueuing",
            DiscoveryState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one discovery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub connector: Uuid,
    pub results: Vec<GatewayDiscovery>,
}

impl DiscoveryReport {
    /// Messages enqueued over all gateways.
    pub fn enqueued(&self) -> usize {
        self.results.iter().map(|r| r.enqueued).sum()
    }

    /// Sub-devices reported over all successful gateways.
    pub fn devices(&self) -> impl Iterator<Item = &DiscoveredSubDevice> {
        self.results.iter().flat_map(|r| r.devices.iter())
    }

    pub fn failed(&self) -> impl Iterator<Item = &GatewayDiscovery> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn result(&self, gateway: &str) -> Option<&GatewayDiscovery> {
        self.results.iter().find(|r| r.gateway == gateway)
    }
}

/// Discovers sub-devices and enqueues them for storage.
pub struct DiscoveryClient {
    api: LanApiClient,
    taxonomy: Arc<TaxonomyStore>,
    store: Arc<DeviceStore>,
    queue: Arc<MessageQueue>,
    event_bus: Option<Arc<EventBus>>,
}

impl DiscoveryClient {
    pub fn new(
        api: LanApiClient,
        taxonomy: Arc<TaxonomyStore>,
        store: Arc<DeviceStore>,
        queue: Arc<MessageQueue>,
    ) -> Self {
        Self {
            api,
            taxonomy,
            store,
            queue,
            event_bus: None,
        }
    }

    /// Client with the LAN API timeout of a connector.
    pub fn for_connector(
        config: &ConnectorConfig,
        taxonomy: Arc<TaxonomyStore>,
        store: Arc<DeviceStore>,
        queue: Arc<MessageQueue>,
    ) -> Self {
        let api = LanApiClient::new(Duration::from_secs(config.lan_api_timeout_secs));
        Self::new(api, taxonomy, store, queue)
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Run discovery over all gateways of a connector.
    pub async fn discover(&self, connector: &ConnectorConfig) -> DiscoveryReport {
        let runs = connector
            .gateways
            .iter()
            .map(|gateway| self.discover_gateway(connector.id, gateway));
        let report = DiscoveryReport {
            connector: connector.id,
            results: join_all(runs).await,
        };

        info!(
            category = "discovery",
            connector = %connector.id,
            gateways = report.results.len(),
            failed = report.failed().count(),
            enqueued = report.enqueued(),
            "Discovery finished"
        );

        if let Some(bus) = &self.event_bus {
            bus.publish_with_source(
                BridgeEvent::DiscoveryFinished {
                    connector: connector.id,
                    results: report.results.clone(),
                },
                "discovery",
            )
            .await;
        }

        report
    }

    async fn discover_gateway(&self, connector: Uuid, gateway: &GatewayConfig) -> GatewayDiscovery {
        transition(gateway, DiscoveryState::Requesting);

        let devices = match self.fetch(gateway).await {
            Ok(devices) => devices,
            Err(e) => {
                transition(gateway, DiscoveryState::Failed);
                error!(
                    category = "discovery",
                    gateway = %gateway.identifier,
                    url = %gateway.base_url(),
                    "Sub-devices could not be discovered: {}", e
                );
                transition(gateway, DiscoveryState::Idle);
                return GatewayDiscovery {
                    gateway: gateway.identifier.clone(),
                    devices: Vec::new(),
                    enqueued: 0,
                    removed: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        transition(gateway, DiscoveryState::Enqueuing);
        let mut enqueued = 0;
        for device in &devices {
            if self.is_stored(connector, &gateway.identifier, device).await {
                continue;
            }
            self.queue.append(
                StoreSubDevice {
                    connector,
                    gateway: gateway.identifier.clone(),
                    device: device.clone(),
                }
                .into(),
            );
            enqueued += 1;
        }

        let listed: HashSet<&str> = devices.iter().map(|d| d.serial_number.as_str()).collect();
        let removed = self
            .store
            .retain_listed(connector, &gateway.identifier, &listed)
            .await;
        transition(gateway, DiscoveryState::Idle);

        GatewayDiscovery {
            gateway: gateway.identifier.clone(),
            devices,
            enqueued,
            removed,
            error: None,
        }
    }

    async fn fetch(&self, gateway: &GatewayConfig) -> Result<Vec<DiscoveredSubDevice>, LanApiError> {
        let records = self.api.get_sub_devices(gateway).await?;

        transition(gateway, DiscoveryState::Parsing);
        let devices = records
            .into_iter()
            .map(SubDeviceRecord::into_discovered)
            .collect::<Result<Vec<_>, _>>()?;

        for device in &devices {
            self.check_codes(gateway, device);
        }
        Ok(devices)
    }

    /// Warn about codes the taxonomy cannot place.
    fn check_codes(&self, gateway: &GatewayConfig, device: &DiscoveredSubDevice) {
        let category = &device.display_category;
        if category.is_unknown() {
            warn!(
                category = "discovery",
                gateway = %gateway.identifier,
                serial_number = %device.serial_number,
                "Unknown display category {}", category
            );
        }

        for entry in &device.capabilities {
            if entry.capability.is_unknown() {
                warn!(
                    category = "discovery",
                    gateway = %gateway.identifier,
                    serial_number = %device.serial_number,
                    "Unknown capability {}", entry.capability
                );
            } else if !category.is_unknown()
                && !self.taxonomy.allows_capability(category, &entry.capability)
            {
                warn!(
                    category = "discovery",
                    gateway = %gateway.identifier,
                    serial_number = %device.serial_number,
                    "Capability {} is not expected for category {}", entry.capability, category
                );
            }
        }
    }

    /// Whether the store already mirrors the reported sub-device.
    async fn is_stored(&self, connector: Uuid, gateway: &str, device: &DiscoveredSubDevice) -> bool {
        self.store
            .get(connector, &device.serial_number)
            .await
            .is_some_and(|stored| stored.reflects(gateway, device))
    }
}

fn transition(gateway: &GatewayConfig, state: DiscoveryState) {
    trace!(category = "discovery", gateway = %gateway.identifier, state = %state, "Discovery state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Device;
    use nspanel_core::{Category, DiscoveredCapability, Permission};

    fn client_with_store(store: Arc<DeviceStore>) -> DiscoveryClient {
        DiscoveryClient::new(
            LanApiClient::default(),
            Arc::new(TaxonomyStore::bundled().unwrap()),
            store,
            Arc::new(MessageQueue::new()),
        )
    }

    fn client() -> DiscoveryClient {
        client_with_store(Arc::new(DeviceStore::new()))
    }

    fn plug(online: bool) -> DiscoveredSubDevice {
        DiscoveredSubDevice {
            serial_number: "plug-1".to_string(),
            third_serial_number: None,
            mac_address: None,
            name: "Desk plug".to_string(),
            manufacturer: None,
            model: None,
            firmware_version: None,
            display_category: Category::Plug,
            capabilities: vec![DiscoveredCapability {
                capability: "power".into(),
                permission: Permission::ReadWrite,
                name: None,
            }],
            protocol: None,
            tags: Default::default(),
            online,
            subnet: false,
        }
    }

    #[tokio::test]
    async fn test_only_stored_form_counts_as_known() {
        let store = Arc::new(DeviceStore::new());
        let client = client_with_store(store.clone());
        let connector = Uuid::new_v4();

        assert!(!client.is_stored(connector, "panel-1", &plug(true)).await);

        store
            .upsert(Device::from_discovered(connector, "panel-1", &plug(true), &client.taxonomy))
            .await;
        assert!(client.is_stored(connector, "panel-1", &plug(true)).await);
        assert!(!client.is_stored(connector, "panel-1", &plug(false)).await);
        assert!(!client.is_stored(connector, "panel-2", &plug(true)).await);
    }

    #[tokio::test]
    async fn test_no_gateways_still_reports() {
        let bus = Arc::new(EventBus::new());
        let mut events = bus.discovery_events();
        let client = client().with_event_bus(bus.clone());

        let config = ConnectorConfig::new("empty");
        let report = client.discover(&config).await;
        assert!(report.results.is_empty());

        let (event, _) = events.try_recv().unwrap();
        assert_eq!(
            event,
            BridgeEvent::DiscoveryFinished {
                connector: config.id,
                results: Vec::new()
            }
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DiscoveryState::Enqueuing.to_string(), "enqueuing");
    }
}
