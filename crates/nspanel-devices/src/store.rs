//! In-memory device store and the consumers that feed it.
//!
//! A stored [`Device`] mirrors one panel sub-device. Every reported
//! capability becomes a [`Channel`] and every taxonomy attribute of that
//! capability becomes a [`Property`] holding the last known value.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nspanel_core::{
    Capability, CapabilityState, Category, Consumer, DataType, DiscoveredSubDevice, Message,
    Permission, StoreSubDevice, WriteDeviceState,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::taxonomy::{AttributeDefinition, TaxonomyStore};

/// Attribute value slot of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Attribute name from the taxonomy
    pub identifier: String,
    pub data_type: DataType,
    pub unit: Option<String>,
    pub settable: bool,
    pub queryable: bool,
    /// Last known internal value
    pub value: Option<Value>,
}

impl Property {
    fn from_attribute(attribute: &AttributeDefinition, permission: Permission) -> Self {
        Self {
            identifier: attribute.name.clone(),
            data_type: attribute.data_type,
            unit: attribute.unit.clone(),
            settable: permission.is_writable(),
            queryable: permission.is_readable(),
            value: None,
        }
    }
}

/// One capability instance of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Capability code, suffixed with `_<name>` for named instances
    pub identifier: String,
    pub capability: Capability,
    pub name: Option<String>,
    pub permission: Permission,
    pub properties: Vec<Property>,
}

impl Channel {
    pub fn channel_identifier(capability: &Capability, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("{}_{}", capability, name),
            None => capability.to_string(),
        }
    }

    pub fn property(&self, identifier: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.identifier == identifier)
    }

    fn property_mut(&mut self, identifier: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.identifier == identifier)
    }
}

/// Stored panel sub-device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub connector: Uuid,
    /// Serial number reported by the gateway
    pub identifier: String,
    pub third_serial_number: Option<String>,
    pub gateway: String,
    pub name: String,
    pub category: Category,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub mac_address: Option<String>,
    pub protocol: Option<String>,
    pub online: bool,
    pub subnet: bool,
    pub tags: BTreeMap<String, Value>,
    pub channels: Vec<Channel>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Build a device from a discovery report.
    pub fn from_discovered(
        connector: Uuid,
        gateway: impl Into<String>,
        discovered: &DiscoveredSubDevice,
        taxonomy: &TaxonomyStore,
    ) -> Self {
        let channels = discovered
            .capabilities
            .iter()
            .map(|entry| Channel {
                identifier: Channel::channel_identifier(&entry.capability, entry.name.as_deref()),
                capability: entry.capability.clone(),
                name: entry.name.clone(),
                permission: entry.permission,
                properties: taxonomy
                    .attributes(&entry.capability)
                    .map(|attribute| Property::from_attribute(attribute, entry.permission))
                    .collect(),
            })
            .collect();

        let now = Utc::now();
        Self {
            connector,
            identifier: discovered.serial_number.clone(),
            third_serial_number: discovered.third_serial_number.clone(),
            gateway: gateway.into(),
            name: discovered.name.clone(),
            category: discovered.display_category.clone(),
            manufacturer: discovered.manufacturer.clone(),
            model: discovered.model.clone(),
            firmware_version: discovered.firmware_version.clone(),
            mac_address: discovered.mac_address.clone(),
            protocol: discovered.protocol.clone(),
            online: discovered.online,
            subnet: discovered.subnet,
            tags: discovered.tags.clone(),
            channels,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn channel(&self, identifier: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.identifier == identifier)
    }

    /// Whether the device already mirrors a gateway's report of it.
    pub fn reflects(&self, gateway: &str, discovered: &DiscoveredSubDevice) -> bool {
        self.gateway == gateway
            && self.identifier == discovered.serial_number
            && self.third_serial_number == discovered.third_serial_number
            && self.name == discovered.name
            && self.category == discovered.display_category
            && self.manufacturer == discovered.manufacturer
            && self.model == discovered.model
            && self.firmware_version == discovered.firmware_version
            && self.mac_address == discovered.mac_address
            && self.protocol == discovered.protocol
            && self.online == discovered.online
            && self.subnet == discovered.subnet
            && self.tags == discovered.tags
            && self.channels.len() == discovered.capabilities.len()
            && self
                .channels
                .iter()
                .zip(&discovered.capabilities)
                .all(|(channel, entry)| {
                    channel.capability == entry.capability
                        && channel.name == entry.name
                        && channel.permission == entry.permission
                })
    }

    /// Whether the device answers to the serial number.
    pub fn matches_serial(&self, serial: &str) -> bool {
        self.identifier == serial || self.third_serial_number.as_deref() == Some(serial)
    }

    /// Carry over known values and creation time from an earlier version.
    fn inherit(&mut self, previous: &Device) {
        self.created_at = previous.created_at;
        for channel in &mut self.channels {
            let Some(old) = previous.channel(&channel.identifier) else {
                continue;
            };
            for property in &mut channel.properties {
                if let Some(value) = old.property(&property.identifier).and_then(|p| p.value.clone()) {
                    property.value = Some(value);
                }
            }
        }
    }

    /// Store a normalized value, returning whether the property exists.
    fn set_value(&mut self, channel: &str, property: &str, value: Value) -> bool {
        let Some(slot) = self
            .channels
            .iter_mut()
            .find(|c| c.identifier == channel)
            .and_then(|c| c.property_mut(property))
        else {
            return false;
        };
        slot.value = Some(value);
        self.updated_at = Utc::now();
        true
    }
}

type DeviceKey = (Uuid, String);

/// Devices of all connectors.
#[derive(Debug, Default)]
pub struct DeviceStore {
    devices: RwLock<HashMap<DeviceKey, Device>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a device, keeping known property values.
    ///
    /// Devices are keyed by serial number within a connector. A serial
    /// reported by a second gateway replaces the earlier device. Returns the
    /// replaced device.
    pub async fn upsert(&self, mut device: Device) -> Option<Device> {
        let key = (device.connector, device.identifier.clone());
        let mut devices = self.devices.write().await;
        if let Some(previous) = devices.get(&key) {
            if previous.gateway != device.gateway {
                warn!(
                    category = "store",
                    connector = %device.connector,
                    device = %device.identifier,
                    previous = %previous.gateway,
                    gateway = %device.gateway,
                    "Sub-device serial reported by two gateways, keeping the latest"
                );
            }
            device.inherit(previous);
        }
        devices.insert(key, device)
    }

    /// Remove devices of a gateway that are missing from its listing.
    ///
    /// Returns the serial numbers of the removed devices.
    pub async fn retain_listed(
        &self,
        connector: Uuid,
        gateway: &str,
        listed: &HashSet<&str>,
    ) -> Vec<String> {
        let mut devices = self.devices.write().await;
        let gone: Vec<DeviceKey> = devices
            .iter()
            .filter(|(_, d)| {
                d.connector == connector
                    && d.gateway == gateway
                    && !listed.contains(d.identifier.as_str())
            })
            .map(|(key, _)| key.clone())
            .collect();

        gone.into_iter()
            .filter_map(|key| devices.remove(&key))
            .map(|device| {
                info!(
                    category = "store",
                    connector = %connector,
                    gateway = %gateway,
                    device = %device.identifier,
                    "Sub-device left its gateway"
                );
                device.identifier
            })
            .collect()
    }

    pub async fn get(&self, connector: Uuid, identifier: &str) -> Option<Device> {
        self.devices
            .read()
            .await
            .get(&(connector, identifier.to_string()))
            .cloned()
    }

    /// Find a device by serial or third-party serial number.
    pub async fn find(&self, connector: Option<Uuid>, serial: &str) -> Option<Device> {
        self.devices
            .read()
            .await
            .values()
            .find(|d| connector.is_none_or(|c| d.connector == c) && d.matches_serial(serial))
            .cloned()
    }

    pub async fn list(&self, connector: Uuid) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.connector == connector)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Apply a mutation to a stored device.
    pub async fn update<R>(
        &self,
        connector: Uuid,
        identifier: &str,
        f: impl FnOnce(&mut Device) -> R,
    ) -> Option<R> {
        let mut devices = self.devices.write().await;
        devices.get_mut(&(connector, identifier.to_string())).map(f)
    }
}

/// Stores discovered sub-devices.
pub struct SubDeviceConsumer {
    store: Arc<DeviceStore>,
    taxonomy: Arc<TaxonomyStore>,
}

impl SubDeviceConsumer {
    pub fn new(store: Arc<DeviceStore>, taxonomy: Arc<TaxonomyStore>) -> Self {
        Self { store, taxonomy }
    }

    async fn store(&self, message: &StoreSubDevice) {
        let device = Device::from_discovered(
            message.connector,
            &message.gateway,
            &message.device,
            &self.taxonomy,
        );
        debug!(
            category = "store",
            connector = %device.connector,
            device = %device.identifier,
            channels = device.channels.len(),
            "Storing sub-device"
        );
        self.store.upsert(device).await;
    }
}

#[async_trait]
impl Consumer for SubDeviceConsumer {
    fn name(&self) -> &str {
        "sub-device"
    }

    async fn consume(&self, message: &Message) -> bool {
        match message {
            Message::StoreSubDevice(m) => {
                self.store(m).await;
                true
            }
            _ => false,
        }
    }
}

/// Writes panel state changes onto stored devices.
pub struct DeviceStateConsumer {
    store: Arc<DeviceStore>,
    taxonomy: Arc<TaxonomyStore>,
}

impl DeviceStateConsumer {
    pub fn new(store: Arc<DeviceStore>, taxonomy: Arc<TaxonomyStore>) -> Self {
        Self { store, taxonomy }
    }

    /// Normalize every state entry, skipping entries that do not resolve.
    fn normalize(&self, message: &WriteDeviceState) -> Vec<(String, String, Value)> {
        message
            .state
            .iter()
            .filter_map(|state| match self.normalize_one(state) {
                Ok(value) => Some((
                    Channel::channel_identifier(&state.capability, state.name.as_deref()),
                    state.attribute.clone(),
                    value,
                )),
                Err(e) => {
                    warn!(
                        category = "store",
                        device = %message.identifier,
                        capability = %state.capability,
                        attribute = %state.attribute,
                        "Ignoring state value: {}", e
                    );
                    None
                }
            })
            .collect()
    }

    fn normalize_one(&self, state: &CapabilityState) -> Result<Value, String> {
        let attribute = self
            .taxonomy
            .attribute(&state.capability, &state.attribute)
            .ok_or_else(|| "attribute is not defined for the capability".to_string())?;
        attribute.normalize(&state.value)
    }

    async fn write(&self, message: &WriteDeviceState) {
        let values = self.normalize(message);
        let written = self
            .store
            .update(message.connector, &message.identifier, |device| {
                values
                    .into_iter()
                    .filter(|(channel, property, value)| {
                        let found = device.set_value(channel, property, value.clone());
                        if !found {
                            warn!(
                                category = "store",
                                device = %device.identifier,
                                channel = %channel,
                                property = %property,
                                "Device has no such property"
                            );
                        }
                        found
                    })
                    .count()
            })
            .await;

        match written {
            Some(count) => debug!(
                category = "store",
                device = %message.identifier,
                written = count,
                "Device state written"
            ),
            None => error!(
                category = "store",
                connector = %message.connector,
                device = %message.identifier,
                "State for unknown device was dropped"
            ),
        }
    }
}

#[async_trait]
impl Consumer for DeviceStateConsumer {
    fn name(&self) -> &str {
        "device-state"
    }

    async fn consume(&self, message: &Message) -> bool {
        match message {
            Message::WriteDeviceState(m) => {
                self.write(m).await;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspanel_core::DiscoveredCapability;
    use serde_json::json;

    fn taxonomy() -> Arc<TaxonomyStore> {
        Arc::new(TaxonomyStore::bundled().unwrap())
    }

    fn switch() -> DiscoveredSubDevice {
        let toggle = |name: &str| DiscoveredCapability {
            capability: Capability::Toggle,
            permission: Permission::ReadWrite,
            name: Some(name.to_string()),
        };
        DiscoveredSubDevice {
            serial_number: "switch-1".to_string(),
            third_serial_number: Some("ext-switch-1".to_string()),
            mac_address: None,
            name: "Hall switch".to_string(),
            manufacturer: Some("SONOFF".to_string()),
            model: None,
            firmware_version: None,
            display_category: Category::Switch,
            capabilities: vec![toggle("1"), toggle("2")],
            protocol: Some("zigbee".to_string()),
            tags: BTreeMap::new(),
            online: true,
            subnet: false,
        }
    }

    fn write(connector: Uuid, name: &str, value: Value) -> Message {
        WriteDeviceState {
            connector,
            identifier: "switch-1".to_string(),
            state: vec![CapabilityState {
                capability: Capability::Toggle,
                name: Some(name.to_string()),
                attribute: "toggleState".to_string(),
                value,
            }],
        }
        .into()
    }

    #[test]
    fn test_named_channels() {
        let device = Device::from_discovered(Uuid::new_v4(), "panel-1", &switch(), &taxonomy());
        let ids: Vec<_> = device.channels.iter().map(|c| c.identifier.as_str()).collect();
        assert_eq!(ids, vec!["toggle_1", "toggle_2"]);

        let property = device.channel("toggle_2").unwrap().property("toggleState").unwrap();
        assert_eq!(property.data_type, DataType::Bool);
        assert!(property.settable);
        assert!(device.matches_serial("ext-switch-1"));
    }

    #[tokio::test]
    async fn test_state_written_and_kept_across_rediscovery() {
        let taxonomy = taxonomy();
        let store = Arc::new(DeviceStore::new());
        let connector = Uuid::new_v4();

        let devices = SubDeviceConsumer::new(store.clone(), taxonomy.clone());
        let states = DeviceStateConsumer::new(store.clone(), taxonomy);

        let discovered: Message = StoreSubDevice {
            connector,
            gateway: "panel-1".to_string(),
            device: switch(),
        }
        .into();

        assert!(devices.consume(&discovered).await);
        assert!(!states.consume(&discovered).await);
        assert!(states.consume(&write(connector, "1", json!("on"))).await);

        // Invalid values leave the property untouched
        assert!(states.consume(&write(connector, "2", json!("dim"))).await);

        assert!(devices.consume(&discovered).await);
        let device = store.get(connector, "switch-1").await.unwrap();
        let value = |channel: &str| {
            device
                .channel(channel)
                .and_then(|c| c.property("toggleState"))
                .and_then(|p| p.value.clone())
        };
        assert_eq!(value("toggle_1"), Some(json!(true)));
        assert_eq!(value("toggle_2"), None);
    }

    #[tokio::test]
    async fn test_unknown_device_is_acknowledged() {
        let store = Arc::new(DeviceStore::new());
        let states = DeviceStateConsumer::new(store.clone(), taxonomy());

        assert!(states.consume(&write(Uuid::new_v4(), "1", json!("on"))).await);
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_reflects_discovered_form() {
        let device = Device::from_discovered(Uuid::new_v4(), "panel-1", &switch(), &taxonomy());
        assert!(device.reflects("panel-1", &switch()));
        assert!(!device.reflects("panel-2", &switch()));

        let mut offline = switch();
        offline.online = false;
        assert!(!device.reflects("panel-1", &offline));

        let mut fewer = switch();
        fewer.capabilities.pop();
        assert!(!device.reflects("panel-1", &fewer));
    }

    #[tokio::test]
    async fn test_serial_on_two_gateways_keeps_latest() {
        let store = DeviceStore::new();
        let connector = Uuid::new_v4();
        let taxonomy = taxonomy();

        assert!(store
            .upsert(Device::from_discovered(connector, "panel-1", &switch(), &taxonomy))
            .await
            .is_none());
        let replaced = store
            .upsert(Device::from_discovered(connector, "panel-2", &switch(), &taxonomy))
            .await
            .unwrap();

        assert_eq!(replaced.gateway, "panel-1");
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(connector, "switch-1").await.unwrap().gateway, "panel-2");
    }

    #[tokio::test]
    async fn test_retain_listed_prunes_one_gateway() {
        let store = DeviceStore::new();
        let connector = Uuid::new_v4();
        let taxonomy = taxonomy();

        let mut other = switch();
        other.serial_number = "switch-2".to_string();
        let mut elsewhere = switch();
        elsewhere.serial_number = "switch-3".to_string();

        store
            .upsert(Device::from_discovered(connector, "panel-1", &switch(), &taxonomy))
            .await;
        store
            .upsert(Device::from_discovered(connector, "panel-1", &other, &taxonomy))
            .await;
        store
            .upsert(Device::from_discovered(connector, "panel-2", &elsewhere, &taxonomy))
            .await;

        let listed: HashSet<&str> = ["switch-1"].into_iter().collect();
        let removed = store.retain_listed(connector, "panel-1", &listed).await;

        assert_eq!(removed, vec!["switch-2".to_string()]);
        assert!(store.get(connector, "switch-1").await.is_some());
        assert!(store.get(connector, "switch-3").await.is_some());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_find_scoped_by_connector() {
        let store = DeviceStore::new();
        let connector = Uuid::new_v4();
        store
            .upsert(Device::from_discovered(connector, "panel-1", &switch(), &taxonomy()))
            .await;

        assert!(store.find(None, "ext-switch-1").await.is_some());
        assert!(store.find(Some(connector), "switch-1").await.is_some());
        assert!(store.find(Some(Uuid::new_v4()), "switch-1").await.is_none());
    }
}
