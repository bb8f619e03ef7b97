//! Messages flowing through the consumer queue.
//!
//! A message is an immutable unit of work. Producers (discovery, directive
//! handling) append it to the [`MessageQueue`](crate::queue::MessageQueue)
//! and the first accepting consumer takes it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::codes::{Capability, Category, Permission};

/// Unit of work awaiting processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A gateway reported a new or changed sub-device.
    StoreSubDevice(StoreSubDevice),
    /// A panel asked to change the state of a device.
    WriteDeviceState(WriteDeviceState),
}

impl Message {
    /// Get the message type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::StoreSubDevice(_) => "StoreSubDevice",
            Message::WriteDeviceState(_) => "WriteDeviceState",
        }
    }

    /// Connector the message belongs to.
    pub fn connector(&self) -> Uuid {
        match self {
            Message::StoreSubDevice(m) => m.connector,
            Message::WriteDeviceState(m) => m.connector,
        }
    }

    /// Serialized form used in logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!("<unserializable {}: {}>", self.type_name(), e))
    }
}

impl From<StoreSubDevice> for Message {
    fn from(message: StoreSubDevice) -> Self {
        Message::StoreSubDevice(message)
    }
}

impl From<WriteDeviceState> for Message {
    fn from(message: WriteDeviceState) -> Self {
        Message::WriteDeviceState(message)
    }
}

/// Discovered sub-device to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSubDevice {
    pub connector: Uuid,
    /// Identifier of the gateway the sub-device is connected to
    pub gateway: String,
    pub device: DiscoveredSubDevice,
}

/// State change requested by a panel directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteDeviceState {
    pub connector: Uuid,
    /// Device identifier (serial number)
    pub identifier: String,
    pub state: Vec<CapabilityState>,
}

/// One attribute value of one capability instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityState {
    pub capability: Capability,
    /// Instance name for multi-instance capabilities (e.g. toggle "1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub attribute: String,
    pub value: serde_json::Value,
}

/// Sub-device as reported by a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredSubDevice {
    pub serial_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub third_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    pub display_category: Category,
    pub capabilities: Vec<DiscoveredCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, serde_json::Value>,
    pub online: bool,
    pub subnet: bool,
}

impl DiscoveredSubDevice {
    /// Whether the panel reported any code missing from the taxonomy.
    pub fn has_unknown_codes(&self) -> bool {
        self.display_category.is_unknown()
            || self.capabilities.iter().any(|c| c.capability.is_unknown())
    }

    /// Codes of all reported capabilities, in report order.
    pub fn capability_codes(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.capability.as_str()).collect()
    }
}

/// One `(capability, permission, name)` entry of a sub-device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredCapability {
    pub capability: Capability,
    pub permission: Permission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device() -> DiscoveredSubDevice {
        DiscoveredSubDevice {
            serial_number: "00124b002a5a4d5c".to_string(),
            third_serial_number: None,
            mac_address: Some("00:12:4b:00:2a:5a:4d:5c".to_string()),
            name: "Living room sensor".to_string(),
            manufacturer: Some("SONOFF".to_string()),
            model: Some("SNZB-02P".to_string()),
            firmware_version: Some("1.0.3".to_string()),
            display_category: Category::TemperatureAndHumiditySensor,
            capabilities: vec![DiscoveredCapability {
                capability: Capability::Temperature,
                permission: Permission::Read,
                name: None,
            }],
            protocol: Some("zigbee".to_string()),
            tags: BTreeMap::new(),
            online: true,
            subnet: true,
        }
    }

    #[test]
    fn test_message_serializes_with_type_tag() {
        let message = Message::from(StoreSubDevice {
            connector: Uuid::nil(),
            gateway: "gateway-1".to_string(),
            device: sample_device(),
        });

        let json: serde_json::Value = serde_json::from_str(&message.to_json()).unwrap();
        assert_eq!(json["type"], "store_sub_device");
        assert_eq!(json["device"]["display_category"], "temperatureAndHumiditySensor");
        assert_eq!(json["device"]["capabilities"][0]["capability"], "temperature");
        assert_eq!(json["device"]["capabilities"][0]["permission"], "read");
        assert_eq!(message.type_name(), "StoreSubDevice");
    }

    #[test]
    fn test_unknown_codes_are_flagged() {
        let mut device = sample_device();
        assert!(!device.has_unknown_codes());

        device.capabilities.push(DiscoveredCapability {
            capability: Capability::from("air-quality"),
            permission: Permission::Read,
            name: None,
        });
        assert!(device.has_unknown_codes());
        assert_eq!(device.capability_codes(), vec!["temperature", "air-quality"]);
    }
}
