//! NS Panel LAN API client.
//!
//! Only the sub-device listing is used by the bridge:
//!
//! ```text
//! GET {base_url}/open-api/v1/rest/devices
//! Authorization: Bearer {access_token}
//!
//! {"error": 0, "data": {"device_list": [...]}, "message": "success"}
//! ```
//!
//! A non-zero `error` is a vendor error even when the HTTP status is 200.

use nspanel_core::{DiscoveredCapability, DiscoveredSubDevice, GatewayConfig, Permission};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Path of the sub-device listing endpoint.
pub const DEVICES_PATH: &str = "/open-api/v1/rest/devices";

/// LAN API call failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LanApiError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Gateway error {code}: {message}")]
    Vendor { code: i64, message: String },

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("Missing value: {0}")]
    MissingValue(String),
}

impl From<LanApiError> for nspanel_core::Error {
    fn from(err: LanApiError) -> Self {
        match err {
            LanApiError::Timeout(_) | LanApiError::Connection(_) | LanApiError::Http(_) => {
                nspanel_core::Error::Transport(err.to_string())
            }
            LanApiError::Malformed(msg) => nspanel_core::Error::MalformedInput(msg),
            LanApiError::Vendor { code, message } => nspanel_core::Error::Protocol { code, message },
            LanApiError::MissingValue(msg) => nspanel_core::Error::MissingValue(msg),
        }
    }
}

/// Envelope of every LAN API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub error: i64,
    pub data: Option<T>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceListData {
    #[serde(default)]
    pub device_list: Vec<SubDeviceRecord>,
}

/// Sub-device entry as sent by the gateway.
///
/// Every field is optional at this level so a missing required field can be
/// reported by name instead of as a generic parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubDeviceRecord {
    pub serial_number: Option<String>,
    pub third_serial_number: Option<String>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub mac_address: Option<String>,
    pub display_category: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityRecord>,
    pub protocol: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, Value>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub subnet: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityRecord {
    pub capability: String,
    pub permission: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl SubDeviceRecord {
    /// Convert to the typed sub-device.
    ///
    /// Capability entries with an unknown permission are skipped.
    pub fn into_discovered(self) -> Result<DiscoveredSubDevice, LanApiError> {
        let serial_number = required(self.serial_number, "serial_number")?;
        let name = required(self.name, "name")?;
        let display_category = required(self.display_category, "display_category")?;

        let capabilities = self
            .capabilities
            .into_iter()
            .filter_map(|entry| match entry.permission.parse::<Permission>() {
                Ok(permission) => Some(DiscoveredCapability {
                    capability: entry.capability.into(),
                    permission,
                    name: entry.name,
                }),
                Err(e) => {
                    warn!(
                        category = "discovery",
                        serial_number = %serial_number,
                        capability = %entry.capability,
                        "Skipping capability with unknown permission {}", e
                    );
                    None
                }
            })
            .collect();

        Ok(DiscoveredSubDevice {
            serial_number,
            third_serial_number: self.third_serial_number,
            mac_address: self.mac_address,
            name,
            manufacturer: self.manufacturer,
            model: self.model,
            firmware_version: self.firmware_version,
            display_category: display_category.into(),
            capabilities,
            protocol: self.protocol,
            tags: self.tags,
            online: self.online,
            subnet: self.subnet,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, LanApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| LanApiError::MissingValue(format!("sub-device field {} is missing", field)))
}

/// HTTP client for gateway LAN APIs.
#[derive(Debug, Clone)]
pub struct LanApiClient {
    client: Client,
    timeout: Duration,
}

impl LanApiClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// List the sub-devices connected to a gateway.
    pub async fn get_sub_devices(
        &self,
        gateway: &GatewayConfig,
    ) -> Result<Vec<SubDeviceRecord>, LanApiError> {
        let url = format!("{}{}", gateway.base_url(), DEVICES_PATH);
        let mut request = self.client.get(&url).timeout(self.timeout);
        if let Some(token) = &gateway.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(classify)?;
        if !response.status().is_success() {
            return Err(LanApiError::Http(response.status().as_u16()));
        }

        let body = response.bytes().await.map_err(classify)?;
        parse_device_list(&body)
    }
}

impl Default for LanApiClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(nspanel_core::config::defaults::LAN_API_TIMEOUT_SECS))
    }
}

fn classify(err: reqwest::Error) -> LanApiError {
    if err.is_timeout() {
        LanApiError::Timeout(err.to_string())
    } else if err.is_decode() {
        LanApiError::Malformed(err.to_string())
    } else {
        LanApiError::Connection(err.to_string())
    }
}

/// Parse a device listing body.
pub fn parse_device_list(body: &[u8]) -> Result<Vec<SubDeviceRecord>, LanApiError> {
    let response: ApiResponse<DeviceListData> =
        serde_json::from_slice(body).map_err(|e| LanApiError::Malformed(e.to_string()))?;

    if response.error != 0 {
        return Err(LanApiError::Vendor {
            code: response.error,
            message: response.message,
        });
    }

    response
        .data
        .map(|data| data.device_list)
        .ok_or_else(|| LanApiError::MissingValue("response data is missing".to_string()))
}
