//! Connector configuration.
//!
//! The bridge reads already-resolved connector documents; it never persists
//! configuration itself.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    /// Port the directive server listens on.
    pub const SERVER_PORT: u16 = 52323;
    /// Address the directive server binds to.
    pub const SERVER_ADDRESS: std::net::Ipv4Addr = std::net::Ipv4Addr::UNSPECIFIED;
    /// Port of the gateway LAN API.
    pub const GATEWAY_PORT: u16 = 80;
    /// Timeout of one LAN API request, in seconds.
    pub const LAN_API_TIMEOUT_SECS: u64 = 10;
    /// Interval of the consume tick, in milliseconds.
    pub const CONSUME_INTERVAL_MS: u64 = 50;
    /// Interval between discovery runs, in seconds.
    pub const DISCOVERY_INTERVAL_SECS: u64 = 300;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG: &str = "NSPANEL_CONFIG";
    pub const PORT: &str = "NSPANEL_PORT";
    pub const LOG_JSON: &str = "NSPANEL_LOG_JSON";

    /// Port override from the environment, if set and valid.
    pub fn port() -> Option<u16> {
        std::env::var(PORT).ok().and_then(|s| s.parse().ok())
    }

    /// Whether JSON log output is requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// One bridge connector instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector identity stamped on every directive request
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Human-readable connector name
    #[serde(default = "default_name")]
    pub name: String,
    /// Directive server port (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directive server bind address
    #[serde(default = "default_address")]
    pub address: Ipv4Addr,
    /// LAN API request timeout in seconds
    #[serde(default = "default_timeout")]
    pub lan_api_timeout_secs: u64,
    /// Consume tick interval in milliseconds
    #[serde(default = "default_consume_interval")]
    pub consume_interval_ms: u64,
    /// Discovery interval in seconds
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,
    /// Gateways fronting sub-devices
    #[serde(default)]
    pub gateways: Vec<GatewayConfig>,
}

fn default_name() -> String {
    "ns-panel".to_string()
}

fn default_port() -> u16 {
    defaults::SERVER_PORT
}

fn default_address() -> Ipv4Addr {
    defaults::SERVER_ADDRESS
}

fn default_timeout() -> u64 {
    defaults::LAN_API_TIMEOUT_SECS
}

fn default_consume_interval() -> u64 {
    defaults::CONSUME_INTERVAL_MS
}

fn default_discovery_interval() -> u64 {
    defaults::DISCOVERY_INTERVAL_SECS
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self::new(default_name())
    }
}

impl ConnectorConfig {
    /// Create a connector with default settings and no gateways.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            port: defaults::SERVER_PORT,
            address: defaults::SERVER_ADDRESS,
            lan_api_timeout_secs: defaults::LAN_API_TIMEOUT_SECS,
            consume_interval_ms: defaults::CONSUME_INTERVAL_MS,
            discovery_interval_secs: defaults::DISCOVERY_INTERVAL_SECS,
            gateways: Vec::new(),
        }
    }

    /// Set the directive server port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Add a gateway.
    pub fn with_gateway(mut self, gateway: GatewayConfig) -> Self {
        self.gateways.push(gateway);
        self
    }

    /// Parse and validate a TOML connector document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ConnectorConfig = toml::from_str(content)
            .map_err(|e| Error::MalformedInput(format!("connector configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML connector document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidState(format!("cannot read configuration {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(port) = env_vars::port() {
            self.port = port;
        }
        self
    }

    /// Check associations between connector and gateways.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for gateway in &self.gateways {
            if gateway.identifier.trim().is_empty() {
                return Err(Error::MissingValue("gateway identifier".to_string()));
            }
            if gateway.ip_address.trim().is_empty() {
                return Err(Error::MissingValue(format!(
                    "ip_address of gateway {}",
                    gateway.identifier
                )));
            }
            if !seen.insert(gateway.identifier.as_str()) {
                return Err(Error::InvalidState(format!(
                    "gateway {} is configured twice",
                    gateway.identifier
                )));
            }
        }
        if self.consume_interval_ms == 0 {
            return Err(Error::InvalidState(
                "consume_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.discovery_interval_secs == 0 {
            return Err(Error::InvalidState(
                "discovery_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn gateway(&self, identifier: &str) -> Option<&GatewayConfig> {
        self.gateways.iter().find(|g| g.identifier == identifier)
    }
}

/// Panel reachable over the LAN API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway identifier
    pub identifier: String,
    /// Host name or IP address
    pub ip_address: String,
    /// LAN API port
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Access token obtained when the gateway was paired
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_gateway_port() -> u16 {
    defaults::GATEWAY_PORT
}

impl GatewayConfig {
    pub fn new(identifier: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ip_address: ip_address.into(),
            port: defaults::GATEWAY_PORT,
            access_token: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Base URL of the gateway LAN API.
    pub fn base_url(&self) -> String {
        if self.port == defaults::GATEWAY_PORT {
            format!("http://{}", self.ip_address)
        } else {
            format!("http://{}:{}", self.ip_address, self.port)
        }
    }
}
