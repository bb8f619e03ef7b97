//! Directive handlers.

use std::sync::Arc;

use async_trait::async_trait;
use nspanel_core::{CapabilityState, MessageQueue, WriteDeviceState};
use nspanel_devices::{Device, DeviceStore, TaxonomyStore};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::DirectiveError;
use crate::protocol::{
    Directive, DirectiveEnvelope, ErrorType, EventEnvelope, UPDATE_DEVICE_STATES,
    UPDATE_DEVICE_STATES_RESPONSE,
};

/// Request scope of a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveContext {
    /// Connector the request arrived on
    pub connector: Option<Uuid>,
    /// Message id echoed in the response
    pub message_id: String,
}

/// Handler of raw directive bodies.
#[async_trait]
pub trait DirectiveHandler: Send + Sync {
    /// Handle a directive and produce the response event.
    async fn handle(
        &self,
        context: &DirectiveContext,
        body: &[u8],
    ) -> Result<EventEnvelope, DirectiveError>;
}

/// Handles device directives against the device store.
pub struct DeviceDirectiveHandler {
    store: Arc<DeviceStore>,
    taxonomy: Arc<TaxonomyStore>,
    queue: Arc<MessageQueue>,
}

impl DeviceDirectiveHandler {
    pub fn new(
        store: Arc<DeviceStore>,
        taxonomy: Arc<TaxonomyStore>,
        queue: Arc<MessageQueue>,
    ) -> Self {
        Self {
            store,
            taxonomy,
            queue,
        }
    }

    async fn update_device_states(
        &self,
        context: &DirectiveContext,
        directive: Directive,
    ) -> Result<EventEnvelope, DirectiveError> {
        let device = self.target(context, &directive).await?;
        if !device.online {
            return Err(DirectiveError::protocol(
                ErrorType::EndpointUnreachable,
                format!("device {} is offline", device.identifier),
            ));
        }

        let state = directive
            .payload
            .get("state")
            .and_then(Value::as_object)
            .ok_or_else(|| DirectiveError::invalid_directive("payload.state is missing"))?;
        let state = parse_state(state)?;

        if let Some(missing) = state.iter().find(|s| {
            device
                .channels
                .iter()
                .all(|c| c.capability != s.capability || c.name != s.name)
        }) {
            return Err(DirectiveError::invalid_directive(format!(
                "device {} has no capability {}",
                device.identifier, missing.capability
            )));
        }
        for entry in &state {
            self.validate(entry)?;
        }

        debug!(
            category = "directive",
            device = %device.identifier,
            values = state.len(),
            "Writing device state"
        );
        self.queue.append(
            WriteDeviceState {
                connector: device.connector,
                identifier: device.identifier,
                state,
            }
            .into(),
        );

        Ok(EventEnvelope::new(
            UPDATE_DEVICE_STATES_RESPONSE,
            context.message_id.clone(),
            Value::Object(Map::new()),
        ))
    }

    /// Check a panel value against its taxonomy attribute.
    ///
    /// The queued value stays in panel form; the state consumer remaps it.
    fn validate(&self, state: &CapabilityState) -> Result<(), DirectiveError> {
        let attribute = self
            .taxonomy
            .attribute(&state.capability, &state.attribute)
            .ok_or_else(|| {
                DirectiveError::invalid_directive(format!(
                    "capability {} has no attribute {}",
                    state.capability, state.attribute
                ))
            })?;
        attribute
            .normalize(&state.value)
            .map(|_| ())
            .map_err(|e| DirectiveError::invalid_directive(format!("{}: {}", state.capability, e)))
    }

    async fn target(
        &self,
        context: &DirectiveContext,
        directive: &Directive,
    ) -> Result<Device, DirectiveError> {
        let endpoint = directive
            .endpoint
            .as_ref()
            .ok_or_else(|| DirectiveError::invalid_directive("directive has no endpoint"))?;

        if let Some(third) = &endpoint.third_serial_number {
            if let Some(device) = self.store.find(context.connector, third).await {
                return Ok(device);
            }
        }
        self.store
            .find(context.connector, &endpoint.serial_number)
            .await
            .ok_or_else(|| {
                DirectiveError::protocol(
                    ErrorType::NoSuchEndpoint,
                    format!("no device {}", endpoint.serial_number),
                )
            })
    }
}

#[async_trait]
impl DirectiveHandler for DeviceDirectiveHandler {
    async fn handle(
        &self,
        context: &DirectiveContext,
        body: &[u8],
    ) -> Result<EventEnvelope, DirectiveError> {
        let envelope: DirectiveEnvelope = serde_json::from_slice(body)
            .map_err(|e| DirectiveError::invalid_directive(e.to_string()))?;
        let directive = envelope.directive;

        match directive.header.name.as_str() {
            UPDATE_DEVICE_STATES => self.update_device_states(context, directive).await,
            other => Err(DirectiveError::protocol(
                ErrorType::NotSupportedInCurrentMode,
                format!("directive {} is not supported", other),
            )),
        }
    }
}

/// Flatten `payload.state` into capability states.
///
/// Attributes sit directly under the capability, or one level deeper under
/// an instance name for multi-instance capabilities:
///
/// ```json
/// {"power": {"powerState": "on"}, "toggle": {"1": {"toggleState": "off"}}}
/// ```
fn parse_state(state: &Map<String, Value>) -> Result<Vec<CapabilityState>, DirectiveError> {
    let mut states = Vec::new();
    for (capability, attributes) in state {
        let attributes = attributes.as_object().ok_or_else(|| {
            DirectiveError::invalid_directive(format!("state of {} is not an object", capability))
        })?;
        for (key, value) in attributes {
            match value.as_object() {
                Some(instance) => {
                    for (attribute, value) in instance {
                        states.push(CapabilityState {
                            capability: capability.as_str().into(),
                            name: Some(key.clone()),
                            attribute: attribute.clone(),
                            value: value.clone(),
                        });
                    }
                }
                None => states.push(CapabilityState {
                    capability: capability.as_str().into(),
                    name: None,
                    attribute: key.clone(),
                    value: value.clone(),
                }),
            }
        }
    }

    if states.is_empty() {
        return Err(DirectiveError::invalid_directive("payload.state is empty"));
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspanel_core::Capability;
    use serde_json::json;

    #[test]
    fn test_parse_flat_and_named_state() {
        let state = json!({
            "power": {"powerState": "on"},
            "toggle": {"1": {"toggleState": "off"}, "2": {"toggleState": "on"}}
        });
        let states = parse_state(state.as_object().unwrap()).unwrap();

        assert_eq!(states.len(), 3);
        let power = states.iter().find(|s| s.capability == Capability::Power).unwrap();
        assert_eq!(power.name, None);
        assert_eq!(power.attribute, "powerState");

        let named: Vec<_> = states
            .iter()
            .filter(|s| s.capability == Capability::Toggle)
            .map(|s| s.name.as_deref())
            .collect();
        assert_eq!(named, vec![Some("1"), Some("2")]);
    }

    #[test]
    fn test_parse_rejects_non_object_state() {
        let state = json!({"power": "on"});
        let err = parse_state(state.as_object().unwrap()).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::InvalidDirective);

        let err = parse_state(&Map::new()).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::InvalidDirective);
    }
}
