//! Directive router.
//!
//! Every request gets a well-formed event envelope back, whatever happens
//! inside the handler. Failures are answered with an `ErrorResponse` event
//! whose status and type follow [`DirectiveError::status`] and
//! [`DirectiveError::error_type`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Extension, Router};
use futures::{FutureExt, StreamExt};
use nspanel_core::{BridgeEvent, EventBus, PRODUCT_NAME};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::DirectiveError;
use crate::handler::{DirectiveContext, DirectiveHandler};
use crate::protocol::{self, EventEnvelope, CONTENT_TYPE, DIRECTIVE_PATH};

/// Largest accepted directive body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Identity of the connector serving a request, set by the server middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorIdentity(pub Uuid);

/// Shared router state.
#[derive(Clone)]
pub struct RouterState {
    handler: Arc<dyn DirectiveHandler>,
    event_bus: Option<Arc<EventBus>>,
}

impl RouterState {
    pub fn new(handler: Arc<dyn DirectiveHandler>) -> Self {
        Self {
            handler,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    async fn publish(&self, event: BridgeEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_with_source(event, "router").await;
        }
    }
}

/// Build the directive router.
pub fn router(state: RouterState) -> Router {
    Router::new()
        .route(DIRECTIVE_PATH, any(do_directive))
        .fallback(unknown_path)
        .with_state(state)
}

async fn do_directive(
    State(state): State<RouterState>,
    identity: Option<Extension<ConnectorIdentity>>,
    method: Method,
    uri: Uri,
    body: Body,
) -> Response {
    let connector = identity.map(|Extension(ConnectorIdentity(id))| id);
    let body = read_body(body).await;
    let message_id = match &body {
        Ok(bytes) => protocol::extract_message_id(bytes),
        Err(_) => protocol::new_message_id(),
    };

    state
        .publish(BridgeEvent::DirectiveReceived {
            connector,
            message_id: message_id.clone(),
            method: method.to_string(),
            path: uri.path().to_string(),
        })
        .await;

    let result = match body {
        _ if method != Method::POST => Err(DirectiveError::malformed(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("method {} is not allowed", method),
        )),
        Err(e) => Err(e),
        Ok(bytes) => {
            let context = DirectiveContext {
                connector,
                message_id: message_id.clone(),
            };
            AssertUnwindSafe(state.handler.handle(&context, &bytes))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(DirectiveError::internal(format!(
                        "directive handler panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                })
        }
    };

    respond(&state, connector, message_id, result).await
}

async fn unknown_path(
    State(state): State<RouterState>,
    identity: Option<Extension<ConnectorIdentity>>,
    method: Method,
    uri: Uri,
) -> Response {
    let connector = identity.map(|Extension(ConnectorIdentity(id))| id);
    let message_id = protocol::new_message_id();

    state
        .publish(BridgeEvent::DirectiveReceived {
            connector,
            message_id: message_id.clone(),
            method: method.to_string(),
            path: uri.path().to_string(),
        })
        .await;

    let err = DirectiveError::malformed(
        StatusCode::NOT_FOUND,
        format!("no route for {} {}", method, uri.path()),
    );
    respond(&state, connector, message_id, Err(err)).await
}

/// Collect the request body, bounded by [`MAX_BODY_BYTES`].
///
/// The bound applies to the declared length and, for chunked bodies, to the
/// bytes actually received.
async fn read_body(body: Body) -> Result<Bytes, DirectiveError> {
    let too_large = || {
        DirectiveError::malformed(StatusCode::PAYLOAD_TOO_LARGE, "request body is too large")
    };
    if body.size_hint().lower() > MAX_BODY_BYTES as u64 {
        return Err(too_large());
    }

    let mut stream = body.into_data_stream();
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| DirectiveError::malformed(StatusCode::BAD_REQUEST, e.to_string()))?;
        if collected.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(too_large());
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(collected))
}

async fn respond(
    state: &RouterState,
    connector: Option<Uuid>,
    message_id: String,
    result: Result<EventEnvelope, DirectiveError>,
) -> Response {
    let (status, envelope) = match result {
        Ok(envelope) => (StatusCode::OK, envelope),
        Err(e) => {
            match &e {
                DirectiveError::Internal(_) => {
                    error!(category = "directive", message_id = %message_id, "{}", e)
                }
                _ => warn!(category = "directive", message_id = %message_id, "{}", e),
            }
            (e.status(), EventEnvelope::error(message_id.clone(), e.error_type()))
        }
    };

    let (status, body) = match serde_json::to_value(&envelope) {
        Ok(body) => (status, body),
        Err(e) => {
            error!(
                category = "directive",
                message_id = %message_id,
                "Unserializable response: {}", e
            );
            let fallback =
                EventEnvelope::error(message_id.clone(), protocol::ErrorType::InternalError);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::to_value(&fallback).unwrap_or_default(),
            )
        }
    };
    debug!(
        category = "directive",
        message_id = %message_id,
        status = status.as_u16(),
        "Directive answered"
    );
    state
        .publish(BridgeEvent::DirectiveResponded {
            connector,
            message_id,
            status: status.as_u16(),
            body: body.clone(),
        })
        .await;

    (
        status,
        [(header::CONTENT_TYPE, CONTENT_TYPE), (header::SERVER, PRODUCT_NAME)],
        body.to_string(),
    )
        .into_response()
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
