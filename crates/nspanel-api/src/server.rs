//! Directive HTTP server of one connector.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use nspanel_core::ConnectorConfig;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ServerError;
use crate::router::{router, ConnectorIdentity, RouterState};

/// How long `disconnect` waits for open connections before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    /// Set once a shutdown was requested
    stopping: Arc<AtomicBool>,
    serving: AbortHandle,
    watcher: JoinHandle<()>,
}

/// HTTP listener serving the directive router.
///
/// Any end of the serving task after [`connect`](Self::connect) returned,
/// other than one requested by [`disconnect`](Self::disconnect), is reported
/// through the termination channel as [`ServerError::Terminated`].
pub struct DirectiveServer {
    connector: Uuid,
    address: Ipv4Addr,
    port: u16,
    state: RouterState,
    running: Option<Running>,
    termination_tx: mpsc::UnboundedSender<ServerError>,
    termination_rx: Option<mpsc::UnboundedReceiver<ServerError>>,
}

impl DirectiveServer {
    pub fn new(connector: Uuid, address: Ipv4Addr, port: u16, state: RouterState) -> Self {
        let (termination_tx, termination_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            address,
            port,
            state,
            running: None,
            termination_tx,
            termination_rx: Some(termination_rx),
        }
    }

    /// Server for the address and port of a connector.
    pub fn for_connector(config: &ConnectorConfig, state: RouterState) -> Self {
        Self::new(config.id, config.address, config.port, state)
    }

    /// Receiver of errors that must stop the connector.
    ///
    /// Can be taken once.
    pub fn take_termination_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<ServerError>> {
        self.termination_rx.take()
    }

    pub fn is_connected(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address while connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Bind the listener and start serving.
    ///
    /// Connecting an already connected server returns the bound address.
    pub async fn connect(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Ok(running.addr);
        }

        let bind_error = |source| ServerError::Bind {
            address: format!("{}:{}", self.address, self.port),
            source,
        };
        let listener = TcpListener::bind((self.address, self.port))
            .await
            .map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;

        let app = router(self.state.clone()).layer(from_fn_with_state(
            ConnectorIdentity(self.connector),
            stamp_connector,
        ));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let serving = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let stopping = Arc::new(AtomicBool::new(false));
        let abort = serving.abort_handle();
        let watcher = tokio::spawn(watch_serving(
            serving,
            stopping.clone(),
            self.termination_tx.clone(),
            self.connector,
            addr,
        ));

        info!(connector = %self.connector, address = %addr, "Directive server listening");
        self.running = Some(Running {
            addr,
            shutdown: shutdown_tx,
            stopping,
            serving: abort,
            watcher,
        });
        Ok(addr)
    }

    /// Stop serving and release the port.
    ///
    /// Returns once the serving task has finished. Disconnecting a server
    /// that is not connected does nothing.
    pub async fn disconnect(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.stopping.store(true, Ordering::Release);
        let _ = running.shutdown.send(());

        let mut watcher = running.watcher;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut watcher).await.is_err() {
            warn!(
                connector = %self.connector,
                address = %running.addr,
                "Directive server did not drain in time, aborting"
            );
            running.serving.abort();
            let _ = watcher.await;
        }
        info!(connector = %self.connector, address = %running.addr, "Directive server stopped");
    }
}

/// Wait for the serving task and escalate an end nobody asked for.
async fn watch_serving(
    serving: JoinHandle<std::io::Result<()>>,
    stopping: Arc<AtomicBool>,
    termination: mpsc::UnboundedSender<ServerError>,
    connector: Uuid,
    addr: SocketAddr,
) {
    let outcome = serving.await;
    if stopping.load(Ordering::Acquire) {
        if let Ok(Err(e)) = &outcome {
            warn!(connector = %connector, address = %addr, "Directive server stopped with error: {}", e);
        }
        return;
    }

    let reason = match outcome {
        Ok(Ok(())) => "serving ended without a shutdown request".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(e) if e.is_panic() => format!("serving task panicked: {}", e),
        Err(e) => format!("serving task ended: {}", e),
    };
    error!(connector = %connector, address = %addr, "Directive server failed: {}", reason);
    let _ = termination.send(ServerError::Terminated(reason));
}

async fn stamp_connector(
    State(identity): State<ConnectorIdentity>,
    mut request: Request,
    next: Next,
) -> Response {
    request.extensions_mut().insert(identity);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DeviceDirectiveHandler;
    use nspanel_core::MessageQueue;
    use nspanel_devices::{DeviceStore, TaxonomyStore};

    fn server() -> DirectiveServer {
        let handler = Arc::new(DeviceDirectiveHandler::new(
            Arc::new(DeviceStore::new()),
            Arc::new(TaxonomyStore::bundled().unwrap()),
            Arc::new(MessageQueue::new()),
        ));
        DirectiveServer::new(Uuid::new_v4(), Ipv4Addr::LOCALHOST, 0, RouterState::new(handler))
    }

    #[tokio::test]
    async fn test_unexpected_end_of_serving_terminates() {
        let mut server = server();
        let mut termination = server.take_termination_receiver().unwrap();
        server.connect().await.unwrap();

        server.running.as_ref().unwrap().serving.abort();

        let err = tokio::time::timeout(Duration::from_secs(5), termination.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, ServerError::Terminated(_)));
        let err: nspanel_core::Error = err.into();
        assert!(err.is_terminating());

        server.disconnect().await;
        assert!(!server.is_connected());
        assert!(termination.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_requested_shutdown_is_not_reported() {
        let mut server = server();
        let mut termination = server.take_termination_receiver().unwrap();

        server.connect().await.unwrap();
        server.disconnect().await;

        assert!(termination.try_recv().is_err());
    }
}
