//! NS Panel bridge supervisor.
//!
//! Wires one connector together: taxonomy, message queue, consumers,
//! discovery and the directive server. Everything runs on a single-threaded
//! runtime; the main loop drives the consume tick and periodic discovery
//! until Ctrl-C or a terminating server error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nspanel_api::{DeviceDirectiveHandler, DirectiveServer, RouterState};
use nspanel_core::config::env_vars;
use nspanel_core::{BridgeEvent, ConnectorConfig, ConsumerRegistry, EventBus, MessageQueue};
use nspanel_devices::{
    DeviceStateConsumer, DeviceStore, DiscoveryClient, SubDeviceConsumer, TaxonomyStore,
};
use tracing::{debug, error, info, warn};

/// NS Panel bridge - serves panel directives and discovers sub-devices.
#[derive(Parser, Debug)]
#[command(name = "nspanel-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Connector configuration file (TOML). Falls back to NSPANEL_CONFIG.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directive server port, overrides configuration and NSPANEL_PORT.
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory with categories.json and capabilities.json to use instead
    /// of the bundled catalogs.
    #[arg(long)]
    taxonomy_dir: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?
        .block_on(run(args))
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "nspanel=debug" } else { "nspanel=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

fn load_config(args: &Args) -> Result<ConnectorConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var_os(env_vars::CONFIG).map(PathBuf::from));

    let mut config = match path {
        Some(path) => ConnectorConfig::load(&path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => {
            warn!("No configuration file given, running without gateways");
            ConnectorConfig::default()
        }
    }
    .with_env_overrides();

    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

async fn run(args: Args) -> Result<()> {
    let config = Arc::new(load_config(&args)?);

    let taxonomy = match &args.taxonomy_dir {
        Some(dir) => TaxonomyStore::load_dir(dir),
        None => TaxonomyStore::bundled(),
    }
    .context("Failed to load panel taxonomy")?;
    let taxonomy = Arc::new(taxonomy);

    let queue = Arc::new(MessageQueue::new());
    let store = Arc::new(DeviceStore::new());
    let event_bus = Arc::new(EventBus::new());

    let registry = ConsumerRegistry::new(queue.clone());
    registry.register(Arc::new(SubDeviceConsumer::new(store.clone(), taxonomy.clone())));
    registry.register(Arc::new(DeviceStateConsumer::new(store.clone(), taxonomy.clone())));

    let discovery = Arc::new(
        DiscoveryClient::for_connector(&config, taxonomy.clone(), store.clone(), queue.clone())
            .with_event_bus(event_bus.clone()),
    );

    let handler = Arc::new(DeviceDirectiveHandler::new(
        store.clone(),
        taxonomy.clone(),
        queue.clone(),
    ));
    let state = RouterState::new(handler).with_event_bus(event_bus.clone());
    let mut server = DirectiveServer::for_connector(&config, state);
    let mut termination = server
        .take_termination_receiver()
        .context("Termination channel already taken")?;

    tokio::spawn(log_events(event_bus.clone()));

    let addr = server
        .connect()
        .await
        .context("Failed to start directive server")?;
    info!(
        connector = %config.id,
        name = %config.name,
        address = %addr,
        gateways = config.gateways.len(),
        "NS Panel bridge started"
    );

    let mut consume_tick = tokio::time::interval(Duration::from_millis(config.consume_interval_ms));
    let mut discovery_tick =
        tokio::time::interval(Duration::from_secs(config.discovery_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break Ok(());
            }
            _ = consume_tick.tick() => {
                registry.consume().await;
            }
            _ = discovery_tick.tick() => {
                let discovery = discovery.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    discovery.discover(&config).await;
                });
            }
            Some(err) = termination.recv() => {
                error!(connector = %config.id, "{}", err);
                break Err(anyhow::Error::from(err));
            }
        }
    };

    server.disconnect().await;
    info!(connector = %config.id, devices = store.len().await, "NS Panel bridge stopped");
    outcome
}

async fn log_events(event_bus: Arc<EventBus>) {
    let mut events = event_bus.subscribe();
    while let Some((event, meta)) = events.recv().await {
        match &event {
            BridgeEvent::DirectiveResponded {
                message_id, status, ..
            } => debug!(source = %meta.source, message_id = %message_id, status, "Directive responded"),
            BridgeEvent::DiscoveryFinished { results, .. } => {
                for failed in results.iter().filter(|r| !r.is_success()) {
                    warn!(
                        source = %meta.source,
                        gateway = %failed.gateway,
                        "Gateway discovery failed: {}",
                        failed.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            _ => {}
        }
    }
}
