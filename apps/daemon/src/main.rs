//! Earlink Daemon - Standalone headless companion for a paired wireless
//! audio accessory.
//!
//! Runs the session/ownership core without a GUI. The accessory channels
//! are carried over a TCP bridge so the daemon can be developed and
//! exercised against a link simulator; a production deployment replaces
//! the factory with a native secure-socket adapter.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use earlink_core::transport::{ChannelKind, SecureChannel, StreamChannel};
use earlink_core::{
    bootstrap, AudioRouting, ConnectReason, LinkError, LinkResult, MediaActivity, RemoteAddr,
    SecureChannelFactory,
};
use tokio::net::TcpStream;
use tokio::signal;

use crate::config::DaemonConfig;

/// Earlink Daemon - headless accessory session and ownership manager.
#[derive(Parser, Debug)]
#[command(name = "earlink-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "EARLINK_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Accessory address (overrides config file).
    #[arg(short, long, env = "EARLINK_ACCESSORY")]
    accessory: Option<RemoteAddr>,

    /// TCP bridge host (overrides config file).
    #[arg(short = 'b', long, env = "EARLINK_BRIDGE_HOST")]
    bridge_host: Option<String>,

    /// TCP bridge control-channel port (overrides config file).
    #[arg(short = 'p', long, env = "EARLINK_CONTROL_PORT")]
    control_port: Option<u16>,
}

/// Opens accessory channels over the TCP bridge.
struct TcpBridgeFactory {
    host: String,
    control_port: u16,
    attribute_port: u16,
}

#[async_trait]
impl SecureChannelFactory for TcpBridgeFactory {
    async fn open(
        &self,
        remote: RemoteAddr,
        kind: ChannelKind,
    ) -> LinkResult<Box<dyn SecureChannel>> {
        let port = match kind {
            ChannelKind::Control => self.control_port,
            ChannelKind::Attribute => self.attribute_port,
        };
        let endpoint = format!("{}:{port}", self.host);
        log::debug!(
            "[Bridge] Opening {} channel to {remote} via {endpoint}",
            kind.as_str()
        );
        let stream = TcpStream::connect(&endpoint).await.map_err(|err| {
            LinkError::ConnectFailed {
                reason: format!("bridge {endpoint}: {err}"),
                security: false,
            }
        })?;
        stream.set_nodelay(true).map_err(LinkError::Io)?;
        Ok(Box::new(StreamChannel::new(stream)))
    }
}

/// Development audio routing: tracks a play/pause flag and logs route
/// operations instead of touching a real audio stack.
#[derive(Default)]
struct LoggingAudioRouting {
    media_active: AtomicBool,
}

impl MediaActivity for LoggingAudioRouting {
    fn is_media_active(&self) -> bool {
        self.media_active.load(Ordering::SeqCst)
    }
}

impl AudioRouting for LoggingAudioRouting {
    fn pause(&self) {
        self.media_active.store(false, Ordering::SeqCst);
        log::info!("[Routing] Pausing local playback");
    }

    fn reconnect_route(&self) {
        log::info!("[Routing] Reconnecting local audio route");
    }

    fn drop_route(&self) {
        self.media_active.store(false, Ordering::SeqCst);
        log::info!("[Routing] Dropping audio route");
    }

    fn request_resume_after_routing(&self) {
        self.media_active.store(true, Ordering::SeqCst);
        log::info!("[Routing] Resume requested for when routing confirms");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Earlink Daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(accessory) = args.accessory {
        config.accessory = accessory;
    }
    if let Some(host) = args.bridge_host {
        config.bridge_host = host;
    }
    if let Some(port) = args.control_port {
        config.control_port = port;
    }

    log::info!(
        "Configuration: accessory={}, bridge={}:{} (attribute {})",
        config.accessory,
        config.bridge_host,
        config.control_port,
        config.attribute_port
    );

    let factory = Arc::new(TcpBridgeFactory {
        host: config.bridge_host.clone(),
        control_port: config.control_port,
        attribute_port: config.attribute_port,
    });
    let routing = Arc::new(LoggingAudioRouting::default());

    let core_config = config.to_core_config()?;
    let services = bootstrap(core_config, factory, routing)
        .map_err(|reason| anyhow::anyhow!("Failed to bootstrap services: {reason}"))?;

    log::info!("Services bootstrapped successfully");

    // Mirror domain events into the log for operators.
    let mut events = services.event_bridge.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            log::info!("[Event] {event:?}");
        }
    });

    if config.connect_on_start {
        match services
            .manager
            .connect(config.accessory, false, ConnectReason::ConnectionDetected)
        {
            Ok(id) => log::info!("Initial connect {id} requested"),
            Err(denied) => log::warn!("Initial connect not admitted: {denied:?}"),
        }
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");
    services.shutdown().await;
    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
