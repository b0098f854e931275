//! Application bootstrap and dependency wiring.
//!
//! The composition root: the single place where the router, session
//! manager, arbiter and event bridge are instantiated and wired together.
//! Platform capabilities (channel factory, audio routing) come in as
//! trait objects and everything else is built around them.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::arbiter::{AudioRouting, ManagerLink, OwnershipArbiter};
use crate::control::parse_ownership_echo;
use crate::events::BroadcastEventBridge;
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::router::{NotificationRouter, CONTROL_STREAM_HANDLE};
use crate::runtime::TokioSpawner;
use crate::session::{MediaActivity, SessionManager};
use crate::state::Config;
use crate::transport::SecureChannelFactory;

/// Bridges [`AudioRouting`] to the manager's media-activity probe.
struct RoutingMediaProbe {
    routing: Arc<dyn AudioRouting>,
}

impl MediaActivity for RoutingMediaProbe {
    fn is_media_active(&self) -> bool {
        self.routing.is_media_active()
    }
}

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Validated configuration the services were built from.
    pub config: Config,
    /// Frame fan-out for control and attribute channels.
    pub router: Arc<NotificationRouter>,
    /// Primary-channel session lifecycle.
    pub manager: Arc<SessionManager>,
    /// Audio-route ownership arbitration.
    pub arbiter: Arc<OwnershipArbiter>,
    /// Event bridge for external consumers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

/// Instantiates and wires all core services.
///
/// Must be called from within a Tokio runtime context.
///
/// # Errors
///
/// Returns an error if the configuration fails validation.
pub fn bootstrap(
    config: Config,
    factory: Arc<dyn SecureChannelFactory>,
    routing: Arc<dyn AudioRouting>,
) -> Result<BootstrappedServices, String> {
    config.validate()?;
    log::info!(
        "[Bootstrap] Wiring services for accessory {}",
        config.accessory
    );

    let spawner = TokioSpawner::current();
    let cancel_token = CancellationToken::new();
    let router = Arc::new(NotificationRouter::new());
    let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));

    let manager = SessionManager::new(
        factory,
        router.clone(),
        event_bridge.clone(),
        Arc::new(RoutingMediaProbe {
            routing: routing.clone(),
        }),
        spawner.clone(),
    );
    let arbiter = OwnershipArbiter::new(
        ManagerLink::new(manager.clone()),
        routing,
        event_bridge.clone(),
        spawner.clone(),
        config.takeover.clone(),
        config.accessory,
        config.local_adapter,
    );
    manager.set_observer(Arc::new(arbiter.clone()));

    // Ownership echoes arrive as raw control frames; feed them to the
    // arbiter.
    let echo_sink = arbiter.clone();
    router.subscribe(CONTROL_STREAM_HANDLE, move |frame| {
        if let Some(owned) = parse_ownership_echo(frame) {
            echo_sink.handle_ownership_echo(owned);
        }
    });

    Ok(BootstrappedServices {
        config,
        router,
        manager,
        arbiter,
        event_bridge,
        spawner,
        cancel_token,
    })
}

impl BootstrappedServices {
    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();
        self.manager.disconnect();
        log::info!("[Bootstrap] Shutdown complete");
    }
}
