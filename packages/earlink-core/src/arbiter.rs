//! Audio-route ownership arbitration.
//!
//! Several paired controllers can hold sessions to the accessory at once,
//! but only one owns the audio route. The arbiter decides whether this
//! device should claim ownership away from a peer and drives the takeover
//! handshake. There is no transaction framing in the protocol: the only
//! confirmation is the accessory echoing the claim-ownership value back
//! on the control channel.
//!
//! All decisions are evaluated against a snapshot taken under one lock;
//! the handshake itself runs on a worker task. The guard against
//! ownership oscillation ("recently lost", "peer reversed by user
//! gesture") is one tagged state, not loose booleans, so the two causes
//! cannot be set at once or cleared by the wrong path.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::control::ControlCommand;
use crate::error::LinkResult;
use crate::events::{DisconnectReason, EventEmitter, OwnershipEvent};
use crate::protocol_constants::{OWNERSHIP_LOSS_SUPPRESSION, TAKEOVER_RETRY_DELAY};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::session::reconnect::{ConnectDenied, UserIntent};
use crate::session::{ConnectReason, MediaActivity, SessionManager, SessionObserver};
use crate::state::TakeoverPrefs;
use crate::transport::RemoteAddr;
use crate::utils::now_millis;

/// Ownership as last echoed by the accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipState {
    /// No echo received yet this session.
    #[default]
    Unknown,
    /// The accessory confirmed this controller as the route owner.
    Owned,
    /// The accessory reported another controller as the owner.
    NotOwned,
}

/// What prompted a takeover evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverTrigger {
    /// An incoming call started ringing locally.
    CallRinging,
    /// A call became active locally.
    CallActive,
    /// Local media playback was requested.
    MediaPlay,
    /// The user explicitly asked to reconnect/take over.
    Reconnect,
}

impl TakeoverTrigger {
    /// Short identifier for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CallRinging => "call_ringing",
            Self::CallActive => "call_active",
            Self::MediaPlay => "media_play",
            Self::Reconnect => "reconnect",
        }
    }

    /// Whether this trigger is an automatic signal rather than an
    /// explicit user command.
    #[must_use]
    pub const fn is_automatic(&self) -> bool {
        !matches!(self, Self::Reconnect)
    }
}

/// Activity state as reported by the accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessoryState {
    /// Accessory reports no connected audio source.
    Disconnected,
    /// Connected but idle.
    #[default]
    Idle,
    /// Music streaming from some controller.
    Music,
    /// An active call on some controller.
    Call,
    /// Ringing on some controller.
    Ringing,
}

/// Kind of stream an audio source is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSourceKind {
    /// Media/music stream.
    Music,
    /// Call audio.
    Call,
}

/// The controller currently feeding audio to the accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSource {
    /// Address of the source controller.
    pub remote: RemoteAddr,
    /// What it is playing.
    pub kind: AudioSourceKind,
}

/// Guard against ownership oscillation between two controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ReacquireGuard {
    /// No suppression active.
    #[default]
    Clear,
    /// Ownership moved away unsolicited; automatic re-acquisition is
    /// suppressed until the deadline.
    RecentlyLost { until: Instant },
    /// The peer's user reversed ownership by gesture; automatic
    /// re-takeover stays vetoed until explicitly cleared.
    PeerReversed,
}

/// Outcome of evaluating the takeover decision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverDecision {
    /// Run the takeover handshake.
    Proceed,
    /// Data is stale (unknown ownership or single controller); schedule
    /// one deferred retry instead of acting.
    DeferRetry,
    /// Already owning with no foreign source; nothing to do.
    NoAction,
    /// A veto applies.
    Vetoed(VetoReason),
}

/// Why a takeover was vetoed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VetoReason {
    /// Both accessory sides report "not in use".
    NotInUse,
    /// The peer's user reversed ownership by gesture.
    PeerReversed,
    /// Ownership was lost moments ago; re-acquisition is suppressed.
    RecentlyLost,
    /// The per-trigger preference toggle is off.
    TriggerPreference,
    /// The per-accessory-state preference toggle is off.
    StatePreference,
}

/// Session operations the arbiter needs.
///
/// [`SessionManager`] is the production implementation; tests substitute
/// a scripted link.
#[async_trait]
pub trait ControlLink: Send + Sync {
    /// Whether an established session exists right now.
    fn is_connected(&self) -> bool;

    /// Admits a manual connection attempt to `remote` (bypasses backoff
    /// and debounce, never mutual exclusion).
    fn connect_manual(&self, remote: RemoteAddr) -> Result<(), ConnectDenied>;

    /// Writes a control command on the primary channel.
    async fn send_command(&self, command: ControlCommand) -> LinkResult<()>;
}

/// Production [`ControlLink`] over the session manager.
pub struct ManagerLink {
    manager: Arc<SessionManager>,
}

impl ManagerLink {
    /// Wraps a session manager.
    #[must_use]
    pub fn new(manager: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self { manager })
    }
}

#[async_trait]
impl ControlLink for ManagerLink {
    fn is_connected(&self) -> bool {
        self.manager.connected_remote().is_some()
    }

    fn connect_manual(&self, remote: RemoteAddr) -> Result<(), ConnectDenied> {
        // An explicit takeover is a user-intent signal for the reconnect
        // policy before it is a connect request.
        self.manager.apply_user_intent(remote, UserIntent::ManualTakeover);
        self.manager
            .connect(remote, true, ConnectReason::Takeover)
            .map(|_| ())
    }

    async fn send_command(&self, command: ControlCommand) -> LinkResult<()> {
        self.manager.write(&command.to_frame()).await
    }
}

/// Platform audio-routing seam.
///
/// The core never touches actual audio; routing reconnection is
/// asynchronous on the platform side, which is why resume requests are
/// "after routing confirms" rather than immediate.
pub trait AudioRouting: MediaActivity {
    /// Pauses local playback immediately.
    fn pause(&self);
    /// Starts reconnecting the local audio route to the accessory.
    fn reconnect_route(&self);
    /// Stops presenting this device as the audio route.
    fn drop_route(&self);
    /// Requests a playback resume once routing confirms.
    fn request_resume_after_routing(&self);
}

struct ArbiterInner {
    ownership: OwnershipState,
    connected_controllers: Vec<RemoteAddr>,
    audio_source: Option<AudioSource>,
    accessory_state: AccessoryState,
    /// Per-side in-use flags (left, right). Defaults to in-use so missing
    /// data never vetoes.
    in_use: (bool, bool),
    guard: ReacquireGuard,
    /// At most one deferred retry may be outstanding.
    retry_pending: bool,
    /// Takeover waiting for a connect requested by the arbiter itself.
    pending_trigger: Option<TakeoverTrigger>,
}

/// Decides and drives audio-route takeovers.
pub struct OwnershipArbiter {
    link: Arc<dyn ControlLink>,
    routing: Arc<dyn AudioRouting>,
    emitter: Arc<dyn EventEmitter>,
    spawner: TokioSpawner,
    prefs: TakeoverPrefs,
    accessory: RemoteAddr,
    local_adapter: RemoteAddr,
    inner: Mutex<ArbiterInner>,
}

impl OwnershipArbiter {
    /// Creates an arbiter for the accessory at `accessory`.
    #[must_use]
    pub fn new(
        link: Arc<dyn ControlLink>,
        routing: Arc<dyn AudioRouting>,
        emitter: Arc<dyn EventEmitter>,
        spawner: TokioSpawner,
        prefs: TakeoverPrefs,
        accessory: RemoteAddr,
        local_adapter: RemoteAddr,
    ) -> Arc<Self> {
        Arc::new(Self {
            link,
            routing,
            emitter,
            spawner,
            prefs,
            accessory,
            local_adapter,
            inner: Mutex::new(ArbiterInner {
                ownership: OwnershipState::Unknown,
                connected_controllers: Vec::new(),
                audio_source: None,
                accessory_state: AccessoryState::default(),
                in_use: (true, true),
                guard: ReacquireGuard::Clear,
                retry_pending: false,
                pending_trigger: None,
            }),
        })
    }

    /// Last echoed ownership state.
    #[must_use]
    pub fn ownership(&self) -> OwnershipState {
        self.inner.lock().ownership
    }

    /// Updates the connected-controller set reported by the accessory.
    pub fn update_controllers(&self, controllers: Vec<RemoteAddr>) {
        self.inner.lock().connected_controllers = controllers;
    }

    /// Updates the active audio source reported by the accessory.
    pub fn update_audio_source(&self, source: Option<AudioSource>) {
        self.inner.lock().audio_source = source;
    }

    /// Updates the accessory's reported activity state.
    pub fn update_accessory_state(&self, state: AccessoryState) {
        self.inner.lock().accessory_state = state;
    }

    /// Updates the per-side in-use flags.
    pub fn update_in_use(&self, left: bool, right: bool) {
        self.inner.lock().in_use = (left, right);
    }

    /// Records that the peer's user reversed ownership by gesture.
    ///
    /// Automatic re-takeover stays vetoed until [`clear_peer_reversed`]
    /// or an explicit user trigger.
    ///
    /// [`clear_peer_reversed`]: Self::clear_peer_reversed
    pub fn mark_peer_reversed(&self) {
        self.inner.lock().guard = ReacquireGuard::PeerReversed;
    }

    /// Clears the peer-reversed veto (explicit user action).
    pub fn clear_peer_reversed(&self) {
        let mut inner = self.inner.lock();
        if inner.guard == ReacquireGuard::PeerReversed {
            inner.guard = ReacquireGuard::Clear;
        }
    }

    /// Evaluates the decision policy and, where eligible, runs the
    /// takeover handshake on a worker task.
    pub fn take_over(self: &Arc<Self>, trigger: TakeoverTrigger) {
        self.take_over_inner(trigger, false);
    }

    fn take_over_inner(self: &Arc<Self>, trigger: TakeoverTrigger, is_retry: bool) {
        if !trigger.is_automatic() {
            // An explicit user command overrides the oscillation guard.
            self.clear_peer_reversed();
        }

        if !self.link.is_connected() {
            self.request_connect_then_takeover(trigger);
            return;
        }

        let decision = {
            let inner = self.inner.lock();
            self.evaluate(&inner, trigger, Instant::now())
        };
        log::debug!(
            "[Arbiter] Trigger {} evaluated: {decision:?}",
            trigger.as_str()
        );
        match decision {
            TakeoverDecision::Proceed => {
                let arbiter = Arc::clone(self);
                self.spawner.spawn(async move {
                    if let Err(err) = arbiter.run_takeover(trigger).await {
                        log::warn!("[Arbiter] Takeover ({}) failed: {err}", trigger.as_str());
                    }
                });
            }
            TakeoverDecision::DeferRetry if !is_retry => self.schedule_retry(trigger),
            TakeoverDecision::DeferRetry => {
                log::debug!("[Arbiter] Still stale after deferred retry; giving up");
            }
            TakeoverDecision::NoAction => {}
            TakeoverDecision::Vetoed(reason) => {
                log::info!(
                    "[Arbiter] Takeover ({}) vetoed: {reason:?}",
                    trigger.as_str()
                );
            }
        }
    }

    /// Decision policy. Pure over the snapshot; only meaningful while the
    /// session is connected.
    fn evaluate(
        &self,
        inner: &ArbiterInner,
        trigger: TakeoverTrigger,
        now: Instant,
    ) -> TakeoverDecision {
        if !self.prefs.allows_trigger(trigger) {
            return TakeoverDecision::Vetoed(VetoReason::TriggerPreference);
        }
        if !self.prefs.allows_accessory_state(inner.accessory_state) {
            return TakeoverDecision::Vetoed(VetoReason::StatePreference);
        }
        if trigger.is_automatic() {
            match inner.guard {
                ReacquireGuard::PeerReversed => {
                    return TakeoverDecision::Vetoed(VetoReason::PeerReversed);
                }
                ReacquireGuard::RecentlyLost { until } if now < until => {
                    return TakeoverDecision::Vetoed(VetoReason::RecentlyLost);
                }
                _ => {}
            }
        }
        if !inner.in_use.0 && !inner.in_use.1 {
            return TakeoverDecision::Vetoed(VetoReason::NotInUse);
        }
        if inner.ownership == OwnershipState::Unknown || inner.connected_controllers.len() <= 1 {
            return TakeoverDecision::DeferRetry;
        }

        let foreign_source = inner
            .audio_source
            .is_some_and(|source| source.remote != self.local_adapter);
        if inner.ownership == OwnershipState::Owned && !foreign_source {
            return TakeoverDecision::NoAction;
        }
        if inner.ownership == OwnershipState::NotOwned || foreign_source {
            return TakeoverDecision::Proceed;
        }
        TakeoverDecision::NoAction
    }

    fn schedule_retry(self: &Arc<Self>, trigger: TakeoverTrigger) {
        {
            let mut inner = self.inner.lock();
            if inner.retry_pending {
                return;
            }
            inner.retry_pending = true;
        }
        log::debug!(
            "[Arbiter] Stale data for {}; retrying in {:?}",
            trigger.as_str(),
            TAKEOVER_RETRY_DELAY
        );
        let arbiter = Arc::clone(self);
        self.spawner.spawn(async move {
            tokio::time::sleep(TAKEOVER_RETRY_DELAY).await;
            arbiter.inner.lock().retry_pending = false;
            arbiter.take_over_inner(trigger, true);
        });
    }

    fn request_connect_then_takeover(self: &Arc<Self>, trigger: TakeoverTrigger) {
        self.inner.lock().pending_trigger = Some(trigger);
        match self.link.connect_manual(self.accessory) {
            Ok(()) => {
                log::info!(
                    "[Arbiter] Not connected; connecting before takeover ({})",
                    trigger.as_str()
                );
            }
            Err(ConnectDenied::AlreadyConnecting) => {
                // The in-flight attempt will complete the takeover.
            }
            Err(denied) => {
                self.inner.lock().pending_trigger = None;
                log::info!(
                    "[Arbiter] Takeover ({}) abandoned, connect denied: {denied:?}",
                    trigger.as_str()
                );
            }
        }
    }

    /// The takeover handshake.
    ///
    /// Local playback pauses before the claim goes out so the route flip
    /// is not audible; the resume is deferred until routing confirms,
    /// because routing reconnection is asynchronous.
    async fn run_takeover(&self, trigger: TakeoverTrigger) -> LinkResult<()> {
        log::info!("[Arbiter] Taking over audio route ({})", trigger.as_str());
        let playing = self.routing.is_media_active();
        self.routing.pause();
        self.link
            .send_command(ControlCommand::ClaimOwnership { owned: true })
            .await?;
        self.link
            .send_command(ControlCommand::MediaStateBroadcast { playing })
            .await?;
        self.link.send_command(ControlCommand::ShowUiHint).await?;
        self.link.send_command(ControlCommand::HijackRequest).await?;
        self.routing.reconnect_route();
        self.routing.request_resume_after_routing();
        Ok(())
    }

    /// Handles the accessory echoing a claim-ownership value.
    ///
    /// An unsolicited flip to not-owned means another controller took the
    /// route: this device stops presenting as the route immediately and
    /// suppresses automatic re-acquisition for a short window.
    pub fn handle_ownership_echo(&self, owned: bool) {
        let (changed, lost) = {
            let mut inner = self.inner.lock();
            let previous = inner.ownership;
            inner.ownership = if owned {
                OwnershipState::Owned
            } else {
                OwnershipState::NotOwned
            };
            let lost = !owned && previous == OwnershipState::Owned;
            if lost {
                inner.guard = ReacquireGuard::RecentlyLost {
                    until: Instant::now() + OWNERSHIP_LOSS_SUPPRESSION,
                };
            }
            (inner.ownership != previous, lost)
        };

        if lost {
            log::info!("[Arbiter] Ownership moved away; dropping route");
            self.routing.drop_route();
            self.emitter.emit_ownership(OwnershipEvent::Lost {
                timestamp: now_millis(),
            });
        }
        if changed {
            self.emitter.emit_ownership(OwnershipEvent::Changed {
                owned,
                timestamp: now_millis(),
            });
        }
    }
}

impl SessionObserver for Arc<OwnershipArbiter> {
    fn on_connected(&self, remote: RemoteAddr, resume_playback: bool) {
        if resume_playback {
            log::info!("[Arbiter] Transport recovered to {remote}; requesting resume");
            self.routing.request_resume_after_routing();
        }
        let pending = self.inner.lock().pending_trigger.take();
        if let Some(trigger) = pending {
            self.take_over_inner(trigger, false);
        }
    }

    fn on_disconnected(&self, _remote: RemoteAddr, _reason: DisconnectReason) {
        let mut inner = self.inner.lock();
        inner.ownership = OwnershipState::Unknown;
        inner.pending_trigger = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::events::NoopEventEmitter;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Scripted link recording every command in order.
    #[derive(Default)]
    struct FakeLink {
        connected: AtomicBool,
        commands: SyncMutex<Vec<ControlCommand>>,
        connects: SyncMutex<Vec<RemoteAddr>>,
    }

    #[async_trait]
    impl ControlLink for FakeLink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn connect_manual(&self, remote: RemoteAddr) -> Result<(), ConnectDenied> {
            self.connects.lock().push(remote);
            Ok(())
        }

        async fn send_command(&self, command: ControlCommand) -> LinkResult<()> {
            if !self.is_connected() {
                return Err(LinkError::TransportUnavailable("no session".into()));
            }
            self.commands.lock().push(command);
            Ok(())
        }
    }

    /// Records routing calls in sequence alongside protocol commands.
    #[derive(Default)]
    struct FakeRouting {
        media_active: AtomicBool,
        calls: SyncMutex<Vec<&'static str>>,
    }

    impl MediaActivity for FakeRouting {
        fn is_media_active(&self) -> bool {
            self.media_active.load(Ordering::SeqCst)
        }
    }

    impl AudioRouting for FakeRouting {
        fn pause(&self) {
            self.calls.lock().push("pause");
        }

        fn reconnect_route(&self) {
            self.calls.lock().push("reconnect_route");
        }

        fn drop_route(&self) {
            self.calls.lock().push("drop_route");
        }

        fn request_resume_after_routing(&self) {
            self.calls.lock().push("request_resume");
        }
    }

    struct Harness {
        link: Arc<FakeLink>,
        routing: Arc<FakeRouting>,
        arbiter: Arc<OwnershipArbiter>,
    }

    fn self_addr() -> RemoteAddr {
        RemoteAddr::new([0x10, 0, 0, 0, 0, 0x01])
    }

    fn peer_addr() -> RemoteAddr {
        RemoteAddr::new([0x10, 0, 0, 0, 0, 0x02])
    }

    fn accessory_addr() -> RemoteAddr {
        RemoteAddr::new([0xA0, 0, 0, 0, 0, 0xFF])
    }

    fn harness() -> Harness {
        let link = Arc::new(FakeLink::default());
        let routing = Arc::new(FakeRouting::default());
        let arbiter = OwnershipArbiter::new(
            link.clone(),
            routing.clone(),
            Arc::new(NoopEventEmitter),
            TokioSpawner::current(),
            TakeoverPrefs::default(),
            accessory_addr(),
            self_addr(),
        );
        Harness {
            link,
            routing,
            arbiter,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn unknown_ownership_defers_without_commands() {
        let h = harness();
        h.link.connected.store(true, Ordering::SeqCst);
        h.arbiter.update_controllers(vec![self_addr()]);

        h.arbiter.take_over(TakeoverTrigger::MediaPlay);
        settle().await;

        assert!(h.link.commands.lock().is_empty());
        assert!(h.arbiter.inner.lock().retry_pending);
        // A second trigger while the retry is outstanding schedules
        // nothing extra.
        h.arbiter.take_over(TakeoverTrigger::MediaPlay);
        settle().await;
        assert!(h.link.commands.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_retry_fires_once() {
        let h = harness();
        h.link.connected.store(true, Ordering::SeqCst);
        h.arbiter.update_controllers(vec![self_addr()]);

        h.arbiter.take_over(TakeoverTrigger::MediaPlay);
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Still stale at retry time: no further retry is scheduled.
        assert!(!h.arbiter.inner.lock().retry_pending);
        assert!(h.link.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn hijack_sequence_order_is_exact() {
        let h = harness();
        h.link.connected.store(true, Ordering::SeqCst);
        h.routing.media_active.store(true, Ordering::SeqCst);
        h.arbiter.update_controllers(vec![self_addr(), peer_addr()]);
        h.arbiter.update_audio_source(Some(AudioSource {
            remote: peer_addr(),
            kind: AudioSourceKind::Music,
        }));
        h.arbiter.handle_ownership_echo(false);
        h.arbiter.update_accessory_state(AccessoryState::Music);

        h.arbiter.take_over(TakeoverTrigger::MediaPlay);
        settle().await;

        assert_eq!(
            h.link.commands.lock().as_slice(),
            &[
                ControlCommand::ClaimOwnership { owned: true },
                ControlCommand::MediaStateBroadcast { playing: true },
                ControlCommand::ShowUiHint,
                ControlCommand::HijackRequest,
            ]
        );
        assert_eq!(
            h.routing.calls.lock().as_slice(),
            &["pause", "reconnect_route", "request_resume"]
        );
    }

    #[tokio::test]
    async fn owning_with_no_foreign_source_is_a_noop() {
        let h = harness();
        h.link.connected.store(true, Ordering::SeqCst);
        h.arbiter.update_controllers(vec![self_addr(), peer_addr()]);
        h.arbiter.handle_ownership_echo(true);

        h.arbiter.take_over(TakeoverTrigger::MediaPlay);
        settle().await;

        assert!(h.link.commands.lock().is_empty());
        assert!(h.routing.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn both_sides_idle_vetoes_takeover() {
        let h = harness();
        h.link.connected.store(true, Ordering::SeqCst);
        h.arbiter.update_controllers(vec![self_addr(), peer_addr()]);
        h.arbiter.handle_ownership_echo(false);
        h.arbiter.update_in_use(false, false);

        h.arbiter.take_over(TakeoverTrigger::MediaPlay);
        settle().await;

        assert!(h.link.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn ownership_loss_drops_route_and_suppresses_reacquisition() {
        let h = harness();
        h.link.connected.store(true, Ordering::SeqCst);
        h.arbiter.update_controllers(vec![self_addr(), peer_addr()]);
        h.arbiter.handle_ownership_echo(true);

        h.arbiter.handle_ownership_echo(false);
        assert_eq!(h.routing.calls.lock().as_slice(), &["drop_route"]);

        h.arbiter.take_over(TakeoverTrigger::MediaPlay);
        settle().await;
        assert!(h.link.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn explicit_reconnect_bypasses_loss_suppression() {
        let h = harness();
        h.link.connected.store(true, Ordering::SeqCst);
        h.arbiter.update_controllers(vec![self_addr(), peer_addr()]);
        h.arbiter.handle_ownership_echo(true);
        h.arbiter.handle_ownership_echo(false);

        h.arbiter.take_over(TakeoverTrigger::Reconnect);
        settle().await;
        assert_eq!(h.link.commands.lock().len(), 4);
    }

    #[tokio::test]
    async fn peer_reversed_vetoes_until_cleared() {
        let h = harness();
        h.link.connected.store(true, Ordering::SeqCst);
        h.arbiter.update_controllers(vec![self_addr(), peer_addr()]);
        h.arbiter.handle_ownership_echo(false);
        h.arbiter.mark_peer_reversed();

        h.arbiter.take_over(TakeoverTrigger::MediaPlay);
        settle().await;
        assert!(h.link.commands.lock().is_empty());

        h.arbiter.clear_peer_reversed();
        h.arbiter.take_over(TakeoverTrigger::MediaPlay);
        settle().await;
        assert_eq!(h.link.commands.lock().len(), 4);
    }

    #[tokio::test]
    async fn preference_toggles_gate_takeover() {
        let link = Arc::new(FakeLink::default());
        let routing = Arc::new(FakeRouting::default());
        let prefs = TakeoverPrefs {
            on_media: false,
            ..TakeoverPrefs::default()
        };
        let arbiter = OwnershipArbiter::new(
            link.clone(),
            routing,
            Arc::new(NoopEventEmitter),
            TokioSpawner::current(),
            prefs,
            accessory_addr(),
            self_addr(),
        );
        link.connected.store(true, Ordering::SeqCst);
        arbiter.update_controllers(vec![self_addr(), peer_addr()]);
        arbiter.handle_ownership_echo(false);

        arbiter.take_over(TakeoverTrigger::MediaPlay);
        settle().await;
        assert!(link.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn disconnected_takeover_connects_first_then_runs_sequence() {
        let h = harness();
        h.arbiter.update_controllers(vec![self_addr(), peer_addr()]);
        h.arbiter.update_audio_source(Some(AudioSource {
            remote: peer_addr(),
            kind: AudioSourceKind::Music,
        }));

        h.arbiter.take_over(TakeoverTrigger::Reconnect);
        settle().await;
        assert_eq!(h.link.connects.lock().as_slice(), &[accessory_addr()]);
        assert!(h.link.commands.lock().is_empty());

        // Connection established: the pending trigger resumes the
        // sequence.
        h.link.connected.store(true, Ordering::SeqCst);
        h.arbiter.handle_ownership_echo(false);
        h.arbiter.on_connected(accessory_addr(), false);
        settle().await;
        assert_eq!(h.link.commands.lock().len(), 4);
    }
}
