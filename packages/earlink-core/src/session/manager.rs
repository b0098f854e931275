//! Primary-channel session manager.
//!
//! One connection to the accessory at a time. All lifecycle decisions —
//! admission, candidate installation, teardown classification and every
//! [`ReconnectState`] mutation — happen under a single mutex, so the
//! manager can reason about "current session" without races. Slow work
//! (the connect itself, reads, writes, closes) happens outside the lock
//! on spawned tasks, and any result they report back is checked against
//! the session id it belongs to before it is allowed to touch state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::attribute::AttributeClient;
use crate::error::{LinkError, LinkResult};
use crate::events::{ConnectivityEvent, DisconnectReason, EventEmitter, RecoveryEvent};
use crate::protocol_constants::{
    CONNECT_TIMEOUT, LOCAL_DISCONNECT_GRACE, READ_BUFFER_SIZE,
};
use crate::router::{NotificationRouter, CONTROL_STREAM_HANDLE};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::session::recovery::{RecoveryOutcome, TransportRecovery};
use crate::session::reconnect::{ConnectDenied, ReconnectState, UserIntent};
use crate::session::{ConnectReason, MediaActivity, SessionId, SessionObserver, SessionState};
use crate::transport::{ChannelKind, ChannelReader, ChannelWriter, RemoteAddr, SecureChannelFactory};
use crate::utils::now_millis;

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn ChannelWriter>>>;

/// How the read loop ended.
#[derive(Debug)]
enum ReadExit {
    /// Local teardown cancelled the loop.
    Cancelled,
    /// The remote closed the stream (read returned 0).
    RemoteEof,
    /// The read itself failed.
    ReadError(LinkError),
}

struct ActiveSession {
    id: SessionId,
    remote: RemoteAddr,
    writer: SharedWriter,
    cancel: CancellationToken,
    close_requested: bool,
    connected_at: Instant,
}

enum Phase {
    Disconnected,
    Connecting { id: SessionId, remote: RemoteAddr },
    Connected(ActiveSession),
}

struct ManagerInner {
    phase: Phase,
    /// Per-remote reconnect policy state; outlives sessions.
    reconnect: HashMap<RemoteAddr, ReconnectState>,
    recovery: TransportRecovery,
    /// Secondary channel, owned here so teardown closes it with the session.
    attribute: Option<Arc<AttributeClient>>,
    last_local_disconnect_at: Option<Instant>,
}

/// Owns the primary channel lifecycle.
pub struct SessionManager {
    factory: Arc<dyn SecureChannelFactory>,
    router: Arc<NotificationRouter>,
    emitter: Arc<dyn EventEmitter>,
    media: Arc<dyn MediaActivity>,
    spawner: TokioSpawner,
    inner: Mutex<ManagerInner>,
    next_session_id: AtomicU64,
    /// Set after construction; the arbiter observes lifecycle transitions.
    observer: RwLock<Option<Arc<dyn SessionObserver>>>,
}

impl SessionManager {
    /// Creates a manager. No connection is attempted until `connect`.
    #[must_use]
    pub fn new(
        factory: Arc<dyn SecureChannelFactory>,
        router: Arc<NotificationRouter>,
        emitter: Arc<dyn EventEmitter>,
        media: Arc<dyn MediaActivity>,
        spawner: TokioSpawner,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            router,
            emitter,
            media,
            spawner,
            inner: Mutex::new(ManagerInner {
                phase: Phase::Disconnected,
                reconnect: HashMap::new(),
                recovery: TransportRecovery::default(),
                attribute: None,
                last_local_disconnect_at: None,
            }),
            next_session_id: AtomicU64::new(1),
            observer: RwLock::new(None),
        })
    }

    /// Registers the lifecycle observer. Call once during bootstrap.
    pub fn set_observer(&self, observer: Arc<dyn SessionObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Requests a connection to `remote`.
    ///
    /// Admission runs synchronously against the policy gates; the connect
    /// itself runs on a worker task with a 5 s deadline. Manual attempts
    /// bypass every gate except link-layer suppression.
    pub fn connect(
        self: &Arc<Self>,
        remote: RemoteAddr,
        manual: bool,
        reason: ConnectReason,
    ) -> Result<SessionId, ConnectDenied> {
        let id = {
            let mut inner = self.inner.lock();
            match &inner.phase {
                Phase::Connected(_) => return Err(ConnectDenied::AlreadyConnected),
                Phase::Connecting { .. } => return Err(ConnectDenied::AlreadyConnecting),
                Phase::Disconnected => {}
            }
            let now = Instant::now();
            let policy = inner.reconnect.entry(remote).or_default();
            policy.admit(now, manual)?;
            policy.record_attempt(now);

            let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
            inner.phase = Phase::Connecting { id, remote };
            id
        };

        log::info!(
            "[Session] {id} connecting to {remote} (reason={}, manual={manual})",
            reason.as_str()
        );
        let manager = Arc::clone(self);
        self.spawner
            .spawn(async move { manager.run_connect(id, remote, manual).await });
        Ok(id)
    }

    async fn run_connect(self: Arc<Self>, id: SessionId, remote: RemoteAddr, manual: bool) {
        let opened =
            tokio::time::timeout(CONNECT_TIMEOUT, self.factory.open(remote, ChannelKind::Control))
                .await;
        let channel = match opened {
            Ok(Ok(channel)) => channel,
            Ok(Err(err)) => return self.connect_failed(id, remote, manual, err),
            Err(_) => {
                return self.connect_failed(
                    id,
                    remote,
                    manual,
                    LinkError::ConnectTimeout(CONNECT_TIMEOUT),
                )
            }
        };
        let (reader, writer) = channel.split();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));

        let install = {
            let mut inner = self.inner.lock();
            let current = matches!(
                inner.phase,
                Phase::Connecting { id: current, .. } if current == id
            );
            if current {
                let now = Instant::now();
                inner.reconnect.entry(remote).or_default().record_success();
                let recovery = inner.recovery.consume(remote, now);

                let cancel = CancellationToken::new();
                inner.phase = Phase::Connected(ActiveSession {
                    id,
                    remote,
                    writer: writer.clone(),
                    cancel: cancel.clone(),
                    close_requested: false,
                    connected_at: now,
                });
                Some((cancel, recovery))
            } else {
                None
            }
        };

        let Some((cancel, recovery)) = install else {
            // Superseded while connecting (local cancel or shutdown):
            // release the channel without touching current state.
            log::debug!("[Session] {id} superseded before install; discarding channel");
            let _ = writer.lock().await.close().await;
            return;
        };

        log::info!("[Session] {id} connected to {remote}");
        self.emitter.emit_connectivity(ConnectivityEvent::Connected {
            remote,
            timestamp: now_millis(),
        });
        let resume = match recovery {
            RecoveryOutcome::Resume => {
                log::info!("[Session] Recovery marker consumed for {remote}; resume requested");
                self.emitter.emit_recovery(RecoveryEvent::Consumed {
                    remote,
                    timestamp: now_millis(),
                });
                true
            }
            RecoveryOutcome::Expired => {
                self.emitter.emit_recovery(RecoveryEvent::Expired {
                    remote,
                    timestamp: now_millis(),
                });
                false
            }
            RecoveryOutcome::NoResume | RecoveryOutcome::NotArmed => false,
        };
        if let Some(observer) = self.observer.read().clone() {
            observer.on_connected(remote, resume);
        }

        let manager = Arc::clone(&self);
        self.spawner
            .spawn(async move { manager.read_loop(id, remote, reader, cancel).await });
    }

    fn connect_failed(&self, id: SessionId, remote: RemoteAddr, manual: bool, err: LinkError) {
        let failures = {
            let mut inner = self.inner.lock();
            let current = matches!(
                inner.phase,
                Phase::Connecting { id: current, .. } if current == id
            );
            if !current {
                // A cancelled attempt failing later must not feed backoff.
                log::debug!("[Session] Ignoring stale connect failure for {id}");
                return;
            }
            inner.phase = Phase::Disconnected;
            let policy = inner.reconnect.entry(remote).or_default();
            policy.record_failure(Instant::now(), err.is_security());
            policy.failures()
        };
        // Surface only manual failures and the start of a persistent
        // streak; supervised retries stay at debug.
        if manual || failures == 3 {
            log::warn!("[Session] {id} connect to {remote} failed ({failures} consecutive): {err}");
        } else {
            log::debug!("[Session] {id} connect to {remote} failed ({failures} consecutive): {err}");
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        id: SessionId,
        remote: RemoteAddr,
        mut reader: Box<dyn ChannelReader>,
        cancel: CancellationToken,
    ) {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let exit = loop {
            let result = tokio::select! {
                () = cancel.cancelled() => break ReadExit::Cancelled,
                result = reader.read(&mut buf) => result,
            };
            match result {
                Ok(0) => break ReadExit::RemoteEof,
                Ok(n) => self.router.dispatch(CONTROL_STREAM_HANDLE, &buf[..n]),
                Err(err) => break ReadExit::ReadError(err),
            }
        };
        self.finish_session(id, remote, exit).await;
    }

    /// Single teardown path for an established session.
    ///
    /// Classifies the exit, feeds the reconnect policy, arms transport
    /// recovery where applicable, then runs the slow teardown side effects
    /// outside the lock.
    async fn finish_session(&self, id: SessionId, remote: RemoteAddr, exit: ReadExit) {
        let teardown = {
            let mut inner = self.inner.lock();
            let current = matches!(&inner.phase, Phase::Connected(s) if s.id == id);
            if !current {
                log::debug!("[Session] Ignoring stale teardown for {id}");
                return;
            }
            let Phase::Connected(session) =
                std::mem::replace(&mut inner.phase, Phase::Disconnected)
            else {
                unreachable!("checked above");
            };
            let now = Instant::now();

            // A close racing ahead of the local disconnect request still
            // counts as local for a short grace window.
            let local_grace = inner
                .last_local_disconnect_at
                .is_some_and(|at| now.saturating_duration_since(at) < LOCAL_DISCONNECT_GRACE);
            let reason = match &exit {
                ReadExit::Cancelled => DisconnectReason::Local,
                _ if session.close_requested || local_grace => DisconnectReason::Local,
                ReadExit::RemoteEof => DisconnectReason::RemoteClosed,
                ReadExit::ReadError(_) => DisconnectReason::ReadError,
            };

            let mut armed = false;
            if reason != DisconnectReason::Local {
                inner
                    .reconnect
                    .entry(remote)
                    .or_default()
                    .record_remote_close(now);
                if reason == DisconnectReason::RemoteClosed && self.media.is_media_active() {
                    inner.recovery.arm(remote, true, now);
                    armed = true;
                }
            }
            (session, reason, armed, inner.attribute.take())
        };
        let (session, reason, armed, attribute) = teardown;

        let uptime = session.connected_at.elapsed();
        if let ReadExit::ReadError(err) = &exit {
            log::warn!("[Session] {id} read error after {uptime:.0?}: {err}");
        }
        log::info!("[Session] {id} to {remote} closed ({reason:?}) after {uptime:.0?}");

        {
            let mut writer = session.writer.lock().await;
            if let Err(err) = writer.close().await {
                log::debug!("[Session] {id} writer close: {err}");
            }
        }
        if let Some(attribute) = attribute {
            attribute.close().await;
        }

        if armed {
            self.emitter.emit_recovery(RecoveryEvent::Armed {
                remote,
                timestamp: now_millis(),
            });
        }
        self.emitter
            .emit_connectivity(ConnectivityEvent::Disconnected {
                remote,
                reason,
                timestamp: now_millis(),
            });
        if let Some(observer) = self.observer.read().clone() {
            observer.on_disconnected(remote, reason);
        }
    }

    /// Requests local teardown. Idempotent; calling while already closing
    /// or disconnected does nothing.
    pub fn disconnect(&self) {
        let pending_writer = {
            let mut inner = self.inner.lock();
            inner.last_local_disconnect_at = Some(Instant::now());
            match &mut inner.phase {
                Phase::Connected(session) => {
                    if session.close_requested {
                        log::debug!("[Session] {} already closing", session.id);
                        return;
                    }
                    session.close_requested = true;
                    session.cancel.cancel();
                    Some(session.writer.clone())
                }
                Phase::Connecting { id, .. } => {
                    // The in-flight candidate is discarded at install time.
                    log::info!("[Session] {id} cancelled while connecting");
                    inner.phase = Phase::Disconnected;
                    None
                }
                Phase::Disconnected => None,
            }
        };
        // Closing the writer unblocks a peer mid-read; our own read loop is
        // woken by the cancellation token, not by this close.
        if let Some(writer) = pending_writer {
            self.spawner.spawn(async move {
                let mut writer = writer.lock().await;
                let _ = writer.close().await;
            });
        }
    }

    /// Writes a frame on the primary channel.
    pub async fn write(&self, frame: &[u8]) -> LinkResult<()> {
        let writer = {
            let inner = self.inner.lock();
            match &inner.phase {
                Phase::Connected(session) if !session.close_requested => session.writer.clone(),
                _ => return Err(LinkError::TransportUnavailable("no session".into())),
            }
        };
        let mut writer = writer.lock().await;
        writer.write(frame).await
    }

    /// Opens (or returns) the attribute channel for the connected remote.
    ///
    /// Attribute failures are never fatal to the session; the error only
    /// reaches the caller.
    pub async fn open_attribute(&self) -> LinkResult<Arc<AttributeClient>> {
        let remote = {
            let inner = self.inner.lock();
            if let Some(existing) = &inner.attribute {
                return Ok(existing.clone());
            }
            match &inner.phase {
                Phase::Connected(session) if !session.close_requested => session.remote,
                _ => return Err(LinkError::TransportUnavailable("no session".into())),
            }
        };
        let client =
            AttributeClient::open(self.factory.as_ref(), remote, self.router.clone(), &self.spawner)
                .await?;
        let mut inner = self.inner.lock();
        // Lost a race with a concurrent open or a teardown.
        if let Some(existing) = &inner.attribute {
            let existing = existing.clone();
            drop(inner);
            client.close().await;
            return Ok(existing);
        }
        if !matches!(&inner.phase, Phase::Connected(s) if !s.close_requested) {
            drop(inner);
            client.close().await;
            return Err(LinkError::TransportUnavailable("no session".into()));
        }
        inner.attribute = Some(client.clone());
        Ok(client)
    }

    /// Currently open attribute client, if any.
    #[must_use]
    pub fn attribute(&self) -> Option<Arc<AttributeClient>> {
        self.inner.lock().attribute.clone()
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match &self.inner.lock().phase {
            Phase::Disconnected => SessionState::Disconnected,
            Phase::Connecting { .. } => SessionState::Connecting,
            Phase::Connected(session) if session.close_requested => SessionState::Closing,
            Phase::Connected(_) => SessionState::Connected,
        }
    }

    /// Remote of the established session, if any.
    #[must_use]
    pub fn connected_remote(&self) -> Option<RemoteAddr> {
        match &self.inner.lock().phase {
            Phase::Connected(session) => Some(session.remote),
            _ => None,
        }
    }

    /// Records a link-layer (radio) connect for `remote`.
    pub fn note_link_up(&self, remote: RemoteAddr) {
        let mut inner = self.inner.lock();
        inner
            .reconnect
            .entry(remote)
            .or_default()
            .record_link_up(Instant::now());
    }

    /// Records a link-layer (radio) disconnect for `remote`.
    ///
    /// Suppression is shortened when the drop follows a just-armed
    /// transport-recovery marker, so the expected quick re-link is not
    /// blocked for the full window.
    pub fn note_link_down(&self, remote: RemoteAddr) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let recoverable = inner.recovery.is_armed_for(remote, now);
        inner
            .reconnect
            .entry(remote)
            .or_default()
            .record_link_down(now, recoverable);
    }

    /// Applies a user-intent signal to the reconnect policy for `remote`.
    pub fn apply_user_intent(&self, remote: RemoteAddr, intent: UserIntent) {
        let mut inner = self.inner.lock();
        inner
            .reconnect
            .entry(remote)
            .or_default()
            .apply_user_intent(Instant::now(), intent);
    }
}
