//! Attribute (GATT-over-socket) client for the secondary channel.
//!
//! Three frame shapes travel over this channel: read requests (0x0A),
//! write requests (0x12) and handle-value notifications (0x1B). Handles
//! are 16-bit little-endian in frame bytes 1-2. The accessory answers at
//! most one request at a time, so responses flow through a strict
//! one-slot FIFO mailbox: requests must be serialized by the caller. A
//! response arriving with no request waiting is dropped with a warning;
//! conversely a stale queued response will satisfy the next request, which
//! is exactly why concurrent requests are not supported.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{LinkError, LinkResult};
use crate::protocol_constants::{
    ATTRIBUTE_RESPONSE_TIMEOUT, ATT_ENABLE_NOTIFICATIONS, ATT_HEADER_LEN,
    ATT_OP_HANDLE_VALUE_NOTIFICATION, ATT_OP_READ_REQUEST, ATT_OP_WRITE_REQUEST, READ_BUFFER_SIZE,
};
use crate::router::NotificationRouter;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::transport::{ChannelKind, ChannelReader, ChannelWriter, RemoteAddr, SecureChannelFactory};

/// Encodes a read request for `handle`.
#[must_use]
pub fn encode_read_request(handle: u16) -> [u8; ATT_HEADER_LEN] {
    let [lo, hi] = handle.to_le_bytes();
    [ATT_OP_READ_REQUEST, lo, hi]
}

/// Encodes a write request for `handle` carrying `value`.
#[must_use]
pub fn encode_write_request(handle: u16, value: &[u8]) -> Bytes {
    let mut frame = Vec::with_capacity(ATT_HEADER_LEN + value.len());
    let [lo, hi] = handle.to_le_bytes();
    frame.push(ATT_OP_WRITE_REQUEST);
    frame.push(lo);
    frame.push(hi);
    frame.extend_from_slice(value);
    Bytes::from(frame)
}

/// A parsed inbound attribute frame.
#[derive(Debug, PartialEq, Eq)]
enum InboundFrame<'a> {
    /// Unsolicited server-initiated value update.
    Notification { handle: u16, value: &'a [u8] },
    /// Anything that is not a notification; answers the pending request.
    Response(&'a [u8]),
}

/// Classifies an inbound frame by its opcode byte.
fn classify(frame: &[u8]) -> LinkResult<InboundFrame<'_>> {
    let Some(&opcode) = frame.first() else {
        return Err(LinkError::ProtocolViolation("empty attribute frame".into()));
    };
    if opcode == ATT_OP_HANDLE_VALUE_NOTIFICATION {
        if frame.len() < ATT_HEADER_LEN {
            return Err(LinkError::ProtocolViolation(format!(
                "notification frame too short: {} bytes",
                frame.len()
            )));
        }
        let handle = u16::from_le_bytes([frame[1], frame[2]]);
        return Ok(InboundFrame::Notification {
            handle,
            value: &frame[ATT_HEADER_LEN..],
        });
    }
    Ok(InboundFrame::Response(frame))
}

/// Client for the attribute channel.
///
/// Opened on demand after the primary session connects; its failure is
/// never fatal to the session. Dropping the client (or calling
/// [`close`](Self::close)) stops the reader task.
pub struct AttributeClient {
    remote: RemoteAddr,
    writer: Mutex<Box<dyn ChannelWriter>>,
    /// One-slot response mailbox. Locked for the full request/response
    /// exchange so requests serialize.
    responses: Mutex<mpsc::Receiver<Bytes>>,
    cancel: CancellationToken,
}

impl AttributeClient {
    /// Opens the attribute channel to `remote` and starts the reader task.
    ///
    /// Notifications are fanned out through `router`, keyed by the handle
    /// in the frame.
    pub async fn open(
        factory: &dyn SecureChannelFactory,
        remote: RemoteAddr,
        router: Arc<NotificationRouter>,
        spawner: &TokioSpawner,
    ) -> LinkResult<Arc<Self>> {
        let channel = factory.open(remote, ChannelKind::Attribute).await?;
        let (reader, writer) = channel.split();
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        log::info!("[Attribute] Channel open to {remote}");
        spawner.spawn(reader_loop(remote, reader, tx, router, cancel.clone()));

        Ok(Arc::new(Self {
            remote,
            writer: Mutex::new(writer),
            responses: Mutex::new(rx),
            cancel,
        }))
    }

    /// Reads the value of `handle`.
    ///
    /// Returns the response payload with the leading opcode byte stripped.
    /// Fails with [`LinkError::ResponseTimeout`] after 2 s without a
    /// response.
    pub async fn read(&self, handle: u16) -> LinkResult<Bytes> {
        let mut responses = self.responses.lock().await;
        self.send(&encode_read_request(handle)).await?;
        let frame = self.await_response(&mut responses).await?;
        Ok(frame.slice(1..))
    }

    /// Writes `value` to `handle`.
    ///
    /// Writes are best-effort: the acknowledgement (or its absence) is
    /// consumed and discarded so it cannot leak into a later read.
    pub async fn write(&self, handle: u16, value: &[u8]) -> LinkResult<()> {
        let mut responses = self.responses.lock().await;
        self.send(&encode_write_request(handle, value)).await?;
        match self.await_response(&mut responses).await {
            Ok(_) => {}
            Err(LinkError::ResponseTimeout(_)) => {
                log::debug!(
                    "[Attribute] Write to 0x{handle:04X} unacknowledged (best-effort)"
                );
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Enables server-initiated notifications for `value_handle`.
    ///
    /// Writes `[0x01, 0x00]` to the configuration handle at
    /// `value_handle + 1`.
    pub async fn enable_notifications(&self, value_handle: u16) -> LinkResult<()> {
        self.write(value_handle + 1, &ATT_ENABLE_NOTIFICATIONS).await
    }

    /// Remote this client is attached to.
    #[must_use]
    pub fn remote(&self) -> RemoteAddr {
        self.remote
    }

    /// Stops the reader task and closes the channel.
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.close().await {
            log::debug!("[Attribute] Close error for {}: {err}", self.remote);
        }
    }

    async fn send(&self, frame: &[u8]) -> LinkResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write(frame).await
    }

    async fn await_response(&self, responses: &mut mpsc::Receiver<Bytes>) -> LinkResult<Bytes> {
        match tokio::time::timeout(ATTRIBUTE_RESPONSE_TIMEOUT, responses.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(LinkError::UnexpectedClose(
                "attribute channel closed".into(),
            )),
            Err(_) => Err(LinkError::ResponseTimeout(ATTRIBUTE_RESPONSE_TIMEOUT)),
        }
    }
}

impl Drop for AttributeClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn reader_loop(
    remote: RemoteAddr,
    mut reader: Box<dyn ChannelReader>,
    responses: mpsc::Sender<Bytes>,
    router: Arc<NotificationRouter>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let result = tokio::select! {
            () = cancel.cancelled() => {
                log::debug!("[Attribute] Reader for {remote} stopped");
                return;
            }
            result = reader.read(&mut buf) => result,
        };
        match result {
            Ok(0) => {
                log::info!("[Attribute] Channel to {remote} closed by remote");
                return;
            }
            Ok(n) => match classify(&buf[..n]) {
                Ok(InboundFrame::Notification { handle, value }) => {
                    router.dispatch(handle, value);
                }
                Ok(InboundFrame::Response(frame)) => {
                    if responses.try_send(Bytes::copy_from_slice(frame)).is_err() {
                        log::warn!(
                            "[Attribute] Dropping response from {remote}: no request waiting"
                        );
                    }
                }
                Err(err) => {
                    log::warn!("[Attribute] Discarding malformed frame from {remote}: {err}");
                }
            },
            Err(err) => {
                log::warn!("[Attribute] Read error on channel to {remote}: {err}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{duplex_pair, SecureChannel};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PairFactory {
        far: SyncMutex<Option<Box<dyn SecureChannel>>>,
    }

    impl PairFactory {
        fn new() -> (Self, Box<dyn SecureChannel>) {
            let (near, far) = duplex_pair();
            (
                Self {
                    far: SyncMutex::new(Some(near)),
                },
                far,
            )
        }
    }

    #[async_trait]
    impl SecureChannelFactory for PairFactory {
        async fn open(
            &self,
            _remote: RemoteAddr,
            kind: ChannelKind,
        ) -> LinkResult<Box<dyn SecureChannel>> {
            assert_eq!(kind, ChannelKind::Attribute);
            self.far
                .lock()
                .take()
                .ok_or_else(|| LinkError::TransportUnavailable("already opened".into()))
        }
    }

    fn remote() -> RemoteAddr {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    async fn open_client(
        router: Arc<NotificationRouter>,
    ) -> (Arc<AttributeClient>, Box<dyn ChannelReader>, Box<dyn ChannelWriter>) {
        let (factory, far) = PairFactory::new();
        let (far_reader, far_writer) = far.split();
        let client = AttributeClient::open(&factory, remote(), router, &TokioSpawner::current())
            .await
            .unwrap();
        (client, far_reader, far_writer)
    }

    #[test]
    fn read_request_wire_format() {
        assert_eq!(encode_read_request(0x1234), [0x0A, 0x34, 0x12]);
    }

    #[test]
    fn write_request_wire_format() {
        let frame = encode_write_request(0x00AB, &[0xDE, 0xAD]);
        assert_eq!(frame.as_ref(), &[0x12, 0xAB, 0x00, 0xDE, 0xAD]);
    }

    #[test]
    fn classify_splits_notifications_from_responses() {
        match classify(&[0x1B, 0x05, 0x00, 0x42]).unwrap() {
            InboundFrame::Notification { handle, value } => {
                assert_eq!(handle, 0x0005);
                assert_eq!(value, &[0x42]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(
            classify(&[0x0B, 0x01]).unwrap(),
            InboundFrame::Response(&[0x0B, 0x01])
        );
        assert!(classify(&[]).is_err());
        assert!(classify(&[0x1B, 0x05]).is_err());
    }

    #[tokio::test]
    async fn read_returns_response_without_opcode() {
        let router = Arc::new(NotificationRouter::new());
        let (client, mut far_reader, mut far_writer) = open_client(router).await;

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = far_reader.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], &[0x0A, 0x07, 0x00]);
            far_writer.write(&[0x0B, 0xCA, 0xFE]).await.unwrap();
        });

        let value = client.read(0x0007).await.unwrap();
        assert_eq!(value.as_ref(), &[0xCA, 0xFE]);
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn read_times_out_without_response() {
        let router = Arc::new(NotificationRouter::new());
        let (client, _far_reader, _far_writer) = open_client(router).await;

        let err = client.read(0x0001).await.unwrap_err();
        assert!(matches!(err, LinkError::ResponseTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn write_is_best_effort_without_ack() {
        let router = Arc::new(NotificationRouter::new());
        let (client, mut far_reader, _far_writer) = open_client(router).await;

        client.write(0x0003, &[0x01]).await.unwrap();

        let mut buf = [0u8; 64];
        let n = far_reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x12, 0x03, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn notifications_fan_out_by_handle() {
        let router = Arc::new(NotificationRouter::new());
        let (client, _far_reader, mut far_writer) = open_client(router.clone()).await;

        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = seen.clone();
        router.subscribe(0x0042, move |value: &[u8]| {
            sink.lock().push(value.to_vec());
        });

        far_writer.write(&[0x1B, 0x42, 0x00, 0x11, 0x22]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(seen.lock().as_slice(), &[vec![0x11, 0x22]]);
        drop(client);
    }

    #[tokio::test]
    async fn unsolicited_response_is_dropped_when_mailbox_full() {
        let router = Arc::new(NotificationRouter::new());
        let (client, mut far_reader, mut far_writer) = open_client(router).await;

        // Two back-to-back responses with nothing pending: the one-slot
        // mailbox keeps the first and drops the second.
        far_writer.write(&[0x0B, 0x01]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        far_writer.write(&[0x0B, 0x02]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // The queued frame satisfies the next request (the documented
        // hazard of the FIFO mailbox).
        let value = client.read(0x0009).await.unwrap();
        assert_eq!(value.as_ref(), &[0x01]);

        let mut buf = [0u8; 64];
        let n = far_reader.read(&mut buf).await.unwrap();
        assert_eq!(buf[0], 0x0A);
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn enable_notifications_writes_config_descriptor() {
        let router = Arc::new(NotificationRouter::new());
        let (client, mut far_reader, mut far_writer) = open_client(router).await;

        let writes = Arc::new(AtomicUsize::new(0));
        let counter = writes.clone();
        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let n = far_reader.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], &[0x12, 0x11, 0x00, 0x01, 0x00]);
            counter.fetch_add(1, Ordering::SeqCst);
            far_writer.write(&[0x13]).await.unwrap();
        });

        client.enable_notifications(0x0010).await.unwrap();
        responder.await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }
}
