//! Secure-channel abstraction over the accessory transport.
//!
//! The accessory speaks over two connection-oriented channels (control and
//! attribute). How a channel is actually obtained is a platform concern —
//! native socket construction varies per OS and is supplied by a platform
//! adapter implementing [`SecureChannelFactory`]. The core only sees the
//! [`SecureChannel`] capability: read, write, close.
//!
//! [`StreamChannel`] adapts any `AsyncRead + AsyncWrite` stream to the
//! channel traits, which covers both the daemon's TCP development adapter
//! and the in-memory pair used by tests ([`duplex_pair`]).

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::error::{LinkError, LinkResult};

/// A 48-bit Bluetooth-style device address.
///
/// Identifies both the accessory and controller devices (phones, laptops)
/// in the arbitration protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteAddr([u8; 6]);

impl RemoteAddr {
    /// Creates an address from raw bytes.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Returns the raw address bytes.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for RemoteAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or(AddrParseError)?;
            if part.len() != 2 {
                return Err(AddrParseError);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| AddrParseError)?;
        }
        if parts.next().is_some() {
            return Err(AddrParseError);
        }
        Ok(Self(octets))
    }
}

/// Error returned when parsing a malformed device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid device address (expected AA:BB:CC:DD:EE:FF)")]
pub struct AddrParseError;

impl TryFrom<String> for RemoteAddr {
    type Error = AddrParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RemoteAddr> for String {
    fn from(addr: RemoteAddr) -> Self {
        addr.to_string()
    }
}

/// The two protocol channels carried to the accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Primary channel carrying the proprietary control protocol.
    Control,
    /// Secondary channel carrying the minimal read/write/notify protocol.
    Attribute,
}

impl ChannelKind {
    /// Short identifier for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Attribute => "attribute",
        }
    }
}

/// Read half of a secure channel. Exactly one reader owns the cursor.
#[async_trait]
pub trait ChannelReader: Send {
    /// Reads up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` only at end-of-stream; the channel contract
    /// guarantees no empty reads on a live connection.
    async fn read(&mut self, buf: &mut [u8]) -> LinkResult<usize>;
}

/// Write half of a secure channel.
#[async_trait]
pub trait ChannelWriter: Send {
    /// Writes one complete frame.
    async fn write(&mut self, frame: &[u8]) -> LinkResult<()>;

    /// Closes the channel, forcing any blocked read on the other half to
    /// fail. Idempotent.
    async fn close(&mut self) -> LinkResult<()>;
}

/// A connected, authenticated channel to the accessory.
pub trait SecureChannel: Send {
    /// Splits the channel into its read and write halves.
    ///
    /// The read loop takes exclusive ownership of the reader; the writer is
    /// shared behind a lock for `write()` and teardown.
    fn split(self: Box<Self>) -> (Box<dyn ChannelReader>, Box<dyn ChannelWriter>);
}

/// Capability for constructing secure channels.
///
/// Supplied by a platform adapter; the core never depends on how the
/// channel was actually obtained (native RFCOMM/L2CAP sockets, a TCP
/// development bridge, or an in-memory pair in tests).
#[async_trait]
pub trait SecureChannelFactory: Send + Sync {
    /// Opens a channel of the given kind to the remote.
    async fn open(&self, remote: RemoteAddr, kind: ChannelKind)
        -> LinkResult<Box<dyn SecureChannel>>;
}

/// Adapts any async byte stream to [`SecureChannel`].
pub struct StreamChannel<T> {
    io: T,
}

impl<T> StreamChannel<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wraps a connected stream.
    pub fn new(io: T) -> Self {
        Self { io }
    }
}

impl<T> SecureChannel for StreamChannel<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn split(self: Box<Self>) -> (Box<dyn ChannelReader>, Box<dyn ChannelWriter>) {
        let (read_half, write_half) = tokio::io::split(self.io);
        (
            Box::new(StreamReader { inner: read_half }),
            Box::new(StreamWriter {
                inner: write_half,
                closed: false,
            }),
        )
    }
}

struct StreamReader<T> {
    inner: ReadHalf<T>,
}

#[async_trait]
impl<T> ChannelReader for StreamReader<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn read(&mut self, buf: &mut [u8]) -> LinkResult<usize> {
        let n = self.inner.read(buf).await?;
        Ok(n)
    }
}

struct StreamWriter<T> {
    inner: WriteHalf<T>,
    closed: bool,
}

#[async_trait]
impl<T> ChannelWriter for StreamWriter<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn write(&mut self, frame: &[u8]) -> LinkResult<()> {
        if self.closed {
            return Err(LinkError::TransportUnavailable("channel closed".into()));
        }
        self.inner.write_all(frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> LinkResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Creates a connected in-memory channel pair.
///
/// One side behaves as the accessory, the other as the local controller.
/// Used by tests and the link simulator; production adapters construct
/// channels from real sockets instead.
#[must_use]
pub fn duplex_pair() -> (
    Box<dyn SecureChannel>,
    Box<dyn SecureChannel>,
) {
    let (a, b) = tokio::io::duplex(crate::protocol_constants::READ_BUFFER_SIZE * 4);
    (
        Box::new(StreamChannel::new(a)),
        Box::new(StreamChannel::new(b)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_roundtrips_through_display() {
        let addr = RemoteAddr::new([0xAA, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F]);
        assert_eq!(addr.to_string(), "AA:1B:2C:3D:4E:5F");
        assert_eq!("AA:1B:2C:3D:4E:5F".parse::<RemoteAddr>().unwrap(), addr);
    }

    #[test]
    fn addr_rejects_malformed_input() {
        assert!("AA:BB:CC".parse::<RemoteAddr>().is_err());
        assert!("AA:BB:CC:DD:EE:FF:00".parse::<RemoteAddr>().is_err());
        assert!("AA:BB:CC:DD:EE:GG".parse::<RemoteAddr>().is_err());
        assert!("AABBCCDDEEFF".parse::<RemoteAddr>().is_err());
    }

    #[tokio::test]
    async fn duplex_pair_carries_frames_both_ways() {
        let (local, remote) = duplex_pair();
        let (mut local_rx, mut local_tx) = local.split();
        let (mut remote_rx, mut remote_tx) = remote.split();

        local_tx.write(&[1, 2, 3]).await.unwrap();
        let mut buf = [0u8; 16];
        let n = remote_rx.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);

        remote_tx.write(&[9]).await.unwrap();
        let n = local_rx.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[9]);
    }

    #[tokio::test]
    async fn close_forces_eof_on_peer_reader() {
        let (local, remote) = duplex_pair();
        let (_local_rx, mut local_tx) = local.split();
        let (mut remote_rx, _remote_tx) = remote.split();

        local_tx.close().await.unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(remote_rx.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (local, _remote) = duplex_pair();
        let (_rx, mut tx) = local.split();
        tx.close().await.unwrap();
        assert!(tx.write(&[1]).await.is_err());
    }
}
