//! Fixed protocol constants that should NOT be changed.
//!
//! The accessory protocol is proprietary and undocumented; the timing and
//! framing values below were observed against real devices and changing
//! them changes externally visible behavior.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Attribute sub-protocol (bit-exact wire format)
// ─────────────────────────────────────────────────────────────────────────────

/// Attribute Read Request opcode.
pub const ATT_OP_READ_REQUEST: u8 = 0x0A;

/// Attribute Write Request opcode.
pub const ATT_OP_WRITE_REQUEST: u8 = 0x12;

/// Attribute Handle-Value Notification opcode.
pub const ATT_OP_HANDLE_VALUE_NOTIFICATION: u8 = 0x1B;

/// Length of the opcode + little-endian handle header on attribute frames.
pub const ATT_HEADER_LEN: usize = 3;

/// Payload written to `handle + 1` to enable notifications for a handle.
pub const ATT_ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

// ─────────────────────────────────────────────────────────────────────────────
// Channel I/O
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed read buffer size for both channels (bytes).
///
/// The accessory never produces frames larger than this; a single read
/// yields a single protocol frame by channel contract.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Hard timeout for one connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed wait on the attribute response mailbox.
pub const ATTRIBUTE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Reconnect policy
// ─────────────────────────────────────────────────────────────────────────────

/// Backoff delay table indexed by consecutive failure count (1-based,
/// saturating at the last tier).
pub const BACKOFF_TABLE: [Duration; 5] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
    Duration::from_secs(30),
];

/// Minimum backoff for the security/permission failure class.
pub const SECURITY_BACKOFF_FLOOR: Duration = Duration::from_secs(10);

/// Window within which a second unexpected close extends the close streak.
pub const REMOTE_CLOSE_STREAK_WINDOW: Duration = Duration::from_secs(60);

/// Remaining remote-close backoff after a user-intent event (clamp, not
/// clear).
pub const USER_INTENT_BACKOFF_CLAMP: Duration = Duration::from_millis(1500);

/// Auto-reconnect suppression after a link-layer disconnect.
pub const LINK_SUPPRESSION: Duration = Duration::from_secs(6);

/// Shortened suppression when the link drop is attributed to a just-armed
/// transport-recovery cause.
pub const LINK_SUPPRESSION_RECOVERABLE: Duration = Duration::from_secs(1);

/// Minimum spacing between non-manual connect attempts.
pub const CONNECT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Grace window after a local `disconnect()` during which a read-loop exit
/// is classified as intentional rather than an unexpected remote close.
pub const LOCAL_DISCONNECT_GRACE: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Ownership arbitration
// ─────────────────────────────────────────────────────────────────────────────

/// Deferred retry delay when arbitration data is stale (ownership unknown
/// or the controller set not yet populated).
pub const TAKEOVER_RETRY_DELAY: Duration = Duration::from_millis(800);

/// Suppression window after an unsolicited ownership loss, during which
/// automatic re-acquisition is ignored.
pub const OWNERSHIP_LOSS_SUPPRESSION: Duration = Duration::from_secs(3);

/// TTL of the transport-recovery marker.
pub const TRANSPORT_RECOVERY_TTL: Duration = Duration::from_secs(15);

// ─────────────────────────────────────────────────────────────────────────────
// Control command ids (payload semantics are opaque to the core)
// ─────────────────────────────────────────────────────────────────────────────

/// Claim-ownership command id. The accessory echoes the claimed value back.
pub const CMD_CLAIM_OWNERSHIP: u8 = 0x31;

/// Media-state broadcast command id.
pub const CMD_MEDIA_STATE: u8 = 0x32;

/// Show-UI hint command id (asks the owning controller to surface a toast).
pub const CMD_SHOW_UI_HINT: u8 = 0x33;

/// Hijack-request command id.
pub const CMD_HIJACK_REQUEST: u8 = 0x34;

// ─────────────────────────────────────────────────────────────────────────────
// Eventing
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the event broadcast channel for external consumers.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
