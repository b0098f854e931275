//! Control-channel command framing.
//!
//! The accessory's control protocol is proprietary; these builders only
//! capture the framing observed on the wire (byte 0 = command id, rest =
//! value). Payload semantics beyond framing stay opaque.

use bytes::Bytes;

use crate::protocol_constants::{
    CMD_CLAIM_OWNERSHIP, CMD_HIJACK_REQUEST, CMD_MEDIA_STATE, CMD_SHOW_UI_HINT,
};

/// Outbound control commands used by the takeover sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Claim (or release) exclusive audio-route ownership.
    ClaimOwnership {
        /// `true` asserts ownership to this controller.
        owned: bool,
    },
    /// Broadcast the local media-playback state to the accessory.
    MediaStateBroadcast {
        /// Whether local media is currently playing.
        playing: bool,
    },
    /// Ask the peer controller to show a "route moved" hint.
    ShowUiHint,
    /// Request the accessory drop the peer's audio link.
    HijackRequest,
}

impl ControlCommand {
    /// Wire command id (frame byte 0).
    #[must_use]
    pub const fn id(&self) -> u8 {
        match self {
            Self::ClaimOwnership { .. } => CMD_CLAIM_OWNERSHIP,
            Self::MediaStateBroadcast { .. } => CMD_MEDIA_STATE,
            Self::ShowUiHint => CMD_SHOW_UI_HINT,
            Self::HijackRequest => CMD_HIJACK_REQUEST,
        }
    }

    /// Encodes the command as a control frame.
    #[must_use]
    pub fn to_frame(&self) -> Bytes {
        match self {
            Self::ClaimOwnership { owned } => {
                Bytes::from(vec![CMD_CLAIM_OWNERSHIP, u8::from(*owned)])
            }
            Self::MediaStateBroadcast { playing } => {
                Bytes::from(vec![CMD_MEDIA_STATE, u8::from(*playing)])
            }
            Self::ShowUiHint => Bytes::from(vec![CMD_SHOW_UI_HINT]),
            Self::HijackRequest => Bytes::from(vec![CMD_HIJACK_REQUEST]),
        }
    }
}

/// Extracts the echoed ownership value from an inbound claim-ownership
/// frame, if that is what `frame` is.
#[must_use]
pub fn parse_ownership_echo(frame: &[u8]) -> Option<bool> {
    match frame {
        [id, value, ..] if *id == CMD_CLAIM_OWNERSHIP => Some(*value != 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_ownership_frame_carries_value() {
        let frame = ControlCommand::ClaimOwnership { owned: true }.to_frame();
        assert_eq!(frame.as_ref(), &[0x31, 0x01]);
        let frame = ControlCommand::ClaimOwnership { owned: false }.to_frame();
        assert_eq!(frame.as_ref(), &[0x31, 0x00]);
    }

    #[test]
    fn bare_commands_are_single_byte() {
        assert_eq!(ControlCommand::ShowUiHint.to_frame().as_ref(), &[0x33]);
        assert_eq!(ControlCommand::HijackRequest.to_frame().as_ref(), &[0x34]);
    }

    #[test]
    fn ownership_echo_parses_only_claim_frames() {
        assert_eq!(parse_ownership_echo(&[0x31, 0x01]), Some(true));
        assert_eq!(parse_ownership_echo(&[0x31, 0x00]), Some(false));
        assert_eq!(parse_ownership_echo(&[0x32, 0x01]), None);
        assert_eq!(parse_ownership_echo(&[0x31]), None);
    }
}
