//! Core configuration types.
//!
//! Configuration covers only named preferences: which accessory to talk
//! to and when a takeover is allowed. Protocol timings (backoff tables,
//! timeouts) are behavior, not configuration, and live in
//! [`protocol_constants`](crate::protocol_constants). Persistence of the
//! config itself stays with the embedding app.

use serde::{Deserialize, Serialize};

use crate::arbiter::{AccessoryState, TakeoverTrigger};
use crate::transport::RemoteAddr;

/// Per-trigger and per-accessory-state takeover preferences.
///
/// A takeover is only eligible when both the trigger-kind toggle and the
/// toggle for the accessory's reported state pass.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TakeoverPrefs {
    /// Allow takeover for call triggers (ringing or active).
    pub on_call: bool,
    /// Allow takeover for local media-play triggers.
    pub on_media: bool,

    /// Allow takeover while the accessory reports disconnected.
    pub when_disconnected: bool,
    /// Allow takeover while the accessory reports idle.
    pub when_idle: bool,
    /// Allow takeover while the accessory reports music on the peer.
    pub when_music: bool,
    /// Allow takeover while the accessory reports an active call.
    pub when_call: bool,
    /// Allow takeover while the accessory reports ringing.
    pub when_ringing: bool,
}

impl TakeoverPrefs {
    /// Whether the trigger-kind toggle allows `trigger`.
    ///
    /// Explicit reconnect is a user command and is always allowed.
    #[must_use]
    pub fn allows_trigger(&self, trigger: TakeoverTrigger) -> bool {
        match trigger {
            TakeoverTrigger::CallRinging | TakeoverTrigger::CallActive => self.on_call,
            TakeoverTrigger::MediaPlay => self.on_media,
            TakeoverTrigger::Reconnect => true,
        }
    }

    /// Whether the accessory-state toggle allows a takeover in `state`.
    #[must_use]
    pub fn allows_accessory_state(&self, state: AccessoryState) -> bool {
        match state {
            AccessoryState::Disconnected => self.when_disconnected,
            AccessoryState::Idle => self.when_idle,
            AccessoryState::Music => self.when_music,
            AccessoryState::Call => self.when_call,
            AccessoryState::Ringing => self.when_ringing,
        }
    }
}

impl Default for TakeoverPrefs {
    fn default() -> Self {
        Self {
            on_call: true,
            on_media: true,
            when_disconnected: true,
            when_idle: true,
            when_music: true,
            when_call: false,
            when_ringing: false,
        }
    }
}

/// Configuration for the link core.
///
/// All fields have sensible defaults except the accessory address, which
/// must be supplied by the embedding app.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Address of the paired accessory.
    pub accessory: RemoteAddr,

    /// Address of the local adapter, used to tell a foreign audio source
    /// from our own.
    pub local_adapter: RemoteAddr,

    /// Takeover preference toggles.
    pub takeover: TakeoverPrefs,
}

impl Config {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the addresses are inconsistent.
    pub fn new(
        accessory: RemoteAddr,
        local_adapter: RemoteAddr,
        takeover: TakeoverPrefs,
    ) -> Result<Self, String> {
        let config = Self {
            accessory,
            local_adapter,
            takeover,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.accessory == self.local_adapter {
            return Err("accessory and local_adapter must be distinct addresses".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> RemoteAddr {
        RemoteAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, last])
    }

    #[test]
    fn default_prefs_allow_media_but_not_calls_in_progress() {
        let prefs = TakeoverPrefs::default();
        assert!(prefs.allows_trigger(TakeoverTrigger::MediaPlay));
        assert!(prefs.allows_accessory_state(AccessoryState::Music));
        assert!(!prefs.allows_accessory_state(AccessoryState::Call));
        assert!(!prefs.allows_accessory_state(AccessoryState::Ringing));
    }

    #[test]
    fn reconnect_trigger_is_always_allowed() {
        let prefs = TakeoverPrefs {
            on_call: false,
            on_media: false,
            ..TakeoverPrefs::default()
        };
        assert!(!prefs.allows_trigger(TakeoverTrigger::MediaPlay));
        assert!(prefs.allows_trigger(TakeoverTrigger::Reconnect));
    }

    #[test]
    fn config_rejects_identical_addresses() {
        assert!(Config::new(addr(1), addr(1), TakeoverPrefs::default()).is_err());
        assert!(Config::new(addr(1), addr(2), TakeoverPrefs::default()).is_ok());
    }
}
