use std::fmt;

use serde::Serialize;

use super::error::ModeError;

// ---------------------------------------------------------------------------
// Psm
// ---------------------------------------------------------------------------

/// Protocol/service multiplexer, the identifier a test driver registers a
/// dynamic channel service under.
///
/// Assigned externally; the facade never allocates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Psm(u16);

// ---

impl Psm {
    // ---
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl From<u16> for Psm {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for Psm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RetransmissionMode
// ---------------------------------------------------------------------------

/// Retransmission and flow control mode requested for a dynamic channel.
///
/// Opaque to the facade: it is handed to the channel manager unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetransmissionMode {
    // ---
    #[default]
    Basic,
    EnhancedRetransmission,
}

// ---

impl RetransmissionMode {
    // ---
    /// Map the wire enum value (0 = basic, 1 = enhanced retransmission).
    pub fn from_i32(value: i32) -> Result<Self, ModeError> {
        // ---
        match value {
            0 => Ok(Self::Basic),
            1 => Ok(Self::EnhancedRetransmission),
            other => Err(ModeError(other)),
        }
    }

    pub fn as_i32(self) -> i32 {
        // ---
        match self {
            Self::Basic => 0,
            Self::EnhancedRetransmission => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelConfig
// ---------------------------------------------------------------------------

/// Configuration option block passed to `register_service` and
/// `connect_channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelConfig {
    // ---
    pub mode: RetransmissionMode,
}

impl ChannelConfig {
    pub fn new(mode: RetransmissionMode) -> Self {
        Self { mode }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::{ModeError, Psm, RetransmissionMode};

    #[test]
    fn mode_wire_values() {
        // ---
        assert_eq!(RetransmissionMode::from_i32(0), Ok(RetransmissionMode::Basic));
        assert_eq!(
            RetransmissionMode::from_i32(1),
            Ok(RetransmissionMode::EnhancedRetransmission)
        );
        assert_eq!(RetransmissionMode::EnhancedRetransmission.as_i32(), 1);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        // ---
        assert_eq!(RetransmissionMode::from_i32(7), Err(ModeError(7)));
    }

    #[test]
    fn psm_displays_as_hex() {
        // ---
        assert_eq!(Psm::new(0x2a).to_string(), "0x002a");
    }
}
