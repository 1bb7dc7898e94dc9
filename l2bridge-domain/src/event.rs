use serde::Serialize;

// ---

use super::address::PeerAddress;

// ---------------------------------------------------------------------------
// Lifecycle and data events
// ---------------------------------------------------------------------------

/// A dynamic channel reached the open state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionOpened {
    // ---
    pub remote: PeerAddress,
}

// ---

/// A dynamic channel was closed, locally or by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionClosed {
    // ---
    pub remote: PeerAddress,

    /// Controller reason code reported with the close notification.
    pub reason: u32,
}

// ---

/// One inbound unit dequeued from an open channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundPacket {
    // ---
    pub payload: Vec<u8>,
}
