use l2bridge_domain::ErrorCode;

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Behaviour switches for the simulated channel manager.
///
/// The default is a fully responsive peer: connects succeed at once, local
/// closes complete, and the outbound queue always has room.
#[derive(Debug, Clone)]
pub struct SimConfig {
    // ---
    /// Complete every `connect_channel` immediately. When `false`, connects
    /// stay pending until `complete_connect` / `fail_connect`.
    pub auto_open: bool,

    /// Fire the close callback when the upper layer calls `close()`. When
    /// `false`, the test decides via `close_from_remote`.
    pub auto_close: bool,

    /// Initial enqueue readiness of new channels. A channel that is not
    /// ready never invokes its enqueue callback until released.
    pub enqueue_ready: bool,

    /// Reason reported when an auto-close completes.
    pub local_close_reason: ErrorCode,
}

// ---

impl Default for SimConfig {
    fn default() -> Self {
        // ---
        Self {
            auto_open: true,
            auto_close: true,
            enqueue_ready: true,
            local_close_reason: ErrorCode::CONNECTION_TERMINATED_BY_LOCAL_HOST,
        }
    }
}

// ---

impl SimConfig {
    // ---
    /// Everything happens on its own.
    pub fn responsive() -> Self {
        Self::default()
    }

    // ---

    /// Nothing happens until a test hook says so; the outbound queue still
    /// accepts frames.
    pub fn manual() -> Self {
        // ---
        Self {
            auto_open: false,
            auto_close: false,
            ..Default::default()
        }
    }

    // ---

    /// Responsive peer whose outbound queue never drains.
    pub fn stalled_outbound() -> Self {
        // ---
        Self {
            enqueue_ready: false,
            ..Default::default()
        }
    }
}
