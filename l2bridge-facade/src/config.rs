//! Facade wait bounds and timeout policy.

use std::time::Duration;

// ---

/// How long Open / Close / Send wait for a channel to be present.
pub const DEFAULT_CHANNEL_WAIT: Duration = Duration::from_secs(2);

/// How long Send waits for the outbound queue to accept the frame.
pub const DEFAULT_SEND_WAIT: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// FacadeConfig
// ---------------------------------------------------------------------------

/// Set once at construction; the facade never changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacadeConfig {
    // ---
    /// Bound on waiting for a channel to open (Open) or to exist at all
    /// (Close, Send). Zero checks once and gives up.
    pub channel_wait: Duration,

    /// Bound on the enqueue hand-off of a single Send.
    pub send_wait: Duration,

    /// Surface Open / Close timeouts as errors instead of only logging them.
    ///
    /// Off by default: remote drivers expect an ack and learn the outcome
    /// from the event streams.
    pub strict_timeouts: bool,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            channel_wait: DEFAULT_CHANNEL_WAIT,
            send_wait: DEFAULT_SEND_WAIT,
            strict_timeouts: false,
        }
    }
}

impl FacadeConfig {
    // ---
    pub fn with_channel_wait(mut self, wait: Duration) -> Self {
        self.channel_wait = wait;
        self
    }

    pub fn with_send_wait(mut self, wait: Duration) -> Self {
        self.send_wait = wait;
        self
    }

    pub fn with_strict_timeouts(mut self, strict: bool) -> Self {
        self.strict_timeouts = strict;
        self
    }
}
