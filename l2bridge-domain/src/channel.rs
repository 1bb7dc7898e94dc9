use std::sync::Arc;

// ---

use super::address::PeerAddress;
use super::config::{ChannelConfig, Psm};
use super::dispatch::Dispatcher;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Controller reason code delivered with a close notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u8);

impl ErrorCode {
    pub const SUCCESS: Self = Self(0x00);
    pub const CONNECTION_TIMEOUT: Self = Self(0x08);
    pub const REMOTE_USER_TERMINATED_CONNECTION: Self = Self(0x13);
    pub const CONNECTION_TERMINATED_BY_LOCAL_HOST: Self = Self(0x16);
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        u32::from(code.0)
    }
}

// ---------------------------------------------------------------------------
// Results reported by the channel manager
// ---------------------------------------------------------------------------

/// Outcome of `register_service`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationResult {
    // ---
    Success,
    FailDuplicateService,
    FailInvalidService,
}

// ---

/// Why an outbound `connect_channel` did not produce a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    // ---
    /// No service is registered for the requested psm on this side.
    NoServiceRegistered,

    /// The underlying link could not be established.
    HciError(ErrorCode),

    /// The peer refused or failed the channel configuration.
    L2capError(u16),
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Which queue end a [`Registration`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueSide {
    // ---
    /// Upper-layer receive side (`register_dequeue`).
    Inbound,
    /// Upper-layer transmit side (`register_enqueue`).
    Outbound,
}

/// Capability token for an active queue callback registration.
///
/// Returned by [`DynamicChannel::register_dequeue`] /
/// [`DynamicChannel::register_enqueue`] and handed back, by value, to the
/// matching `unregister_*` call. Not `Clone`: one registration, one
/// unregistration.
#[must_use = "a registration must be handed back to its unregister call"]
#[derive(Debug, PartialEq, Eq)]
pub struct Registration {
    // ---
    side: QueueSide,
    id: u64,
}

impl Registration {
    // ---
    /// Mint a token. Intended for [`DynamicChannel`] implementations.
    pub fn new(side: QueueSide, id: u64) -> Self {
        Self { side, id }
    }

    pub fn side(&self) -> QueueSide {
        self.side
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

// ---------------------------------------------------------------------------
// Callback types
// ---------------------------------------------------------------------------

/// Convenience type alias for a heap-allocated [`DynamicChannel`].
pub type ChannelPtr = Box<dyn DynamicChannel>;

/// Invoked with each newly opened channel, inbound or outbound.
pub type OpenCallback = Arc<dyn Fn(ChannelPtr) + Send + Sync>;

/// Invoked once with the result of `register_service`.
pub type RegistrationCallback = Box<dyn FnOnce(RegistrationResult) + Send>;

/// Invoked once if `connect_channel` fails.
pub type ConnectFailCallback = Box<dyn FnOnce(ConnectionFailure) + Send>;

/// Invoked once when the channel closes.
pub type CloseCallback = Box<dyn FnOnce(ErrorCode) + Send>;

/// Invoked each time inbound data becomes available to `try_dequeue`.
pub type DequeueCallback = Box<dyn FnMut() + Send>;

/// Invoked each time the outbound queue can accept a frame. Returning `None`
/// enqueues nothing.
pub type EnqueueCallback = Box<dyn FnMut() -> Option<Vec<u8>> + Send>;

// ---------------------------------------------------------------------------
// DynamicChannel
// ---------------------------------------------------------------------------

/// An open, bidirectional dynamic channel owned by the upper layer.
///
/// All callbacks are delivered on the [`Dispatcher`] supplied at
/// registration. Methods take `&self`; implementations keep their own
/// interior state and must not invoke callbacks synchronously from inside
/// these calls.
pub trait DynamicChannel: Send {
    // ---
    /// Address of the remote device.
    fn peer(&self) -> PeerAddress;

    /// Request the channel be closed. Completion arrives later through the
    /// close callback.
    fn close(&self);

    /// Register the one-shot close notification.
    fn register_on_close(&self, dispatcher: &Dispatcher, on_close: CloseCallback);

    /// Start edge-triggered delivery of inbound data notifications.
    fn register_dequeue(&self, dispatcher: &Dispatcher, on_ready: DequeueCallback)
        -> Registration;

    /// Take one buffered inbound unit, if any.
    fn try_dequeue(&self) -> Option<Vec<u8>>;

    /// Stop inbound notifications.
    fn unregister_dequeue(&self, registration: Registration);

    /// Start enqueue-ready notifications on the single outbound slot.
    fn register_enqueue(&self, dispatcher: &Dispatcher, on_ready: EnqueueCallback)
        -> Registration;

    /// Stop enqueue-ready notifications.
    fn unregister_enqueue(&self, registration: Registration);
}

// ---------------------------------------------------------------------------
// ChannelManager
// ---------------------------------------------------------------------------

/// The asynchronous dynamic channel manager the facade drives.
///
/// Neither call blocks; outcomes are reported through the callbacks on
/// `dispatcher`.
pub trait ChannelManager: Send + Sync {
    // ---
    /// Listen for inbound channels on `psm`.
    fn register_service(
        &self,
        psm: Psm,
        config: ChannelConfig,
        on_registered: RegistrationCallback,
        on_open: OpenCallback,
        dispatcher: &Dispatcher,
    );

    /// Open an outbound channel to `address` on `psm`.
    fn connect_channel(
        &self,
        address: PeerAddress,
        config: ChannelConfig,
        psm: Psm,
        on_open: OpenCallback,
        on_fail: ConnectFailCallback,
        dispatcher: &Dispatcher,
    );
}
