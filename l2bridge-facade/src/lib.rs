//! Synchronous test-control facade over an asynchronous dynamic channel
//! manager.
//!
//! A remote test driver registers services, opens and closes channels and
//! sends packets through blocking calls, and observes lifecycle and data
//! events through three blocking streams. Underneath, every channel-manager
//! callback runs on a single [`Dispatcher`](l2bridge_domain::Dispatcher)
//! thread; blocking calls bridge to it through the primitives in [`sync`].
//!
//! # Structure
//!
//! - [`error`]       — [`FacadeError`], wire [`Status`] / [`StatusCode`]
//! - [`config`]      — [`FacadeConfig`] wait bounds
//! - [`sync`]        — [`WaitCell`], [`handoff`]
//! - [`event_relay`] — [`EventRelay`], [`RelayStream`]
//! - [`session`]     — [`ChannelSession`] state machine
//! - [`facade`]      — [`ClassicFacade`] coordinator
//! - [`service`]     — [`ClassicFacadeSyncHandler`] remote-call surface

mod config;
mod error;
mod event_relay;
mod facade;
mod registry;
mod service;
mod session;
pub mod sync;

// --- config
pub use config::{FacadeConfig, DEFAULT_CHANNEL_WAIT, DEFAULT_SEND_WAIT};

// --- error
pub use error::{FacadeError, Status, StatusCode};

// --- sync
pub use sync::{handoff, HandoffRx, HandoffTx, WaitCell, WaitOutcome};

// --- event_relay
pub use event_relay::{EventRelay, RelayStream};

// --- session
pub use session::{ChannelSession, SessionState};

// --- facade
pub use facade::ClassicFacade;

// --- service
pub use service::{
    // ---
    ClassicFacadeSyncHandler,
    CloseChannelRequest,
    DynamicChannelPacket,
    OpenChannelRequest,
    SetEnableDynamicChannelRequest,
};

// --- re-exported so callers need not depend on tokio-util directly
pub use tokio_util::sync::CancellationToken;
