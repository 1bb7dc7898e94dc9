//! Core types and collaborator traits for the l2bridge channel facade.
//!
//! This crate defines the vocabulary shared by the facade and by any channel
//! manager it drives (the in-process simulator, or a real stack adapter).
//!
//! # Structure
//!
//! - [`error`]    — [`AddressParseError`], [`ModeError`]
//! - [`address`]  — [`PeerAddress`]
//! - [`config`]   — [`Psm`], [`RetransmissionMode`], [`ChannelConfig`]
//! - [`channel`]  — [`ChannelManager`], [`DynamicChannel`], [`Registration`]
//! - [`dispatch`] — [`Dispatcher`], the single-threaded callback context
//! - [`event`]    — [`ConnectionOpened`], [`ConnectionClosed`], [`InboundPacket`]

mod address;
mod channel;
mod config;
mod dispatch;
mod error;
mod event;

// --- error
pub use error::{AddressParseError, ModeError};

// --- address
pub use address::PeerAddress;

// --- config
pub use config::{ChannelConfig, Psm, RetransmissionMode};

// --- channel
pub use channel::{
    // ---
    ChannelManager,
    ChannelPtr,
    CloseCallback,
    ConnectFailCallback,
    ConnectionFailure,
    DequeueCallback,
    DynamicChannel,
    EnqueueCallback,
    ErrorCode,
    OpenCallback,
    QueueSide,
    Registration,
    RegistrationCallback,
    RegistrationResult,
};

// --- dispatch
pub use dispatch::{Dispatcher, Task};

// --- event
pub use event::{ConnectionClosed, ConnectionOpened, InboundPacket};
