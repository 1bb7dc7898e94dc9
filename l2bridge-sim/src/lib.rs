//! In-process simulated channel manager for l2bridge unit and integration
//! testing.
//!
//! [`SimChannelManager`] implements [`l2bridge_domain::ChannelManager`]
//! without any radio or transport underneath. Every callback is posted to the
//! [`l2bridge_domain::Dispatcher`] the caller supplied, exactly as a real
//! stack would deliver it. [`SimConfig`] chooses how much happens on its own:
//!
//! - Outbound connects complete immediately, or wait for a test hook
//! - Local `close()` fires the close callback, or waits for the test
//! - The outbound queue accepts frames, or stalls until released
//!
//! Tests drive the remote side through [`SimChannelControl`]: deliver inbound
//! packets, close from the peer, and observe the frames the upper layer sent.
//!
//! # Quick start
//!
//! ```rust
//! use l2bridge_sim::{SimChannelManager, SimConfig};
//!
//! let manager = SimChannelManager::new(SimConfig::manual());
//! assert!(manager.connect_requests().is_empty());
//! ```

mod channel;
mod config;
mod manager;

// --- public API
pub use channel::SimChannelControl;
pub use config::SimConfig;
pub use manager::{ConnectRequest, SimChannelManager};

pub(crate) use channel::SimChannel;
