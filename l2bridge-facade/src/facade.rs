//! Facade coordinator.
//!
//! [`ClassicFacade`] validates the psm, then delegates to the matching
//! [`ChannelSession`]. Everything the sessions and the channel-manager
//! callbacks share lives in one [`Hub`] behind an `Arc`; callbacks keep only
//! a `Weak<Hub>` plus the psm, so a callback that fires after the facade is
//! gone is a logged no-op.

use std::sync::{Arc, Weak};

// ---

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use l2bridge_domain::{
    // ---
    ChannelConfig,
    ChannelManager,
    CloseCallback,
    ConnectFailCallback,
    ConnectionClosed,
    ConnectionOpened,
    DequeueCallback,
    Dispatcher,
    EnqueueCallback,
    InboundPacket,
    OpenCallback,
    PeerAddress,
    Psm,
    RegistrationCallback,
    RegistrationResult,
    RetransmissionMode,
};

// ---

use crate::event_relay::{EventRelay, RelayStream};
use crate::registry::SessionRegistry;
use crate::session::{one_shot_enqueue, ChannelSession, SessionState};
use crate::sync::HandoffTx;
use crate::{FacadeConfig, FacadeError};

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// The three relays shared by every session.
pub(crate) struct EventRelays {
    // ---
    pub(crate) opened: EventRelay<ConnectionOpened>,
    pub(crate) closed: EventRelay<ConnectionClosed>,
    pub(crate) data: EventRelay<InboundPacket>,
}

impl EventRelays {
    fn new(rt: &Handle) -> Self {
        Self {
            opened: EventRelay::new("connection-complete", rt.clone()),
            closed: EventRelay::new("connection-close", rt.clone()),
            data: EventRelay::new("l2cap-data", rt.clone()),
        }
    }
}

// ---

/// State shared between the facade, its sessions and manager callbacks.
pub(crate) struct Hub {
    // ---
    pub(crate) manager: Arc<dyn ChannelManager>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) rt: Handle,
    pub(crate) config: FacadeConfig,
    pub(crate) registry: SessionRegistry,
    pub(crate) relays: EventRelays,
}

impl Hub {
    // ---
    /// Resolve a callback's target. `None` once the facade or the session
    /// is gone.
    fn with_session<R>(
        hub: &Weak<Hub>,
        psm: Psm,
        f: impl FnOnce(&Arc<Hub>, &ChannelSession) -> R,
    ) -> Option<R> {
        // ---
        let Some(hub) = hub.upgrade() else {
            tracing::debug!(%psm, "callback after facade shutdown ignored");
            return None;
        };
        let Some(session) = hub.registry.lookup(psm) else {
            tracing::warn!(%psm, "callback for unregistered psm ignored");
            return None;
        };
        Some(f(&hub, &session))
    }

    // ---

    pub(crate) fn registration_callback(psm: Psm) -> RegistrationCallback {
        // ---
        Box::new(move |result| match result {
            RegistrationResult::Success => tracing::debug!(%psm, "service registered"),
            failure => tracing::warn!(%psm, ?failure, "service registration failed"),
        })
    }

    pub(crate) fn open_callback(self: &Arc<Self>, psm: Psm) -> OpenCallback {
        // ---
        let hub = Arc::downgrade(self);
        Arc::new(move |channel| {
            Hub::with_session(&hub, psm, |hub, session| session.on_open(hub, channel));
        })
    }

    pub(crate) fn connect_fail_callback(self: &Arc<Self>, psm: Psm) -> ConnectFailCallback {
        // ---
        let hub = Arc::downgrade(self);
        Box::new(move |failure| {
            Hub::with_session(&hub, psm, |_, session| session.on_connect_fail(failure));
        })
    }

    pub(crate) fn close_callback(self: &Arc<Self>, psm: Psm) -> CloseCallback {
        // ---
        let hub = Arc::downgrade(self);
        Box::new(move |reason| {
            Hub::with_session(&hub, psm, |hub, session| session.on_close(hub, reason));
        })
    }

    pub(crate) fn dequeue_callback(self: &Arc<Self>, psm: Psm) -> DequeueCallback {
        // ---
        let hub = Arc::downgrade(self);
        Box::new(move || {
            Hub::with_session(&hub, psm, |hub, session| session.on_incoming_packet(hub));
        })
    }

    pub(crate) fn enqueue_callback(
        self: &Arc<Self>,
        psm: Psm,
        packet: Vec<u8>,
        done: HandoffTx,
    ) -> EnqueueCallback {
        // ---
        let hub = Arc::downgrade(self);
        one_shot_enqueue(packet, done, move |packet, done| {
            Hub::with_session(&hub, psm, |_, session| session.on_enqueue_ready(packet, done))
                .flatten()
        })
    }
}

// ---------------------------------------------------------------------------
// ClassicFacade
// ---------------------------------------------------------------------------

/// Synchronous front end over an asynchronous [`ChannelManager`].
///
/// Every method blocks the calling thread for at most the configured bounds.
/// Call from request threads or `spawn_blocking`, never from async code
/// running on `rt`.
pub struct ClassicFacade {
    // ---
    hub: Arc<Hub>,
}

impl ClassicFacade {
    // ---
    /// `rt` must belong to a multi-thread runtime; all channel-manager
    /// callbacks are delivered on `dispatcher`.
    pub fn new(
        manager: Arc<dyn ChannelManager>,
        dispatcher: Dispatcher,
        rt: Handle,
        config: FacadeConfig,
    ) -> Self {
        // ---
        let relays = EventRelays::new(&rt);
        Self {
            hub: Arc::new(Hub {
                manager,
                dispatcher,
                rt,
                config,
                registry: SessionRegistry::default(),
                relays,
            }),
        }
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.hub.config
    }

    // ---

    /// Create the session for `psm` and listen for channels on it.
    pub fn register_service(&self, psm: Psm, mode: RetransmissionMode) -> Result<(), FacadeError> {
        // ---
        self.hub
            .registry
            .insert(ChannelSession::new(psm, mode))?;

        tracing::info!(
            %psm,
            ?mode,
            services = self.hub.registry.len(),
            "registering service"
        );
        self.hub.manager.register_service(
            psm,
            ChannelConfig::new(mode),
            Hub::registration_callback(psm),
            self.hub.open_callback(psm),
            &self.hub.dispatcher,
        );
        Ok(())
    }

    // ---

    /// Open a channel to `address`. Waits for it to open; a timeout is only
    /// logged unless strict timeouts are configured.
    pub fn open_channel(&self, psm: Psm, address: PeerAddress) -> Result<(), FacadeError> {
        // ---
        let session = self.hub.registry.require(psm)?;
        let outcome = session.connect(&self.hub, address);
        if self.hub.config.strict_timeouts && !outcome.is_signaled() {
            return Err(FacadeError::OpenTimedOut(psm));
        }
        Ok(())
    }

    /// Request close of the channel on `psm`. The closed event arrives on the
    /// connection-close stream once the manager confirms.
    pub fn close_channel(&self, psm: Psm) -> Result<(), FacadeError> {
        // ---
        let session = self.hub.registry.require(psm)?;
        let outcome = session.disconnect(&self.hub);
        if self.hub.config.strict_timeouts && !outcome.is_signaled() {
            return Err(FacadeError::CloseTimedOut(psm));
        }
        Ok(())
    }

    pub fn send_packet(&self, psm: Psm, payload: Vec<u8>) -> Result<(), FacadeError> {
        // ---
        let session = self.hub.registry.require(psm)?;
        if session.send_packet(&self.hub, payload) {
            Ok(())
        } else {
            Err(FacadeError::ChannelNotOpen(psm))
        }
    }

    // ---

    pub fn fetch_connection_opened(
        &self,
        cancel: CancellationToken,
    ) -> Result<RelayStream<ConnectionOpened>, FacadeError> {
        self.hub.relays.opened.stream(cancel)
    }

    pub fn fetch_connection_closed(
        &self,
        cancel: CancellationToken,
    ) -> Result<RelayStream<ConnectionClosed>, FacadeError> {
        self.hub.relays.closed.stream(cancel)
    }

    pub fn fetch_inbound_data(
        &self,
        cancel: CancellationToken,
    ) -> Result<RelayStream<InboundPacket>, FacadeError> {
        self.hub.relays.data.stream(cancel)
    }

    // ---

    pub fn session_state(&self, psm: Psm) -> Option<SessionState> {
        self.hub.registry.lookup(psm).map(|s| s.state())
    }

    pub fn is_registered(&self, psm: Psm) -> bool {
        self.hub.registry.contains(psm)
    }

    pub fn registered(&self) -> Vec<Psm> {
        self.hub.registry.psms()
    }

    /// Events waiting on each relay, as (opened, closed, data).
    pub fn pending_events(&self) -> (usize, usize, usize) {
        let relays = &self.hub.relays;
        (
            relays.opened.pending(),
            relays.closed.pending(),
            relays.data.pending(),
        )
    }
}

impl std::fmt::Debug for ClassicFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassicFacade")
            .field("config", &self.hub.config)
            .field("registered", &self.hub.registry.psms())
            .finish()
    }
}
