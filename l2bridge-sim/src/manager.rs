use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ---

use l2bridge_domain::{
    // ---
    ChannelConfig,
    ChannelManager,
    ConnectFailCallback,
    ConnectionFailure,
    Dispatcher,
    OpenCallback,
    PeerAddress,
    Psm,
    RegistrationCallback,
    RegistrationResult,
};

// ---

use super::channel::SimLink;
use super::{SimChannel, SimChannelControl, SimConfig};

// ---------------------------------------------------------------------------
// ConnectRequest
// ---------------------------------------------------------------------------

/// Record of one `connect_channel` call, kept for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    // ---
    pub psm: Psm,
    pub address: PeerAddress,
    pub config: ChannelConfig,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct Service {
    // ---
    config: ChannelConfig,
    on_open: OpenCallback,
    dispatcher: Dispatcher,
}

struct PendingConnect {
    // ---
    address: PeerAddress,
    on_open: OpenCallback,
    on_fail: ConnectFailCallback,
    dispatcher: Dispatcher,
}

#[derive(Default)]
struct ManagerState {
    // ---
    services: HashMap<Psm, Service>,
    pending: HashMap<Psm, VecDeque<PendingConnect>>,
    /// Most recently opened channel per psm.
    channels: HashMap<Psm, SimChannelControl>,
    connects: Vec<ConnectRequest>,
}

// ---------------------------------------------------------------------------
// SimChannelManager
// ---------------------------------------------------------------------------

/// In-process mock channel manager. Does not touch any radio.
pub struct SimChannelManager {
    // ---
    config: SimConfig,
    state: Mutex<ManagerState>,
    /// Signalled whenever a connect becomes pending.
    connect_pending: Condvar,
}

// ---

impl SimChannelManager {
    // ---
    pub fn new(config: SimConfig) -> Arc<Self> {
        // ---
        Arc::new(Self {
            config,
            state: Mutex::new(ManagerState::default()),
            connect_pending: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---

    /// Create the channel pair and post `on_open` with the upper layer's end.
    fn open(
        &self,
        state: &mut ManagerState,
        psm: Psm,
        address: PeerAddress,
        on_open: OpenCallback,
        dispatcher: &Dispatcher,
    ) -> SimChannelControl {
        // ---
        let link = SimLink::new(psm, address, &self.config);
        let control = SimChannelControl::new(Arc::clone(&link));
        state.channels.insert(psm, control.clone());

        tracing::debug!(%psm, peer = %address, "sim: channel open");
        dispatcher.post(move || on_open(Box::new(SimChannel::new(link))));
        control
    }

    // -----------------------------------------------------------------------
    // Test hooks
    // -----------------------------------------------------------------------

    /// Complete the oldest pending connect on `psm`.
    pub fn complete_connect(&self, psm: Psm) -> Option<SimChannelControl> {
        // ---
        let mut state = self.lock();
        let pending = state.pending.get_mut(&psm)?.pop_front()?;
        Some(self.open(&mut state, psm, pending.address, pending.on_open, &pending.dispatcher))
    }

    // ---

    /// Fail the oldest pending connect on `psm`.
    pub fn fail_connect(&self, psm: Psm, failure: ConnectionFailure) -> bool {
        // ---
        let pending = match self.lock().pending.get_mut(&psm).and_then(VecDeque::pop_front) {
            Some(p) => p,
            None => return false,
        };

        tracing::debug!(%psm, peer = %pending.address, ?failure, "sim: connect failed");
        let on_fail = pending.on_fail;
        pending.dispatcher.post(move || on_fail(failure));
        true
    }

    // ---

    /// Simulate `peer` opening a channel to the service registered on `psm`.
    pub fn accept_incoming(&self, psm: Psm, peer: PeerAddress) -> Option<SimChannelControl> {
        // ---
        let mut state = self.lock();
        let (on_open, dispatcher) = {
            let service = state.services.get(&psm)?;
            (Arc::clone(&service.on_open), service.dispatcher.clone())
        };
        Some(self.open(&mut state, psm, peer, on_open, &dispatcher))
    }

    // ---

    /// Most recently opened channel on `psm`.
    pub fn channel(&self, psm: Psm) -> Option<SimChannelControl> {
        self.lock().channels.get(&psm).cloned()
    }

    /// Configuration the service on `psm` was registered with.
    pub fn registered_config(&self, psm: Psm) -> Option<ChannelConfig> {
        self.lock().services.get(&psm).map(|s| s.config)
    }

    /// Every `connect_channel` call seen so far, in order.
    pub fn connect_requests(&self) -> Vec<ConnectRequest> {
        self.lock().connects.clone()
    }

    pub fn pending_connects(&self, psm: Psm) -> usize {
        self.lock().pending.get(&psm).map_or(0, VecDeque::len)
    }

    // ---

    /// Block until a connect is pending on `psm` or `timeout` elapses.
    pub fn wait_for_pending_connect(&self, psm: Psm, timeout: Duration) -> bool {
        // ---
        let no_pending =
            |state: &mut ManagerState| state.pending.get(&psm).map_or(true, VecDeque::is_empty);
        let (_state, result) = self
            .connect_pending
            .wait_timeout_while(self.lock(), timeout, no_pending)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}

// ---

impl ChannelManager for SimChannelManager {
    // ---
    fn register_service(
        &self,
        psm: Psm,
        config: ChannelConfig,
        on_registered: RegistrationCallback,
        on_open: OpenCallback,
        dispatcher: &Dispatcher,
    ) {
        // ---
        let result = {
            let mut state = self.lock();
            if state.services.contains_key(&psm) {
                RegistrationResult::FailDuplicateService
            } else {
                state.services.insert(
                    psm,
                    Service {
                        config,
                        on_open,
                        dispatcher: dispatcher.clone(),
                    },
                );
                RegistrationResult::Success
            }
        };

        tracing::debug!(%psm, ?result, "sim: register_service");
        dispatcher.post(move || on_registered(result));
    }

    // ---

    fn connect_channel(
        &self,
        address: PeerAddress,
        config: ChannelConfig,
        psm: Psm,
        on_open: OpenCallback,
        on_fail: ConnectFailCallback,
        dispatcher: &Dispatcher,
    ) {
        // ---
        let mut state = self.lock();
        state.connects.push(ConnectRequest {
            psm,
            address,
            config,
        });

        if self.config.auto_open {
            self.open(&mut state, psm, address, on_open, dispatcher);
            return;
        }

        tracing::debug!(%psm, peer = %address, "sim: connect pending");
        state.pending.entry(psm).or_default().push_back(PendingConnect {
            address,
            on_open,
            on_fail,
            dispatcher: dispatcher.clone(),
        });
        self.connect_pending.notify_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
