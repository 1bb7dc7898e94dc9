//! Per-psm channel lifecycle.
//!
//! A [`ChannelSession`] owns at most one open channel. Request threads call
//! [`connect`](ChannelSession::connect), [`disconnect`](ChannelSession::disconnect)
//! and [`send_packet`](ChannelSession::send_packet), which block on the
//! session's [`WaitCell`] or a [`handoff`]. The `on_*` methods run on the
//! dispatcher and are the only place a channel is stored or cleared.
//!
//! # State machine
//!
//! ```text
//!            connect                 on_open
//!   Idle ─────────────▶ Connecting ───────────▶ Open
//!    ▲   on_connect_fail    │                     │ disconnect
//!    ├──────────────────────┘                     ▼
//!    └────────────────── on_close ─────────── Closing
//! ```
//!
//! `on_close` from `Open` (peer-initiated) also lands in `Idle`; an incoming
//! channel can move `Idle` straight to `Open`.
//!
//! # Locking
//!
//! The slot mutex guards the channel and its registrations. The state cell
//! is updated only while the slot mutex is held, so a waiter woken into
//! `Open` always finds the channel stored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ---

use l2bridge_domain::{
    // ---
    ChannelConfig,
    ChannelPtr,
    ConnectionClosed,
    ConnectionFailure,
    ConnectionOpened,
    EnqueueCallback,
    ErrorCode,
    InboundPacket,
    PeerAddress,
    Psm,
    Registration,
    RetransmissionMode,
};

// ---

use crate::facade::Hub;
use crate::sync::{handoff, HandoffTx, WaitCell, WaitOutcome};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    // ---
    Idle,
    Connecting,
    Open,
    /// Close requested; the channel stays usable until the close callback.
    Closing,
}

impl SessionState {
    /// A channel handle is present.
    pub fn has_channel(self) -> bool {
        matches!(self, Self::Open | Self::Closing)
    }
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// An open channel together with the registrations made on it.
struct LiveChannel {
    // ---
    channel: ChannelPtr,
    peer: PeerAddress,
    /// Inbound delivery is active for exactly as long as the channel is held.
    inbound: Registration,
    /// Outstanding send, if any.
    pending_send: Option<Registration>,
}

impl LiveChannel {
    /// Tear down every registration and hand back the channel.
    fn release(self) -> (ChannelPtr, PeerAddress) {
        // ---
        let LiveChannel {
            channel,
            peer,
            inbound,
            pending_send,
        } = self;

        channel.unregister_dequeue(inbound);
        if let Some(reg) = pending_send {
            channel.unregister_enqueue(reg);
        }
        (channel, peer)
    }
}

// ---

enum Slot {
    // ---
    Idle,
    Connecting,
    Open(LiveChannel),
    Closing(LiveChannel),
}

impl Slot {
    // ---
    fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::Connecting => SessionState::Connecting,
            Self::Open(_) => SessionState::Open,
            Self::Closing(_) => SessionState::Closing,
        }
    }

    fn live(&self) -> Option<&LiveChannel> {
        match self {
            Self::Open(live) | Self::Closing(live) => Some(live),
            Self::Idle | Self::Connecting => None,
        }
    }

    fn live_mut(&mut self) -> Option<&mut LiveChannel> {
        match self {
            Self::Open(live) | Self::Closing(live) => Some(live),
            Self::Idle | Self::Connecting => None,
        }
    }

    /// Leaves `Idle` behind when a channel was present.
    fn take_live(&mut self) -> Option<LiveChannel> {
        // ---
        if self.live().is_none() {
            return None;
        }
        match std::mem::replace(self, Self::Idle) {
            Self::Open(live) | Self::Closing(live) => Some(live),
            Self::Idle | Self::Connecting => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelSession
// ---------------------------------------------------------------------------

pub struct ChannelSession {
    // ---
    psm: Psm,
    mode: RetransmissionMode,
    slot: Mutex<Slot>,
    state: WaitCell<SessionState>,
}

impl ChannelSession {
    // ---
    pub(crate) fn new(psm: Psm, mode: RetransmissionMode) -> Self {
        Self {
            psm,
            mode,
            slot: Mutex::new(Slot::Idle),
            state: WaitCell::new(SessionState::Idle),
        }
    }

    pub fn psm(&self) -> Psm {
        self.psm
    }

    pub fn mode(&self) -> RetransmissionMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.lock_slot().state()
    }

    /// Peer of the held channel.
    pub fn peer(&self) -> Option<PeerAddress> {
        self.lock_slot().live().map(|live| live.peer)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(psm = %self.psm, "session lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Move to `next` and wake waiters. Caller holds the slot lock.
    fn transition(&self, slot: &mut Slot, next: Slot) {
        // ---
        let from = slot.state();
        *slot = next;
        let to = slot.state();
        if from != to {
            tracing::debug!(psm = %self.psm, ?from, ?to, "session transition");
        }
        self.state.set(to);
    }

    fn wait_for_channel(&self, hub: &Hub) -> WaitOutcome {
        self.state
            .wait_until(&hub.rt, hub.config.channel_wait, |s| s.has_channel())
    }

    // -----------------------------------------------------------------------
    // Request side
    // -----------------------------------------------------------------------

    /// Ask the manager for a channel to `address` and wait for it to open.
    pub(crate) fn connect(&self, hub: &Arc<Hub>, address: PeerAddress) -> WaitOutcome {
        // ---
        {
            let mut slot = self.lock_slot();
            if slot.live().is_some() {
                tracing::debug!(psm = %self.psm, peer = %address, "channel already open");
                return WaitOutcome::Signaled;
            }
            if matches!(*slot, Slot::Connecting) {
                drop(slot);
                tracing::debug!(psm = %self.psm, peer = %address, "connect already pending");
                return self.wait_for_channel(hub);
            }
            self.transition(&mut slot, Slot::Connecting);
        }

        tracing::info!(psm = %self.psm, peer = %address, mode = ?self.mode, "connecting");
        hub.manager.connect_channel(
            address,
            ChannelConfig::new(self.mode),
            self.psm,
            hub.open_callback(self.psm),
            hub.connect_fail_callback(self.psm),
            &hub.dispatcher,
        );

        let outcome = self.wait_for_channel(hub);
        if !outcome.is_signaled() {
            tracing::warn!(psm = %self.psm, peer = %address, ?outcome, "channel did not open");
        }
        outcome
    }

    // ---

    /// Request close of the held channel, waiting for one to appear first.
    ///
    /// Returns once the close is requested; the channel is released later by
    /// the close callback.
    pub(crate) fn disconnect(&self, hub: &Hub) -> WaitOutcome {
        // ---
        let outcome = self.wait_for_channel(hub);
        if !outcome.is_signaled() {
            tracing::warn!(psm = %self.psm, ?outcome, "no channel to close");
            return outcome;
        }

        let mut guard = self.lock_slot();
        let slot = &mut *guard;
        match std::mem::replace(slot, Slot::Idle) {
            Slot::Open(live) => {
                tracing::info!(psm = %self.psm, peer = %live.peer, "closing channel");
                live.channel.close();
                self.transition(slot, Slot::Closing(live));
            }
            Slot::Closing(live) => {
                tracing::debug!(psm = %self.psm, "close already requested");
                *slot = Slot::Closing(live);
            }
            // Closed by the peer between the wake-up and the lock.
            other => *slot = other,
        }
        WaitOutcome::Signaled
    }

    // ---

    /// Hand `packet` to the outbound queue.
    ///
    /// `true` once the enqueue callback has taken the frame; `false` if no
    /// channel appeared, a send is already in flight, or the queue did not
    /// become ready within the send bound.
    pub(crate) fn send_packet(&self, hub: &Arc<Hub>, packet: Vec<u8>) -> bool {
        // ---
        if !self.wait_for_channel(hub).is_signaled() {
            tracing::warn!(psm = %self.psm, "channel is not open");
            return false;
        }

        let bytes = packet.len();
        let (done_tx, done_rx) = handoff();
        {
            let mut slot = self.lock_slot();
            let Some(live) = slot.live_mut() else {
                tracing::warn!(psm = %self.psm, "channel closed before send");
                return false;
            };
            if live.pending_send.is_some() {
                tracing::warn!(psm = %self.psm, "send already in flight");
                return false;
            }

            let on_ready = hub.enqueue_callback(self.psm, packet, done_tx);
            live.pending_send = Some(live.channel.register_enqueue(&hub.dispatcher, on_ready));
        }

        let outcome = done_rx.wait(&hub.rt, hub.config.send_wait);
        if outcome.is_signaled() {
            tracing::trace!(psm = %self.psm, bytes, "packet enqueued");
            return true;
        }

        tracing::error!(psm = %self.psm, bytes, ?outcome, "can't send packet");
        self.withdraw_send();
        false
    }

    /// Drop an outstanding enqueue registration, if it is still outstanding.
    fn withdraw_send(&self) {
        // ---
        let mut slot = self.lock_slot();
        if let Some(live) = slot.live_mut() {
            if let Some(reg) = live.pending_send.take() {
                live.channel.unregister_enqueue(reg);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatcher side
    // -----------------------------------------------------------------------

    pub(crate) fn on_open(&self, hub: &Arc<Hub>, channel: ChannelPtr) {
        // ---
        debug_assert!(hub.dispatcher.is_current(), "on_open off the dispatcher");
        let peer = channel.peer();
        let mut slot = self.lock_slot();

        if slot.live().is_some() {
            tracing::warn!(psm = %self.psm, peer = %peer, "second channel refused");
            channel.close();
            return;
        }

        hub.relays.opened.publish(ConnectionOpened { remote: peer });

        channel.register_on_close(&hub.dispatcher, hub.close_callback(self.psm));
        let inbound = channel.register_dequeue(&hub.dispatcher, hub.dequeue_callback(self.psm));
        self.transition(
            &mut slot,
            Slot::Open(LiveChannel {
                channel,
                peer,
                inbound,
                pending_send: None,
            }),
        );
        tracing::info!(psm = %self.psm, peer = %peer, "channel open");
    }

    // ---

    pub(crate) fn on_close(&self, hub: &Hub, reason: ErrorCode) {
        // ---
        debug_assert!(hub.dispatcher.is_current(), "on_close off the dispatcher");
        let mut slot = self.lock_slot();
        let Some(live) = slot.take_live() else {
            tracing::warn!(psm = %self.psm, ?reason, "close for a channel not held");
            return;
        };

        let (channel, peer) = live.release();
        hub.relays.closed.publish(ConnectionClosed {
            remote: peer,
            reason: reason.into(),
        });
        self.transition(&mut slot, Slot::Idle);
        drop(channel);

        tracing::info!(psm = %self.psm, peer = %peer, reason = reason.0, "channel closed");
    }

    // ---

    pub(crate) fn on_incoming_packet(&self, hub: &Hub) {
        // ---
        let packet = self
            .lock_slot()
            .live()
            .and_then(|live| live.channel.try_dequeue());

        match packet {
            Some(payload) => {
                tracing::trace!(psm = %self.psm, bytes = payload.len(), "inbound packet");
                hub.relays.data.publish(InboundPacket { payload });
            }
            None => tracing::trace!(psm = %self.psm, "inbound notification without data"),
        }
    }

    // ---

    /// Connect failures only log and reset; the waiting `connect` runs out
    /// its bound.
    pub(crate) fn on_connect_fail(&self, failure: ConnectionFailure) {
        // ---
        tracing::warn!(psm = %self.psm, ?failure, "connect failed");
        let mut slot = self.lock_slot();
        if matches!(*slot, Slot::Connecting) {
            self.transition(&mut slot, Slot::Idle);
        }
    }

    // ---

    /// Enqueue-ready for the send registered by [`send_packet`](Self::send_packet).
    ///
    /// Yields the frame only while that send is still outstanding and its
    /// caller is still waiting; a send that already reported failure gets
    /// nothing.
    pub(crate) fn on_enqueue_ready(&self, packet: Vec<u8>, done: HandoffTx) -> Option<Vec<u8>> {
        // ---
        let mut slot = self.lock_slot();
        let live = slot.live_mut()?;
        let reg = live.pending_send.take()?;
        live.channel.unregister_enqueue(reg);

        if !done.complete() {
            tracing::debug!(psm = %self.psm, "sender gave up, frame withheld");
            return None;
        }
        Some(packet)
    }
}

// ---

impl Drop for ChannelSession {
    fn drop(&mut self) {
        // ---
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(live) = slot.take_live() {
            tracing::debug!(psm = %self.psm, peer = %live.peer, "session dropped with open channel");
            drop(live.release());
        }
    }
}

// ---

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("psm", &self.psm)
            .field("mode", &self.mode)
            .field("state", &self.state.get())
            .finish()
    }
}

/// Builds the enqueue callback for one send. The frame is handed over at most
/// once.
pub(crate) fn one_shot_enqueue<F>(packet: Vec<u8>, done: HandoffTx, mut deliver: F) -> EnqueueCallback
where
    F: FnMut(Vec<u8>, HandoffTx) -> Option<Vec<u8>> + Send + 'static,
{
    // ---
    let mut job = Some((packet, done));
    Box::new(move || {
        let (packet, done) = job.take()?;
        deliver(packet, done)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
