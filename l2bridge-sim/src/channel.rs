use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ---

use l2bridge_domain::{
    // ---
    CloseCallback,
    DequeueCallback,
    Dispatcher,
    DynamicChannel,
    EnqueueCallback,
    ErrorCode,
    PeerAddress,
    Psm,
    QueueSide,
    Registration,
};

// ---

use super::SimConfig;

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// One registered queue callback.
///
/// `cb` is `None` only while the callback is running on the dispatcher; it is
/// put back afterwards if the registration survived the call.
struct Slot<C> {
    // ---
    id: u64,
    cb: Option<C>,
    dispatcher: Dispatcher,
}

// ---------------------------------------------------------------------------
// LinkInner
// ---------------------------------------------------------------------------

struct LinkInner {
    // ---
    inbound: VecDeque<Vec<u8>>,
    dequeue: Option<Slot<DequeueCallback>>,
    enqueue: Option<Slot<EnqueueCallback>>,
    on_close: Option<(Dispatcher, CloseCallback)>,
    enqueue_ready: bool,
    close_requested: bool,
    /// `Some` once the channel is closed, holding the reason.
    closed: Option<ErrorCode>,
    /// Set once the close callback has been handed to the dispatcher.
    close_fired: bool,
    next_id: u64,
}

// ---------------------------------------------------------------------------
// SimLink
// ---------------------------------------------------------------------------

/// State shared between the upper layer's [`SimChannel`] and the test's
/// [`SimChannelControl`].
pub(crate) struct SimLink {
    // ---
    psm: Psm,
    peer: PeerAddress,
    auto_close: bool,
    local_close_reason: ErrorCode,
    inner: Mutex<LinkInner>,
    sent_tx: Mutex<mpsc::Sender<Vec<u8>>>,
    sent_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

// ---

impl SimLink {
    // ---
    pub(crate) fn new(psm: Psm, peer: PeerAddress, config: &SimConfig) -> Arc<Self> {
        // ---
        let (sent_tx, sent_rx) = mpsc::channel();
        Arc::new(Self {
            psm,
            peer,
            auto_close: config.auto_close,
            local_close_reason: config.local_close_reason,
            inner: Mutex::new(LinkInner {
                inbound: VecDeque::new(),
                dequeue: None,
                enqueue: None,
                on_close: None,
                enqueue_ready: config.enqueue_ready,
                close_requested: false,
                closed: None,
                close_fired: false,
                next_id: 1,
            }),
            sent_tx: Mutex::new(sent_tx),
            sent_rx: Mutex::new(sent_rx),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---

    /// Dispatcher body: hand one inbound notification to the upper layer.
    ///
    /// `require_data` suppresses the edge when nothing is buffered.
    fn notify_inbound(self: &Arc<Self>, id: u64, require_data: bool) {
        // ---
        let mut cb = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.closed.is_some() || (require_data && inner.inbound.is_empty()) {
                return;
            }
            match inner.dequeue.as_mut() {
                Some(slot) if slot.id == id => match slot.cb.take() {
                    Some(cb) => cb,
                    None => return,
                },
                _ => return,
            }
        };

        cb();

        if let Some(slot) = self.lock().dequeue.as_mut() {
            if slot.id == id && slot.cb.is_none() {
                slot.cb = Some(cb);
            }
        }
    }

    // ---

    /// Dispatcher body: offer the outbound slot to the upper layer.
    fn pump_outbound(self: &Arc<Self>, id: u64) {
        // ---
        let mut cb = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.closed.is_some() || !inner.enqueue_ready {
                return;
            }
            match inner.enqueue.as_mut() {
                Some(slot) if slot.id == id => match slot.cb.take() {
                    Some(cb) => cb,
                    None => return,
                },
                _ => return,
            }
        };

        let frame = cb();

        let again = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let ready = inner.enqueue_ready && inner.closed.is_none();
            match inner.enqueue.as_mut() {
                Some(slot) if slot.id == id && slot.cb.is_none() => {
                    slot.cb = Some(cb);
                    (ready && frame.is_some()).then(|| slot.dispatcher.clone())
                }
                _ => None,
            }
        };

        if let Some(frame) = frame {
            tracing::trace!(psm = %self.psm, bytes = frame.len(), "sim: frame enqueued");
            let tx = self.sent_tx.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = tx.send(frame);
        }

        // Still registered and the queue still has room: offer again.
        if let Some(dispatcher) = again {
            let link = Arc::clone(self);
            dispatcher.post(move || link.pump_outbound(id));
        }
    }

    // ---

    /// Mark the channel closed and post the close callback, once.
    fn close_with(self: &Arc<Self>, reason: ErrorCode) -> bool {
        // ---
        let fire = {
            let mut inner = self.lock();
            if inner.closed.is_some() {
                return false;
            }
            inner.closed = Some(reason);
            inner.close_fired = inner.on_close.is_some();
            inner.on_close.take()
        };

        tracing::debug!(psm = %self.psm, peer = %self.peer, reason = reason.0, "sim: channel closed");

        if let Some((dispatcher, on_close)) = fire {
            dispatcher.post(move || on_close(reason));
        }
        true
    }
}

// ---------------------------------------------------------------------------
// SimChannel
// ---------------------------------------------------------------------------

/// The upper layer's end of a simulated channel.
pub(crate) struct SimChannel {
    // ---
    link: Arc<SimLink>,
}

impl SimChannel {
    pub(crate) fn new(link: Arc<SimLink>) -> Self {
        Self { link }
    }
}

// ---

impl DynamicChannel for SimChannel {
    // ---
    fn peer(&self) -> PeerAddress {
        self.link.peer
    }

    fn close(&self) {
        // ---
        {
            let mut inner = self.link.lock();
            if inner.closed.is_some() {
                return;
            }
            inner.close_requested = true;
        }

        if self.link.auto_close {
            self.link.close_with(self.link.local_close_reason);
        }
    }

    // ---

    fn register_on_close(&self, dispatcher: &Dispatcher, on_close: CloseCallback) {
        // ---
        let mut inner = self.link.lock();
        match inner.closed {
            Some(reason) if !inner.close_fired => {
                // Closed before anyone was listening: deliver now.
                inner.close_fired = true;
                dispatcher.post(move || on_close(reason));
            }
            Some(_) => {}
            None => inner.on_close = Some((dispatcher.clone(), on_close)),
        }
    }

    // ---

    fn register_dequeue(&self, dispatcher: &Dispatcher, on_ready: DequeueCallback) -> Registration {
        // ---
        let mut inner = self.link.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        // Data buffered before registration still gets one edge per unit.
        for _ in 0..inner.inbound.len() {
            let link = Arc::clone(&self.link);
            dispatcher.post(move || link.notify_inbound(id, true));
        }

        inner.dequeue = Some(Slot {
            id,
            cb: Some(on_ready),
            dispatcher: dispatcher.clone(),
        });
        Registration::new(QueueSide::Inbound, id)
    }

    fn try_dequeue(&self) -> Option<Vec<u8>> {
        self.link.lock().inbound.pop_front()
    }

    fn unregister_dequeue(&self, registration: Registration) {
        // ---
        let mut inner = self.link.lock();
        if inner.dequeue.as_ref().map(|s| s.id) == Some(registration.id()) {
            inner.dequeue = None;
        } else {
            tracing::warn!(psm = %self.link.psm, id = registration.id(), "sim: stale dequeue registration");
        }
    }

    // ---

    fn register_enqueue(&self, dispatcher: &Dispatcher, on_ready: EnqueueCallback) -> Registration {
        // ---
        let mut inner = self.link.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        if inner.enqueue.is_some() {
            tracing::warn!(psm = %self.link.psm, "sim: enqueue callback replaced while registered");
        }
        inner.enqueue = Some(Slot {
            id,
            cb: Some(on_ready),
            dispatcher: dispatcher.clone(),
        });

        if inner.enqueue_ready && inner.closed.is_none() {
            let link = Arc::clone(&self.link);
            dispatcher.post(move || link.pump_outbound(id));
        }
        Registration::new(QueueSide::Outbound, id)
    }

    fn unregister_enqueue(&self, registration: Registration) {
        // ---
        let mut inner = self.link.lock();
        if inner.enqueue.as_ref().map(|s| s.id) == Some(registration.id()) {
            inner.enqueue = None;
        }
    }
}

// ---------------------------------------------------------------------------
// SimChannelControl
// ---------------------------------------------------------------------------

/// Test-side handle to a simulated channel: plays the remote peer.
#[derive(Clone)]
pub struct SimChannelControl {
    // ---
    link: Arc<SimLink>,
}

// ---

impl SimChannelControl {
    // ---
    pub(crate) fn new(link: Arc<SimLink>) -> Self {
        Self { link }
    }

    pub fn psm(&self) -> Psm {
        self.link.psm
    }

    pub fn peer(&self) -> PeerAddress {
        self.link.peer
    }

    // ---

    /// Queue `payload` on the inbound side and raise one data notification.
    ///
    /// Returns `false` if the channel is already closed.
    pub fn deliver(&self, payload: impl Into<Vec<u8>>) -> bool {
        // ---
        let mut inner = self.link.lock();
        if inner.closed.is_some() {
            return false;
        }
        inner.inbound.push_back(payload.into());

        if let Some(slot) = inner.dequeue.as_ref() {
            let id = slot.id;
            let link = Arc::clone(&self.link);
            slot.dispatcher.post(move || link.notify_inbound(id, true));
        }
        true
    }

    // ---

    /// Raise a data notification with nothing buffered, as a spurious edge
    /// from the lower layer would.
    pub fn notify_without_data(&self) {
        // ---
        let inner = self.link.lock();
        if let Some(slot) = inner.dequeue.as_ref() {
            let id = slot.id;
            let link = Arc::clone(&self.link);
            slot.dispatcher.post(move || link.notify_inbound(id, false));
        }
    }

    // ---

    /// Close the channel from the peer side with `reason`.
    ///
    /// Also completes a pending local close when `auto_close` is off.
    /// Returns `false` if the channel was already closed.
    pub fn close_from_remote(&self, reason: ErrorCode) -> bool {
        self.link.close_with(reason)
    }

    // ---

    /// Open or stall the outbound queue.
    pub fn set_enqueue_ready(&self, ready: bool) {
        // ---
        let mut inner = self.link.lock();
        inner.enqueue_ready = ready;

        if ready && inner.closed.is_none() {
            if let Some(slot) = inner.enqueue.as_ref() {
                let id = slot.id;
                let link = Arc::clone(&self.link);
                slot.dispatcher.post(move || link.pump_outbound(id));
            }
        }
    }

    // ---

    /// Wait up to `timeout` for the next frame the upper layer enqueued.
    pub fn recv_sent(&self, timeout: Duration) -> Option<Vec<u8>> {
        // ---
        let rx = self.link.sent_rx.lock().unwrap_or_else(PoisonError::into_inner);
        rx.recv_timeout(timeout).ok()
    }

    // ---

    pub fn is_closed(&self) -> bool {
        self.link.lock().closed.is_some()
    }

    pub fn close_requested(&self) -> bool {
        self.link.lock().close_requested
    }

    pub fn dequeue_registered(&self) -> bool {
        self.link.lock().dequeue.is_some()
    }

    pub fn enqueue_registered(&self) -> bool {
        self.link.lock().enqueue.is_some()
    }

    pub fn buffered_inbound(&self) -> usize {
        self.link.lock().inbound.len()
    }
}

// ---

impl std::fmt::Debug for SimChannelControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimChannelControl")
            .field("psm", &self.link.psm)
            .field("peer", &self.link.peer)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::mpsc;
    use std::time::Duration;

    use l2bridge_domain::{Dispatcher, DynamicChannel, ErrorCode, PeerAddress, Psm};

    use super::{SimChannel, SimChannelControl, SimLink};
    use crate::SimConfig;

    const WAIT: Duration = Duration::from_secs(1);

    fn pair(config: SimConfig) -> (SimChannel, SimChannelControl) {
        // ---
        let link = SimLink::new(Psm::new(1), PeerAddress::new([0, 1, 2, 3, 4, 5]), &config);
        (SimChannel::new(link.clone()), SimChannelControl::new(link))
    }

    // ---

    #[test]
    fn buffered_inbound_is_notified_on_registration() {
        // ---
        let dispatcher = Dispatcher::spawn("sim-test").unwrap();
        let (channel, control) = pair(SimConfig::manual());

        assert!(control.deliver(vec![1]));
        assert!(control.deliver(vec![2]));

        let (tx, rx) = mpsc::channel();
        let _reg = channel.register_dequeue(&dispatcher, Box::new(move || tx.send(()).unwrap()));

        assert!(rx.recv_timeout(WAIT).is_ok());
        assert!(rx.recv_timeout(WAIT).is_ok());
        assert_eq!(channel.try_dequeue(), Some(vec![1]));
        assert_eq!(channel.try_dequeue(), Some(vec![2]));
        assert_eq!(channel.try_dequeue(), None);
    }

    // ---

    #[test]
    fn stalled_outbound_releases_on_ready() {
        // ---
        let dispatcher = Dispatcher::spawn("sim-test").unwrap();
        let (channel, control) = pair(SimConfig::stalled_outbound());

        let mut frame = Some(vec![9, 9]);
        let _reg = channel.register_enqueue(&dispatcher, Box::new(move || frame.take()));

        assert_eq!(control.recv_sent(Duration::from_millis(100)), None);
        control.set_enqueue_ready(true);
        assert_eq!(control.recv_sent(WAIT), Some(vec![9, 9]));
    }

    // ---

    #[test]
    fn unregistered_enqueue_is_never_called() {
        // ---
        let dispatcher = Dispatcher::spawn("sim-test").unwrap();
        let (channel, control) = pair(SimConfig::stalled_outbound());

        let reg = channel.register_enqueue(&dispatcher, Box::new(|| Some(vec![1])));
        channel.unregister_enqueue(reg);
        control.set_enqueue_ready(true);

        assert!(!control.enqueue_registered());
        assert_eq!(control.recv_sent(Duration::from_millis(100)), None);
    }

    // ---

    #[test]
    fn local_close_fires_callback_once() {
        // ---
        let dispatcher = Dispatcher::spawn("sim-test").unwrap();
        let (channel, control) = pair(SimConfig::responsive());

        let (tx, rx) = mpsc::channel();
        channel.register_on_close(&dispatcher, Box::new(move |code| tx.send(code).unwrap()));

        channel.close();
        channel.close();

        assert_eq!(
            rx.recv_timeout(WAIT).ok(),
            Some(ErrorCode::CONNECTION_TERMINATED_BY_LOCAL_HOST)
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(control.is_closed());
        assert!(!control.deliver(vec![1]), "closed channel must refuse data");
    }

    // ---

    #[test]
    fn manual_close_waits_for_remote() {
        // ---
        let dispatcher = Dispatcher::spawn("sim-test").unwrap();
        let (channel, control) = pair(SimConfig::manual());

        let (tx, rx) = mpsc::channel();
        channel.register_on_close(&dispatcher, Box::new(move |code| tx.send(code).unwrap()));

        channel.close();
        assert!(control.close_requested());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        assert!(control.close_from_remote(ErrorCode(5)));
        assert_eq!(rx.recv_timeout(WAIT).ok(), Some(ErrorCode(5)));
    }
}
