//! End-to-end facade scenarios against the channel simulator.
//!
//! Each test builds its own multi-thread runtime and drives the facade from
//! plain threads, the way a remote-call transport would.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;

use l2bridge_domain::{
    ChannelManager, ConnectionClosed, ConnectionFailure, ConnectionOpened, Dispatcher, ErrorCode,
    InboundPacket, PeerAddress, Psm, RetransmissionMode,
};
use l2bridge_facade::{
    CancellationToken, ClassicFacade, ClassicFacadeSyncHandler, DynamicChannelPacket, FacadeConfig,
    FacadeError, OpenChannelRequest, SessionState, SetEnableDynamicChannelRequest, StatusCode,
};
use l2bridge_sim::{SimChannelManager, SimConfig};

// ---

const PEER: PeerAddress = PeerAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
const OTHER_PEER: PeerAddress = PeerAddress::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
const PSM: Psm = Psm::new(42);
const EVENT_WAIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Field order is drop order: the facade goes before the runtime it blocks on.
struct Harness {
    // ---
    facade: ClassicFacade,
    sim: Arc<SimChannelManager>,
    _rt: Runtime,
}

fn harness(sim_config: SimConfig, config: FacadeConfig) -> Harness {
    // ---
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let dispatcher = Dispatcher::spawn("facade-test-dispatch").unwrap();
    let sim = SimChannelManager::new(sim_config);
    let manager: Arc<dyn ChannelManager> = sim.clone();
    let facade = ClassicFacade::new(manager, dispatcher, rt.handle().clone(), config);

    Harness {
        facade,
        sim,
        _rt: rt,
    }
}

fn fast_config() -> FacadeConfig {
    FacadeConfig::default().with_channel_wait(Duration::from_millis(200))
}

/// Poll `cond` until it holds or `timeout` elapses.
fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    // ---
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Open `PSM` to `PEER` on a manual simulator: the open runs on a helper
/// thread while this thread completes the pending connect.
fn open_manually(h: &Harness) -> (l2bridge_sim::SimChannelControl, Duration) {
    // ---
    thread::scope(|s| {
        let opener = s.spawn(|| {
            let start = Instant::now();
            h.facade.open_channel(PSM, PEER).unwrap();
            start.elapsed()
        });

        assert!(h.sim.wait_for_pending_connect(PSM, EVENT_WAIT));
        let control = h.sim.complete_connect(PSM).unwrap();
        (control, opener.join().unwrap())
    })
}

// ---------------------------------------------------------------------------
// Full scenario
// ---------------------------------------------------------------------------

#[test]
fn register_open_send_receive_close() {
    // ---
    let h = harness(SimConfig::manual(), FacadeConfig::default());
    let cancel = CancellationToken::new();
    let mut opened = h.facade.fetch_connection_opened(cancel.clone()).unwrap();
    let mut closed = h.facade.fetch_connection_closed(cancel.clone()).unwrap();
    let mut data = h.facade.fetch_inbound_data(cancel.clone()).unwrap();

    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();

    let (control, _) = open_manually(&h);
    assert_eq!(
        opened.next_timeout(EVENT_WAIT),
        Some(ConnectionOpened { remote: PEER })
    );
    assert_eq!(h.facade.session_state(PSM), Some(SessionState::Open));

    h.facade.send_packet(PSM, vec![1, 2, 3]).unwrap();
    assert_eq!(control.recv_sent(EVENT_WAIT), Some(vec![1, 2, 3]));

    assert!(control.deliver(vec![0x10, 0x20]));
    assert_eq!(
        data.next_timeout(EVENT_WAIT),
        Some(InboundPacket {
            payload: vec![0x10, 0x20]
        })
    );

    h.facade.close_channel(PSM).unwrap();
    assert!(control.close_requested());
    assert_eq!(h.facade.session_state(PSM), Some(SessionState::Closing));

    assert!(control.close_from_remote(ErrorCode(5)));
    assert_eq!(
        closed.next_timeout(EVENT_WAIT),
        Some(ConnectionClosed {
            remote: PEER,
            reason: 5
        })
    );
    assert_eq!(h.facade.session_state(PSM), Some(SessionState::Idle));
    assert!(!control.dequeue_registered());

    assert_eq!(opened.try_next(), None);
    assert_eq!(closed.try_next(), None);
    assert_eq!(data.try_next(), None);
}

// ---------------------------------------------------------------------------
// Open
// ---------------------------------------------------------------------------

#[test]
fn open_returns_as_soon_as_the_channel_opens() {
    // ---
    let h = harness(SimConfig::manual(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    let mut opened = h.facade.fetch_connection_opened(CancellationToken::new()).unwrap();

    thread::sleep(Duration::from_millis(20));
    let (_control, elapsed) = open_manually(&h);

    assert!(elapsed < Duration::from_secs(1), "open waited {elapsed:?}");
    assert_eq!(
        opened.next_timeout(EVENT_WAIT),
        Some(ConnectionOpened { remote: PEER })
    );
    assert_eq!(opened.try_next(), None, "exactly one opened event");
}

#[test]
fn open_while_open_issues_no_second_connect() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();

    h.facade.open_channel(PSM, PEER).unwrap();
    h.facade.open_channel(PSM, PEER).unwrap();

    assert_eq!(h.sim.connect_requests().len(), 1);
}

#[test]
fn concurrent_opens_share_one_pending_connect() {
    // ---
    let h = harness(SimConfig::manual(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();

    thread::scope(|s| {
        let first = s.spawn(|| h.facade.open_channel(PSM, PEER));
        assert!(h.sim.wait_for_pending_connect(PSM, EVENT_WAIT));
        assert_eq!(h.facade.session_state(PSM), Some(SessionState::Connecting));

        let second = s.spawn(|| h.facade.open_channel(PSM, PEER));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(h.sim.pending_connects(PSM), 1);

        h.sim.complete_connect(PSM).unwrap();
        first.join().unwrap().unwrap();
        second.join().unwrap().unwrap();
    });

    assert_eq!(h.sim.connect_requests().len(), 1);
    assert_eq!(h.facade.session_state(PSM), Some(SessionState::Open));
}

#[test]
fn mode_reaches_the_channel_manager_unchanged() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    h.facade
        .register_service(PSM, RetransmissionMode::EnhancedRetransmission)
        .unwrap();
    h.facade.open_channel(PSM, PEER).unwrap();

    assert_eq!(
        h.sim.registered_config(PSM).map(|c| c.mode),
        Some(RetransmissionMode::EnhancedRetransmission)
    );
    let requests = h.sim.connect_requests();
    let request = &requests[0];
    assert_eq!(request.address, PEER);
    assert_eq!(request.config.mode, RetransmissionMode::EnhancedRetransmission);
}

#[test]
fn failed_connect_is_logged_and_runs_out_the_bound() {
    // ---
    let h = harness(SimConfig::manual(), fast_config());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    let mut opened = h.facade.fetch_connection_opened(CancellationToken::new()).unwrap();

    let result = thread::scope(|s| {
        let opener = s.spawn(|| h.facade.open_channel(PSM, PEER));
        assert!(h.sim.wait_for_pending_connect(PSM, EVENT_WAIT));
        let failure = ConnectionFailure::HciError(ErrorCode::CONNECTION_TIMEOUT);
        assert!(h.sim.fail_connect(PSM, failure));
        opener.join().unwrap()
    });

    assert_eq!(result, Ok(()));
    assert_eq!(h.facade.session_state(PSM), Some(SessionState::Idle));
    assert_eq!(opened.try_next(), None);
}

#[test]
fn strict_timeouts_surface_open_and_close_failures() {
    // ---
    let h = harness(SimConfig::manual(), fast_config().with_strict_timeouts(true));
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();

    let err = h.facade.open_channel(PSM, PEER).unwrap_err();
    assert_eq!(err, FacadeError::OpenTimedOut(PSM));
    assert_eq!(err.code(), StatusCode::DeadlineExceeded);

    assert_eq!(
        h.facade.close_channel(PSM),
        Err(FacadeError::CloseTimedOut(PSM))
    );
}

#[test]
fn incoming_channel_opens_a_registered_service() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    let mut opened = h.facade.fetch_connection_opened(CancellationToken::new()).unwrap();

    // Let the registration land before the peer connects.
    thread::sleep(Duration::from_millis(20));
    h.sim.accept_incoming(PSM, OTHER_PEER).unwrap();

    assert_eq!(
        opened.next_timeout(EVENT_WAIT),
        Some(ConnectionOpened { remote: OTHER_PEER })
    );
    assert!(eventually(EVENT_WAIT, || {
        h.facade.session_state(PSM) == Some(SessionState::Open)
    }));
}

#[test]
fn second_channel_on_an_open_session_is_refused() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    let mut opened = h.facade.fetch_connection_opened(CancellationToken::new()).unwrap();

    h.facade.open_channel(PSM, PEER).unwrap();
    let first = h.sim.channel(PSM).unwrap();
    let second = h.sim.accept_incoming(PSM, OTHER_PEER).unwrap();

    assert!(eventually(EVENT_WAIT, || second.is_closed()));
    assert!(!first.is_closed());
    assert_eq!(
        opened.next_timeout(EVENT_WAIT),
        Some(ConnectionOpened { remote: PEER })
    );
    assert_eq!(opened.next_timeout(Duration::from_millis(100)), None);
    assert_eq!(h.facade.session_state(PSM), Some(SessionState::Open));
}

// ---------------------------------------------------------------------------
// Send
// ---------------------------------------------------------------------------

#[test]
fn send_before_open_waits_for_the_bound_then_fails() {
    // ---
    let h = harness(SimConfig::manual(), fast_config());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();

    let start = Instant::now();
    let err = h.facade.send_packet(PSM, vec![1]).unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err, FacadeError::ChannelNotOpen(PSM));
    assert!(err.is_precondition_failure());
    assert!(elapsed >= Duration::from_millis(180), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "gave up late: {elapsed:?}");
}

#[test]
fn send_before_open_fails_at_once_with_zero_bound() {
    // ---
    let h = harness(
        SimConfig::manual(),
        FacadeConfig::default().with_channel_wait(Duration::ZERO),
    );
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();

    let start = Instant::now();
    assert_eq!(
        h.facade.send_packet(PSM, vec![1]),
        Err(FacadeError::ChannelNotOpen(PSM))
    );
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn send_delivers_identical_bytes() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    h.facade.open_channel(PSM, PEER).unwrap();
    let control = h.sim.channel(PSM).unwrap();

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    h.facade.send_packet(PSM, payload.clone()).unwrap();
    h.facade.send_packet(PSM, Vec::new()).unwrap();

    assert_eq!(control.recv_sent(EVENT_WAIT), Some(payload));
    assert_eq!(control.recv_sent(EVENT_WAIT), Some(Vec::new()));
    assert!(!control.enqueue_registered());
}

#[test]
fn stalled_send_fails_near_the_bound_and_is_never_emitted() {
    // ---
    let h = harness(SimConfig::stalled_outbound(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    h.facade.open_channel(PSM, PEER).unwrap();
    let control = h.sim.channel(PSM).unwrap();

    let start = Instant::now();
    let result = h.facade.send_packet(PSM, vec![9, 9, 9]);
    let elapsed = start.elapsed();

    assert_eq!(result, Err(FacadeError::ChannelNotOpen(PSM)));
    assert!(elapsed >= Duration::from_millis(450), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "gave up late: {elapsed:?}");
    assert!(!control.enqueue_registered(), "registration withdrawn");

    control.set_enqueue_ready(true);
    assert_eq!(control.recv_sent(Duration::from_millis(200)), None);
}

#[test]
fn concurrent_send_on_one_session_is_rejected() {
    // ---
    let h = harness(SimConfig::stalled_outbound(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    h.facade.open_channel(PSM, PEER).unwrap();
    let control = h.sim.channel(PSM).unwrap();

    thread::scope(|s| {
        let first = s.spawn(|| h.facade.send_packet(PSM, vec![1]));
        assert!(eventually(EVENT_WAIT, || control.enqueue_registered()));

        let start = Instant::now();
        assert_eq!(
            h.facade.send_packet(PSM, vec![2]),
            Err(FacadeError::ChannelNotOpen(PSM))
        );
        assert!(start.elapsed() < Duration::from_millis(200));

        control.set_enqueue_ready(true);
        assert_eq!(first.join().unwrap(), Ok(()));
    });
    assert_eq!(control.recv_sent(EVENT_WAIT), Some(vec![1]));
}

#[test]
fn close_during_pending_send_fails_the_send_early() {
    // ---
    let config = FacadeConfig::default().with_send_wait(Duration::from_secs(2));
    let h = harness(SimConfig::stalled_outbound(), config);
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    h.facade.open_channel(PSM, PEER).unwrap();
    let control = h.sim.channel(PSM).unwrap();

    thread::scope(|s| {
        let sender = s.spawn(|| {
            let start = Instant::now();
            (h.facade.send_packet(PSM, vec![7]), start.elapsed())
        });
        assert!(eventually(EVENT_WAIT, || control.enqueue_registered()));
        assert!(control.close_from_remote(ErrorCode::REMOTE_USER_TERMINATED_CONNECTION));

        let (result, elapsed) = sender.join().unwrap();
        assert_eq!(result, Err(FacadeError::ChannelNotOpen(PSM)));
        assert!(elapsed < Duration::from_secs(1), "send outlived the close: {elapsed:?}");
    });
}

#[test]
fn send_after_close_fails() {
    // ---
    let h = harness(SimConfig::responsive(), fast_config());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    let mut closed = h.facade.fetch_connection_closed(CancellationToken::new()).unwrap();

    h.facade.open_channel(PSM, PEER).unwrap();
    let control = h.sim.channel(PSM).unwrap();
    assert!(control.close_from_remote(ErrorCode::REMOTE_USER_TERMINATED_CONNECTION));

    assert_eq!(
        closed.next_timeout(EVENT_WAIT),
        Some(ConnectionClosed {
            remote: PEER,
            reason: 0x13
        })
    );
    assert_eq!(closed.try_next(), None, "exactly one closed event");
    assert_eq!(
        h.facade.send_packet(PSM, vec![1]),
        Err(FacadeError::ChannelNotOpen(PSM))
    );
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[test]
fn spurious_data_notification_publishes_nothing() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    let mut data = h.facade.fetch_inbound_data(CancellationToken::new()).unwrap();
    h.facade.open_channel(PSM, PEER).unwrap();
    let control = h.sim.channel(PSM).unwrap();

    control.notify_without_data();
    assert_eq!(data.next_timeout(Duration::from_millis(100)), None);

    assert!(control.deliver(vec![1]));
    assert!(control.deliver(vec![2]));
    assert_eq!(data.next_timeout(EVENT_WAIT).map(|p| p.payload), Some(vec![1]));
    assert_eq!(data.next_timeout(EVENT_WAIT).map(|p| p.payload), Some(vec![2]));
}

#[test]
fn events_from_several_sessions_interleave_in_arrival_order() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    let a = Psm::new(0x1001);
    let b = Psm::new(0x1003);
    h.facade.register_service(a, RetransmissionMode::Basic).unwrap();
    h.facade.register_service(b, RetransmissionMode::Basic).unwrap();

    h.facade.open_channel(a, PEER).unwrap();
    h.facade.open_channel(b, OTHER_PEER).unwrap();

    let remotes: Vec<PeerAddress> = h
        .facade
        .fetch_connection_opened(CancellationToken::new())
        .unwrap()
        .take(2)
        .map(|e| e.remote)
        .collect();
    assert_eq!(remotes, vec![PEER, OTHER_PEER]);
    assert_eq!(h.facade.registered(), vec![a, b]);
}

// ---------------------------------------------------------------------------
// Preconditions and streams
// ---------------------------------------------------------------------------

#[test]
fn unregistered_psm_is_a_silent_precondition_failure() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    let psm = Psm::new(7);

    for err in [
        h.facade.open_channel(psm, PEER).unwrap_err(),
        h.facade.close_channel(psm).unwrap_err(),
        h.facade.send_packet(psm, vec![1]).unwrap_err(),
    ] {
        assert_eq!(err, FacadeError::NotRegistered(psm));
        assert!(err.is_precondition_failure());
    }

    assert!(h.sim.connect_requests().is_empty());
    assert_eq!(h.facade.pending_events(), (0, 0, 0));
}

#[test]
fn re_registration_is_rejected() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();

    assert_eq!(
        h.facade.register_service(PSM, RetransmissionMode::EnhancedRetransmission),
        Err(FacadeError::AlreadyRegistered(PSM))
    );
    assert!(h.facade.is_registered(PSM));
}

#[test]
fn second_stream_is_busy_and_cancellation_ends_the_first() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    let cancel = CancellationToken::new();
    let mut first = h.facade.fetch_connection_closed(cancel.clone()).unwrap();

    assert_eq!(
        h.facade.fetch_connection_closed(CancellationToken::new()).err(),
        Some(FacadeError::StreamBusy("connection-close"))
    );

    thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });
        let start = Instant::now();
        assert_eq!(first.next(), None);
        assert!(start.elapsed() < Duration::from_secs(1));
    });

    drop(first);
    assert!(h.facade.fetch_connection_closed(CancellationToken::new()).is_ok());
}

#[test]
fn dropping_the_facade_releases_inbound_delivery() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());
    h.facade.register_service(PSM, RetransmissionMode::Basic).unwrap();
    h.facade.open_channel(PSM, PEER).unwrap();
    let control = h.sim.channel(PSM).unwrap();
    assert!(control.dequeue_registered());

    let Harness { facade, sim, _rt } = h;
    drop(facade);

    assert!(eventually(EVENT_WAIT, || !control.dequeue_registered()));
    // Late notifications find no facade and do nothing.
    assert!(control.deliver(vec![1]));
    assert!(control.close_from_remote(ErrorCode::SUCCESS));
    drop(sim);
}

// ---------------------------------------------------------------------------
// Remote-call surface
// ---------------------------------------------------------------------------

#[test]
fn wire_requests_map_failures_to_status_codes() {
    // ---
    let h = harness(SimConfig::responsive(), FacadeConfig::default());

    let status = h
        .facade
        .handle_open_channel(OpenChannelRequest {
            psm: 42,
            remote: PEER.to_string(),
        })
        .unwrap_err();
    assert_eq!(status.code, StatusCode::FailedPrecondition);
    assert_eq!(status.message, "psm not registered");

    let status = h
        .facade
        .handle_set_dynamic_channel(SetEnableDynamicChannelRequest {
            psm: 42,
            retransmission_mode: 3,
        })
        .unwrap_err();
    assert_eq!(status.code, StatusCode::InvalidArgument);

    h.facade
        .handle_set_dynamic_channel(SetEnableDynamicChannelRequest {
            psm: 42,
            retransmission_mode: 0,
        })
        .unwrap();
    let status = h
        .facade
        .handle_set_dynamic_channel(SetEnableDynamicChannelRequest {
            psm: 42,
            retransmission_mode: 0,
        })
        .unwrap_err();
    assert_eq!(status.code, StatusCode::AlreadyExists);

    let status = h
        .facade
        .handle_open_channel(OpenChannelRequest {
            psm: 42,
            remote: "AA:BB".to_string(),
        })
        .unwrap_err();
    assert_eq!(status.code, StatusCode::InvalidArgument);

    h.facade
        .handle_open_channel(OpenChannelRequest {
            psm: 42,
            remote: "aa:bb:cc:dd:ee:ff".to_string(),
        })
        .unwrap();
    h.facade
        .handle_send_dynamic_channel_packet(DynamicChannelPacket {
            psm: 42,
            payload: vec![5, 6],
        })
        .unwrap();
    assert_eq!(
        h.sim.channel(PSM).unwrap().recv_sent(EVENT_WAIT),
        Some(vec![5, 6])
    );

    let cancel = CancellationToken::new();
    let _data = h.facade.handle_fetch_l2cap_data(cancel.clone()).unwrap();
    let status = h.facade.handle_fetch_l2cap_data(cancel).err().unwrap();
    assert_eq!(status.code, StatusCode::ResourceExhausted);
}
