//! Blocking bridges from the dispatch context to request threads.
//!
//! Two primitives, both built on tokio sync types and driven through a
//! runtime [`Handle`] so a plain OS thread can wait on them with a bound:
//!
//! - [`WaitCell`] — a watched value; any number of threads wait until a
//!   predicate holds. Used for "is a channel present".
//! - [`handoff`] — a write-once / read-once completion slot. Used to turn the
//!   enqueue-ready callback into a synchronous send result.
//!
//! # Caller context
//!
//! Waiting calls [`Handle::block_on`], so it must happen on a thread that is
//! not already driving async code (a request thread, or `spawn_blocking`).
//! The runtime behind the handle must be multi-threaded so its timers advance
//! while the waiter is parked.

use std::time::Duration;

// ---

use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};

// ---------------------------------------------------------------------------
// WaitOutcome
// ---------------------------------------------------------------------------

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    // ---
    /// The awaited condition became true.
    Signaled,

    /// The bound elapsed first.
    TimedOut,

    /// The producing side went away without signaling.
    Cancelled,
}

impl WaitOutcome {
    pub fn is_signaled(self) -> bool {
        self == Self::Signaled
    }
}

// ---------------------------------------------------------------------------
// WaitCell
// ---------------------------------------------------------------------------

/// Single-producer, multi-consumer value cell with bounded waits.
pub struct WaitCell<T> {
    // ---
    tx: watch::Sender<T>,
}

// ---

impl<T> WaitCell<T>
where
    T: Clone + Send + Sync,
{
    // ---
    pub fn new(initial: T) -> Self {
        // ---
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the value and wake every waiter.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    // ---

    /// Block the calling thread until `pred` holds for the current value or
    /// `timeout` elapses.
    ///
    /// Checks the current value first, so a zero `timeout` still reports
    /// [`WaitOutcome::Signaled`] when the condition already holds.
    pub fn wait_until<F>(&self, rt: &Handle, timeout: Duration, mut pred: F) -> WaitOutcome
    where
        F: FnMut(&T) -> bool,
    {
        // ---
        if pred(&self.tx.borrow()) {
            return WaitOutcome::Signaled;
        }
        if timeout.is_zero() {
            return WaitOutcome::TimedOut;
        }

        let mut rx = self.tx.subscribe();
        rt.block_on(async move {
            match tokio::time::timeout(timeout, rx.wait_for(&mut pred)).await {
                Ok(Ok(_)) => WaitOutcome::Signaled,
                Ok(Err(_)) => WaitOutcome::Cancelled,
                Err(_) => WaitOutcome::TimedOut,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Handoff
// ---------------------------------------------------------------------------

/// Create a connected write-once / read-once completion pair.
pub fn handoff() -> (HandoffTx, HandoffRx) {
    // ---
    let (tx, rx) = oneshot::channel();
    (HandoffTx(tx), HandoffRx(rx))
}

// ---

/// Producing half. Consumed by [`HandoffTx::complete`]; dropping it without
/// completing cancels the waiter.
#[derive(Debug)]
pub struct HandoffTx(oneshot::Sender<()>);

impl HandoffTx {
    /// Signal completion. Returns `false` if the waiter already gave up.
    pub fn complete(self) -> bool {
        self.0.send(()).is_ok()
    }
}

// ---

/// Consuming half. Waited on exactly once.
#[derive(Debug)]
pub struct HandoffRx(oneshot::Receiver<()>);

impl HandoffRx {
    // ---
    /// Block until completed, cancelled, or `timeout` elapses.
    ///
    /// Once this returns anything but [`WaitOutcome::Signaled`], every
    /// [`HandoffTx::complete`] on the pair returns `false`.
    pub fn wait(self, rt: &Handle, timeout: Duration) -> WaitOutcome {
        // ---
        let mut rx = self.0;
        rt.block_on(async move {
            match tokio::time::timeout(timeout, &mut rx).await {
                Ok(Ok(())) => WaitOutcome::Signaled,
                Ok(Err(_)) => WaitOutcome::Cancelled,
                Err(_) => {
                    // Closing first makes any later `complete` return false;
                    // a completion that beat the close still counts.
                    rx.close();
                    match rx.try_recv() {
                        Ok(()) => WaitOutcome::Signaled,
                        Err(_) => WaitOutcome::TimedOut,
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use tokio::runtime::Runtime;

    use super::{handoff, WaitCell, WaitOutcome};

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    // ---

    #[test]
    fn wait_cell_wakes_on_matching_value() {
        // ---
        let rt = runtime();
        let cell = Arc::new(WaitCell::new(0u32));

        let setter = Arc::clone(&cell);
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            setter.set(1);
            setter.set(2);
        });

        let start = Instant::now();
        let outcome = cell.wait_until(rt.handle(), Duration::from_secs(2), |v| *v == 2);
        worker.join().unwrap();

        assert_eq!(outcome, WaitOutcome::Signaled);
        assert!(start.elapsed() < Duration::from_secs(1), "waited the full bound");
    }

    // ---

    #[test]
    fn wait_cell_times_out_near_bound() {
        // ---
        let rt = runtime();
        let cell = WaitCell::new(false);

        let start = Instant::now();
        let outcome = cell.wait_until(rt.handle(), Duration::from_millis(150), |v| *v);
        let elapsed = start.elapsed();

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(elapsed >= Duration::from_millis(140), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "returned late: {elapsed:?}");
    }

    // ---

    #[test]
    fn zero_bound_checks_current_value_only() {
        // ---
        let rt = runtime();
        let cell = WaitCell::new(true);

        assert_eq!(
            cell.wait_until(rt.handle(), Duration::ZERO, |v| *v),
            WaitOutcome::Signaled
        );
        assert_eq!(
            cell.wait_until(rt.handle(), Duration::ZERO, |v| !*v),
            WaitOutcome::TimedOut
        );
    }

    // ---

    #[test]
    fn handoff_completes_across_threads() {
        // ---
        let rt = runtime();
        let (tx, rx) = handoff();

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.complete()
        });

        assert_eq!(rx.wait(rt.handle(), Duration::from_secs(1)), WaitOutcome::Signaled);
        assert!(worker.join().unwrap(), "waiter was still listening");
    }

    // ---

    #[test]
    fn dropped_handoff_sender_cancels() {
        // ---
        let rt = runtime();
        let (tx, rx) = handoff();
        drop(tx);

        let start = Instant::now();
        assert_eq!(rx.wait(rt.handle(), Duration::from_secs(1)), WaitOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    // ---

    #[test]
    fn handoff_times_out_without_sender_activity() {
        // ---
        let rt = runtime();
        let (tx, rx) = handoff();

        assert_eq!(
            rx.wait(rt.handle(), Duration::from_millis(50)),
            WaitOutcome::TimedOut
        );
        assert!(!tx.complete(), "completion after timeout has no reader");
    }
}
