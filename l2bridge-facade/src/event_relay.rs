//! Unbounded FIFO relays from the dispatch context to blocking consumers.
//!
//! Each relay carries one event kind. Publishing never blocks and never
//! fails; events queue until a consumer attaches. A relay admits one consumer
//! at a time: a second [`EventRelay::stream`] while one is attached returns
//! [`FacadeError::StreamBusy`]. Dropping a [`RelayStream`] returns the queue
//! to the relay, so the next consumer resumes at the first unread event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ---

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---

use crate::FacadeError;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct RelayShared<T> {
    // ---
    name: &'static str,
    tx: mpsc::UnboundedSender<T>,
    /// `None` while a stream holds the receiver.
    rx: Mutex<Option<mpsc::UnboundedReceiver<T>>>,
    queued: AtomicUsize,
}

impl<T> RelayShared<T> {
    fn lock_rx(&self) -> MutexGuard<'_, Option<mpsc::UnboundedReceiver<T>>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// EventRelay
// ---------------------------------------------------------------------------

/// Cheap to clone; clones share one queue.
pub struct EventRelay<T> {
    // ---
    shared: Arc<RelayShared<T>>,
    rt: Handle,
}

impl<T> Clone for EventRelay<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            rt: self.rt.clone(),
        }
    }
}

// ---

impl<T> EventRelay<T>
where
    T: Send + 'static,
{
    // ---
    pub fn new(name: &'static str, rt: Handle) -> Self {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(RelayShared {
                name,
                tx,
                rx: Mutex::new(Some(rx)),
                queued: AtomicUsize::new(0),
            }),
            rt,
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Append `event` to the tail of the queue.
    pub fn publish(&self, event: T) {
        // ---
        // Counted before it is visible, so a consumer's decrement never
        // overtakes it.
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if self.shared.tx.send(event).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(relay = self.shared.name, "relay receiver gone, event dropped");
        }
    }

    /// Number of published events not yet taken by a consumer.
    pub fn pending(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    // ---

    /// Attach the single consumer. The stream ends when `cancel` fires.
    pub fn stream(&self, cancel: CancellationToken) -> Result<RelayStream<T>, FacadeError> {
        // ---
        let rx = self
            .shared
            .lock_rx()
            .take()
            .ok_or(FacadeError::StreamBusy(self.shared.name))?;

        tracing::debug!(relay = self.shared.name, pending = self.pending(), "stream attached");
        Ok(RelayStream {
            shared: Arc::clone(&self.shared),
            rx: Some(rx),
            cancel,
            rt: self.rt.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// RelayStream
// ---------------------------------------------------------------------------

/// Blocking, ordered iterator over one relay's events.
///
/// [`Iterator::next`] parks the calling thread until an event arrives or the
/// cancellation token fires; it must not be called from async context.
pub struct RelayStream<T> {
    // ---
    shared: Arc<RelayShared<T>>,
    rx: Option<mpsc::UnboundedReceiver<T>>,
    cancel: CancellationToken,
    rt: Handle,
}

impl<T> RelayStream<T> {
    // ---
    fn took(&self, event: Option<T>) -> Option<T> {
        if event.is_some() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }

    /// Take the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<T> {
        // ---
        if self.cancel.is_cancelled() {
            return None;
        }
        let event = self.rx.as_mut()?.try_recv().ok();
        self.took(event)
    }

    /// Like [`Iterator::next`], but gives up after `timeout`.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<T> {
        // ---
        let rx = self.rx.as_mut()?;
        let cancel = self.cancel.clone();
        let event = self.rt.block_on(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = tokio::time::timeout(timeout, rx.recv()) => res.ok().flatten(),
            }
        });
        self.took(event)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ---

impl<T> Iterator for RelayStream<T> {
    // ---
    type Item = T;

    fn next(&mut self) -> Option<T> {
        // ---
        let rx = self.rx.as_mut()?;
        let cancel = self.cancel.clone();
        let event = self.rt.block_on(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                ev = rx.recv() => ev,
            }
        });
        self.took(event)
    }
}

// ---

impl<T> Drop for RelayStream<T> {
    fn drop(&mut self) {
        // ---
        if let Some(rx) = self.rx.take() {
            *self.shared.lock_rx() = Some(rx);
            tracing::debug!(relay = self.shared.name, "stream detached");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
