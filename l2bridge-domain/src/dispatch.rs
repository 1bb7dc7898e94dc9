//! The single-threaded [`Dispatcher`] context on which every channel
//! callback runs.
//!
//! # Design
//!
//! A dedicated `std::thread` owns the receiving end of an unbounded tokio
//! channel and runs each posted [`Task`] to completion, in posting order,
//! via `blocking_recv`. Cloned [`Dispatcher`] handles are cheap senders.
//!
//! - Tasks must never block on a facade request; the facade blocks *callers*
//!   on this thread's progress, so the reverse would deadlock.
//! - A panicking task is caught and logged so one bad callback does not take
//!   the dispatch context down with it.
//! - The thread exits once every handle has been dropped and the queue is
//!   drained.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, ThreadId};

// ---

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Unit of work posted to the dispatch thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Cheap-clone handle to the dispatch thread.
#[derive(Clone)]
pub struct Dispatcher {
    // ---
    tx: mpsc::UnboundedSender<Task>,
    thread_id: ThreadId,
}

// ---

impl Dispatcher {
    // ---
    /// Spawn the dispatch thread under `name` and return a handle to it.
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let label = name.to_string();

        let handle = thread::Builder::new().name(label.clone()).spawn(move || {
            while let Some(task) = rx.blocking_recv() {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!(dispatcher = %label, "dispatched task panicked");
                }
            }
            tracing::debug!(dispatcher = %label, "dispatch queue closed, thread exiting");
        })?;

        Ok(Self {
            tx,
            thread_id: handle.thread().id(),
        })
    }

    // ---

    /// Queue `f` to run on the dispatch thread.
    ///
    /// Returns `false` if the thread has already exited; the task is dropped.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        // ---
        if self.tx.send(Box::new(f)).is_err() {
            tracing::debug!("dispatcher closed, dropping task");
            return false;
        }
        true
    }

    // ---

    /// `true` when called from the dispatch thread itself.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

// ---

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
