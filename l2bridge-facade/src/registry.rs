use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ---

use l2bridge_domain::Psm;

// ---

use crate::session::ChannelSession;
use crate::FacadeError;

// ---------------------------------------------------------------------------
// SessionRegistry
// ---------------------------------------------------------------------------

/// Psm to session map. Sessions are never removed.
///
/// The map lock is held only to insert or clone an `Arc` out; callers never
/// hold it while taking a session lock.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    // ---
    sessions: Mutex<BTreeMap<Psm, Arc<ChannelSession>>>,
}

impl SessionRegistry {
    // ---
    fn lock(&self) -> MutexGuard<'_, BTreeMap<Psm, Arc<ChannelSession>>> {
        self.sessions.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("session registry lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Add `session` under its psm. Re-registration is rejected.
    pub(crate) fn insert(&self, session: ChannelSession) -> Result<Arc<ChannelSession>, FacadeError> {
        // ---
        let psm = session.psm();
        let mut sessions = self.lock();
        if sessions.contains_key(&psm) {
            return Err(FacadeError::AlreadyRegistered(psm));
        }
        let session = Arc::new(session);
        sessions.insert(psm, Arc::clone(&session));
        Ok(session)
    }

    pub(crate) fn lookup(&self, psm: Psm) -> Option<Arc<ChannelSession>> {
        self.lock().get(&psm).cloned()
    }

    /// Like [`lookup`](Self::lookup), but as a precondition check.
    pub(crate) fn require(&self, psm: Psm) -> Result<Arc<ChannelSession>, FacadeError> {
        self.lookup(psm).ok_or(FacadeError::NotRegistered(psm))
    }

    pub(crate) fn contains(&self, psm: Psm) -> bool {
        self.lock().contains_key(&psm)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Registered psms in ascending order.
    pub(crate) fn psms(&self) -> Vec<Psm> {
        self.lock().keys().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
