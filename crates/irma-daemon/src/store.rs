//! The session registry.
//!
//! A concurrent token-to-session map with a periodic expiry sweep. The
//! store's reader/writer lock protects only the map topology; everything
//! inside a session is guarded by the session's own mutex. Lock order is
//! store before session, never the reverse.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use irma_core::identifiers::SessionToken;
use irma_core::messages::SessionResult;
use thiserror::Error;

use crate::session::Session;

/// A listener invoked whenever a session is updated, with a snapshot of
/// its result. Persistence backends and result-callback delivery hook in
/// here.
pub type ChangeListener = Box<dyn Fn(&Session, &SessionResult) + Send + Sync>;

/// Error inserting a session into the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The token is already in use. The caller generates a fresh token
    /// and retries.
    #[error("session token already in use")]
    DuplicateToken,
}

/// The canonical owner of every live session.
pub trait SessionStore: Send + Sync {
    /// Looks up a session. Does not extend its lifetime.
    fn get(&self, token: &SessionToken) -> Option<Arc<Session>>;

    /// Inserts a new session under its token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateToken`] when a session already
    /// exists under the token.
    fn add(&self, session: Arc<Session>) -> Result<(), StoreError>;

    /// Signals that a session changed. The in-memory store runs its
    /// registered change listeners; persistence backends would write
    /// through here.
    fn update(&self, session: &Session);

    /// Expires sessions whose timeout has passed. Invoked by the reaper
    /// on a fixed cadence.
    fn delete_expired(&self);
}

/// In-memory session store.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionToken, Arc<Session>>>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Registers a change listener. Listeners run on every
    /// [`SessionStore::update`], after the caller has released the
    /// session mutex.
    pub fn on_change(&self, listener: ChangeListener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The expiry sweep against a caller-chosen clock.
    ///
    /// Two phases, to keep the write lock short and to let subscribers
    /// observe the terminal event before a session vanishes:
    ///
    /// 1. Under the read lock, every expired session that is not yet
    ///    terminal is pushed to TIMEOUT (with a refreshed timestamp, so it
    ///    survives until a later pass); expired terminal sessions are
    ///    recorded for removal.
    /// 2. Under the write lock, each recorded session has its event sink
    ///    closed and is detached from the map.
    pub fn delete_expired_at(&self, now: DateTime<Utc>) {
        let mut expired = Vec::new();
        {
            let sessions = self
                .sessions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (token, session) in sessions.iter() {
                let mut guard = session.lock();
                if guard.expired_at(now) {
                    if guard.status().finished() {
                        tracing::info!(session = %token, "deleting session");
                        expired.push(token.clone());
                    } else {
                        tracing::info!(session = %token, "session expired");
                        guard.mark_alive_at(now);
                        guard.set_status(irma_core::messages::Status::Timeout);
                    }
                }
            }
        }

        if expired.is_empty() {
            return;
        }
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for token in expired {
            if let Some(session) = sessions.remove(&token) {
                session.lock().close_event_sink();
            }
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, token: &SessionToken) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }

    fn add(&self, session: Arc<Session>) -> Result<(), StoreError> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match sessions.entry(session.token().clone()) {
            std::collections::hash_map::Entry::Occupied(_) => Err(StoreError::DuplicateToken),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    fn update(&self, session: &Session) {
        let result = session.lock().result().clone();
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(session, &result);
        }
    }

    fn delete_expired(&self) {
        self.delete_expired_at(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration;
    use irma_core::identifiers::AttributeTypeIdentifier;
    use irma_core::messages::Status;
    use irma_core::requests::{
        AttributeDisjunction, BaseRequest, DisclosureRequest, SessionRequest,
    };

    use super::*;

    fn new_session(client_timeout: u64) -> Arc<Session> {
        let request = SessionRequest::Disclose(DisclosureRequest {
            base: BaseRequest {
                client_timeout,
                ..Default::default()
            },
            content: vec![AttributeDisjunction {
                label: "Age limit".into(),
                attributes: vec![AttributeTypeIdentifier::new(
                    "irma-demo.MijnOverheid.ageLower.over18",
                )],
            }],
        });
        Arc::new(Session::new(
            SessionToken::random(),
            request,
            "jwt".into(),
            None,
        ))
    }

    #[test]
    fn add_get_round_trip() {
        let store = MemorySessionStore::new();
        let session = new_session(0);
        let token = session.token().clone();

        store.add(Arc::clone(&session)).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(&token).is_some());
        assert!(store.get(&SessionToken::random()).is_none());
    }

    #[test]
    fn duplicate_tokens_are_rejected() {
        let store = MemorySessionStore::new();
        let session = new_session(0);
        let dup = Arc::new(Session::new(
            session.token().clone(),
            session.request().clone(),
            "jwt".into(),
            None,
        ));

        store.add(session).unwrap();
        assert_eq!(store.add(dup), Err(StoreError::DuplicateToken));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sweep_times_out_then_removes() {
        let store = MemorySessionStore::new();
        let session = new_session(0);
        let token = session.token().clone();
        store.add(Arc::clone(&session)).unwrap();

        let created = session.lock().last_active();

        // Not yet expired: nothing happens.
        store.delete_expired_at(created + Duration::seconds(299));
        assert_eq!(session.lock().status(), Status::Initialized);

        // First sweep past the deadline: TIMEOUT, still in the store.
        let first_sweep = created + Duration::seconds(301);
        store.delete_expired_at(first_sweep);
        assert_eq!(session.lock().status(), Status::Timeout);
        assert!(store.get(&token).is_some());

        // A second sweep one lifetime later detaches it.
        store.delete_expired_at(first_sweep + Duration::seconds(301));
        assert!(store.get(&token).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn sweep_applies_client_timeout_while_initialized() {
        let store = MemorySessionStore::new();
        let session = new_session(30);
        store.add(Arc::clone(&session)).unwrap();
        let created = session.lock().last_active();

        store.delete_expired_at(created + Duration::seconds(31));
        assert_eq!(session.lock().status(), Status::Timeout);
    }

    #[test]
    fn sweep_leaves_live_sessions_alone() {
        let store = MemorySessionStore::new();
        let session = new_session(0);
        store.add(Arc::clone(&session)).unwrap();
        session.lock().set_status(Status::Connected);

        let last_active = session.lock().last_active();
        store.delete_expired_at(last_active + Duration::seconds(10));
        assert_eq!(session.lock().status(), Status::Connected);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn removal_closes_the_event_sink() {
        let store = MemorySessionStore::new();
        let session = new_session(0);
        store.add(Arc::clone(&session)).unwrap();

        let mut rx = session.lock().subscribe();
        assert_eq!(rx.recv().await, Some(Status::Initialized));

        let created = session.lock().last_active();
        let first_sweep = created + Duration::seconds(301);
        store.delete_expired_at(first_sweep);

        // The subscriber observes the terminal event before the session
        // vanishes.
        assert_eq!(rx.recv().await, Some(Status::Timeout));
        assert_eq!(rx.recv().await, None);

        store.delete_expired_at(first_sweep + Duration::seconds(301));
        assert!(store.is_empty());
    }

    #[test]
    fn update_runs_change_listeners() {
        let store = MemorySessionStore::new();
        let session = new_session(0);
        store.add(Arc::clone(&session)).unwrap();

        static CALLS: AtomicUsize = AtomicUsize::new(0);
        store.on_change(Box::new(|_, result| {
            assert_eq!(result.status, Status::Connected);
            CALLS.fetch_add(1, Ordering::SeqCst);
        }));

        session.lock().set_status(Status::Connected);
        store.update(&session);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
