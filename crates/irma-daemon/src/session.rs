//! The session entity and its state machine.
//!
//! A [`Session`] is one protocol instance. Its immutable identity (token,
//! action, request, the signed requestor statement) lives directly on the
//! struct; everything mutable sits behind a single mutex and is only
//! reached through a [`SessionGuard`]. Handlers and the reaper both
//! follow the same discipline: acquire the guard, validate the pre-state,
//! refresh the activity timestamp, do the work, release.
//!
//! # Status transitions
//!
//! ```text
//! INITIALIZED -> CONNECTED -> COMMUNICATING -> DONE
//!      |             |              |-> CANCELLED
//!      |             |-> CANCELLED
//!      +-----------------> TIMEOUT (reaper, from any non-terminal state)
//! ```
//!
//! Terminal states absorb every further event: [`SessionGuard::set_status`]
//! refuses to leave them, which also freezes the result.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use irma_core::bignum::Bignum;
use irma_core::identifiers::{SchemeManagerIdentifier, SessionToken};
use irma_core::messages::{Action, SessionResult, Status};
use irma_core::requests::SessionRequest;
use irma_core::version::ProtocolVersion;
use tokio::sync::mpsc;

/// Lowest protocol version this server speaks.
pub const MIN_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 4);

/// Highest protocol version this server speaks.
pub const MAX_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 4);

/// How long a session may sit idle before the reaper expires it, unless
/// the request configured a client timeout.
pub const MAX_SESSION_LIFETIME: Duration = Duration::from_secs(300);

/// Bit length of session nonces, the statistical zero-knowledge parameter
/// of the 2048-bit credential scheme system parameters.
pub const NONCE_BITS: usize = 256;

/// One protocol instance.
pub struct Session {
    token: SessionToken,
    action: Action,
    request: SessionRequest,
    requestor: Option<String>,
    jwt: String,
    nonce: Bignum,
    context: Bignum,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    version: Option<ProtocolVersion>,
    status: Status,
    prev_status: Status,
    last_active: DateTime<Utc>,
    result: SessionResult,
    kss_proofs: BTreeMap<SchemeManagerIdentifier, serde_json::Value>,
    event_sink: Option<mpsc::UnboundedSender<Status>>,
}

impl Session {
    /// Creates a session in INITIALIZED with a fresh nonce and the fixed
    /// context.
    ///
    /// `request` is stored as the requestor submitted it except that its
    /// nonce and context are overwritten with the server-chosen values.
    /// `jwt` is the signed requestor statement later served to the
    /// client; `requestor` is the authenticated requestor name, if any.
    #[must_use]
    pub fn new(
        token: SessionToken,
        mut request: SessionRequest,
        jwt: String,
        requestor: Option<String>,
    ) -> Self {
        let action = request.action();
        let nonce = Bignum::random(NONCE_BITS);
        let context = Bignum::one();

        // Whatever nonce and context the requestor submitted are discarded.
        request.base_mut().nonce = Some(nonce.clone());
        request.base_mut().context = Some(context.clone());

        Self {
            action,
            request,
            requestor,
            jwt,
            nonce,
            context,
            inner: Mutex::new(SessionInner {
                version: None,
                status: Status::Initialized,
                prev_status: Status::Initialized,
                last_active: Utc::now(),
                result: SessionResult::new(token.clone(), action),
                kss_proofs: BTreeMap::new(),
                event_sink: None,
            }),
            token,
        }
    }

    /// The session token.
    #[must_use]
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// The session type.
    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    /// The request this session runs, with the server-chosen nonce and
    /// context applied.
    #[must_use]
    pub const fn request(&self) -> &SessionRequest {
        &self.request
    }

    /// The authenticated requestor that created this session, if any.
    #[must_use]
    pub fn requestor(&self) -> Option<&str> {
        self.requestor.as_deref()
    }

    /// The signed requestor statement served to the client.
    #[must_use]
    pub fn jwt(&self) -> &str {
        &self.jwt
    }

    /// The nonce the client must bind its proofs to.
    #[must_use]
    pub const fn nonce(&self) -> &Bignum {
        &self.nonce
    }

    /// The context the client must bind its proofs to.
    #[must_use]
    pub const fn context(&self) -> &Bignum {
        &self.context
    }

    /// Acquires the session mutex.
    ///
    /// Lock order is store before session; callers coming from a store
    /// lookup must have dropped the store lock already.
    pub fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            session: self,
            inner: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// The timeout the reaper applies to this session in its current
    /// status: the request's client timeout while the client has not yet
    /// arrived (and one is configured), the default lifetime otherwise.
    fn effective_timeout(&self, status: Status) -> Duration {
        let client_timeout = self.request.base().client_timeout;
        if status == Status::Initialized && client_timeout != 0 {
            Duration::from_secs(client_timeout)
        } else {
            MAX_SESSION_LIFETIME
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("action", &self.action)
            .field("requestor", &self.requestor)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a session's mutable state.
pub struct SessionGuard<'a> {
    session: &'a Session,
    inner: MutexGuard<'a, SessionInner>,
}

impl SessionGuard<'_> {
    /// Current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status
    }

    /// The status last recorded before the current one.
    #[must_use]
    pub fn prev_status(&self) -> Status {
        self.inner.prev_status
    }

    /// The negotiated protocol version, once the client has connected.
    #[must_use]
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.inner.version
    }

    /// Records the negotiated protocol version.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.inner.version = Some(version);
    }

    /// When the session was last legally touched.
    #[must_use]
    pub fn last_active(&self) -> DateTime<Utc> {
        self.inner.last_active
    }

    /// Refreshes the activity timestamp. Every legal client touch calls
    /// this.
    pub fn mark_alive(&mut self) {
        self.inner.last_active = Utc::now();
    }

    /// Refreshes the activity timestamp to a caller-chosen instant. Used
    /// by the reaper, which sweeps against an injected clock.
    pub fn mark_alive_at(&mut self, now: DateTime<Utc>) {
        self.inner.last_active = now;
    }

    /// Whether the reaper would consider this session expired at `now`.
    #[must_use]
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        let timeout = self.session.effective_timeout(self.inner.status);
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return false;
        };
        self.inner
            .last_active
            .checked_add_signed(timeout)
            .is_some_and(|deadline| deadline < now)
    }

    /// Advances the session status.
    ///
    /// Records the previous status, mirrors the new status into the
    /// result, and signals the event sink. On entering a terminal status
    /// the sink is closed after the final event, ending any subscriber's
    /// stream. Events against a terminal session are rejected: the call
    /// is a no-op.
    pub fn set_status(&mut self, status: Status) {
        if self.inner.status.finished() {
            tracing::warn!(
                session = %self.session.token,
                current = %self.inner.status,
                refused = %status,
                "ignoring status change on finished session"
            );
            return;
        }

        tracing::debug!(
            session = %self.session.token,
            from = %self.inner.status,
            to = %status,
            "session status changed"
        );
        self.inner.prev_status = self.inner.status;
        self.inner.status = status;
        self.inner.result.status = status;

        if let Some(sink) = &self.inner.event_sink {
            // A send only fails when the subscriber is gone; nothing to do
            // then, the sink is dropped below or replaced on resubscribe.
            let _ = sink.send(status);
        }
        if status.finished() {
            self.inner.event_sink = None;
        }
    }

    /// Attaches a status subscriber, replacing (and thereby ending) any
    /// previous one.
    ///
    /// The receiver is primed with the current status and then sees every
    /// transition in order. If the session is already finished the channel
    /// is closed right after the initial event.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Status> {
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is in scope, the send cannot fail.
        let _ = tx.send(self.inner.status);
        if self.inner.status.finished() {
            self.inner.event_sink = None;
        } else {
            self.inner.event_sink = Some(tx);
        }
        rx
    }

    /// Closes the event sink, unblocking any subscriber with
    /// end-of-stream.
    pub fn close_event_sink(&mut self) {
        self.inner.event_sink = None;
    }

    /// The session result in its current state.
    #[must_use]
    pub fn result(&self) -> &SessionResult {
        &self.inner.result
    }

    /// Mutable access to the result. Callers must not mutate the result
    /// of a finished session; status itself is only changed through
    /// [`set_status`](Self::set_status).
    pub fn result_mut(&mut self) -> &mut SessionResult {
        &mut self.inner.result
    }

    /// Records keyshare server proofs collected during issuance.
    pub fn set_kss_proofs(
        &mut self,
        proofs: BTreeMap<SchemeManagerIdentifier, serde_json::Value>,
    ) {
        self.inner.kss_proofs = proofs;
    }

    /// Keyshare server proofs per scheme, set during issuance flows.
    #[must_use]
    pub fn kss_proofs(&self) -> &BTreeMap<SchemeManagerIdentifier, serde_json::Value> {
        &self.inner.kss_proofs
    }
}
