//! One connected client.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use forge_core::ids::SessionId;

use crate::auth::PermissionContext;
use crate::session::queue::{Outbound, OutboundQueue};
use crate::subscriptions::set::SubscriptionSet;

/// Name and version reported via `server.connection.identify`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client program name.
    pub name: String,
    /// Client program version.
    pub version: String,
}

/// Why a session was closed, for logging and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The transport saw the client go away.
    ClientDisconnect,
    /// The outbound queue overflowed with undroppable frames.
    SlowConsumer,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnect => "client_disconnect",
            Self::SlowConsumer => "slow_consumer",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Subscription bookkeeping for one session: what it wants and the snapshot
/// version last delivered for each field, so deltas are never re-sent.
#[derive(Debug, Default)]
pub struct SubscriptionState {
    /// Covered objects and fields.
    pub set: SubscriptionSet,
    /// Last delivered version per `(object, field)`.
    pub delivered: HashMap<(String, String), u64>,
}

/// State for one client connection, shared between the transport's read and
/// write halves and the dispatcher.
pub struct ClientSession {
    id: SessionId,
    queue: OutboundQueue,
    permissions: PermissionContext,
    subscriptions: Mutex<SubscriptionState>,
    identity: Mutex<Option<ClientIdentity>>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl ClientSession {
    /// New session with an outbound queue of `queue_bound` frames.
    #[must_use]
    pub fn new(queue_bound: usize) -> Self {
        Self {
            id: SessionId::generate(),
            queue: OutboundQueue::new(queue_bound),
            permissions: PermissionContext::default(),
            subscriptions: Mutex::new(SubscriptionState::default()),
            identity: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Session id, also used as the client-visible connection id.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Granted permissions.
    #[must_use]
    pub fn permissions(&self) -> &PermissionContext {
        &self.permissions
    }

    /// Token cancelled when the session closes; in-flight handlers for this
    /// session race against it.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Record the client's self-reported identity.
    pub fn identify(&self, name: String, version: String) {
        *self.identity.lock() = Some(ClientIdentity { name, version });
    }

    /// Identity, if the client has identified.
    #[must_use]
    pub fn identity(&self) -> Option<ClientIdentity> {
        self.identity.lock().clone()
    }

    /// Exclusive access to the subscription state.
    #[must_use]
    pub fn subscriptions(&self) -> MutexGuard<'_, SubscriptionState> {
        self.subscriptions.lock()
    }

    /// Queue a direct frame (response or event notification). Returns false
    /// when the session was closed as a slow consumer by this push.
    pub fn send_direct(&self, frame: &Value) -> bool {
        if self.queue.push(Outbound::Direct(frame.to_string())).is_err() {
            warn!(session = %self.id, "outbound queue overflow, closing slow consumer");
            metrics::counter!("forge_sessions_closed_slow").increment(1);
            self.close(CloseReason::SlowConsumer);
            return false;
        }
        true
    }

    /// Queue a status-update delta. Deltas are droppable; this never closes
    /// the session.
    pub fn send_delta(&self, frame: &Value) {
        let _ = self.queue.push(Outbound::Delta(frame.to_string()));
    }

    /// Next frame for the write loop. `None` once the session is closed.
    pub async fn next_outbound(&self) -> Option<Outbound> {
        self.queue.recv().await
    }

    /// Close the session: cancel in-flight work, discard queued frames, and
    /// drop subscription state. Idempotent.
    pub fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(session = %self.id, reason = reason.as_str(), "session closed");
        self.cancel.cancel();
        self.queue.close();
        let mut subs = self.subscriptions.lock();
        subs.set.clear();
        subs.delivered.clear();
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Track one in-flight request. The guard decrements on drop, including
    /// on cancellation, so the count can never leak.
    #[must_use]
    pub fn begin_request(&self) -> InFlightGuard<'_> {
        let _ = self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard { session: self }
    }

    /// Requests currently executing for this session.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Deltas dropped for this session under queue pressure.
    #[must_use]
    pub fn dropped_deltas(&self) -> u64 {
        self.queue.dropped_deltas()
    }
}

/// Drop guard for the in-flight request count.
pub struct InFlightGuard<'a> {
    session: &'a ClientSession,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let _ = self.session.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
