//! Registry of live client sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use forge_core::ids::SessionId;
use forge_core::rpc::notification;

use crate::session::session::{ClientSession, CloseReason};

/// Owns every live [`ClientSession`] and fans notifications out to them.
///
/// Sessions are registered by the transport on accept and removed exactly
/// once on close; all teardown goes through
/// [`close_session`](Self::close_session) so cancellation, queue shutdown,
/// and subscription cleanup happen together.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<ClientSession>>>,
    queue_bound: usize,
}

impl SessionManager {
    /// Manager whose sessions buffer at most `queue_bound` outbound frames.
    #[must_use]
    pub fn new(queue_bound: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue_bound,
        }
    }

    /// Create and register a session for a newly accepted connection.
    #[must_use]
    pub fn accept(&self) -> Arc<ClientSession> {
        let session = Arc::new(ClientSession::new(self.queue_bound));
        let _ = self
            .sessions
            .write()
            .insert(session.id().clone(), Arc::clone(&session));
        metrics::gauge!("forge_sessions_active").increment(1.0);
        debug!(session = %session.id(), "session accepted");
        session
    }

    /// Look up a session by id.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<ClientSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Close a session and remove it from the registry. Safe to call more
    /// than once; later calls are no-ops.
    pub fn close_session(&self, id: &SessionId, reason: CloseReason) {
        let Some(session) = self.sessions.write().remove(id) else {
            return;
        };
        session.close(reason);
        metrics::gauge!("forge_sessions_active").decrement(1.0);
    }

    /// Snapshot of all live sessions.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Send a JSON-RPC notification to every session. Event notifications
    /// are direct-priority; a session that cannot absorb one is closed as a
    /// slow consumer and removed.
    pub fn broadcast(&self, method: &str, params: Value) {
        let frame = notification(method, params);
        let mut overflowed = Vec::new();
        for session in self.all() {
            if !session.send_direct(&frame) {
                overflowed.push(session.id().clone());
            }
        }
        for id in overflowed {
            self.close_session(&id, CloseReason::SlowConsumer);
        }
    }

    /// Close every session, used during server shutdown.
    pub fn close_all(&self) {
        let drained: Vec<Arc<ClientSession>> =
            self.sessions.write().drain().map(|(_, s)| s).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "closing all sessions");
        }
        for session in drained {
            session.close(CloseReason::Shutdown);
            metrics::gauge!("forge_sessions_active").decrement(1.0);
        }
    }
}
