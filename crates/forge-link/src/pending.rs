//! Correlation table for outstanding firmware calls.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use forge_core::errors::RpcError;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Outcome delivered to the caller of one pending call.
pub type CallOutcome = Result<serde_json::Value, RpcError>;

struct PendingCall {
    created: Instant,
    deadline: Duration,
    resolver: oneshot::Sender<CallOutcome>,
}

/// Table of calls awaiting a firmware response, keyed by request id.
///
/// The id space is the link's monotonic sequence, so an id is never reused
/// while its call is pending. Every registered call resolves exactly once:
/// by a matching response, by `fail_all` on disconnect, or by removal when
/// the caller's deadline fires.
#[derive(Default)]
pub struct PendingCalls {
    inner: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and return the receiver its outcome arrives on.
    #[must_use]
    pub fn register(&self, id: u64, deadline: Duration) -> oneshot::Receiver<CallOutcome> {
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.lock().insert(
            id,
            PendingCall {
                created: Instant::now(),
                deadline,
                resolver: tx,
            },
        );
        debug_assert!(previous.is_none(), "request id {id} reused while pending");
        rx
    }

    /// Resolve the call with this id. Returns false when no call is pending
    /// under the id (already timed out, cancelled, or never issued) — the
    /// outcome is discarded in that case.
    pub fn complete(&self, id: u64, outcome: CallOutcome) -> bool {
        let Some(call) = self.inner.lock().remove(&id) else {
            return false;
        };
        // The receiver may have been dropped by a caller that gave up.
        let _ = call.resolver.send(outcome);
        true
    }

    /// Drop the entry without resolving it. Used when the caller's own
    /// deadline fired; a late response for the id is then discarded.
    pub fn forget(&self, id: u64) {
        let _ = self.inner.lock().remove(&id);
    }

    /// Fail every outstanding call with the same error. Called on socket
    /// loss so no pending call is ever orphaned.
    pub fn fail_all(&self, error: &RpcError) {
        let drained: Vec<PendingCall> = self.inner.lock().drain().map(|(_, c)| c).collect();
        for call in drained {
            let _ = call.resolver.send(Err(error.clone()));
        }
    }

    /// Number of outstanding calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Whether a call with this id is pending.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().contains_key(&id)
    }

    /// Age and deadline of the oldest pending call, for diagnostics.
    #[must_use]
    pub fn oldest(&self) -> Option<(Duration, Duration)> {
        self.inner
            .lock()
            .values()
            .map(|c| (c.created.elapsed(), c.deadline))
            .max_by_key(|(age, _)| *age)
    }
}
