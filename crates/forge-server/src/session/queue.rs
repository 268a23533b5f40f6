//! Bounded per-session outbound queue with two priorities.
//!
//! Direct RPC responses must reach the client; status-update deltas are
//! droppable under pressure because a later delta supersedes them. When the
//! queue is full the oldest delta is evicted to make room. A response that
//! still cannot be enqueued marks the session a slow consumer and the caller
//! closes it.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// One serialized frame waiting to be written to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// RPC response or event notification. Never dropped.
    Direct(String),
    /// Status-update delta. Dropped first under pressure.
    Delta(String),
}

impl Outbound {
    /// The serialized frame text.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Direct(s) | Self::Delta(s) => s,
        }
    }
}

/// Result of a push that could not be absorbed.
#[derive(Debug, PartialEq, Eq)]
pub struct Overflow;

struct QueueInner {
    items: VecDeque<Outbound>,
    dropped_deltas: u64,
    closed: bool,
}

/// FIFO queue between the dispatcher and one client's write loop.
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    bound: usize,
}

impl OutboundQueue {
    /// Queue holding at most `bound` frames.
    #[must_use]
    pub fn new(bound: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                dropped_deltas: 0,
                closed: false,
            }),
            notify: Notify::new(),
            bound,
        }
    }

    /// Enqueue one frame.
    ///
    /// Pushing to a closed queue is a silent no-op. On a full queue the
    /// oldest delta is evicted first; if nothing is evictable an incoming
    /// delta is itself dropped, while an incoming direct frame reports
    /// [`Overflow`] so the caller can close the session.
    pub fn push(&self, item: Outbound) -> Result<(), Overflow> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        if inner.items.len() >= self.bound {
            if let Some(pos) = inner
                .items
                .iter()
                .position(|i| matches!(i, Outbound::Delta(_)))
            {
                let _ = inner.items.remove(pos);
                inner.dropped_deltas += 1;
                metrics::counter!("forge_session_deltas_dropped").increment(1);
            } else if matches!(item, Outbound::Delta(_)) {
                inner.dropped_deltas += 1;
                metrics::counter!("forge_session_deltas_dropped").increment(1);
                return Ok(());
            } else {
                return Err(Overflow);
            }
        }
        inner.items.push_back(item);
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next frame. Returns `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<Outbound> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Frames already queued are discarded and any waiting
    /// receiver wakes up with `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.items.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Frames currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Deltas evicted or refused since creation.
    #[must_use]
    pub fn dropped_deltas(&self) -> u64 {
        self.inner.lock().dropped_deltas
    }
}
