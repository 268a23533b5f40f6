//! Branded identifiers and per-transport request-id generation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier for a client session.
///
/// Newtype so session ids cannot be confused with request ids or arbitrary
/// strings at API boundaries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session id (UUID v7, time-ordered).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Monotonic request-id source for one transport.
///
/// Ids are unique for the lifetime of the process, which is stronger than
/// the required invariant (unique among currently pending ids on the
/// transport) and costs nothing.
#[derive(Debug)]
pub struct RequestIdSeq {
    next: AtomicU64,
}

impl RequestIdSeq {
    /// Start a new sequence at 1. Zero is reserved so a default-initialized
    /// id never collides with an issued one.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Take the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdSeq {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn request_ids_start_at_one() {
        let seq = RequestIdSeq::new();
        assert_eq!(seq.next_id(), 1);
        assert_eq!(seq.next_id(), 2);
    }

    #[test]
    fn request_ids_never_repeat_across_threads() {
        let seq = Arc::new(RequestIdSeq::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || (0..1000).map(|_| seq.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "id {id} issued twice");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
