//! Firmware link connection state machine.
//!
//! Transitions are strictly ordered: `Ready` is reachable only from
//! `Startup`, and `Startup` only from `Connecting`, so the handshake can
//! never be skipped. `Shutdown` is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the persistent connection to the firmware host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket; reconnect may be scheduled.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Socket is up; handshake issued, waiting for the firmware to report
    /// ready.
    Startup,
    /// Handshake complete; all methods available.
    Ready,
    /// The server is stopping; no reconnect will be scheduled.
    Shutdown,
    /// The socket failed; outstanding calls are being flushed before
    /// returning to `Disconnected`.
    Error,
}

impl ConnectionState {
    /// Whether `next` is a legal transition from this state.
    ///
    /// The table encodes the ordering invariant: `Ready` only via `Startup`,
    /// `Startup` only via `Connecting`, and nothing leaves `Shutdown`.
    #[must_use]
    pub fn may_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connecting, Disconnected, Error, Ready, Shutdown, Startup};
        match (self, next) {
            (Shutdown, _) => false,
            (_, Shutdown) => true,
            (Disconnected, Connecting)
            | (Connecting, Startup | Error | Disconnected)
            | (Startup, Ready | Error)
            | (Ready, Error)
            | (Error, Disconnected) => true,
            // Retry loop: Connecting -> Connecting on each failed attempt.
            (Connecting, Connecting) => true,
            _ => false,
        }
    }

    /// Whether calls other than introspection may be issued.
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Startup => "startup",
            Self::Ready => "ready",
            Self::Shutdown => "shutdown",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}
