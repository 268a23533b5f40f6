//! Observable connection state with validated transitions.

use forge_core::events::{EventBus, ServerEvent};
use forge_core::state::ConnectionState;
use tokio::sync::watch;
use tracing::{debug, error};

/// The link's current [`ConnectionState`], observable via a watch channel.
///
/// Every accepted transition is published on the event bus so components and
/// sessions can react without polling. Illegal transitions are a programming
/// error; they are logged and ignored rather than corrupting the machine.
#[derive(Debug)]
pub struct LinkState {
    tx: watch::Sender<ConnectionState>,
    bus: EventBus,
}

impl LinkState {
    /// Start in `Disconnected`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx, bus }
    }

    /// The current state.
    #[must_use]
    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Attempt a transition. Returns whether it was accepted.
    pub fn set(&self, next: ConnectionState) -> bool {
        let current = self.current();
        if current == next {
            return true;
        }
        if !current.may_transition_to(next) {
            error!(%current, %next, "illegal connection state transition ignored");
            return false;
        }
        debug!(%current, %next, "connection state changed");
        let _ = self.tx.send_replace(next);
        self.bus
            .publish(ServerEvent::ConnectionStateChanged { state: next });
        true
    }
}
