//! Typed server events and the publish/subscribe bus.
//!
//! Events are a closed tagged union rather than untyped callbacks: producers
//! publish [`ServerEvent`] values on an [`EventBus`], and each consumer holds
//! its own broadcast receiver. Components react to link lifecycle changes
//! this way, and the session layer forwards the client-visible subset to
//! connected clients as JSON-RPC notifications.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::state::ConnectionState;

/// Buffered events per subscriber before the oldest are dropped.
const BUS_CAPACITY: usize = 256;

/// Something that happened inside the server that other parts react to.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The firmware link completed its handshake.
    FirmwareReady,

    /// The firmware socket dropped. Broadcast independently of any pending
    /// call so sessions can surface an offline indicator.
    FirmwareDisconnected,

    /// The link state machine moved.
    ConnectionStateChanged {
        /// The new state.
        state: ConnectionState,
    },

    /// An unsolicited firmware notification that is not a status update.
    /// Routed to component listeners, never directly to clients.
    FirmwareNotification {
        /// Firmware-side method name.
        method: String,
        /// Notification payload.
        params: Value,
    },

    /// A component-published event, broadcast to subscribed sessions
    /// without routing through the firmware link.
    Component {
        /// Event kind; clients receive it as `notify_<name>`.
        name: String,
        /// Event payload.
        payload: Value,
    },
}

impl ServerEvent {
    /// The client-facing notification for this event, if it has one.
    ///
    /// Returns the JSON-RPC method name and params. Internal events
    /// (state changes, raw firmware notifications) return None.
    #[must_use]
    pub fn client_notification(&self) -> Option<(String, Value)> {
        match self {
            Self::FirmwareReady => Some(("notify_firmware_ready".into(), Value::Null)),
            Self::FirmwareDisconnected => {
                Some(("notify_firmware_disconnected".into(), Value::Null))
            }
            Self::Component { name, payload } => {
                Some((format!("notify_{name}"), payload.clone()))
            }
            Self::ConnectionStateChanged { .. } | Self::FirmwareNotification { .. } => None,
        }
    }
}

/// Broadcast bus for [`ServerEvent`].
///
/// Cheap to clone; all clones share the same channel. A slow subscriber only
/// loses its own backlog (`Lagged`), it never blocks publishers.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Lack of subscribers is
    /// not an error.
    pub fn publish(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe; the receiver sees events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
