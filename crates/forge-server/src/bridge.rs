//! Glue tasks between the firmware link and the client-facing layers.
//!
//! Three long-lived tasks:
//! - the notification pump turns firmware `status_update` frames into
//!   snapshot changes (and everything else into typed bus events),
//! - the ready watcher reacts to link lifecycle events: on Ready it primes
//!   the snapshot by subscribing to every firmware object, on disconnect it
//!   clears the snapshot so a reconnect starts clean,
//! - the event forwarder broadcasts the client-visible subset of bus events
//!   to sessions as `notify_*` frames.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use forge_core::events::{EventBus, ServerEvent};
use forge_link::{FirmwareLink, FirmwareNotification};

use crate::components::ComponentRegistry;
use crate::session::manager::SessionManager;
use crate::snapshot::SnapshotStore;
use crate::subscriptions::engine::SubscriptionEngine;

/// Deadline for the priming calls made right after the handshake.
const PRIME_DEADLINE: Duration = Duration::from_secs(10);

/// How many times to attempt priming while the link stays Ready.
const PRIME_ATTEMPTS: u32 = 3;

/// Pause between priming attempts.
const PRIME_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Route firmware notifications: status updates into the snapshot and the
/// subscription engine, everything else onto the bus.
pub fn spawn_notification_pump(
    mut rx: mpsc::Receiver<FirmwareNotification>,
    snapshot: Arc<SnapshotStore>,
    engine: Arc<SubscriptionEngine>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(note) = rx.recv().await {
            if note.method == "status_update" {
                let Some(update) = note.params.as_object() else {
                    warn!("status_update params is not an object, dropped");
                    continue;
                };
                let changed = snapshot.apply(update);
                engine.ingest(changed);
            } else {
                bus.publish(ServerEvent::FirmwareNotification {
                    method: note.method,
                    params: note.params,
                });
            }
        }
        debug!("notification pump stopped");
    })
}

/// Watch link lifecycle events. On Ready: prime the snapshot from the
/// firmware and fire the components' firmware-ready hooks. On disconnect:
/// clear the snapshot.
pub fn spawn_ready_watcher(
    link: Arc<FirmwareLink>,
    snapshot: Arc<SnapshotStore>,
    engine: Arc<SubscriptionEngine>,
    components: Arc<ComponentRegistry>,
    bus: &EventBus,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(ServerEvent::FirmwareReady) => {
                    if prime_with_retry(&link, &snapshot, &engine).await {
                        components.notify_firmware_ready().await;
                    }
                }
                Ok(ServerEvent::FirmwareDisconnected) => {
                    snapshot.clear();
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "ready watcher lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("ready watcher stopped");
    })
}

/// Forward client-visible bus events to every session.
pub fn spawn_event_forwarder(
    sessions: Arc<SessionManager>,
    bus: &EventBus,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Some((method, params)) = event.client_notification() {
                        sessions.broadcast(&method, params);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event forwarder lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("event forwarder stopped");
    })
}

/// Prime the snapshot, retrying a bounded number of times as long as the
/// link is still Ready. A transient failure (a priming call timing out or
/// erroring) must not leave the snapshot empty until the next reconnect.
/// Returns true once primed.
async fn prime_with_retry(
    link: &FirmwareLink,
    snapshot: &SnapshotStore,
    engine: &SubscriptionEngine,
) -> bool {
    for attempt in 1..=PRIME_ATTEMPTS {
        if !link.state().is_ready() {
            debug!("link left ready during snapshot priming");
            return false;
        }
        match prime_snapshot(link, snapshot, engine).await {
            Ok(()) => return true,
            Err(error) => warn!(%error, attempt, "snapshot priming failed"),
        }
        if attempt < PRIME_ATTEMPTS {
            tokio::time::sleep(PRIME_RETRY_DELAY).await;
        }
    }
    warn!("snapshot priming abandoned, waiting for reconnect");
    false
}

/// Ask the firmware for its object list and subscribe to all of it, seeding
/// the snapshot with the initial full status.
async fn prime_snapshot(
    link: &FirmwareLink,
    snapshot: &SnapshotStore,
    engine: &SubscriptionEngine,
) -> Result<(), forge_core::errors::RpcError> {
    let listed = link
        .call_with_deadline("objects/list", json!({}), PRIME_DEADLINE)
        .await?;
    let mut wants = Map::new();
    if let Some(objects) = listed.get("objects").and_then(Value::as_array) {
        for name in objects.iter().filter_map(Value::as_str) {
            let _ = wants.insert(name.to_string(), Value::Null);
        }
    }

    let subscribed = link
        .call_with_deadline("objects/subscribe", json!({ "objects": wants }), PRIME_DEADLINE)
        .await?;
    if let Some(status) = subscribed.get("status").and_then(Value::as_object) {
        let changed = snapshot.apply(status);
        debug!(fields = changed.len(), "snapshot primed");
        engine.ingest(changed);
    }
    Ok(())
}
