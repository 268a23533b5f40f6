//! Fan-out of snapshot changes to subscribed sessions.
//!
//! Changes enter through [`SubscriptionEngine::ingest`] and are coalesced by
//! a worker task: the first change opens a window, later changes for the
//! same field replace the buffered value, and the whole batch is delivered
//! as one `notify_status_update` per session when the window closes. A zero
//! window delivers immediately.
//!
//! Per-session delivered versions guarantee a field change is sent at most
//! once to each session, including the initial values emitted on subscribe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use forge_core::rpc::notification;

use crate::session::manager::SessionManager;
use crate::session::session::ClientSession;
use crate::snapshot::{ChangedField, StatusSnapshot};
use crate::subscriptions::set::FieldFilter;

/// Coalesces snapshot changes and delivers them to subscribed sessions.
pub struct SubscriptionEngine {
    sessions: Arc<SessionManager>,
    tx: mpsc::UnboundedSender<Vec<ChangedField>>,
}

impl SubscriptionEngine {
    /// Start the engine and its coalescing worker. The worker exits when the
    /// engine is dropped.
    #[must_use]
    pub fn start(sessions: Arc<SessionManager>, window: Duration) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, Arc::clone(&sessions), window));
        (Arc::new(Self { sessions, tx }), worker)
    }

    /// Feed one batch of snapshot changes into the coalescing window.
    pub fn ingest(&self, changed: Vec<ChangedField>) {
        if changed.is_empty() {
            return;
        }
        let _ = self.tx.send(changed);
    }

    /// Merge a subscription request for one session and return the current
    /// values of every requested field, so the client starts from real state
    /// rather than waiting for the next change.
    ///
    /// Newly covered fields are marked delivered at their current version;
    /// already-covered fields keep their markers, so repeating a request
    /// cannot cause duplicate deltas.
    #[must_use]
    pub fn subscribe(
        &self,
        session: &ClientSession,
        wants: &HashMap<String, FieldFilter>,
        snapshot: &StatusSnapshot,
    ) -> Map<String, Value> {
        let mut subs = session.subscriptions();
        let added = subs.set.merge(wants);

        for add in &added {
            let field_names: Vec<String> = match &add.fields {
                Some(fields) => fields.clone(),
                None => snapshot
                    .query(&add.object, None)
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default(),
            };
            for field in field_names {
                if let Some(fv) = snapshot.get(&add.object, &field) {
                    let _ = subs
                        .delivered
                        .insert((add.object.clone(), field), fv.version);
                }
            }
        }
        drop(subs);

        let mut status = Map::new();
        let mut objects: Vec<&String> = wants.keys().collect();
        objects.sort();
        for object in objects {
            let fields: Option<Vec<String>> = wants[object]
                .as_ref()
                .map(|set| set.iter().cloned().collect());
            if let Some(values) = snapshot.query(object, fields.as_deref()) {
                let _ = status.insert(object.clone(), Value::Object(values));
            }
        }
        status
    }

    /// Drop a session's interest in the named objects.
    pub fn unsubscribe(&self, session: &ClientSession, objects: &[String]) {
        let mut subs = session.subscriptions();
        subs.set.remove_objects(objects);
        subs.delivered
            .retain(|(object, _), _| !objects.contains(object));
    }

    /// Total subscribed sessions, for introspection.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sessions
            .all()
            .iter()
            .filter(|s| !s.subscriptions().set.is_empty())
            .count()
    }
}

// ─── Coalescing worker ───────────────────────────────────────────────────────

struct Batch {
    order: Vec<ChangedField>,
    index: HashMap<(String, String), usize>,
}

impl Batch {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Later values replace earlier ones in place, keeping first-seen order.
    fn merge(&mut self, changed: Vec<ChangedField>) {
        for cf in changed {
            let key = (cf.object.clone(), cf.field.clone());
            if let Some(&pos) = self.index.get(&key) {
                self.order[pos] = cf;
            } else {
                let _ = self.index.insert(key, self.order.len());
                self.order.push(cf);
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Vec<ChangedField>>,
    sessions: Arc<SessionManager>,
    window: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = Batch::new();
        batch.merge(first);

        if !window.is_zero() {
            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    more = rx.recv() => match more {
                        Some(changed) => batch.merge(changed),
                        None => break,
                    },
                }
            }
        }

        deliver(&sessions, &batch.order);
    }
    debug!("subscription worker stopped");
}

fn deliver(sessions: &SessionManager, batch: &[ChangedField]) {
    for session in sessions.all() {
        let mut delta: Map<String, Value> = Map::new();
        {
            let mut subs = session.subscriptions();
            for cf in batch {
                if !subs.set.contains(&cf.object, &cf.field) {
                    continue;
                }
                let key = (cf.object.clone(), cf.field.clone());
                if subs.delivered.get(&key).is_some_and(|&v| v >= cf.version) {
                    continue;
                }
                let _ = subs.delivered.insert(key, cf.version);
                let slot = delta
                    .entry(cf.object.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(obj) = slot.as_object_mut() {
                    let _ = obj.insert(cf.field.clone(), cf.value.clone());
                }
            }
        }
        if !delta.is_empty() {
            metrics::counter!("forge_status_deltas_sent").increment(1);
            session.send_delta(&notification("notify_status_update", json!([delta])));
        }
    }
}
