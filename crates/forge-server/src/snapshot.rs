//! Versioned cache of the firmware's reported object state.
//!
//! The store keeps one [`StatusSnapshot`] behind an `Arc` and swaps it on
//! every applied update, so readers never block the writer and a query sees
//! one consistent snapshot even while updates keep arriving. Each field
//! carries the global version at which it last changed; the subscription
//! engine uses those versions to decide what a given session has already
//! seen.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// One field of one firmware object, with the version of its last change.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldValue {
    /// Current value as reported by the firmware.
    pub value: Value,
    /// Global change counter at the time this value was stored.
    pub version: u64,
}

/// A field that changed in one `apply` call, in application order.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangedField {
    /// Owning firmware object, e.g. `"extruder"`.
    pub object: String,
    /// Field name within the object.
    pub field: String,
    /// The new value.
    pub value: Value,
    /// Version assigned to this change.
    pub version: u64,
}

/// Immutable view of all known objects at one point in time.
#[derive(Clone, Debug, Default)]
pub struct StatusSnapshot {
    objects: HashMap<String, HashMap<String, FieldValue>>,
}

impl StatusSnapshot {
    /// Look up one field.
    #[must_use]
    pub fn get(&self, object: &str, field: &str) -> Option<&FieldValue> {
        self.objects.get(object)?.get(field)
    }

    /// Names of all known objects.
    #[must_use]
    pub fn object_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.keys().cloned().collect();
        names.sort();
        names
    }

    /// Current values of one object, optionally restricted to named fields.
    /// Returns `None` for an unknown object. Fields that were requested but
    /// never reported are simply absent from the result.
    #[must_use]
    pub fn query(&self, object: &str, fields: Option<&[String]>) -> Option<Map<String, Value>> {
        let stored = self.objects.get(object)?;
        let mut out = Map::new();
        match fields {
            Some(wanted) => {
                for name in wanted {
                    if let Some(fv) = stored.get(name) {
                        let _ = out.insert(name.clone(), fv.value.clone());
                    }
                }
            }
            None => {
                let mut names: Vec<&String> = stored.keys().collect();
                names.sort();
                for name in names {
                    let _ = out.insert(name.clone(), stored[name].value.clone());
                }
            }
        }
        Some(out)
    }
}

/// Shared snapshot store with a single writer (the firmware notification
/// pump) and any number of readers.
pub struct SnapshotStore {
    current: RwLock<Arc<StatusSnapshot>>,
    next_version: AtomicU64,
    structural_equality: bool,
}

impl SnapshotStore {
    /// Empty store. `structural_equality` selects the change-suppression
    /// policy: structural compares whole values deeply, shallow only trusts
    /// comparisons between primitives and treats any object or array value
    /// as changed.
    #[must_use]
    pub fn new(structural_equality: bool) -> Self {
        Self {
            current: RwLock::new(Arc::new(StatusSnapshot::default())),
            next_version: AtomicU64::new(1),
            structural_equality,
        }
    }

    /// The latest snapshot. Cheap; callers keep the `Arc` as long as they
    /// need a consistent view.
    #[must_use]
    pub fn current(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Apply one firmware status update of shape `{object: {field: value}}`.
    ///
    /// Fields whose value is unchanged under the equality policy are
    /// suppressed. Returns the changed fields in application order; callers
    /// must not assume the update took effect for suppressed fields' versions.
    pub fn apply(&self, update: &Map<String, Value>) -> Vec<ChangedField> {
        let mut changed = Vec::new();
        let mut next = StatusSnapshot::clone(&self.current());

        for (object, fields) in update {
            let Some(fields) = fields.as_object() else {
                tracing::warn!(%object, "status update entry is not an object, dropped");
                continue;
            };
            let slot = next.objects.entry(object.clone()).or_default();
            for (field, value) in fields {
                if let Some(existing) = slot.get(field)
                    && self.values_equal(&existing.value, value)
                {
                    continue;
                }
                let version = self.next_version.fetch_add(1, Ordering::Relaxed);
                let _ = slot.insert(
                    field.clone(),
                    FieldValue {
                        value: value.clone(),
                        version,
                    },
                );
                changed.push(ChangedField {
                    object: object.clone(),
                    field: field.clone(),
                    value: value.clone(),
                    version,
                });
            }
        }

        if !changed.is_empty() {
            *self.current.write() = Arc::new(next);
        }
        changed
    }

    /// Drop all cached state. Called when the firmware connection is lost so
    /// a reconnect starts from a clean slate.
    pub fn clear(&self) {
        *self.current.write() = Arc::new(StatusSnapshot::default());
    }

    fn values_equal(&self, old: &Value, new: &Value) -> bool {
        if self.structural_equality {
            return old == new;
        }
        // Shallow policy: only primitive comparisons are trusted. Containers
        // always count as changed.
        match (old, new) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn apply_records_fields_with_versions() {
        let store = SnapshotStore::new(true);
        let changed = store.apply(&update(json!({
            "extruder": {"temperature": 200.0, "target": 210.0},
        })));
        assert_eq!(changed.len(), 2);
        let snap = store.current();
        assert_eq!(snap.get("extruder", "temperature").unwrap().value, 200.0);
        // Versions are strictly increasing across fields.
        assert!(changed[0].version < changed[1].version);
    }

    #[test]
    fn unchanged_values_are_suppressed() {
        let store = SnapshotStore::new(true);
        let _ = store.apply(&update(json!({"extruder": {"temperature": 200.0}})));
        let changed = store.apply(&update(json!({"extruder": {"temperature": 200.0}})));
        assert!(changed.is_empty());
        let changed = store.apply(&update(json!({"extruder": {"temperature": 201.0}})));
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].value, 201.0);
    }

    #[test]
    fn shallow_policy_always_reports_containers() {
        let store = SnapshotStore::new(false);
        let _ = store.apply(&update(json!({"toolhead": {"position": [0, 0, 0, 0]}})));
        let changed = store.apply(&update(json!({"toolhead": {"position": [0, 0, 0, 0]}})));
        assert_eq!(changed.len(), 1, "identical array must still count as changed");

        let _ = store.apply(&update(json!({"toolhead": {"homed": true}})));
        let changed = store.apply(&update(json!({"toolhead": {"homed": true}})));
        assert!(changed.is_empty(), "identical primitive is suppressed");
    }

    #[test]
    fn readers_keep_a_consistent_view() {
        let store = SnapshotStore::new(true);
        let _ = store.apply(&update(json!({"extruder": {"temperature": 200.0}})));
        let before = store.current();
        let _ = store.apply(&update(json!({"extruder": {"temperature": 250.0}})));
        assert_eq!(before.get("extruder", "temperature").unwrap().value, 200.0);
        assert_eq!(
            store.current().get("extruder", "temperature").unwrap().value,
            250.0
        );
    }

    #[test]
    fn query_filters_fields() {
        let store = SnapshotStore::new(true);
        let _ = store.apply(&update(json!({
            "extruder": {"temperature": 200.0, "target": 210.0},
        })));
        let snap = store.current();
        let all = snap.query("extruder", None).unwrap();
        assert_eq!(all.len(), 2);
        let some = snap
            .query("extruder", Some(&["target".to_string(), "missing".to_string()]))
            .unwrap();
        assert_eq!(some.len(), 1);
        assert_eq!(some["target"], 210.0);
        assert!(snap.query("heater_bed", None).is_none());
    }

    #[test]
    fn clear_resets_everything() {
        let store = SnapshotStore::new(true);
        let _ = store.apply(&update(json!({"extruder": {"temperature": 200.0}})));
        store.clear();
        assert!(store.current().get("extruder", "temperature").is_none());
        // Versions keep growing after a clear so old delivered markers stay stale.
        let changed = store.apply(&update(json!({"extruder": {"temperature": 200.0}})));
        assert_eq!(changed.len(), 1);
        assert!(changed[0].version > 1);
    }

    #[test]
    fn non_object_entry_is_dropped() {
        let store = SnapshotStore::new(true);
        let changed = store.apply(&update(json!({"extruder": 42, "toolhead": {"homed": false}})));
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].object, "toolhead");
    }
}
