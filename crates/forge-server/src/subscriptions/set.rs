//! Per-session record of which objects and fields a client wants.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use forge_core::errors::RpcError;

/// Requested interest for one object: every field, or a named subset.
pub type FieldFilter = Option<HashSet<String>>;

/// The set of objects and fields one session is subscribed to.
///
/// `None` for an object means all fields, current and future. Merging is
/// idempotent: subscribing twice to the same thing changes nothing, and a
/// widening request (named fields, then all fields) only ever grows the set.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionSet {
    objects: HashMap<String, FieldFilter>,
}

/// One addition produced by a merge, used to emit initial values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Added {
    /// Object the interest was added for.
    pub object: String,
    /// Newly covered fields, or `None` when the whole object became covered.
    pub fields: Option<Vec<String>>,
}

impl SubscriptionSet {
    /// Merge a request into the set, returning what is newly covered.
    pub fn merge(&mut self, wants: &HashMap<String, FieldFilter>) -> Vec<Added> {
        let mut added = Vec::new();
        let mut objects: Vec<&String> = wants.keys().collect();
        objects.sort();
        for object in objects {
            let want = &wants[object];
            match self.objects.get_mut(object) {
                None => {
                    let _ = self.objects.insert(object.clone(), want.clone());
                    added.push(Added {
                        object: object.clone(),
                        fields: want.as_ref().map(sorted),
                    });
                }
                Some(slot) => match (&mut *slot, want) {
                    // Widened to all fields.
                    (Some(_), None) => {
                        *slot = None;
                        added.push(Added {
                            object: object.clone(),
                            fields: None,
                        });
                    }
                    (Some(current), Some(fields)) => {
                        let mut new_fields: Vec<String> = fields
                            .iter()
                            .filter(|f| !current.contains(*f))
                            .cloned()
                            .collect();
                        if !new_fields.is_empty() {
                            new_fields.sort();
                            current.extend(new_fields.iter().cloned());
                            added.push(Added {
                                object: object.clone(),
                                fields: Some(new_fields),
                            });
                        }
                    }
                    // Already covering all fields; nothing can be added.
                    (None, _) => {}
                },
            }
        }
        added
    }

    /// Remove interest in the named objects entirely.
    pub fn remove_objects(&mut self, objects: &[String]) {
        for object in objects {
            let _ = self.objects.remove(object);
        }
    }

    /// Whether this set covers a specific field.
    #[must_use]
    pub fn contains(&self, object: &str, field: &str) -> bool {
        match self.objects.get(object) {
            None => false,
            Some(None) => true,
            Some(Some(fields)) => fields.contains(field),
        }
    }

    /// Whether anything is subscribed at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.objects.clear();
    }

    /// Subscribed object names.
    #[must_use]
    pub fn object_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.keys().cloned().collect();
        names.sort();
        names
    }
}

fn sorted(fields: &HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = fields.iter().cloned().collect();
    v.sort();
    v
}

/// Parse the wire shape `{"objects": {"extruder": ["temperature"], "toolhead": null}}`
/// into a filter map. `null` requests all fields of an object.
pub fn parse_objects_param(params: Option<&Value>) -> Result<HashMap<String, FieldFilter>, RpcError> {
    let objects = params
        .and_then(|p| p.get("objects"))
        .and_then(Value::as_object)
        .ok_or_else(|| RpcError::InvalidParams {
            message: "expected an \"objects\" map".into(),
        })?;

    let mut wants = HashMap::new();
    for (object, filter) in objects {
        let filter = match filter {
            Value::Null => None,
            Value::Array(items) => {
                let mut fields = HashSet::new();
                for item in items {
                    let Some(field) = item.as_str() else {
                        return Err(RpcError::InvalidParams {
                            message: format!("field names for {object} must be strings"),
                        });
                    };
                    let _ = fields.insert(field.to_string());
                }
                Some(fields)
            }
            _ => {
                return Err(RpcError::InvalidParams {
                    message: format!("filter for {object} must be null or an array"),
                });
            }
        };
        let _ = wants.insert(object.clone(), filter);
    }
    Ok(wants)
}
