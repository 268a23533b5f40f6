//! Method table: handler trait, per-method metadata, and registration.
//!
//! The registry is assembled once during startup, while components run their
//! `init` hooks, and frozen behind an `Arc` before the first request is
//! served. Duplicate method names are a wiring error and fail startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use forge_core::errors::{ComponentError, RpcError};

use crate::auth::Permission;
use crate::rpc::context::RpcContext;

/// One registered RPC method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the method. Parameter presence and types declared in the
    /// method's [`MethodSpec`] are already validated when this runs.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError>;
}

/// Expected type of one declared parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// JSON string.
    String,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// JSON number.
    Number,
    /// Anything.
    Any,
}

impl ParamKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Number => value.is_number(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
            Self::Number => "number",
            Self::Any => "any",
        }
    }
}

/// One declared parameter.
#[derive(Clone, Copy, Debug)]
pub struct ParamSpec {
    /// Parameter name within the params object.
    pub name: &'static str,
    /// Expected type.
    pub kind: ParamKind,
    /// Whether the call fails when the parameter is absent.
    pub required: bool,
}

/// Static metadata checked by the dispatch core before a handler runs.
#[derive(Clone, Debug)]
pub struct MethodSpec {
    /// Privilege required to invoke the method.
    pub permission: Permission,
    /// Whether the firmware must be in the ready state.
    pub requires_ready: bool,
    /// Methods sharing an exclusive key run one at a time.
    pub exclusive_key: Option<&'static str>,
    /// Declared parameters.
    pub params: &'static [ParamSpec],
}

impl MethodSpec {
    /// Spec for a read-only query with no declared parameters.
    #[must_use]
    pub fn query() -> Self {
        Self {
            permission: Permission::Observer,
            requires_ready: false,
            exclusive_key: None,
            params: &[],
        }
    }

    /// Validate a params value against the declared parameters.
    pub fn validate_params(&self, params: Option<&Value>) -> Result<(), RpcError> {
        let obj = match params {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(RpcError::InvalidParams {
                    message: "params must be an object".into(),
                });
            }
        };
        for spec in self.params {
            match obj.and_then(|o| o.get(spec.name)) {
                Some(value) => {
                    if !spec.kind.matches(value) {
                        return Err(RpcError::InvalidParams {
                            message: format!("{} must be a {}", spec.name, spec.kind.name()),
                        });
                    }
                }
                None if spec.required => {
                    return Err(RpcError::InvalidParams {
                        message: format!("missing required parameter: {}", spec.name),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }
}

pub(crate) struct MethodEntry {
    pub(crate) handler: Arc<dyn MethodHandler>,
    pub(crate) spec: MethodSpec,
}

/// Name → handler table, explicit and append-only.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodEntry>,
}

impl MethodRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method. Duplicate names fail startup rather than silently
    /// shadowing an earlier registration.
    pub fn register(
        &mut self,
        method: &str,
        handler: Arc<dyn MethodHandler>,
        spec: MethodSpec,
    ) -> Result<(), ComponentError> {
        if self.methods.contains_key(method) {
            return Err(ComponentError::DuplicateMethod {
                method: method.to_string(),
            });
        }
        let _ = self
            .methods
            .insert(method.to_string(), MethodEntry { handler, spec });
        Ok(())
    }

    pub(crate) fn get(&self, method: &str) -> Option<&MethodEntry> {
        self.methods.get(method)
    }

    /// All registered method names, sorted.
    #[must_use]
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl MethodHandler for Echo {
        async fn handle(&self, params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
            Ok(params.unwrap_or(Value::Null))
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = MethodRegistry::new();
        registry
            .register("server.echo", Arc::new(Echo), MethodSpec::query())
            .unwrap();
        let err = registry
            .register("server.echo", Arc::new(Echo), MethodSpec::query())
            .unwrap_err();
        assert!(matches!(err, ComponentError::DuplicateMethod { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn method_names_are_sorted() {
        let mut registry = MethodRegistry::new();
        registry
            .register("printer.info", Arc::new(Echo), MethodSpec::query())
            .unwrap();
        registry
            .register("server.info", Arc::new(Echo), MethodSpec::query())
            .unwrap();
        assert_eq!(registry.method_names(), vec!["printer.info", "server.info"]);
    }

    #[test]
    fn param_validation() {
        let spec = MethodSpec {
            permission: Permission::Observer,
            requires_ready: false,
            exclusive_key: None,
            params: &[
                ParamSpec {
                    name: "script",
                    kind: ParamKind::String,
                    required: true,
                },
                ParamSpec {
                    name: "objects",
                    kind: ParamKind::Object,
                    required: false,
                },
            ],
        };
        assert!(spec.validate_params(Some(&json!({"script": "G28"}))).is_ok());
        assert!(spec.validate_params(Some(&json!({"script": 5}))).is_err());
        assert!(spec.validate_params(None).is_err());
        assert!(
            spec.validate_params(Some(&json!({"script": "G28", "objects": []})))
                .is_err()
        );
        assert!(spec.validate_params(Some(&json!([1, 2]))).is_err());

        // No declared params accepts anything object-shaped or absent.
        assert!(MethodSpec::query().validate_params(None).is_ok());
        assert!(MethodSpec::query().validate_params(Some(&json!({}))).is_ok());
    }
}
