//! The dispatch core: routes one request through lookup, validation,
//! authorization, the readiness gate, and finally the handler, under the
//! uniform per-call deadline.
//!
//! Handlers run concurrently by default. A method declaring an exclusive key
//! serializes with every other method sharing that key, so e.g. long-running
//! firmware commands cannot interleave.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument};

use forge_core::errors::RpcError;
use forge_core::rpc::RpcRequest;

use crate::auth::{AuthPolicy, PermissionContext};
use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodRegistry;

/// Routes requests to registered handlers.
pub struct DispatchCore {
    registry: Arc<MethodRegistry>,
    auth: Arc<dyn AuthPolicy>,
    locks: Mutex<HashMap<&'static str, Arc<tokio::sync::Mutex<()>>>>,
}

impl DispatchCore {
    /// Core over a frozen registry and an authorization policy.
    #[must_use]
    pub fn new(registry: Arc<MethodRegistry>, auth: Arc<dyn AuthPolicy>) -> Self {
        Self {
            registry,
            auth,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The registry this core routes against.
    #[must_use]
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Execute one request to completion.
    ///
    /// Failure order is fixed: unknown method, then invalid params, then
    /// authorization, then the readiness gate. The deadline covers the whole
    /// invocation including any firmware round trip; a session closing
    /// mid-call resolves the call as cancelled.
    #[instrument(skip(self, ctx, request), fields(method = %request.method))]
    pub async fn execute(&self, request: RpcRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let Some(entry) = self.registry.get(&request.method) else {
            debug!(method = %request.method, "unknown method");
            metrics::counter!("forge_rpc_unknown_method").increment(1);
            return Err(RpcError::MethodNotFound {
                method: request.method,
            });
        };
        entry.spec.validate_params(request.params.as_ref())?;

        let default_perms = PermissionContext::default();
        let perms = ctx
            .session()
            .map_or(&default_perms, |s| s.permissions());
        if !self.auth.permit(perms, entry.spec.permission) {
            return Err(RpcError::Forbidden {
                message: format!("{} requires {:?}", request.method, entry.spec.permission),
            });
        }

        if entry.spec.requires_ready && !ctx.link.state().is_ready() {
            return Err(RpcError::NotReady);
        }

        let handler = Arc::clone(&entry.handler);
        let exclusive = entry.spec.exclusive_key.map(|key| self.lock_for(key));
        let params = request.params;

        let invocation = async move {
            let _guard = match &exclusive {
                Some(lock) => Some(lock.lock().await),
                None => None,
            };
            handler.handle(params, ctx).await
        };

        let outcome = match ctx.session() {
            Some(session) => {
                let _in_flight = session.begin_request();
                let cancelled = session.cancel_token();
                tokio::select! {
                    outcome = tokio::time::timeout(request.deadline, invocation) => outcome,
                    () = cancelled.cancelled() => return Err(RpcError::Cancelled),
                }
            }
            None => tokio::time::timeout(request.deadline, invocation).await,
        };

        match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                metrics::counter!("forge_rpc_timeouts").increment(1);
                Err(RpcError::Timeout)
            }
        }
    }

    fn lock_for(&self, key: &'static str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(key)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}
