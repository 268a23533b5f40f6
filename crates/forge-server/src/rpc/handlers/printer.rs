//! `printer.*` methods: firmware queries, the status cache, and
//! subscription management.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::instrument;

use forge_core::errors::RpcError;

use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodHandler;
use crate::subscriptions::set::parse_objects_param;

/// `printer.info`: forwarded to the firmware's introspection call, which is
/// answerable in every connection state.
pub struct PrinterInfo;

#[async_trait]
impl MethodHandler for PrinterInfo {
    #[instrument(skip(self, _params, ctx), fields(method = "printer.info"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        ctx.link.call("info", json!({})).await
    }
}

/// `printer.objects.list`: the firmware's own object list.
pub struct ObjectsList;

#[async_trait]
impl MethodHandler for ObjectsList {
    #[instrument(skip(self, _params, ctx), fields(method = "printer.objects.list"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        ctx.link.call("objects/list", json!({})).await
    }
}

/// `printer.objects.query`: answered from the local snapshot, no firmware
/// round trip. Unknown objects and never-reported fields are absent from
/// the result rather than errors.
pub struct ObjectsQuery;

#[async_trait]
impl MethodHandler for ObjectsQuery {
    #[instrument(skip(self, params, ctx), fields(method = "printer.objects.query"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let wants = parse_objects_param(params.as_ref())?;
        let snapshot = ctx.snapshot.current();
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
        Ok(json!({ "status": status }))
    }
}

/// `printer.objects.subscribe`: merge the request into the session's
/// subscription set and return current values so the client never starts
/// from empty state.
pub struct ObjectsSubscribe;

#[async_trait]
impl MethodHandler for ObjectsSubscribe {
    #[instrument(skip(self, params, ctx), fields(method = "printer.objects.subscribe"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let session = ctx.require_session()?;
        let wants = parse_objects_param(params.as_ref())?;
        let status = ctx
            .subscriptions
            .subscribe(session, &wants, &ctx.snapshot.current());
        Ok(json!({ "status": status }))
    }
}

/// `printer.objects.unsubscribe`: drop interest in the named objects.
pub struct ObjectsUnsubscribe;

#[async_trait]
impl MethodHandler for ObjectsUnsubscribe {
    #[instrument(skip(self, params, ctx), fields(method = "printer.objects.unsubscribe"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let session = ctx.require_session()?;
        let wants = parse_objects_param(params.as_ref())?;
        let objects: Vec<String> = wants.into_keys().collect();
        ctx.subscriptions.unsubscribe(session, &objects);
        Ok(json!(null))
    }
}

/// A method the firmware executes. The server relays params verbatim and
/// returns the firmware's result or error unchanged.
pub struct RemoteMethod {
    remote: &'static str,
}

impl RemoteMethod {
    /// Forwarder for the given firmware-side method name.
    #[must_use]
    pub fn new(remote: &'static str) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl MethodHandler for RemoteMethod {
    #[instrument(skip(self, params, ctx), fields(remote = self.remote))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        ctx.link
            .call(self.remote, params.unwrap_or_else(|| json!({})))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use forge_core::events::EventBus;
    use forge_link::FirmwareLink;
    use forge_settings::ForgeSettings;

    use crate::session::manager::SessionManager;
    use crate::snapshot::SnapshotStore;
    use crate::subscriptions::engine::SubscriptionEngine;

    fn ctx() -> RpcContext {
        let settings = Arc::new(ForgeSettings::default());
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::channel(16);
        let link = FirmwareLink::new(&settings, bus.clone(), tx);
        let sessions = Arc::new(SessionManager::new(64));
        let (subscriptions, _worker) =
            SubscriptionEngine::start(Arc::clone(&sessions), Duration::ZERO);
        RpcContext::new(
            settings,
            link,
            Arc::new(SnapshotStore::new(true)),
            sessions,
            subscriptions,
            bus,
            Arc::new(Vec::new()),
        )
    }

    #[tokio::test]
    async fn query_reads_the_snapshot() {
        let ctx = ctx();
        let _ = ctx.snapshot.apply(
            json!({"extruder": {"temperature": 200.0, "target": 210.0}})
                .as_object()
                .unwrap(),
        );
        let result = ObjectsQuery
            .handle(
                Some(json!({"objects": {"extruder": ["temperature"], "heater_bed": null}})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(result["status"]["extruder"]["temperature"], 200.0);
        assert!(result["status"]["extruder"].get("target").is_none());
        assert!(result["status"].get("heater_bed").is_none());
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_manage_session_state() {
        let ctx = ctx();
        let _ = ctx
            .snapshot
            .apply(json!({"extruder": {"temperature": 200.0}}).as_object().unwrap());
        let session = ctx.sessions.accept();
        let ctx = ctx.with_session(Arc::clone(&session));

        let result = ObjectsSubscribe
            .handle(Some(json!({"objects": {"extruder": null}})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["status"]["extruder"]["temperature"], 200.0);
        assert!(session.subscriptions().set.contains("extruder", "temperature"));

        let _ = ObjectsUnsubscribe
            .handle(Some(json!({"objects": {"extruder": null}})), &ctx)
            .await
            .unwrap();
        assert!(session.subscriptions().set.is_empty());
    }

    #[tokio::test]
    async fn subscribe_without_session_is_rejected() {
        let ctx = ctx();
        let err = ObjectsSubscribe
            .handle(Some(json!({"objects": {"extruder": null}})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn remote_method_fails_fast_when_disconnected() {
        let ctx = ctx();
        let err = RemoteMethod::new("gcode/script")
            .handle(Some(json!({"script": "G28"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::NotReady);
    }
}
