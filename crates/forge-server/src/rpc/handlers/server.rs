//! `server.*` methods.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::instrument;

use forge_core::errors::RpcError;

use crate::rpc::context::RpcContext;
use crate::rpc::registry::MethodHandler;

/// `server.info`: process identity and the current firmware state. Always
/// answerable, including while the firmware is down.
pub struct ServerInfo;

#[async_trait]
impl MethodHandler for ServerInfo {
    #[instrument(skip(self, _params, ctx), fields(method = "server.info"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!({
            "serverName": ctx.settings.name,
            "serverVersion": env!("CARGO_PKG_VERSION"),
            "firmwareState": ctx.link.state().to_string(),
            "components": &*ctx.components,
            "connections": ctx.sessions.count(),
            "pendingFirmwareCalls": ctx.link.pending_calls(),
            "startedAt": ctx.started_at.to_rfc3339(),
        }))
    }
}

/// `server.connection.identify`: a client names itself; the reply carries
/// the connection id used for log correlation.
pub struct Identify;

#[async_trait]
impl MethodHandler for Identify {
    #[instrument(skip(self, params, ctx), fields(method = "server.connection.identify"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let session = ctx.require_session()?;
        let params = params.unwrap_or(Value::Null);
        let name = params
            .get("clientName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let version = params
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        session.identify(name, version);
        Ok(json!({ "connectionId": session.id().as_str() }))
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
            Arc::new(vec!["klippy_connection".to_string()]),
        )
    }

    #[tokio::test]
    async fn server_info_reports_state_and_components() {
        let ctx = ctx();
        let info = ServerInfo.handle(None, &ctx).await.unwrap();
        assert_eq!(info["serverName"], "forge");
        assert_eq!(info["firmwareState"], "disconnected");
        assert_eq!(info["components"][0], "klippy_connection");
        assert_eq!(info["connections"], 0);
    }

    #[tokio::test]
    async fn identify_requires_a_session() {
        let ctx = ctx();
        let err = Identify
            .handle(Some(json!({"clientName": "mainsail"})), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidParams { .. }));

        let session = ctx.sessions.accept();
        let ctx = ctx.with_session(Arc::clone(&session));
        let reply = Identify
            .handle(
                Some(json!({"clientName": "mainsail", "version": "2.9"})),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(reply["connectionId"], session.id().as_str());
        assert_eq!(session.identity().unwrap().version, "2.9");
    }
}
