//! Top-level wiring: builds every subsystem, brings components up, and
//! serves the transports until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use forge_core::errors::ComponentError;
use forge_core::events::EventBus;
use forge_link::FirmwareLink;
use forge_settings::ForgeSettings;

use crate::auth::LevelPolicy;
use crate::bridge;
use crate::components::{Component, ComponentRegistry};
use crate::http::{AppState, router};
use crate::rpc::context::RpcContext;
use crate::rpc::dispatch::DispatchCore;
use crate::rpc::handlers::register_builtin;
use crate::rpc::registry::MethodRegistry;
use crate::session::manager::SessionManager;
use crate::snapshot::SnapshotStore;
use crate::subscriptions::engine::SubscriptionEngine;

/// Buffered firmware notifications between the link and the pump.
const NOTIFICATION_BUFFER: usize = 256;

/// The assembled server.
///
/// [`build`](Self::build) wires everything and starts the background tasks,
/// including the firmware reconnect loop; [`serve`](Self::serve) runs the
/// HTTP/WebSocket listener until [`shutdown`](Self::shutdown).
pub struct ForgeServer {
    settings: Arc<ForgeSettings>,
    link: Arc<FirmwareLink>,
    dispatch: Arc<DispatchCore>,
    ctx: RpcContext,
    components: Arc<ComponentRegistry>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ForgeServer {
    /// Wire the server and bring components up.
    ///
    /// Component init errors (duplicate methods, bad dependency graphs,
    /// failed init hooks) are fatal here, before any request is served.
    pub async fn build(
        settings: Arc<ForgeSettings>,
        components: Vec<Arc<dyn Component>>,
    ) -> Result<Self, ComponentError> {
        let bus = EventBus::new();
        let (notify_tx, notify_rx) = tokio::sync::mpsc::channel(NOTIFICATION_BUFFER);
        let link = FirmwareLink::new(&settings, bus.clone(), notify_tx);
        let snapshot = Arc::new(SnapshotStore::new(
            settings.subscriptions.structural_equality,
        ));
        let sessions = Arc::new(SessionManager::new(settings.session.queue_bound));
        let (engine, engine_worker) = SubscriptionEngine::start(
            Arc::clone(&sessions),
            Duration::from_millis(settings.subscriptions.coalesce_window_ms),
        );

        let mut registry = MethodRegistry::new();
        register_builtin(&mut registry)?;
        let components = Arc::new(ComponentRegistry::new(components)?);
        components.bring_up(&mut registry, &bus).await?;
        let registry = Arc::new(registry);
        info!(methods = registry.len(), components = components.names().len(), "dispatch table frozen");

        let dispatch = Arc::new(DispatchCore::new(registry, Arc::new(LevelPolicy)));
        let ctx = RpcContext::new(
            Arc::clone(&settings),
            Arc::clone(&link),
            Arc::clone(&snapshot),
            Arc::clone(&sessions),
            Arc::clone(&engine),
            bus.clone(),
            Arc::new(components.names()),
        );

        let shutdown = CancellationToken::new();
        let tasks = vec![
            engine_worker,
            bridge::spawn_notification_pump(
                notify_rx,
                Arc::clone(&snapshot),
                Arc::clone(&engine),
                bus.clone(),
            ),
            bridge::spawn_ready_watcher(
                Arc::clone(&link),
                snapshot,
                engine,
                Arc::clone(&components),
                &bus,
                shutdown.clone(),
            ),
            bridge::spawn_event_forwarder(Arc::clone(&sessions), &bus, shutdown.clone()),
            Arc::clone(&link).start(),
        ];

        Ok(Self {
            settings,
            link,
            dispatch,
            ctx,
            components,
            shutdown,
            tasks,
        })
    }

    /// The base request context.
    #[must_use]
    pub fn ctx(&self) -> &RpcContext {
        &self.ctx
    }

    /// The axum router for this server's state.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        router(AppState {
            dispatch: Arc::clone(&self.dispatch),
            ctx: self.ctx.clone(),
        })
    }

    /// Serve HTTP and WebSocket clients until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let shutdown = self.shutdown.clone();
        info!(addr = %listener.local_addr()?, "listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }

    /// Orderly shutdown: components in reverse order under the grace
    /// period, then the firmware link, then every client session.
    pub async fn shutdown(mut self) {
        info!("shutting down");
        self.components
            .shutdown(Duration::from_millis(self.settings.components.shutdown_grace_ms))
            .await;
        self.link.stop();
        self.shutdown.cancel();
        self.ctx.sessions.close_all();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
