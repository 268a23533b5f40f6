//! Shared handles passed to every method handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use forge_core::errors::RpcError;
use forge_core::events::EventBus;
use forge_link::FirmwareLink;
use forge_settings::ForgeSettings;

use crate::session::manager::SessionManager;
use crate::session::session::ClientSession;
use crate::snapshot::SnapshotStore;
use crate::subscriptions::engine::SubscriptionEngine;

/// Everything a handler may need: the firmware link, the status snapshot,
/// session and subscription machinery, and the event bus.
///
/// The context is cheap to clone (all `Arc`s) and is re-stamped with the
/// originating session per call via [`with_session`](Self::with_session).
#[derive(Clone)]
pub struct RpcContext {
    /// Active settings at server start.
    pub settings: Arc<ForgeSettings>,
    /// The firmware connection.
    pub link: Arc<FirmwareLink>,
    /// Cached firmware object state.
    pub snapshot: Arc<SnapshotStore>,
    /// Live client sessions.
    pub sessions: Arc<SessionManager>,
    /// Subscription fan-out.
    pub subscriptions: Arc<SubscriptionEngine>,
    /// Internal event bus.
    pub bus: EventBus,
    /// Names of loaded components, in start order.
    pub components: Arc<Vec<String>>,
    /// When the server process came up.
    pub started_at: DateTime<Utc>,
    session: Option<Arc<ClientSession>>,
}

impl RpcContext {
    /// Base context with no originating session.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        settings: Arc<ForgeSettings>,
        link: Arc<FirmwareLink>,
        snapshot: Arc<SnapshotStore>,
        sessions: Arc<SessionManager>,
        subscriptions: Arc<SubscriptionEngine>,
        bus: EventBus,
        components: Arc<Vec<String>>,
    ) -> Self {
        Self {
            settings,
            link,
            snapshot,
            sessions,
            subscriptions,
            bus,
            components,
            started_at: Utc::now(),
            session: None,
        }
    }

    /// The same context stamped with an originating session.
    #[must_use]
    pub fn with_session(&self, session: Arc<ClientSession>) -> Self {
        let mut ctx = self.clone();
        ctx.session = Some(session);
        ctx
    }

    /// Originating session, if the call came over a persistent connection.
    #[must_use]
    pub fn session(&self) -> Option<&Arc<ClientSession>> {
        self.session.as_ref()
    }

    /// The originating session, or `InvalidParams` for methods that only
    /// make sense on a persistent connection.
    pub fn require_session(&self) -> Result<&Arc<ClientSession>, RpcError> {
        self.session.as_ref().ok_or_else(|| RpcError::InvalidParams {
            message: "this method requires a persistent connection".into(),
        })
    }
}
