//! JSON-RPC wire types for the client-facing surface.
//!
//! Clients speak JSON-RPC 2.0 over HTTP and WebSocket. The firmware link has
//! its own, slightly different framing (no `jsonrpc` member) and keeps its
//! wire types in `forge-link`; what is shared lives here.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::errors::RpcError;
use crate::ids::SessionId;

/// An incoming client request, parsed from one JSON-RPC frame.
///
/// `id` is the client's correlation value and is echoed back verbatim; a
/// request without an id is a notification and gets no response.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientRequest {
    /// Protocol version marker. Tolerated when absent.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Client-chosen correlation id.
    #[serde(default)]
    pub id: Option<Value>,
    /// Dotted method name, e.g. `printer.objects.subscribe`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

impl ClientRequest {
    /// Parse a single request frame.
    pub fn parse(text: &str) -> Result<Self, RpcError> {
        serde_json::from_str(text).map_err(|e| RpcError::Parse {
            message: e.to_string(),
        })
    }

    /// Whether the client expects a response.
    #[must_use]
    pub fn expects_response(&self) -> bool {
        self.id.is_some()
    }
}

/// A request as routed through the dispatch core.
///
/// Carries the originating session (None for internal calls) and the
/// uniform per-call deadline.
#[derive(Clone, Debug)]
pub struct RpcRequest {
    /// Client correlation id, echoed back in the response.
    pub id: Option<Value>,
    /// Dotted method name.
    pub method: String,
    /// Method parameters.
    pub params: Option<Value>,
    /// Originating session, if any.
    pub session: Option<SessionId>,
    /// Deadline for the whole invocation, including any firmware round trip.
    pub deadline: Duration,
}

impl RpcRequest {
    /// Internal request with no originating session.
    #[must_use]
    pub fn internal(method: impl Into<String>, params: Option<Value>, deadline: Duration) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
            session: None,
            deadline,
        }
    }
}

/// Success response frame.
#[must_use]
pub fn response_ok(id: &Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

/// Error response frame. `id` is null when the request id was unparseable.
#[must_use]
pub fn response_err(id: Option<&Value>, error: &RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id.cloned().unwrap_or(Value::Null),
        "error": error.to_wire(),
    })
}

/// Server-initiated notification frame (no id, no response expected).
#[must_use]
pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}
