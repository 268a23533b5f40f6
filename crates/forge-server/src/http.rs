//! Client-facing transports: JSON-RPC over HTTP POST and over WebSocket.
//!
//! HTTP calls are one-shot: no session, no subscriptions, the response is
//! the HTTP body. A WebSocket upgrade creates one [`ClientSession`]; the
//! read loop parses frames and dispatches each on its own task so a slow
//! handler never blocks the connection, while the write loop drains the
//! session's outbound queue.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, post};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use forge_core::rpc::{ClientRequest, RpcRequest, response_err, response_ok};

use crate::rpc::context::RpcContext;
use crate::rpc::dispatch::DispatchCore;
use crate::session::session::{ClientSession, CloseReason};

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    /// Request router.
    pub dispatch: Arc<DispatchCore>,
    /// Base context, stamped per session.
    pub ctx: RpcContext,
}

impl AppState {
    fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.ctx.settings.session.request_timeout_ms)
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rpc", post(http_rpc))
        .route("/websocket", any(ws_upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn http_rpc(State(state): State<AppState>, body: String) -> Json<Value> {
    let request = match ClientRequest::parse(&body) {
        Ok(request) => request,
        Err(error) => return Json(response_err(None, &error)),
    };
    let id = request.id.clone();
    let outcome = state
        .dispatch
        .execute(
            RpcRequest {
                id: request.id,
                method: request.method,
                params: request.params,
                session: None,
                deadline: state.request_deadline(),
            },
            &state.ctx,
        )
        .await;
    let Some(id) = id else {
        // A notification gets no JSON-RPC response body.
        return Json(Value::Null);
    };
    Json(match outcome {
        Ok(result) => response_ok(&id, result),
        Err(error) => response_err(Some(&id), &error),
    })
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session = state.ctx.sessions.accept();
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn({
        let session = Arc::clone(&session);
        async move {
            while let Some(out) = session.next_outbound().await {
                if sink
                    .send(Message::Text(out.text().to_owned().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let _ = sink.close().await;
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let state = state.clone();
                let session = Arc::clone(&session);
                let _ = tokio::spawn(async move {
                    dispatch_frame(&state, &session, text.as_str()).await;
                });
            }
            // Pings are answered by the library; binary frames are not part
            // of the protocol.
            Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }

    debug!(session = %session.id(), "websocket closed");
    state
        .ctx
        .sessions
        .close_session(session.id(), CloseReason::ClientDisconnect);
    let _ = writer.await;
}

/// Parse and execute one frame from a WebSocket client.
async fn dispatch_frame(state: &AppState, session: &Arc<ClientSession>, text: &str) {
    let request = match ClientRequest::parse(text) {
        Ok(request) => request,
        Err(error) => {
            let _ = session.send_direct(&response_err(None, &error));
            return;
        }
    };
    let id = request.id.clone();
    let expects_response = request.expects_response();
    let ctx = state.ctx.with_session(Arc::clone(session));
    let outcome = state
        .dispatch
        .execute(
            RpcRequest {
                id: request.id,
                method: request.method,
                params: request.params,
                session: Some(session.id().clone()),
                deadline: state.request_deadline(),
            },
            &ctx,
        )
        .await;
    if !expects_response {
        return;
    }
    let id = id.unwrap_or(Value::Null);
    let frame = match outcome {
        Ok(result) => response_ok(&id, result),
        Err(error) => response_err(Some(&id), &error),
    };
    let _ = session.send_direct(&frame);
}
