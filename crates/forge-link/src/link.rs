//! The firmware link: connect/reconnect loop, handshake, and receive loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use forge_core::errors::RpcError;
use forge_core::events::{EventBus, ServerEvent};
use forge_core::ids::RequestIdSeq;
use forge_core::state::ConnectionState;
use forge_settings::{BackoffSettings, ForgeSettings, LinkSettings};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{Value, json};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pending::PendingCalls;
use crate::state::LinkState;
use crate::wire::{self, LinkFrame};

/// Outbound write queue depth between `send` callers and the socket writer.
const WRITE_QUEUE: usize = 64;

/// An unsolicited firmware notification, forwarded to the dispatch core.
#[derive(Clone, Debug, PartialEq)]
pub struct FirmwareNotification {
    /// Firmware-side method name.
    pub method: String,
    /// Notification payload.
    pub params: Value,
}

/// The persistent connection to the firmware host.
///
/// One instance lives for the whole server process. [`FirmwareLink::run`]
/// owns the reconnect loop; [`FirmwareLink::call`] is safe to use from any
/// task at any time and fails fast (`NotReady` / `ConnectionLost`) when the
/// link cannot currently carry the call.
pub struct FirmwareLink {
    settings: LinkSettings,
    client_name: String,
    state: LinkState,
    pending: Arc<PendingCalls>,
    ids: RequestIdSeq,
    writer: Mutex<Option<mpsc::Sender<String>>>,
    bus: EventBus,
    notifications: mpsc::Sender<FirmwareNotification>,
    shutdown: CancellationToken,
}

impl FirmwareLink {
    /// Create a link. It stays `Disconnected` until [`Self::run`] is spawned.
    #[must_use]
    pub fn new(
        settings: &ForgeSettings,
        bus: EventBus,
        notifications: mpsc::Sender<FirmwareNotification>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings: settings.link.clone(),
            client_name: settings.name.clone(),
            state: LinkState::new(bus.clone()),
            pending: Arc::new(PendingCalls::new()),
            ids: RequestIdSeq::new(),
            writer: Mutex::new(None),
            bus,
            notifications,
            shutdown: CancellationToken::new(),
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.watch()
    }

    /// Number of calls currently awaiting a firmware response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Stop the link: no further reconnects; outstanding calls fail with
    /// `ConnectionLost` as the run loop exits.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Spawn the reconnect loop on the current runtime.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Issue a call with the configured uniform deadline.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call_with_deadline(
            method,
            params,
            Duration::from_millis(self.settings.request_timeout_ms),
        )
        .await
    }

    /// Issue a call with an explicit deadline.
    ///
    /// Non-introspection calls issued before the handshake completes fail
    /// fast with `NotReady`. Deadline expiry fails the call with `Timeout`
    /// and leaves the connection untouched; a late response for the id is
    /// discarded on arrival.
    pub async fn call_with_deadline(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, RpcError> {
        if !is_introspection(method) && !self.state.current().is_ready() {
            return Err(RpcError::NotReady);
        }
        self.call_raw(method, params, deadline).await
    }

    /// Send without the ready gate. The handshake itself uses this.
    async fn call_raw(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.ids.next_id();
        let rx = self.pending.register(id, deadline);
        let frame = wire::encode_request(id, method, &params);

        let writer = self.writer.lock().clone();
        let Some(tx) = writer else {
            self.pending.forget(id);
            return Err(RpcError::ConnectionLost);
        };
        if tx.send(frame).await.is_err() {
            self.pending.forget(id);
            return Err(RpcError::ConnectionLost);
        }

        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Resolver dropped without an outcome: the table was torn down
            // mid-resolution.
            Ok(Err(_)) => Err(RpcError::ConnectionLost),
            Err(_) => {
                self.pending.forget(id);
                Err(RpcError::Timeout)
            }
        }
    }

    /// The reconnect loop. Runs until [`Self::stop`].
    ///
    /// Each failed connect attempt backs off exponentially (with jitter) up
    /// to the configured cap; a successful connect resets the backoff.
    pub async fn run(self: Arc<Self>) {
        let backoff = self.settings.backoff.clone();
        let mut delay = Duration::from_millis(backoff.initial_ms);

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if !self.state.set(ConnectionState::Connecting) {
                break;
            }

            match UnixStream::connect(&self.settings.socket_path).await {
                Ok(stream) => {
                    info!(path = %self.settings.socket_path, "connected to firmware host");
                    counter!("link_connects_total").increment(1);
                    delay = Duration::from_millis(backoff.initial_ms);

                    Self::run_connection(&self, stream).await;

                    self.pending.fail_all(&RpcError::ConnectionLost);
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    warn!("firmware connection lost");
                    counter!("link_disconnects_total").increment(1);
                    let _ = self.state.set(ConnectionState::Error);
                    let _ = self.state.set(ConnectionState::Disconnected);
                    self.bus.publish(ServerEvent::FirmwareDisconnected);
                }
                Err(e) => {
                    debug!(error = %e, path = %self.settings.socket_path, "firmware connect failed");
                    let _ = self.state.set(ConnectionState::Disconnected);
                }
            }

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(jittered(delay, Duration::from_millis(backoff.max_ms))) => {}
            }
            delay = next_delay(delay, &backoff);
        }

        let _ = self.state.set(ConnectionState::Shutdown);
        self.pending.fail_all(&RpcError::ConnectionLost);
    }

    /// Service one established connection until it drops or is reset.
    async fn run_connection(link: &Arc<Self>, stream: UnixStream) {
        let _ = link.state.set(ConnectionState::Startup);

        let framed = Framed::new(
            stream,
            LinesCodec::new_with_max_length(link.settings.max_line_len),
        );
        let (mut sink, mut lines) = framed.split();

        let (wtx, mut wrx) = mpsc::channel::<String>(WRITE_QUEUE);
        *link.writer.lock() = Some(wtx);

        // Writes are serialized through one task so requests go out in
        // submission order.
        let writer_task = tokio::spawn(async move {
            while let Some(line) = wrx.recv().await {
                if let Err(e) = sink.send(line).await {
                    debug!(error = %e, "firmware write failed");
                    break;
                }
            }
        });

        let reset = CancellationToken::new();
        let handshake_task = tokio::spawn({
            let link = Arc::clone(link);
            let reset = reset.clone();
            async move { link.handshake(&reset).await }
        });

        link.read_loop(&mut lines, &reset).await;

        *link.writer.lock() = None;
        handshake_task.abort();
        writer_task.abort();
    }

    /// Startup handshake: issue the info request and move to Ready when the
    /// firmware reports ready. Otherwise stay in Startup until the firmware
    /// sends `notify_ready`. A handshake timeout resets the connection.
    async fn handshake(&self, reset: &CancellationToken) {
        let params = json!({
            "client_info": {
                "program": self.client_name,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let deadline = Duration::from_millis(self.settings.handshake_timeout_ms);
        match self.call_raw("info", params, deadline).await {
            Ok(result) => {
                let fw_state = result
                    .get("state")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                if fw_state == "ready" {
                    self.mark_ready();
                } else {
                    info!(firmware_state = fw_state, "firmware starting, waiting for notify_ready");
                }
            }
            Err(RpcError::Timeout) => {
                warn!("firmware handshake timed out, resetting connection");
                reset.cancel();
            }
            Err(e) => {
                warn!(error = %e, "firmware handshake failed");
            }
        }
    }

    fn mark_ready(&self) {
        if self.state.current() == ConnectionState::Ready {
            return;
        }
        if self.state.set(ConnectionState::Ready) {
            info!("firmware link ready");
            self.bus.publish(ServerEvent::FirmwareReady);
        }
    }

    /// Read frames until the socket drops, shutdown, or a reset.
    async fn read_loop(
        &self,
        lines: &mut (impl futures::Stream<Item = Result<String, LinesCodecError>> + Unpin),
        reset: &CancellationToken,
    ) {
        let mut malformed = MalformedCounter::new(
            self.settings.malformed_line_threshold,
            Duration::from_millis(self.settings.malformed_window_ms),
        );

        loop {
            let item = tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = reset.cancelled() => return,
                item = lines.next() => item,
            };
            match item {
                None => {
                    debug!("firmware closed the connection");
                    return;
                }
                Some(Ok(line)) => {
                    if !self.handle_line(&line, &mut malformed).await {
                        return;
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    let error = RpcError::MessageTooLarge {
                        limit: self.settings.max_line_len,
                    };
                    warn!(%error, code = error.code(), "dropping oversized firmware line");
                    counter!("link_oversized_lines_total").increment(1);
                    if malformed.record() {
                        warn!("malformed-line threshold exceeded, resetting connection");
                        return;
                    }
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    debug!(error = %e, "firmware socket error");
                    return;
                }
            }
        }
    }

    /// Handle one inbound line. Returns false when the connection should be
    /// reset (malformed-line abuse).
    async fn handle_line(&self, line: &str, malformed: &mut MalformedCounter) -> bool {
        match wire::parse_frame(line) {
            Ok(LinkFrame::Response { id, result }) => {
                if !self.pending.complete(id, result) {
                    // The caller timed out or was cancelled.
                    debug!(id, "discarding response with no pending call");
                }
                true
            }
            Ok(LinkFrame::Notification { method, params }) => {
                if method == "notify_ready" {
                    self.mark_ready();
                    return true;
                }
                if self
                    .notifications
                    .send(FirmwareNotification { method, params })
                    .await
                    .is_err()
                {
                    debug!("firmware notification consumer is gone");
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed firmware line");
                counter!("link_malformed_lines_total").increment(1);
                if malformed.record() {
                    warn!("malformed-line threshold exceeded, resetting connection");
                    return false;
                }
                true
            }
        }
    }
}

/// Only the handshake's info request may run before Ready.
fn is_introspection(method: &str) -> bool {
    method == "info"
}

fn next_delay(current: Duration, backoff: &BackoffSettings) -> Duration {
    let grown = current.mul_f64(backoff.multiplier);
    grown.min(Duration::from_millis(backoff.max_ms))
}

/// Add up to 10% random jitter so restarting clients do not reconnect in
/// lockstep. The result never exceeds the backoff cap.
fn jittered(delay: Duration, cap: Duration) -> Duration {
    let jitter = rand::rng().random_range(0.0..0.1);
    delay.mul_f64(1.0 + jitter).min(cap)
}

/// Rolling count of malformed lines inside a time window.
struct MalformedCounter {
    threshold: u32,
    window: Duration,
    events: VecDeque<Instant>,
}

impl MalformedCounter {
    fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold,
            window,
            events: VecDeque::new(),
        }
    }

    /// Record one malformed line; true when the threshold is now exceeded.
    fn record(&mut self) -> bool {
        let now = Instant::now();
        self.events.push_back(now);
        while let Some(front) = self.events.front() {
            if now.duration_since(*front) > self.window {
                let _ = self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.len() as u32 > self.threshold
    }
}
