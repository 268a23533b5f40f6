//! End-to-end tests: a fake firmware on a Unix socket, the real server, and
//! real WebSocket/HTTP clients.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::{Framed, LinesCodec};

use forge_server::ForgeServer;
use forge_settings::ForgeSettings;

const WAIT: Duration = Duration::from_secs(5);

/// Handle to push frames at the connected server.
struct FakeFirmware {
    push: mpsc::UnboundedSender<Value>,
}

impl FakeFirmware {
    fn notify_status(&self, status: Value) {
        self.push
            .send(json!({"method": "status_update", "params": status}))
            .unwrap();
    }
}

/// Fake firmware: ready handshake, a small object set, and `gcode/script`
/// acks. Accepts reconnects; pushed frames go to the latest connection.
fn spawn_firmware(listener: UnixListener) -> FakeFirmware {
    let (push, mut push_rx) = mpsc::unbounded_channel::<Value>();
    let _ = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let mut framed = Framed::new(stream, LinesCodec::new());
            loop {
                tokio::select! {
                    line = framed.next() => {
                        let Some(Ok(line)) = line else { break };
                        let v: Value = serde_json::from_str(&line).unwrap();
                        let id = v["id"].as_u64().unwrap();
                        let reply = match v["method"].as_str().unwrap() {
                            "info" => json!({"id": id, "result": {"state": "ready"}}),
                            "objects/list" => {
                                json!({"id": id, "result": {"objects": ["extruder", "toolhead"]}})
                            }
                            "objects/subscribe" => json!({"id": id, "result": {"status": {
                                "extruder": {"temperature": 25.0, "target": 0.0},
                                "toolhead": {"homed_axes": ""},
                            }}}),
                            "gcode/script" => json!({"id": id, "result": "ok"}),
                            other => panic!("unexpected firmware method {other}"),
                        };
                        framed.send(reply.to_string()).await.unwrap();
                    }
                    frame = push_rx.recv() => {
                        let Some(frame) = frame else { return };
                        framed.send(frame.to_string()).await.unwrap();
                    }
                }
            }
        }
    });
    FakeFirmware { push }
}

struct Harness {
    server: Option<ForgeServer>,
    addr: std::net::SocketAddr,
    firmware: FakeFirmware,
    _dir: tempfile::TempDir,
}

async fn start(tune: impl FnOnce(&mut ForgeSettings)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("fw.sock");
    let firmware = spawn_firmware(UnixListener::bind(&socket).unwrap());

    let mut settings = ForgeSettings::default();
    settings.link.socket_path = socket.to_string_lossy().into_owned();
    settings.link.request_timeout_ms = 2_000;
    settings.link.handshake_timeout_ms = 2_000;
    settings.link.backoff.initial_ms = 10;
    settings.link.backoff.max_ms = 50;
    settings.session.request_timeout_ms = 2_000;
    settings.subscriptions.coalesce_window_ms = 50;
    tune(&mut settings);

    let server = ForgeServer::build(Arc::new(settings), Vec::new())
        .await
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.router();
    let _ = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Harness {
        server: Some(server),
        addr,
        firmware,
        _dir: dir,
    }
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect_ws(addr: std::net::SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/websocket"))
        .await
        .unwrap();
    ws
}

async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("frame within deadline")
            .expect("connection open")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn rpc(ws: &mut WsClient, id: u64, method: &str, params: Value) -> Value {
    ws.send(Message::Text(
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();
    // Skip notifications until the matching response arrives.
    loop {
        let frame = next_json(ws).await;
        if frame["id"] == id {
            return frame;
        }
    }
}

/// Wait until the server reports the firmware ready and the snapshot has
/// been primed with the initial subscription.
async fn wait_ready(ws: &mut WsClient) {
    timeout(WAIT, async {
        let mut id = 1_000;
        loop {
            let info = rpc(ws, id, "server.info", json!({})).await;
            id += 1;
            if info["result"]["firmwareState"] == "ready" {
                let q = rpc(
                    ws,
                    id,
                    "printer.objects.query",
                    json!({"objects": {"extruder": null}}),
                )
                .await;
                id += 1;
                if q["result"]["status"]["extruder"]["temperature"].is_number() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("firmware never became ready");
}

#[tokio::test]
async fn identify_subscribe_and_coalesced_deltas() {
    let harness = start(|_| {}).await;
    let mut ws = connect_ws(harness.addr).await;
    wait_ready(&mut ws).await;

    let reply = rpc(
        &mut ws,
        1,
        "server.connection.identify",
        json!({"clientName": "e2e", "version": "1.0"}),
    )
    .await;
    assert!(reply["result"]["connectionId"].is_string());

    // Subscribe returns the primed snapshot values immediately.
    let reply = rpc(
        &mut ws,
        2,
        "printer.objects.subscribe",
        json!({"objects": {"extruder": ["temperature"]}}),
    )
    .await;
    assert_eq!(reply["result"]["status"]["extruder"]["temperature"], 25.0);

    // Two rapid changes inside the coalescing window arrive as one delta
    // carrying the latest value.
    harness
        .firmware
        .notify_status(json!({"extruder": {"temperature": 200.0}}));
    harness
        .firmware
        .notify_status(json!({"extruder": {"temperature": 201.0}}));

    let delta = next_json(&mut ws).await;
    assert_eq!(delta["method"], "notify_status_update");
    assert_eq!(delta["params"][0]["extruder"]["temperature"], 201.0);

    // No second delta follows.
    assert!(timeout(Duration::from_millis(200), ws.next()).await.is_err());
}

#[tokio::test]
async fn unknown_method_and_parse_errors() {
    let harness = start(|_| {}).await;
    let mut ws = connect_ws(harness.addr).await;

    let reply = rpc(&mut ws, 1, "server.bogus", json!({})).await;
    assert_eq!(reply["error"]["code"], -32601);

    ws.send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["error"]["code"], -32700);
    assert_eq!(reply["id"], Value::Null);

    // The connection survives both failures.
    let reply = rpc(&mut ws, 2, "server.info", json!({})).await;
    assert_eq!(reply["result"]["serverName"], "forge");
}

#[tokio::test]
async fn ready_gate_rejects_until_handshake() {
    // No firmware socket: the link keeps retrying and never reaches ready.
    let dir = tempfile::tempdir().unwrap();
    let mut settings = ForgeSettings::default();
    settings.link.socket_path = dir.path().join("missing.sock").to_string_lossy().into_owned();
    settings.link.backoff.initial_ms = 10;
    settings.link.backoff.max_ms = 50;
    settings.session.request_timeout_ms = 1_000;
    let server = ForgeServer::build(Arc::new(settings), Vec::new())
        .await
        .unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.router();
    let _ = tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

    let mut ws = connect_ws(addr).await;
    let reply = rpc(&mut ws, 1, "printer.objects.list", json!({})).await;
    assert_eq!(reply["error"]["code"], -32002);

    // server.info still answers while the firmware is down.
    let reply = rpc(&mut ws, 2, "server.info", json!({})).await;
    assert_ne!(reply["result"]["firmwareState"], "ready");
    server.shutdown().await;
}

#[tokio::test]
async fn gcode_passthrough_and_invalid_params() {
    let harness = start(|_| {}).await;
    let mut ws = connect_ws(harness.addr).await;
    wait_ready(&mut ws).await;

    let reply = rpc(
        &mut ws,
        1,
        "printer.gcode.script",
        json!({"script": "G28"}),
    )
    .await;
    assert_eq!(reply["result"], "ok");

    let reply = rpc(&mut ws, 2, "printer.gcode.script", json!({})).await;
    assert_eq!(reply["error"]["code"], -32602);
}

#[tokio::test]
async fn http_one_shot_requests() {
    let harness = start(|_| {}).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/rpc", harness.addr);

    let reply: Value = client
        .post(&url)
        .body(json!({"jsonrpc": "2.0", "id": 1, "method": "server.info"}).to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["result"]["serverName"], "forge");

    // Subscriptions need a persistent connection.
    let reply: Value = client
        .post(&url)
        .body(
            json!({"jsonrpc": "2.0", "id": 2, "method": "printer.objects.subscribe",
                   "params": {"objects": {"extruder": null}}})
            .to_string(),
        )
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["error"]["code"], -32602);
}

#[tokio::test]
async fn query_is_served_from_the_snapshot() {
    let harness = start(|_| {}).await;
    let mut ws = connect_ws(harness.addr).await;
    wait_ready(&mut ws).await;

    harness
        .firmware
        .notify_status(json!({"toolhead": {"homed_axes": "xyz"}}));
    // Let the pump apply the update.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reply = rpc(
        &mut ws,
        1,
        "printer.objects.query",
        json!({"objects": {"toolhead": null, "nope": null}}),
    )
    .await;
    assert_eq!(reply["result"]["status"]["toolhead"]["homed_axes"], "xyz");
    assert!(reply["result"]["status"].get("nope").is_none());
}

#[tokio::test]
async fn second_subscribe_is_idempotent() {
    let harness = start(|_| {}).await;
    let mut ws = connect_ws(harness.addr).await;
    wait_ready(&mut ws).await;

    let wants = json!({"objects": {"extruder": ["temperature"]}});
    let _ = rpc(&mut ws, 1, "printer.objects.subscribe", wants.clone()).await;
    let _ = rpc(&mut ws, 2, "printer.objects.subscribe", wants).await;

    harness
        .firmware
        .notify_status(json!({"extruder": {"temperature": 77.0}}));
    let delta = next_json(&mut ws).await;
    assert_eq!(delta["params"][0]["extruder"]["temperature"], 77.0);
    // One delta, not one per subscribe call.
    assert!(timeout(Duration::from_millis(200), ws.next()).await.is_err());
}

#[tokio::test]
async fn two_clients_get_independent_deltas() {
    let harness = start(|_| {}).await;
    let mut a = connect_ws(harness.addr).await;
    let mut b = connect_ws(harness.addr).await;
    wait_ready(&mut a).await;

    let _ = rpc(
        &mut a,
        1,
        "printer.objects.subscribe",
        json!({"objects": {"extruder": null}}),
    )
    .await;
    let _ = rpc(
        &mut b,
        1,
        "printer.objects.subscribe",
        json!({"objects": {"toolhead": null}}),
    )
    .await;

    harness.firmware.notify_status(json!({
        "extruder": {"temperature": 99.0},
        "toolhead": {"homed_axes": "xy"},
    }));

    let delta = next_json(&mut a).await;
    assert_eq!(delta["params"][0]["extruder"]["temperature"], 99.0);
    assert!(delta["params"][0].get("toolhead").is_none());

    let delta = next_json(&mut b).await;
    assert_eq!(delta["params"][0]["toolhead"]["homed_axes"], "xy");
    assert!(delta["params"][0].get("extruder").is_none());
}

#[tokio::test]
async fn graceful_shutdown_closes_sessions() {
    let mut harness = start(|_| {}).await;
    let mut ws = connect_ws(harness.addr).await;
    wait_ready(&mut ws).await;

    harness.server.take().unwrap().shutdown().await;
    // The write loop closes the socket once the session queue shuts down.
    let closed = timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                _ => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket never closed after shutdown");
}
