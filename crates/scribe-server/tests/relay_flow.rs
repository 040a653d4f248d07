//! End-to-end relay tests: a real server, a real client socket, and an
//! in-process fake upstream speech service.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use scribe_core::errors::RelayError;
use scribe_relay::{StaticTokenSource, TokenSource};
use scribe_server::{router, AppState};
use scribe_settings::ScribeSettings;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

const TIMEOUT: Duration = Duration::from_secs(5);

type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type UpstreamWs = WebSocketStream<TcpStream>;

/// A fake upstream: counts connections and hands each accepted WebSocket
/// to the test. The optional gate delays the handshake so client frames
/// pile up in the relay's pending queue.
struct FakeUpstream {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    accepted: UnboundedReceiver<UpstreamWs>,
    gate: Arc<Notify>,
}

impl FakeUpstream {
    async fn spawn(gated: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let (tx, accepted) = unbounded_channel();

        let count = Arc::clone(&connections);
        let gate_task = Arc::clone(&gate);
        let _ = tokio::spawn(async move {
            if gated {
                gate_task.notified().await;
            }
            while let Ok((stream, _)) = listener.accept().await {
                let _ = count.fetch_add(1, Ordering::SeqCst);
                let ws = accept_async(stream).await.unwrap();
                if tx.send(ws).is_err() {
                    return;
                }
            }
        });

        Self {
            addr,
            connections,
            accepted,
            gate,
        }
    }

    fn open_gate(&self) {
        self.gate.notify_one();
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn next_connection(&mut self) -> UpstreamWs {
        tokio::time::timeout(TIMEOUT, self.accepted.recv())
            .await
            .expect("timed out waiting for upstream connection")
            .expect("fake upstream stopped")
    }
}

/// Start the relay server against the given upstream address.
async fn spawn_relay(upstream_addr: SocketAddr, token_source: Arc<dyn TokenSource>) -> SocketAddr {
    let mut settings = ScribeSettings::default();
    settings.upstream.base_url = format!("ws://{upstream_addr}");
    settings.upstream.tenant_id = "test-tenant".to_string();
    settings.upstream.connect_timeout_ms = 5_000;

    let state = AppState::new(Arc::new(settings), token_source, None);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state);
    let _ = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect_client(relay: SocketAddr, path_and_query: &str) -> ClientWs {
    let (ws, _) = connect_async(format!("ws://{relay}{path_and_query}"))
        .await
        .expect("client connect failed");
    ws
}

async fn recv<S>(ws: &mut S) -> Message
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    tokio::time::timeout(TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended while a frame was expected")
        .expect("websocket transport error")
}

/// Receive the next data frame, skipping transport-level ping/pong.
async fn recv_data<S>(ws: &mut S) -> Message
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match recv(ws).await {
            Message::Ping(_) | Message::Pong(_) => {}
            other => return other,
        }
    }
}

async fn recv_json<S>(ws: &mut S) -> serde_json::Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    match recv_data(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("frame is not JSON"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn expect_closed<S>(ws: &mut S)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
        {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(other)) => panic!("unexpected frame while waiting for close: {other:?}"),
        }
    }
}

fn config_frame(language: &str) -> Message {
    Message::Text(
        format!(
            r#"{{"type":"config","configuration":{{"primaryLanguage":"{language}","diarization":true}}}}"#
        )
        .into(),
    )
}

struct FailingTokenSource;

#[async_trait]
impl TokenSource for FailingTokenSource {
    async fn bearer_token(&self) -> Result<String, RelayError> {
        Err(RelayError::TokenAcquisition(
            "token endpoint returned 503".into(),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Invalid session parameters
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_interaction_id_gets_one_error_frame_and_close() {
    let upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    for query in [
        "/ws/transcribe?interactionId=",
        "/ws/transcribe?interactionId=null",
        "/ws/transcribe?interactionId=NULL",
        "/ws/transcribe?interactionId=a%20b",
        "/ws/transcribe",
    ] {
        let mut client = connect_client(relay, query).await;
        let error = recv_json(&mut client).await;
        assert_eq!(error["type"], "error", "query {query}");
        assert!(error["error"].as_str().unwrap().contains("interaction id"));
        expect_closed(&mut client).await;
    }

    // No upstream connection was ever attempted.
    assert_eq!(upstream.connection_count(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Pre-connect queueing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn frames_sent_before_upstream_open_arrive_in_order() {
    let mut upstream = FakeUpstream::spawn(true).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let mut client =
        connect_client(relay, "/ws/transcribe?interactionId=int-1&primaryLanguage=de-DE").await;

    // The upstream gate is closed: everything below lands in the pending queue.
    client.send(config_frame("de-DE")).await.unwrap();
    client.send(Message::Binary(b"one".as_slice().into())).await.unwrap();
    client.send(Message::Binary(b"two".as_slice().into())).await.unwrap();
    client.send(Message::Binary(b"three".as_slice().into())).await.unwrap();
    client
        .send(Message::Text(r#"{"type":"flush"}"#.into()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    upstream.open_gate();
    let mut upstream_ws = upstream.next_connection().await;

    // Drained strictly in arrival order, configuration first.
    let config = recv_data(&mut upstream_ws).await;
    match &config {
        Message::Text(text) => {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(value["type"], "config");
            assert_eq!(value["configuration"]["primaryLanguage"], "de-DE");
        }
        other => panic!("expected config frame first, got {other:?}"),
    }
    for expected in [b"one".as_slice(), b"two", b"three"] {
        match recv_data(&mut upstream_ws).await {
            Message::Binary(payload) => assert_eq!(payload.as_ref(), expected),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
    let flush = recv_json(&mut upstream_ws).await;
    assert_eq!(flush["type"], "flush");

    // The client hears proxy_ready once the queue has drained.
    let ready = recv_json(&mut client).await;
    assert_eq!(ready["type"], "proxy_ready");

    // Frames after the drain are forwarded directly, still in order.
    client.send(Message::Binary(b"four".as_slice().into())).await.unwrap();
    match recv_data(&mut upstream_ws).await {
        Message::Binary(payload) => assert_eq!(payload.as_ref(), b"four"),
        other => panic!("expected binary frame, got {other:?}"),
    }

    assert_eq!(upstream.connection_count(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration locking
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_configuration_frame_has_no_observable_effect() {
    let mut upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let mut client = connect_client(relay, "/ws/transcribe?interactionId=int-2").await;
    let ready = recv_json(&mut client).await;
    assert_eq!(ready["type"], "proxy_ready");
    let mut upstream_ws = upstream.next_connection().await;

    client.send(config_frame("de-DE")).await.unwrap();
    client.send(config_frame("fr-FR")).await.unwrap();
    client
        .send(Message::Text(r#"{"type":"flush"}"#.into()))
        .await
        .unwrap();

    let first = recv_json(&mut upstream_ws).await;
    assert_eq!(first["type"], "config");
    assert_eq!(first["configuration"]["primaryLanguage"], "de-DE");

    // The second configuration frame was dropped, not forwarded: the next
    // thing upstream sees is the flush.
    let second = recv_json(&mut upstream_ws).await;
    assert_eq!(second["type"], "flush");
}

// ─────────────────────────────────────────────────────────────────────────────
// Language fallback
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn denied_language_retries_once_then_forwards() {
    let mut upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let mut client = connect_client(relay, "/ws/transcribe?interactionId=int-3").await;
    assert_eq!(recv_json(&mut client).await["type"], "proxy_ready");
    let mut upstream_ws = upstream.next_connection().await;

    client.send(config_frame("de-DE")).await.unwrap();
    let config = recv_json(&mut upstream_ws).await;
    assert_eq!(config["configuration"]["primaryLanguage"], "de-DE");

    // First denial: corrective configuration upstream, one warning to the
    // client, denial itself not forwarded.
    upstream_ws
        .send(Message::Text(
            r#"{"type":"CONFIG_DENIED","reason":"unsupported language: de-DE"}"#.into(),
        ))
        .await
        .unwrap();

    let corrective = recv_json(&mut upstream_ws).await;
    assert_eq!(corrective["type"], "config");
    assert_eq!(corrective["configuration"]["primaryLanguage"], "en-US");
    assert_eq!(corrective["configuration"]["diarization"], true);

    let warning = recv_json(&mut client).await;
    assert_eq!(warning["type"], "warning");
    assert_eq!(warning["code"], "FALLBACK_LANGUAGE");
    assert_eq!(warning["attempted"], "de-DE");
    assert_eq!(warning["fallback"], "en-US");

    // Second denial: no further retry, forwarded to the client unchanged.
    upstream_ws
        .send(Message::Text(
            r#"{"type":"CONFIG_DENIED","reason":"unsupported language: en-US"}"#.into(),
        ))
        .await
        .unwrap();
    let denied = recv_json(&mut client).await;
    assert_eq!(denied["type"], "CONFIG_DENIED");
    assert_eq!(denied["reason"], "unsupported language: en-US");

    // Acceptance and transcripts then relay normally.
    upstream_ws
        .send(Message::Text(r#"{"type":"CONFIG_ACCEPTED"}"#.into()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut client).await["type"], "CONFIG_ACCEPTED");

    upstream_ws
        .send(Message::Text(
            r#"{"type":"transcript","text":"patient presents with"}"#.into(),
        ))
        .await
        .unwrap();
    let transcript = recv_json(&mut client).await;
    assert_eq!(transcript["type"], "transcript");

    client.send(Message::Binary(b"audio".as_slice().into())).await.unwrap();
    match recv_data(&mut upstream_ws).await {
        Message::Binary(payload) => assert_eq!(payload.as_ref(), b"audio"),
        other => panic!("expected audio frame, got {other:?}"),
    }
}

#[tokio::test]
async fn unresolvable_primary_language_is_replaced_before_upstream() {
    // End-to-end: primaryLanguage=xx-ZZ resolves to the fallback locale
    // before the configuration ever reaches upstream.
    let mut upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let mut client =
        connect_client(relay, "/ws/transcribe?interactionId=int-4&primaryLanguage=xx-ZZ").await;
    assert_eq!(recv_json(&mut client).await["type"], "proxy_ready");
    let mut upstream_ws = upstream.next_connection().await;

    client
        .send(Message::Text(
            r#"{"type":"config","configuration":{}}"#.into(),
        ))
        .await
        .unwrap();
    let config = recv_json(&mut upstream_ws).await;
    assert_eq!(config["configuration"]["primaryLanguage"], "en-US");

    // Even so, a denial still gets its single corrective attempt.
    upstream_ws
        .send(Message::Text(
            r#"{"type":"CONFIG_DENIED","reason":"unsupported language"}"#.into(),
        ))
        .await
        .unwrap();
    let corrective = recv_json(&mut upstream_ws).await;
    assert_eq!(corrective["configuration"]["primaryLanguage"], "en-US");
    let warning = recv_json(&mut client).await;
    assert_eq!(warning["code"], "FALLBACK_LANGUAGE");

    upstream_ws
        .send(Message::Text(r#"{"type":"CONFIG_ACCEPTED"}"#.into()))
        .await
        .unwrap();
    assert_eq!(recv_json(&mut client).await["type"], "CONFIG_ACCEPTED");
}

// ─────────────────────────────────────────────────────────────────────────────
// Facts relay
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn facts_relay_never_rewrites_or_retries() {
    let mut upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let mut client = connect_client(relay, "/ws/facts?interactionId=int-5").await;
    assert_eq!(recv_json(&mut client).await["type"], "proxy_ready");
    let mut upstream_ws = upstream.next_connection().await;

    // Configuration passes through with its original (unresolved) locale.
    client.send(config_frame("xx-ZZ")).await.unwrap();
    let config = recv_json(&mut upstream_ws).await;
    assert_eq!(config["configuration"]["primaryLanguage"], "xx-ZZ");

    // A denial is forwarded untouched; no corrective frame follows it.
    upstream_ws
        .send(Message::Text(
            r#"{"type":"CONFIG_DENIED","reason":"unsupported language"}"#.into(),
        ))
        .await
        .unwrap();
    let denied = recv_json(&mut client).await;
    assert_eq!(denied["type"], "CONFIG_DENIED");

    client
        .send(Message::Text(r#"{"type":"flush"}"#.into()))
        .await
        .unwrap();
    // The very next upstream frame is the flush — no corrective config was
    // injected in between.
    let next = recv_json(&mut upstream_ws).await;
    assert_eq!(next["type"], "flush");

    // Still exactly-once configuration in facts mode.
    client.send(config_frame("de-DE")).await.unwrap();
    client
        .send(Message::Text(r#"{"type":"end"}"#.into()))
        .await
        .unwrap();
    let next = recv_json(&mut upstream_ws).await;
    assert_eq!(next["type"], "end");
}

// ─────────────────────────────────────────────────────────────────────────────
// Teardown symmetry
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upstream_close_closes_client() {
    let mut upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let mut client = connect_client(relay, "/ws/transcribe?interactionId=int-6").await;
    assert_eq!(recv_json(&mut client).await["type"], "proxy_ready");
    let mut upstream_ws = upstream.next_connection().await;

    upstream_ws.close(None).await.unwrap();
    expect_closed(&mut client).await;
}

#[tokio::test]
async fn client_close_closes_upstream() {
    let mut upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let mut client = connect_client(relay, "/ws/transcribe?interactionId=int-7").await;
    assert_eq!(recv_json(&mut client).await["type"], "proxy_ready");
    let mut upstream_ws = upstream.next_connection().await;

    client.close(None).await.unwrap();
    expect_closed(&mut upstream_ws).await;
}

#[tokio::test]
async fn near_simultaneous_close_is_idempotent() {
    let mut upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let mut client = connect_client(relay, "/ws/transcribe?interactionId=int-8").await;
    assert_eq!(recv_json(&mut client).await["type"], "proxy_ready");
    let mut upstream_ws = upstream.next_connection().await;

    // Close both legs at once; the relay must not wedge or double-send.
    let (client_res, upstream_res) =
        tokio::join!(client.close(None), upstream_ws.close(None));
    let _ = client_res;
    let _ = upstream_res;

    // The server is still healthy: a fresh session works end to end.
    let mut client2 = connect_client(relay, "/ws/transcribe?interactionId=int-8b").await;
    assert_eq!(recv_json(&mut client2).await["type"], "proxy_ready");
    let _ = upstream.next_connection().await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Establishment failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn token_failure_reports_error_and_closes() {
    let upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(FailingTokenSource)).await;

    let mut client = connect_client(relay, "/ws/transcribe?interactionId=int-9").await;
    let error = recv_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert!(error["error"].as_str().unwrap().contains("token"));
    expect_closed(&mut client).await;

    assert_eq!(upstream.connection_count(), 0);
}

#[tokio::test]
async fn upstream_connect_failure_reports_error_and_closes() {
    // Reserve a port and free it so the connect is refused.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let relay = spawn_relay(dead_addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let mut client = connect_client(relay, "/ws/transcribe?interactionId=int-10").await;
    let error = recv_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert!(error["error"].as_str().unwrap().contains("connect"));
    expect_closed(&mut client).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Service surface
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_reports_service() {
    let upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let body: serde_json::Value = reqwest::get(format!("http://{relay}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["name"], "scribe");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_is_404_when_disabled() {
    let upstream = FakeUpstream::spawn(false).await;
    let relay = spawn_relay(upstream.addr, Arc::new(StaticTokenSource::new("tok"))).await;

    let response = reqwest::get(format!("http://{relay}/metrics")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
