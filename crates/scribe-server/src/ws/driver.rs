//! The per-session driver task.
//!
//! One task per session owns both connection halves and merges their
//! events into a single serialized handling path, as the session machine
//! requires. The only suspension point besides socket IO is the upstream
//! establishment (token acquisition + handshake); client frames arriving
//! in that window are handed to the machine, which queues them, so the
//! client leg stays responsive throughout.
//!
//! Cancellation is close-driven: when the client leg terminates during
//! establishment, the pinned connect future is dropped, aborting the
//! in-flight credential call or handshake.

use std::pin::pin;

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use scribe_core::errors::RelayError;
use scribe_core::frames::{Notice, RelayFrame};
use scribe_core::interaction::validate_interaction_id;
use scribe_relay::upstream::{self, to_upstream_message, SocketEvent, UpstreamStream};
use scribe_relay::{Effect, LanguageHints, RelayMode, Session, TeardownCause};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::metrics as names;
use crate::params::SessionQuery;
use crate::routes::AppState;

type ClientSink = SplitSink<WebSocket, ClientMessage>;
type ClientStream = SplitStream<WebSocket>;
type UpstreamSink = SplitSink<UpstreamStream, UpstreamMessage>;

/// Run one relay session to completion.
///
/// Spawned by the upgrade handlers; never returns an error — every failure
/// path ends in a best-effort error frame and symmetric teardown.
pub async fn run_session(socket: WebSocket, query: SessionQuery, state: AppState, mode: RelayMode) {
    let session_id = Uuid::now_v7();
    let span = tracing::info_span!("relay_session", session = %session_id, mode = mode.as_str());
    run_session_inner(socket, query, state, mode)
        .instrument(span)
        .await;
}

async fn run_session_inner(
    socket: WebSocket,
    query: SessionQuery,
    state: AppState,
    mode: RelayMode,
) {
    let interaction_id = match validate_interaction_id(query.interaction_id.as_deref()) {
        Ok(id) => id.to_owned(),
        Err(err) => {
            reject(socket, &err, mode).await;
            return;
        }
    };

    info!(
        interaction = %interaction_id,
        primary_language = ?query.primary_language,
        output_locale = ?query.output_locale,
        "relay session opened"
    );
    counter!(names::RELAY_SESSIONS_TOTAL, "mode" => mode.as_str()).increment(1);
    gauge!(names::RELAY_SESSIONS_ACTIVE).increment(1.0);
    let started = std::time::Instant::now();

    let hints = LanguageHints {
        primary: query.primary_language.clone(),
        browser: query.browser_locale.clone(),
    };
    let mut session = Session::new(state.policy_for(mode), hints);
    let (mut client_tx, mut client_rx) = socket.split();

    let cause = drive(&mut session, &mut client_tx, &mut client_rx, &state, mode).await;

    gauge!(names::RELAY_SESSIONS_ACTIVE).decrement(1.0);
    counter!(names::RELAY_TEARDOWNS_TOTAL, "cause" => cause).increment(1);
    histogram!(names::RELAY_SESSION_DURATION_SECONDS, "mode" => mode.as_str())
        .record(started.elapsed().as_secs_f64());
    info!(cause, "relay session closed");
}

/// Reject a session whose interaction id failed validation: one error
/// frame, then close. No upstream work is attempted.
async fn reject(mut socket: WebSocket, err: &RelayError, mode: RelayMode) {
    warn!(error = %err, "rejecting session before any upstream attempt");
    counter!(names::RELAY_SESSIONS_REJECTED_TOTAL, "mode" => mode.as_str()).increment(1);
    let notice = Notice::Error {
        error: err.to_string(),
    };
    let _ = socket.send(ClientMessage::Text(notice.to_json().into())).await;
    let _ = socket.send(ClientMessage::Close(None)).await;
}

/// Establish the upstream leg, then relay until either side terminates.
/// Returns the teardown cause label.
async fn drive(
    session: &mut Session,
    client_tx: &mut ClientSink,
    client_rx: &mut ClientStream,
    state: &AppState,
    mode: RelayMode,
) -> &'static str {
    // Phase 1: acquire a fresh credential and open the upstream socket,
    // buffering client traffic meanwhile.
    let mut connect = pin!(establish_upstream(state, mode));
    let upstream_stream = loop {
        tokio::select! {
            established = &mut connect => match established {
                Ok(stream) => break stream,
                Err(err) => {
                    warn!(error = %err, "upstream establishment failed");
                    counter!(names::RELAY_ERRORS_TOTAL, "kind" => err.kind()).increment(1);
                    let effects = session.fail(&err);
                    let _ = apply(effects, client_tx, None).await;
                    let _ = client_tx.send(ClientMessage::Close(None)).await;
                    return TeardownCause::SessionError.as_str();
                }
            },
            incoming = client_rx.next() => {
                let effects = match client_event(incoming) {
                    ClientEvent::Frame(RelayFrame::Text(text)) => session.on_client_text(text),
                    ClientEvent::Frame(RelayFrame::Binary(payload)) => session.on_client_binary(payload),
                    ClientEvent::Ignored => Vec::new(),
                    ClientEvent::Closed => {
                        // Dropping the pinned connect future cancels the
                        // in-flight credential call or handshake.
                        let _ = session.on_client_closed();
                        debug!("client closed while upstream connect in flight");
                        return TeardownCause::ClientClosed.as_str();
                    }
                };
                if let Flow::Stop(cause) = apply(effects, client_tx, None).await {
                    return cause;
                }
            }
        }
    };

    // Phase 2: drain the pending queue, then steady-state relay.
    counter!(names::RELAY_QUEUED_FRAMES_TOTAL, "mode" => mode.as_str())
        .increment(session.pending_len() as u64);
    let (mut upstream_tx, mut upstream_rx) = upstream_stream.split();
    let effects = session.on_upstream_open();
    if let Flow::Stop(cause) = apply(effects, client_tx, Some(&mut upstream_tx)).await {
        close_both(client_tx, &mut upstream_tx).await;
        return cause;
    }
    debug!("upstream open, pending queue drained");

    loop {
        let effects = tokio::select! {
            incoming = client_rx.next() => match client_event(incoming) {
                ClientEvent::Frame(RelayFrame::Text(text)) => session.on_client_text(text),
                ClientEvent::Frame(RelayFrame::Binary(payload)) => session.on_client_binary(payload),
                ClientEvent::Ignored => Vec::new(),
                ClientEvent::Closed => session.on_client_closed(),
            },
            incoming = upstream_rx.next() => match incoming {
                Some(Ok(message)) => match upstream::upstream_event(message) {
                    Some(SocketEvent::Frame(RelayFrame::Text(text))) => session.on_upstream_text(text),
                    Some(SocketEvent::Frame(RelayFrame::Binary(payload))) => session.on_upstream_binary(payload),
                    Some(SocketEvent::Closed { code, reason }) => {
                        debug!(?code, ?reason, "upstream sent close frame");
                        session.on_upstream_closed()
                    }
                    None => Vec::new(),
                },
                Some(Err(e)) => {
                    let err = RelayError::Upstream(e.to_string());
                    warn!(error = %err, "upstream socket error");
                    counter!(names::RELAY_ERRORS_TOTAL, "kind" => err.kind()).increment(1);
                    session.fail(&err)
                }
                None => session.on_upstream_closed(),
            },
        };
        if let Flow::Stop(cause) = apply(effects, client_tx, Some(&mut upstream_tx)).await {
            close_both(client_tx, &mut upstream_tx).await;
            return cause;
        }
    }
}

async fn establish_upstream(
    state: &AppState,
    mode: RelayMode,
) -> Result<UpstreamStream, RelayError> {
    let token = state.token_source.bearer_token().await?;
    let url = upstream::upstream_url(&state.upstream, mode, &token)?;
    debug!("connecting upstream");
    upstream::connect(&url, state.upstream.connect_timeout).await
}

/// Whether the session continues after applying a batch of effects.
enum Flow {
    Continue,
    Stop(&'static str),
}

/// Execute session effects in order against the two sinks.
///
/// A send failure on either leg stops the session; teardown itself is
/// handled by the caller and must not throw.
async fn apply(
    effects: Vec<Effect>,
    client_tx: &mut ClientSink,
    mut upstream_tx: Option<&mut UpstreamSink>,
) -> Flow {
    for effect in effects {
        match effect {
            Effect::SendUpstream(frame) => {
                let Some(ref mut tx) = upstream_tx else {
                    // The machine queues while the upstream leg is absent,
                    // so this indicates a driver bug, not a client one.
                    warn!("dropping upstream-bound frame with no upstream leg");
                    continue;
                };
                if let Err(e) = tx.send(to_upstream_message(frame)).await {
                    warn!(error = %e, "failed to forward frame upstream");
                    return Flow::Stop("upstream_send_failed");
                }
                counter!(names::RELAY_FRAMES_TOTAL, "direction" => "to_upstream").increment(1);
            }
            Effect::SendClient(frame) => {
                if let Err(e) = client_tx.send(to_client_message(frame)).await {
                    debug!(error = %e, "failed to forward frame to client");
                    return Flow::Stop("client_send_failed");
                }
                counter!(names::RELAY_FRAMES_TOTAL, "direction" => "to_client").increment(1);
            }
            Effect::Notify(notice) => {
                if matches!(notice, Notice::Warning { .. }) {
                    counter!(names::RELAY_FALLBACK_RETRIES_TOTAL).increment(1);
                }
                if let Err(e) = client_tx
                    .send(ClientMessage::Text(notice.to_json().into()))
                    .await
                {
                    debug!(error = %e, "failed to send notice to client");
                    return Flow::Stop("client_send_failed");
                }
            }
            Effect::Teardown(cause) => return Flow::Stop(cause.as_str()),
        }
    }
    Flow::Continue
}

/// Best-effort close of both legs. Idempotent: errors mean the leg is
/// already gone.
async fn close_both(client_tx: &mut ClientSink, upstream_tx: &mut UpstreamSink) {
    let _ = client_tx.send(ClientMessage::Close(None)).await;
    let _ = client_tx.flush().await;
    let _ = upstream_tx.send(UpstreamMessage::Close(None)).await;
    let _ = upstream_tx.flush().await;
}

/// What an inbound client message means to the relay.
enum ClientEvent {
    Frame(RelayFrame),
    Ignored,
    Closed,
}

fn client_event(incoming: Option<Result<ClientMessage, axum::Error>>) -> ClientEvent {
    match incoming {
        Some(Ok(ClientMessage::Text(text))) => {
            ClientEvent::Frame(RelayFrame::Text(text.as_str().to_owned()))
        }
        Some(Ok(ClientMessage::Binary(payload))) => {
            ClientEvent::Frame(RelayFrame::Binary(payload))
        }
        Some(Ok(ClientMessage::Ping(_) | ClientMessage::Pong(_))) => ClientEvent::Ignored,
        Some(Ok(ClientMessage::Close(frame))) => {
            debug!(?frame, "client sent close frame");
            ClientEvent::Closed
        }
        Some(Err(e)) => {
            debug!(error = %e, "client transport error");
            ClientEvent::Closed
        }
        None => ClientEvent::Closed,
    }
}

fn to_client_message(frame: RelayFrame) -> ClientMessage {
    match frame {
        RelayFrame::Text(text) => ClientMessage::Text(text.into()),
        RelayFrame::Binary(payload) => ClientMessage::Binary(payload),
    }
}
