//! Router and shared application state.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use scribe_relay::negotiation::NegotiationPolicy;
use scribe_relay::{RelayMode, TokenSource, UnsupportedLanguageMatcher, UpstreamEndpoint};
use scribe_settings::ScribeSettings;
use tower_http::trace::TraceLayer;

use crate::params::SessionQuery;
use crate::ws;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Immutable settings snapshot taken at startup.
    pub settings: Arc<ScribeSettings>,
    /// Per-session bearer-credential source.
    pub token_source: Arc<dyn TokenSource>,
    /// Upstream connection coordinates derived from settings.
    pub upstream: UpstreamEndpoint,
    /// Prometheus handle for `/metrics`; absent when metrics are disabled.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build state from a settings snapshot and a token source.
    pub fn new(
        settings: Arc<ScribeSettings>,
        token_source: Arc<dyn TokenSource>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let upstream = UpstreamEndpoint {
            base_url: settings.upstream.base_url.clone(),
            tenant_id: settings.upstream.tenant_id.clone(),
            connect_timeout: Duration::from_millis(settings.upstream.connect_timeout_ms),
        };
        Self {
            settings,
            token_source,
            upstream,
            metrics,
        }
    }

    /// Negotiation behavior for a relay mode: the transcription relay gets
    /// the language-fallback protocol, the facts relay is passthrough.
    pub fn policy_for(&self, mode: RelayMode) -> NegotiationPolicy {
        match mode {
            RelayMode::Transcribe => NegotiationPolicy::LanguageFallback {
                matcher: UnsupportedLanguageMatcher::new(
                    &self.settings.relay.unsupported_language_patterns,
                ),
                fallback_locale: self.settings.relay.fallback_locale.clone(),
            },
            RelayMode::Facts => NegotiationPolicy::Passthrough,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .route("/ws/transcribe", get(ws_transcribe))
        .route("/ws/facts", get(ws_facts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "scribe",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

async fn ws_transcribe(
    ws: WebSocketUpgrade,
    Query(query): Query<SessionQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| ws::run_session(socket, query, state, RelayMode::Transcribe))
}

async fn ws_facts(
    ws: WebSocketUpgrade,
    Query(query): Query<SessionQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| ws::run_session(socket, query, state, RelayMode::Facts))
}
