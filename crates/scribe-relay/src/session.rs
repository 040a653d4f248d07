//! The per-connection session state machine.
//!
//! One [`Session`] pairs one client connection with one upstream
//! connection. The machine is pure: every input returns the [`Effect`]s
//! the transport layer must execute, in order. This keeps the ordering,
//! locking, and retry invariants testable without sockets:
//!
//! - every client frame received before upstream-open is queued, and the
//!   queue drains exactly once, in FIFO order, before any later frame;
//! - at most one client configuration frame is ever accepted — later ones
//!   are dropped silently (not queued, not forwarded);
//! - the corrective language retry fires at most once per session;
//! - no input produces effects once the session is closed.

use std::collections::VecDeque;

use scribe_core::errors::RelayError;
use scribe_core::frames::{
    parse_config_frame, parse_upstream_control, Notice, QueuedFrame, RelayFrame, UpstreamControl,
};
use scribe_core::locale::resolve_session_language;
use serde_json::Value;
use tracing::{debug, warn};

use crate::negotiation::{corrective_config, rewrite_config_language, NegotiationPolicy};

/// Lifecycle states of a session, in handshake order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Client connected; upstream credential/connect still in flight.
    AwaitingUpstream,
    /// Upstream open, queue drained, no configuration forwarded yet.
    UpstreamOpen,
    /// Configuration forwarded; waiting for the upstream acknowledgement.
    AwaitingConfigAck,
    /// Configuration accepted (or not subject to acknowledgement).
    Configured,
    /// Teardown has begun; no further input is processed.
    Closed,
}

/// Why a session tore down, for logging and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownCause {
    /// The client leg closed first.
    ClientClosed,
    /// The upstream leg closed first.
    UpstreamClosed,
    /// A fatal error closed the session.
    SessionError,
}

impl TeardownCause {
    /// Stable label for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::UpstreamClosed => "upstream_closed",
            Self::SessionError => "error",
        }
    }
}

/// An action the transport layer must execute, in emission order.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Forward a frame to the upstream socket.
    SendUpstream(RelayFrame),
    /// Forward a frame to the client socket.
    SendClient(RelayFrame),
    /// Send a relay-originated JSON notice to the client.
    Notify(Notice),
    /// Close both sockets; no further effects will follow.
    Teardown(TeardownCause),
}

/// Language inputs carried on the connection parameters, used when the
/// configuration frame itself does not name them.
#[derive(Clone, Debug, Default)]
pub struct LanguageHints {
    /// Requested primary language.
    pub primary: Option<String>,
    /// Browser locale hint.
    pub browser: Option<String>,
}

/// Finite-state record for one client/upstream connection pair.
pub struct Session {
    policy: NegotiationPolicy,
    hints: LanguageHints,
    state: SessionState,
    pending: VecDeque<QueuedFrame>,
    config_locked: bool,
    attempted_language: Option<String>,
    fallback_attempted: bool,
    last_config: Option<Value>,
}

impl Session {
    /// Create a session in `AwaitingUpstream`.
    pub fn new(policy: NegotiationPolicy, hints: LanguageHints) -> Self {
        Self {
            policy,
            hints,
            state: SessionState::AwaitingUpstream,
            pending: VecDeque::new(),
            config_locked: false,
            attempted_language: None,
            fallback_attempted: false,
            last_config: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once teardown has begun.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Number of frames waiting for the upstream connection.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// True once the corrective language retry has been issued.
    pub fn fallback_attempted(&self) -> bool {
        self.fallback_attempted
    }

    /// The canonical locale first sent upstream, once configured.
    pub fn attempted_language(&self) -> Option<&str> {
        self.attempted_language.as_deref()
    }

    /// Handle a text frame from the client.
    pub fn on_client_text(&mut self, text: String) -> Vec<Effect> {
        if self.is_closed() {
            return Vec::new();
        }
        match parse_config_frame(&text) {
            Some(config) => self.on_config_frame(config),
            // Opaque text (flush/end control, malformed JSON, anything
            // else) is forwarded verbatim.
            None => self.forward_or_queue(RelayFrame::Text(text), false),
        }
    }

    /// Handle a binary frame from the client. Never parsed.
    pub fn on_client_binary(&mut self, payload: bytes::Bytes) -> Vec<Effect> {
        if self.is_closed() {
            return Vec::new();
        }
        self.forward_or_queue(RelayFrame::Binary(payload), false)
    }

    /// The upstream connection reached its open state: drain the pending
    /// queue in order, then tell the client the proxy is ready.
    pub fn on_upstream_open(&mut self) -> Vec<Effect> {
        if self.is_closed() {
            return Vec::new();
        }
        let mut effects = Vec::with_capacity(self.pending.len() + 1);
        let mut config_drained = false;
        for queued in self.pending.drain(..) {
            config_drained |= queued.is_config;
            effects.push(Effect::SendUpstream(queued.frame));
        }
        self.state = if config_drained {
            self.post_config_state()
        } else {
            SessionState::UpstreamOpen
        };
        effects.push(Effect::Notify(Notice::ProxyReady));
        effects
    }

    /// Handle a text frame from the upstream service.
    pub fn on_upstream_text(&mut self, text: String) -> Vec<Effect> {
        if self.is_closed() {
            return Vec::new();
        }
        if !self.policy.intercepts_config_acks() {
            return vec![Effect::SendClient(RelayFrame::Text(text))];
        }
        match parse_upstream_control(&text) {
            Some(UpstreamControl::ConfigAccepted) => {
                self.state = SessionState::Configured;
                debug!("upstream accepted configuration");
                vec![Effect::SendClient(RelayFrame::Text(text))]
            }
            Some(control) => {
                let reason = control.failure_reason().unwrap_or_default().to_string();
                self.fallback_retry(&reason)
                    .unwrap_or_else(|| vec![Effect::SendClient(RelayFrame::Text(text))])
            }
            None => vec![Effect::SendClient(RelayFrame::Text(text))],
        }
    }

    /// Handle a binary frame from the upstream service. Never parsed.
    pub fn on_upstream_binary(&mut self, payload: bytes::Bytes) -> Vec<Effect> {
        if self.is_closed() {
            return Vec::new();
        }
        vec![Effect::SendClient(RelayFrame::Binary(payload))]
    }

    /// The client leg closed (close frame, transport error, or EOF).
    pub fn on_client_closed(&mut self) -> Vec<Effect> {
        if self.is_closed() {
            return Vec::new();
        }
        self.close();
        vec![Effect::Teardown(TeardownCause::ClientClosed)]
    }

    /// The upstream leg closed.
    pub fn on_upstream_closed(&mut self) -> Vec<Effect> {
        if self.is_closed() {
            return Vec::new();
        }
        self.close();
        vec![Effect::Teardown(TeardownCause::UpstreamClosed)]
    }

    /// A fatal error terminates the session: best-effort error notice to
    /// the client, then teardown.
    pub fn fail(&mut self, error: &RelayError) -> Vec<Effect> {
        if self.is_closed() {
            return Vec::new();
        }
        self.close();
        vec![
            Effect::Notify(Notice::Error {
                error: error.to_string(),
            }),
            Effect::Teardown(TeardownCause::SessionError),
        ]
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
        self.pending.clear();
    }

    /// State after the configuration frame has gone upstream.
    fn post_config_state(&self) -> SessionState {
        if self.policy.intercepts_config_acks() {
            SessionState::AwaitingConfigAck
        } else {
            SessionState::Configured
        }
    }

    /// Accept (or drop) a client configuration frame.
    fn on_config_frame(&mut self, mut config: Value) -> Vec<Effect> {
        if self.config_locked {
            // Configuration is immutable once set: dropped, not queued,
            // not forwarded.
            debug!("dropping configuration frame, configuration already locked");
            return Vec::new();
        }

        if let NegotiationPolicy::LanguageFallback {
            fallback_locale, ..
        } = &self.policy
        {
            let requested = config
                .pointer("/configuration/primaryLanguage")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .or_else(|| self.hints.primary.clone());
            let browser = config
                .pointer("/configuration/browserLocale")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .or_else(|| self.hints.browser.clone());
            let resolved =
                resolve_session_language(requested.as_deref(), browser.as_deref(), fallback_locale);
            if resolved.fell_back {
                debug!(
                    requested = requested.as_deref().unwrap_or(""),
                    resolved = %resolved.tag,
                    "requested locale did not resolve, using fallback"
                );
            }
            rewrite_config_language(&mut config, &resolved.tag);
            self.attempted_language = Some(resolved.tag);
        }

        self.config_locked = true;
        self.last_config = Some(config.clone());
        self.forward_or_queue(RelayFrame::Text(config.to_string()), true)
    }

    /// Queue while the upstream connection is absent, forward once open.
    fn forward_or_queue(&mut self, frame: RelayFrame, is_config: bool) -> Vec<Effect> {
        if self.state == SessionState::AwaitingUpstream {
            self.pending.push_back(QueuedFrame { frame, is_config });
            return Vec::new();
        }
        if is_config {
            self.state = self.post_config_state();
        }
        vec![Effect::SendUpstream(frame)]
    }

    /// The corrective retry, if all three conditions hold: the reason
    /// matches the unsupported-language patterns, no fallback has been
    /// attempted yet, and the session is still live. The corrective frame
    /// is relay-originated and therefore not gated by `config_locked`.
    fn fallback_retry(&mut self, reason: &str) -> Option<Vec<Effect>> {
        let (matched, fallback_locale) = match &self.policy {
            NegotiationPolicy::LanguageFallback {
                matcher,
                fallback_locale,
            } => (matcher.matches(reason), fallback_locale.clone()),
            NegotiationPolicy::Passthrough => return None,
        };
        if !matched || self.fallback_attempted {
            return None;
        }
        let last_config = self.last_config.as_ref()?;

        let corrective = corrective_config(last_config, &fallback_locale);
        let attempted = self
            .attempted_language
            .clone()
            .unwrap_or_else(|| fallback_locale.clone());
        self.fallback_attempted = true;
        warn!(
            attempted = %attempted,
            fallback = %fallback_locale,
            reason = %reason,
            "upstream rejected configured locale, retrying with fallback"
        );
        Some(vec![
            Effect::SendUpstream(RelayFrame::Text(corrective.to_string())),
            Effect::Notify(Notice::fallback_language(attempted, fallback_locale)),
        ])
    }
}
