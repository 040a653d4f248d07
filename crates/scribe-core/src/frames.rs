//! Wire vocabulary for both legs of a relay session.
//!
//! Three frame families cross the relay:
//!
//! - **Payload frames** ([`RelayFrame`]): opaque text or binary data moved
//!   between client and upstream. Binary frames are never parsed.
//! - **Notices** ([`Notice`]): JSON messages the relay itself emits to the
//!   client (`proxy_ready`, `error`, `warning`).
//! - **Upstream control frames** ([`UpstreamControl`]): configuration
//!   acknowledgements the relay intercepts on the upstream leg.
//!
//! A client text frame is *the configuration frame* iff it parses as JSON
//! with `type == "config"`. Everything else — malformed JSON included — is
//! forwarded verbatim as opaque data.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Warning code sent when the requested locale was replaced by the fallback.
pub const FALLBACK_LANGUAGE_CODE: &str = "FALLBACK_LANGUAGE";

/// An opaque frame relayed between the two legs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayFrame {
    /// Text payload, forwarded as a WebSocket text frame.
    Text(String),
    /// Binary payload (raw audio), forwarded as-is.
    Binary(Bytes),
}

impl RelayFrame {
    /// Payload size in bytes, for logging and metrics.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// True when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A client frame buffered while the upstream connection is being
/// established. The configuration frame is tagged so the drain can place
/// the session into the right negotiation state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuedFrame {
    /// The buffered payload.
    pub frame: RelayFrame,
    /// True when this is the (rewritten) configuration frame.
    pub is_config: bool,
}

/// JSON notices the relay emits to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// The upstream connection is open and the pending queue has drained.
    ProxyReady,
    /// A fatal session error; both sockets close after this frame.
    Error {
        /// Human-readable failure description.
        error: String,
    },
    /// The requested locale was rejected and the fallback locale is in use.
    Warning {
        /// Always [`FALLBACK_LANGUAGE_CODE`].
        code: String,
        /// The canonical locale originally sent upstream.
        attempted: String,
        /// The fallback locale actually configured.
        fallback: String,
    },
}

impl Notice {
    /// Build the fallback-language warning.
    pub fn fallback_language(attempted: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self::Warning {
            code: FALLBACK_LANGUAGE_CODE.to_string(),
            attempted: attempted.into(),
            fallback: fallback.into(),
        }
    }

    /// Serialize to the JSON text sent over the client socket.
    pub fn to_json(&self) -> String {
        // Serialization of these closed enum shapes cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parse a client text payload as the session configuration frame.
///
/// Returns the parsed JSON only when the payload is valid JSON with
/// `type == "config"`; any other payload is opaque passthrough data.
pub fn parse_config_frame(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text).ok()?;
    (value.get("type")?.as_str()? == "config").then_some(value)
}

/// Configuration acknowledgements emitted by the upstream service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamControl {
    /// The configuration was accepted; transcript frames follow.
    ConfigAccepted,
    /// The configuration was rejected.
    ConfigDenied {
        /// Free-text rejection reason from upstream.
        reason: String,
    },
    /// Upstream gave up waiting for (or acting on) the configuration.
    ConfigTimeout {
        /// Free-text timeout reason from upstream.
        reason: String,
    },
}

impl UpstreamControl {
    /// The denial/timeout reason, if this is a failure acknowledgement.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::ConfigAccepted => None,
            Self::ConfigDenied { reason } | Self::ConfigTimeout { reason } => Some(reason),
        }
    }
}

/// Classify an upstream text payload as a configuration acknowledgement.
///
/// Anything that is not one of the three known control types — transcript
/// frames, domain events, malformed JSON — returns `None` and is forwarded
/// to the client untouched.
pub fn parse_upstream_control(text: &str) -> Option<UpstreamControl> {
    let value: Value = serde_json::from_str(text).ok()?;
    let reason = |v: &Value| {
        v.get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    match value.get("type")?.as_str()? {
        "CONFIG_ACCEPTED" => Some(UpstreamControl::ConfigAccepted),
        "CONFIG_DENIED" => Some(UpstreamControl::ConfigDenied {
            reason: reason(&value),
        }),
        "CONFIG_TIMEOUT" => Some(UpstreamControl::ConfigTimeout {
            reason: reason(&value),
        }),
        _ => None,
    }
}
