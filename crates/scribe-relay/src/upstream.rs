//! Upstream connection: URL construction, connect, frame conversion.

use std::time::Duration;

use scribe_core::errors::RelayError;
use scribe_core::frames::RelayFrame;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

/// The two relay instances sharing this design.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayMode {
    /// Live audio transcription, with language negotiation.
    Transcribe,
    /// Clinical facts extraction stream, plain passthrough.
    Facts,
}

impl RelayMode {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Facts => "facts",
        }
    }

    /// Path segment of the upstream endpoint for this mode.
    fn upstream_path(self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Facts => "facts",
        }
    }
}

/// Connection coordinates of the upstream service.
#[derive(Clone, Debug)]
pub struct UpstreamEndpoint {
    /// WebSocket base URL (`wss://…`, or `ws://…` in tests).
    pub base_url: String,
    /// Tenant/account identifier embedded in the connection path.
    pub tenant_id: String,
    /// Transport-level connect timeout.
    pub connect_timeout: Duration,
}

/// The established upstream socket type.
pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the upstream connection URL for one session:
/// `<base>/tenants/<tenant>/<mode>?token=<bearer>`.
pub fn upstream_url(
    endpoint: &UpstreamEndpoint,
    mode: RelayMode,
    token: &str,
) -> Result<Url, RelayError> {
    let mut url = Url::parse(&endpoint.base_url)
        .map_err(|e| RelayError::UpstreamConnect(format!("invalid upstream base URL: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| RelayError::UpstreamConnect("upstream base URL cannot be a base".into()))?
        .pop_if_empty()
        .extend(["tenants", &endpoint.tenant_id, mode.upstream_path()]);
    let _ = url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Open the upstream WebSocket, bounded by the endpoint's connect timeout.
pub async fn connect(url: &Url, timeout: Duration) -> Result<UpstreamStream, RelayError> {
    let handshake = tokio_tungstenite::connect_async(url.as_str());
    let (stream, response) = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| {
            RelayError::UpstreamConnect(format!(
                "connect timed out after {}ms",
                timeout.as_millis()
            ))
        })?
        .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;
    debug!(status = %response.status(), "upstream websocket open");
    Ok(stream)
}

/// What an inbound upstream message means to the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// A data frame to run through the session machine.
    Frame(RelayFrame),
    /// The peer closed the connection.
    Closed {
        /// Close code, when the peer sent one.
        code: Option<u16>,
        /// Close reason, when the peer sent one.
        reason: Option<String>,
    },
}

/// Classify an upstream message. `None` for ping/pong and raw frames,
/// which the transport handles itself.
pub fn upstream_event(message: Message) -> Option<SocketEvent> {
    match message {
        Message::Text(text) => Some(SocketEvent::Frame(RelayFrame::Text(
            text.as_str().to_owned(),
        ))),
        Message::Binary(payload) => Some(SocketEvent::Frame(RelayFrame::Binary(payload))),
        Message::Close(frame) => Some(SocketEvent::Closed {
            code: frame.as_ref().map(|f| f.code.into()),
            reason: frame
                .as_ref()
                .map(|f| f.reason.as_str().to_owned())
                .filter(|r| !r.is_empty()),
        }),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

/// Convert a relay frame into an upstream WebSocket message.
pub fn to_upstream_message(frame: RelayFrame) -> Message {
    match frame {
        RelayFrame::Text(text) => Message::Text(text.into()),
        RelayFrame::Binary(payload) => Message::Binary(payload),
    }
}
