//! Error hierarchy for the relay.
//!
//! Every fatal session error is eventually rendered to the client as a
//! single JSON error frame before both sockets close, so each variant
//! carries a human-readable message rather than structured detail.

use thiserror::Error;

/// Result alias used across the relay crates.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that terminate (or prevent) a relay session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The client supplied a missing or structurally invalid interaction id.
    /// Fatal before any upstream work starts.
    #[error("invalid interaction id: {0}")]
    InvalidInteractionId(String),

    /// Acquiring the upstream bearer credential failed.
    #[error("token acquisition failed: {0}")]
    TokenAcquisition(String),

    /// The upstream WebSocket handshake failed or timed out.
    #[error("upstream connect failed: {0}")]
    UpstreamConnect(String),

    /// The established upstream socket reported a transport error.
    #[error("upstream transport error: {0}")]
    Upstream(String),

    /// The client socket reported a transport error.
    #[error("client transport error: {0}")]
    Client(String),
}

impl RelayError {
    /// Short stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInteractionId(_) => "invalid_interaction_id",
            Self::TokenAcquisition(_) => "token_acquisition",
            Self::UpstreamConnect(_) => "upstream_connect",
            Self::Upstream(_) => "upstream",
            Self::Client(_) => "client",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = RelayError::TokenAcquisition("503 from token endpoint".into());
        assert_eq!(
            err.to_string(),
            "token acquisition failed: 503 from token endpoint"
        );
    }

    #[test]
    fn kinds_are_stable_snake_case() {
        let errs = [
            RelayError::InvalidInteractionId(String::new()),
            RelayError::TokenAcquisition(String::new()),
            RelayError::UpstreamConnect(String::new()),
            RelayError::Upstream(String::new()),
            RelayError::Client(String::new()),
        ];
        for err in errs {
            let kind = err.kind();
            assert!(
                kind.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "kind '{kind}' must be snake_case"
            );
        }
    }
}
