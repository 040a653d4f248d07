//! # scribe-relay
//!
//! The relay protocol engine: everything between "a client WebSocket
//! arrived" and "frames are flowing both ways" that does not touch a
//! concrete HTTP server.
//!
//! - [`session::Session`]: the per-connection finite-state record. Pure and
//!   IO-free — each input (client frame, upstream frame, open, close)
//!   returns the [`session::Effect`]s the transport layer must execute, so
//!   every ordering and negotiation invariant is unit-testable without a
//!   socket.
//! - [`negotiation`]: locale rewriting, the unsupported-language matcher,
//!   and the at-most-once corrective retry.
//! - [`token`]: the [`token::TokenSource`] seam and its reqwest
//!   implementation. Tokens are short-lived; one fresh token per session,
//!   never cached.
//! - [`upstream`]: upstream URL construction and the tokio-tungstenite
//!   connector.
//!
//! ## Crate Position
//!
//! Standalone (depends only on `scribe-core`). Depended on by
//! `scribe-server`, which owns the sockets and drives the state machine.

#![deny(unsafe_code)]

pub mod negotiation;
pub mod session;
pub mod token;
pub mod upstream;

pub use negotiation::{NegotiationPolicy, UnsupportedLanguageMatcher};
pub use session::{Effect, LanguageHints, Session, SessionState, TeardownCause};
pub use token::{HttpTokenSource, StaticTokenSource, TokenSource};
pub use upstream::{RelayMode, SocketEvent, UpstreamEndpoint};
