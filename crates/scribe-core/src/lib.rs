//! # scribe-core
//!
//! Foundation types for the Scribe streaming relay.
//!
//! This crate provides the shared vocabulary the relay and server crates
//! depend on:
//!
//! - **Errors**: [`errors::RelayError`] hierarchy via `thiserror`
//! - **Frames**: [`frames::RelayFrame`] payloads, [`frames::Notice`] client
//!   notifications, upstream control-frame classification
//! - **Interaction IDs**: [`interaction::validate_interaction_id`]
//! - **Locales**: [`locale::canonicalize`] and session language resolution
//! - **Logging**: [`logging::init_tracing`] subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other scribe crates; depends on no
//! sibling crate.

#![deny(unsafe_code)]

pub mod errors;
pub mod frames;
pub mod interaction;
pub mod locale;
pub mod logging;
