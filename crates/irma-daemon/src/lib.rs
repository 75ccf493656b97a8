//! # irma-daemon
//!
//! Server-side runtime for the IRMA attribute-based credential protocol.
//!
//! Requestors submit session requests at `/session/`; the server creates a
//! session, hands back a QR payload, and drives the protocol with the IRMA
//! client at `/irma/{token}`. The session lifecycle lives in an in-memory
//! [`store::MemorySessionStore`]; a background [`reaper`] task expires
//! sessions that outlive their timeouts.
//!
//! The cryptographic verification of client responses is behind the
//! [`verifier::ProofVerifier`] trait; the session runtime treats it as a
//! pure function set.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod notifier;
pub mod reaper;
pub mod server;
pub mod session;
pub mod state;
pub mod store;
pub mod verifier;

pub use config::ServerConfig;
pub use state::{ServerState, SharedState};
