//! Shared server state.
//!
//! The session registry is process-wide but never global: it lives behind
//! a [`ServerState`] handle passed to every handler, so tests instantiate
//! isolated stores.

use std::sync::Arc;

use crate::config::{ConfigError, ServerConfig};
use crate::store::MemorySessionStore;
use crate::verifier::ProofVerifier;

/// Shared server state, one per running server.
pub struct ServerState {
    config: ServerConfig,
    jwt_secret: Option<Vec<u8>>,
    store: Arc<MemorySessionStore>,
    verifier: Arc<dyn ProofVerifier>,
}

/// The handle handlers receive.
pub type SharedState = Arc<ServerState>;

impl ServerState {
    /// Validates the configuration and assembles the state.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is unusable.
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn ProofVerifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let jwt_secret = config.jwt_secret_bytes()?;
        Ok(Self {
            config,
            jwt_secret,
            store: Arc::new(MemorySessionStore::new()),
            verifier,
        })
    }

    /// The server configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The decoded JWT signing key, if one is configured.
    #[must_use]
    pub fn jwt_secret(&self) -> Option<&[u8]> {
        self.jwt_secret.as_deref()
    }

    /// The session store.
    #[must_use]
    pub fn store(&self) -> &Arc<MemorySessionStore> {
        &self.store
    }

    /// The proof verifier.
    #[must_use]
    pub fn verifier(&self) -> &Arc<dyn ProofVerifier> {
        &self.verifier
    }
}
