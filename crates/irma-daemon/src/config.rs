//! Server configuration.
//!
//! Configuration is read from a TOML file and overridden by CLI flags in
//! the binary. Validation happens once at startup; a configuration error
//! aborts the server before it binds a socket.

use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use irma_core::identifiers::{AttributePattern, AttributeTypeIdentifier};
use irma_core::messages::Action;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum age in seconds of a session request JWT, when not configured.
pub const DEFAULT_MAX_REQUEST_AGE_SECS: u64 = 300;

/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 8088;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid TOML.
    #[error("failed to parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration is structurally valid but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Attribute patterns a party may use, per session type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    /// Patterns for attributes that may be requested in disclosures.
    pub disclosing: Vec<AttributePattern>,
    /// Patterns for attributes that may be requested in signatures.
    pub signing: Vec<AttributePattern>,
    /// Patterns for attributes that may be issued.
    pub issuing: Vec<AttributePattern>,
}

impl Permissions {
    fn patterns(&self, action: Action) -> &[AttributePattern] {
        match action {
            Action::Disclosing => &self.disclosing,
            Action::Signing => &self.signing,
            Action::Issuing => &self.issuing,
        }
    }

    /// Checks that every attribute is matched by at least one pattern for
    /// the given session type.
    ///
    /// # Errors
    ///
    /// Returns the first attribute no pattern matches.
    pub fn authorize(
        &self,
        action: Action,
        attributes: &[AttributeTypeIdentifier],
    ) -> Result<(), AttributeTypeIdentifier> {
        let patterns = self.patterns(action);
        for attribute in attributes {
            if !patterns.iter().any(|p| p.matches(attribute)) {
                return Err(attribute.clone());
            }
        }
        Ok(())
    }

    fn merge(mut self, other: &Self) -> Self {
        self.disclosing.extend(other.disclosing.iter().cloned());
        self.signing.extend(other.signing.iter().cloned());
        self.issuing.extend(other.issuing.iter().cloned());
        self
    }
}

/// An authenticated requestor known to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requestor {
    /// Base64-encoded HMAC key the requestor signs its JWTs with.
    pub key: String,
    /// Permissions specific to this requestor, in addition to the global
    /// bucket.
    #[serde(default)]
    pub permissions: Permissions,
}

impl Requestor {
    /// Decodes the requestor's HMAC key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the key is not valid base64.
    pub fn key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        STANDARD
            .decode(&self.key)
            .map_err(|e| ConfigError::Invalid(format!("requestor key is not valid base64: {e}")))
    }
}

/// The server configuration.
///
/// The permission fields are optional so that their defaults can depend
/// on production mode; use [`global_permissions`](Self::global_permissions)
/// to resolve them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// External URL of the server, as reachable by IRMA clients. Becomes
    /// the base of the session URL in QR payloads.
    pub url: String,

    /// Address to listen on. Empty means all interfaces.
    pub listen_addr: String,

    /// Port to listen on.
    pub port: u16,

    /// Whether to skip requestor authentication. When unset, defaults to
    /// `true` outside production and `false` in production.
    pub no_auth: Option<bool>,

    /// Production mode: tightens permission and authentication defaults.
    pub production: bool,

    /// Maximum age in seconds of a session request JWT.
    pub max_request_age: Option<u64>,

    /// Issuer name the server signs session statements under.
    pub jwt_issuer: Option<String>,

    /// Base64-encoded HMAC key for server-signed session statements.
    pub jwt_secret: Option<String>,

    /// Attribute patterns all requestors may verify. Defaults to `["*"]`
    /// outside production.
    pub disclose_perms: Option<Vec<AttributePattern>>,

    /// Attribute patterns all requestors may request in signatures.
    /// Defaults to `["*"]` outside production.
    pub sign_perms: Option<Vec<AttributePattern>>,

    /// Attribute patterns all requestors may issue. Defaults to deny.
    pub issue_perms: Option<Vec<AttributePattern>>,

    /// Known requestors by name, matched against the JWT `iss` field.
    pub requestors: HashMap<String, Requestor>,
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Whether requestor authentication is enabled.
    #[must_use]
    pub fn requestor_auth_enabled(&self) -> bool {
        !self.no_auth.unwrap_or(!self.production)
    }

    /// The configured maximum session request JWT age.
    #[must_use]
    pub fn max_request_age(&self) -> u64 {
        self.max_request_age.unwrap_or(DEFAULT_MAX_REQUEST_AGE_SECS)
    }

    /// The port to listen on, falling back to the default when unset.
    #[must_use]
    pub fn listen_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_PORT
        } else {
            self.port
        }
    }

    /// The issuer name for server-signed session statements.
    #[must_use]
    pub fn jwt_issuer(&self) -> &str {
        self.jwt_issuer.as_deref().unwrap_or("irmaserver")
    }

    /// Decodes the server's JWT signing key, if configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the key is not valid base64.
    pub fn jwt_secret_bytes(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        self.jwt_secret
            .as_deref()
            .map(|s| {
                STANDARD
                    .decode(s)
                    .map_err(|e| ConfigError::Invalid(format!("jwt secret is not valid base64: {e}")))
            })
            .transpose()
    }

    /// The default permission bucket that applies to every requestor.
    ///
    /// Issuance defaults to deny. Disclosure and signature permissions
    /// default to everything outside production mode and to deny in
    /// production.
    #[must_use]
    pub fn global_permissions(&self) -> Permissions {
        let permissive = || {
            if self.production {
                Vec::new()
            } else {
                vec![AttributePattern::from("*")]
            }
        };
        Permissions {
            disclosing: self.disclose_perms.clone().unwrap_or_else(permissive),
            signing: self.sign_perms.clone().unwrap_or_else(permissive),
            issuing: self.issue_perms.clone().unwrap_or_default(),
        }
    }

    /// The effective permissions of a requestor: its own set merged with
    /// the global bucket. `None` is the unauthenticated requestor, which
    /// only gets the global bucket.
    #[must_use]
    pub fn permissions_for(&self, requestor: Option<&str>) -> Permissions {
        let global = self.global_permissions();
        match requestor.and_then(|name| self.requestors.get(name)) {
            Some(r) => r.permissions.clone().merge(&global),
            None => global,
        }
    }

    /// Checks the configuration for problems that make the server
    /// unusable. Runs once at startup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Invalid(
                "external url must be configured".into(),
            ));
        }
        if self.requestor_auth_enabled() && self.requestors.is_empty() {
            return Err(ConfigError::Invalid(
                "requestor authentication is enabled but no requestors are configured".into(),
            ));
        }
        for (name, requestor) in &self.requestors {
            requestor
                .key_bytes()
                .map_err(|e| ConfigError::Invalid(format!("requestor {name:?}: {e}")))?;
        }
        self.jwt_secret_bytes()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn attr(s: &str) -> AttributeTypeIdentifier {
        AttributeTypeIdentifier::new(s)
    }

    #[test]
    fn auth_defaults_follow_production_mode() {
        let dev = ServerConfig::default();
        assert!(!dev.requestor_auth_enabled());

        let prod = ServerConfig {
            production: true,
            ..Default::default()
        };
        assert!(prod.requestor_auth_enabled());

        let prod_no_auth = ServerConfig {
            production: true,
            no_auth: Some(true),
            ..Default::default()
        };
        assert!(!prod_no_auth.requestor_auth_enabled());
    }

    #[test]
    fn permission_defaults() {
        let dev = ServerConfig::default().global_permissions();
        assert!(dev
            .authorize(Action::Disclosing, &[attr("irma-demo.A.b.c")])
            .is_ok());
        assert!(dev
            .authorize(Action::Signing, &[attr("irma-demo.A.b.c")])
            .is_ok());
        // Issuance defaults to deny even outside production.
        assert!(dev
            .authorize(Action::Issuing, &[attr("irma-demo.A.b.c")])
            .is_err());

        let prod = ServerConfig {
            production: true,
            ..Default::default()
        }
        .global_permissions();
        assert!(prod
            .authorize(Action::Disclosing, &[attr("irma-demo.A.b.c")])
            .is_err());
    }

    #[test]
    fn requestor_permissions_merge_with_global_bucket() {
        let mut requestors = HashMap::new();
        requestors.insert(
            "issuer-app".to_owned(),
            Requestor {
                key: STANDARD.encode(b"secret"),
                permissions: Permissions {
                    issuing: vec![AttributePattern::from("irma-demo.MijnOverheid.*")],
                    ..Default::default()
                },
            },
        );
        let config = ServerConfig {
            url: "https://irma.example.com".into(),
            disclose_perms: Some(vec![AttributePattern::from("irma-demo.*")]),
            requestors,
            ..Default::default()
        };

        let perms = config.permissions_for(Some("issuer-app"));
        assert!(perms
            .authorize(Action::Issuing, &[attr("irma-demo.MijnOverheid.root.BSN")])
            .is_ok());
        assert!(perms
            .authorize(Action::Disclosing, &[attr("irma-demo.X.y.z")])
            .is_ok());

        // Unknown requestors only get the global bucket.
        let anon = config.permissions_for(None);
        assert!(anon
            .authorize(Action::Issuing, &[attr("irma-demo.MijnOverheid.root.BSN")])
            .is_err());
    }

    #[test]
    fn from_file_parses_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
url = "https://irma.example.com"
port = 8089
production = true

[requestors.myapp]
key = "c2VjcmV0"

[requestors.myapp.permissions]
disclosing = ["irma-demo.*"]
"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 8089);
        assert!(config.production);
        assert_eq!(config.requestors["myapp"].key_bytes().unwrap(), b"secret");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_catches_problems() {
        // Missing URL.
        assert!(ServerConfig::default().validate().is_err());

        // Auth enabled without requestors.
        let config = ServerConfig {
            url: "https://irma.example.com".into(),
            production: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Bad base64 requestor key.
        let mut requestors = HashMap::new();
        requestors.insert(
            "broken".to_owned(),
            Requestor {
                key: "!!not-base64!!".into(),
                permissions: Permissions::default(),
            },
        );
        let config = ServerConfig {
            url: "https://irma.example.com".into(),
            requestors,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
