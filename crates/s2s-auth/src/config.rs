//! Configuration for the token broker and the inbound validation contract.
//!
//! Loaded from environment variables via `from_env`, or built
//! programmatically with the `new`/`with_*` constructors. Either way the
//! enumerated `validate` check runs before a config is handed out, so a
//! process with missing or malformed settings fails at startup instead of at
//! first use.

use crate::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default pre-expiry refresh margin.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(30);

/// Default HTTP request timeout for the token exchange.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while loading or validating configuration.
///
/// All of these are startup failures; none occur after a config has been
/// handed out.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// A setting is present but empty or unparsable.
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue {
        /// Name of the offending setting.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A URL that must be HTTPS is not.
    #[error("{0} must use HTTPS")]
    InsecureUrl(&'static str),
}

/// Settings for acquiring service tokens via the client-credentials grant.
#[derive(Clone)]
pub struct S2sClientConfig {
    /// Token endpoint URL of the identity provider.
    pub token_endpoint: String,

    /// OAuth client ID of this service.
    pub client_id: String,

    /// OAuth client secret (as `SecretString`).
    pub client_secret: SecretString,

    /// Optional scope to request; omitted from the grant when `None`.
    pub scope: Option<String>,

    /// Refresh the token this long before its expiry.
    pub refresh_threshold: Duration,

    /// HTTP request timeout for the token exchange.
    pub http_timeout: Duration,
}

impl std::fmt::Debug for S2sClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S2sClientConfig")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("refresh_threshold", &self.refresh_threshold)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl S2sClientConfig {
    /// Create a new configuration with default threshold and timeout.
    ///
    /// # Security Warning
    ///
    /// An HTTP token endpoint sends the client secret in plain text. Use
    /// [`S2sClientConfig::new_secure`] to enforce HTTPS in production.
    #[must_use]
    pub fn new(token_endpoint: String, client_id: String, client_secret: SecretString) -> Self {
        Self {
            token_endpoint,
            client_id,
            client_secret,
            scope: None,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Create a new configuration requiring an HTTPS token endpoint.
    ///
    /// This is the recommended constructor for production use.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InsecureUrl` if the endpoint is not HTTPS.
    pub fn new_secure(
        token_endpoint: String,
        client_id: String,
        client_secret: SecretString,
    ) -> Result<Self, ConfigError> {
        if !token_endpoint.starts_with("https://") {
            return Err(ConfigError::InsecureUrl("token_endpoint"));
        }
        Ok(Self::new(token_endpoint, client_id, client_secret))
    }

    /// Set the requested scope.
    #[must_use]
    pub fn with_scope(mut self, scope: String) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Set the refresh threshold.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Required: `S2S_TOKEN_ENDPOINT`, `S2S_CLIENT_ID`, `S2S_CLIENT_SECRET`.
    /// Optional: `S2S_SCOPE`, `S2S_TOKEN_REFRESH_THRESHOLD_SECS` (default 30),
    /// `S2S_HTTP_TIMEOUT_SECS` (default 10).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is absent, empty, or
    /// unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is absent, empty, or
    /// unparsable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let token_endpoint = required(vars, "S2S_TOKEN_ENDPOINT")?;
        let client_id = required(vars, "S2S_CLIENT_ID")?;
        let client_secret = SecretString::from(required(vars, "S2S_CLIENT_SECRET")?);

        // An empty scope behaves as if no scope was configured, matching the
        // grant request which omits the field entirely.
        let scope = vars
            .get("S2S_SCOPE")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let refresh_threshold = duration_var(
            vars,
            "S2S_TOKEN_REFRESH_THRESHOLD_SECS",
            DEFAULT_REFRESH_THRESHOLD,
        )?;
        let http_timeout = duration_var(vars, "S2S_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT)?;

        let config = Self {
            token_endpoint,
            client_id,
            client_secret,
            scope,
            refresh_threshold,
            http_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Run the enumerated validity check.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_empty("token_endpoint", &self.token_endpoint)?;
        non_empty("client_id", &self.client_id)?;
        non_empty("client_secret", self.client_secret.expose_secret())?;
        Ok(())
    }
}

/// Settings describing the identity provider that issues and backs tokens.
///
/// Receiving services derive their inbound validation parameters from this
/// (see [`crate::validation`]); the broker itself only needs
/// [`S2sClientConfig`].
#[derive(Debug, Clone)]
pub struct IdentityProviderConfig {
    /// Identity provider base URL, without a trailing slash.
    pub authority: String,

    /// Realm name, used as a path segment under the authority.
    pub realm: String,

    /// Audience expected in tokens issued for this service.
    pub audience: String,

    /// Require HTTPS for metadata discovery. Defaults to `true`.
    pub require_https_metadata: bool,
}

impl IdentityProviderConfig {
    /// Create a new configuration. A trailing `/` on `authority` is trimmed
    /// so the computed URLs never contain an empty path segment.
    #[must_use]
    pub fn new(authority: String, realm: String, audience: String) -> Self {
        Self {
            authority: authority.trim_end_matches('/').to_string(),
            realm,
            audience,
            require_https_metadata: true,
        }
    }

    /// Set whether metadata discovery must use HTTPS.
    #[must_use]
    pub fn with_require_https_metadata(mut self, require: bool) -> Self {
        self.require_https_metadata = require;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Required: `IDP_AUTHORITY`, `IDP_REALM`, `IDP_AUDIENCE`.
    /// Optional: `IDP_REQUIRE_HTTPS_METADATA` (default `true`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is absent, empty, or
    /// unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is absent, empty, or
    /// unparsable.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let authority = required(vars, "IDP_AUTHORITY")?
            .trim_end_matches('/')
            .to_string();
        let realm = required(vars, "IDP_REALM")?;
        let audience = required(vars, "IDP_AUDIENCE")?;
        let require_https_metadata = bool_var(vars, "IDP_REQUIRE_HTTPS_METADATA", true)?;

        let config = Self {
            authority,
            realm,
            audience,
            require_https_metadata,
        };
        config.validate()?;
        Ok(config)
    }

    /// Run the enumerated validity check.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an empty field, or
    /// `ConfigError::InsecureUrl` when HTTPS metadata is required but the
    /// authority is not an HTTPS URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_empty("authority", &self.authority)?;
        non_empty("realm", &self.realm)?;
        non_empty("audience", &self.audience)?;
        if self.require_https_metadata && !self.authority.starts_with("https://") {
            return Err(ConfigError::InsecureUrl("authority"));
        }
        Ok(())
    }

    /// Issuer of tokens for this realm: `{authority}/realms/{realm}`.
    #[must_use]
    pub fn issuer(&self) -> String {
        format!("{}/realms/{}", self.authority, self.realm)
    }

    /// OpenID Connect discovery document URL for this realm.
    #[must_use]
    pub fn metadata_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.issuer())
    }
}

fn required(vars: &HashMap<String, String>, name: &'static str) -> Result<String, ConfigError> {
    vars.get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn non_empty(name: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            name,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn duration_var(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue {
                name,
                reason: e.to_string(),
            }),
        None => Ok(default),
    }
}

fn bool_var(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw.parse::<bool>().map_err(|e| ConfigError::InvalidValue {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
