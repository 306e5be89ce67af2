//! Configuration for the OAuth2 client and the token store.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use sharegraph_common::{Error, Result};

/// Default authority for the Microsoft identity platform.
const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com/common";
/// Authorization endpoint path relative to the authority.
const DEFAULT_AUTH_ENDPOINT: &str = "/oauth2/v2.0/authorize";
/// Token endpoint path relative to the authority.
const DEFAULT_TOKEN_ENDPOINT: &str = "/oauth2/v2.0/token";
/// Redirect URL for the interactive flow (localhost for desktop apps).
const DEFAULT_REDIRECT_URI: &str = "https://localhost:8000/callback";
/// Default remote API root.
pub const DEFAULT_API_BASE: &str = "https://graph.microsoft.com/v1.0";
/// Refresh tokens this many seconds before they expire.
const DEFAULT_REFRESH_LEEWAY_SECS: u64 = 300;
/// Largest accepted refresh leeway (one day).
pub const MAX_REFRESH_LEEWAY_SECS: u64 = 86_400;
/// Default timeout for opening the key-value store connection.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Environment variable overriding `oauth.client_id`.
pub const CLIENT_ID_ENV: &str = "SHAREGRAPH_CLIENT_ID";
/// Environment variable overriding `oauth.client_secret`.
pub const CLIENT_SECRET_ENV: &str = "SHAREGRAPH_CLIENT_SECRET";

fn default_scopes() -> Vec<String> {
    ["User.Read", "Sites.ReadWrite.All", "offline_access"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

/// Configuration for the OAuth2 client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Application (client) id.
    #[serde(default)]
    pub client_id: String,
    /// Client secret used for code exchange and refresh.
    #[serde(default)]
    pub client_secret: String,
    /// Authority root, e.g. `https://login.microsoftonline.com/<tenant>`.
    #[serde(default = "OAuthConfig::default_authority_url")]
    pub authority_url: String,
    /// Authorization endpoint path appended to the authority.
    #[serde(default = "OAuthConfig::default_auth_endpoint")]
    pub auth_endpoint: String,
    /// Token endpoint path appended to the authority.
    #[serde(default = "OAuthConfig::default_token_endpoint")]
    pub token_endpoint: String,
    /// Scopes requested during authorization.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Redirect URI registered for the application.
    #[serde(default = "OAuthConfig::default_redirect_uri")]
    pub redirect_uri: String,
    /// Permit plain-http endpoints and redirect responses (development only).
    #[serde(default)]
    pub allow_insecure_transport: bool,
    /// Accept tokens whose granted scopes differ from the requested ones.
    #[serde(default = "default_true")]
    pub relax_token_scope: bool,
    /// Refresh tokens that expire within this many seconds.
    #[serde(default = "OAuthConfig::default_refresh_leeway_secs")]
    pub refresh_leeway_secs: u64,
}

impl OAuthConfig {
    fn default_authority_url() -> String {
        DEFAULT_AUTHORITY_URL.to_string()
    }

    fn default_auth_endpoint() -> String {
        DEFAULT_AUTH_ENDPOINT.to_string()
    }

    fn default_token_endpoint() -> String {
        DEFAULT_TOKEN_ENDPOINT.to_string()
    }

    fn default_redirect_uri() -> String {
        DEFAULT_REDIRECT_URI.to_string()
    }

    fn default_refresh_leeway_secs() -> u64 {
        DEFAULT_REFRESH_LEEWAY_SECS
    }

    /// Create a configuration with default endpoints for the given client.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authority_url: Self::default_authority_url(),
            auth_endpoint: Self::default_auth_endpoint(),
            token_endpoint: Self::default_token_endpoint(),
            scopes: default_scopes(),
            redirect_uri: Self::default_redirect_uri(),
            allow_insecure_transport: false,
            relax_token_scope: true,
            refresh_leeway_secs: DEFAULT_REFRESH_LEEWAY_SECS,
        }
    }

    /// Full authorization endpoint URL.
    pub fn authorization_url(&self) -> String {
        join_endpoint(&self.authority_url, &self.auth_endpoint)
    }

    /// Full token endpoint URL, also used for refresh.
    pub fn token_url(&self) -> String {
        join_endpoint(&self.authority_url, &self.token_endpoint)
    }

    /// How long before expiry a token is refreshed.
    pub fn refresh_leeway(&self) -> Duration {
        let secs = self.refresh_leeway_secs.min(MAX_REFRESH_LEEWAY_SECS) as i64;
        Duration::try_seconds(secs).unwrap_or_else(Duration::zero)
    }

    /// Override client credentials from the environment, if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(client_id) = std::env::var(CLIENT_ID_ENV) {
            self.client_id = client_id;
        }
        if let Ok(client_secret) = std::env::var(CLIENT_SECRET_ENV) {
            self.client_secret = client_secret;
        }
    }

    /// Check that required options are present and transport rules hold.
    ///
    /// # Errors
    /// - `InvalidConfig` naming the missing or rejected option
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "oauth.client_id is required (or set {})",
                CLIENT_ID_ENV
            )));
        }
        if self.scopes.is_empty() {
            return Err(Error::InvalidConfig(
                "oauth.scopes must name at least one scope".to_string(),
            ));
        }
        if self.refresh_leeway_secs > MAX_REFRESH_LEEWAY_SECS {
            return Err(Error::InvalidConfig(format!(
                "oauth.refresh_leeway_secs must be at most {} (got {})",
                MAX_REFRESH_LEEWAY_SECS, self.refresh_leeway_secs
            )));
        }
        self.check_transport("oauth.authority_url", &self.authority_url)?;
        self.check_transport("oauth.redirect_uri", &self.redirect_uri)?;
        Ok(())
    }

    /// Reject plain-http URLs unless insecure transport is allowed.
    pub(crate) fn check_transport(&self, what: &str, value: &str) -> Result<()> {
        let parsed = url::Url::parse(value)
            .map_err(|e| Error::InvalidConfig(format!("{} is not a valid URL: {}", what, e)))?;
        if parsed.scheme() != "https" && !self.allow_insecure_transport {
            return Err(Error::InvalidConfig(format!(
                "{} must use https (set oauth.allow_insecure_transport for development)",
                what
            )));
        }
        Ok(())
    }
}

fn join_endpoint(authority: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        authority.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Connection descriptor for the external key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueConnectionConfig {
    /// Store host name.
    pub host: String,
    /// Store port.
    pub port: u16,
    /// Logical database index.
    pub db: i64,
    /// Seconds allowed for connecting and answering the liveness probe.
    #[serde(default = "KeyValueConnectionConfig::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl KeyValueConnectionConfig {
    fn default_connect_timeout_secs() -> u64 {
        DEFAULT_CONNECT_TIMEOUT_SECS
    }

    /// Create a descriptor with the default connect timeout.
    pub fn new(host: impl Into<String>, port: u16, db: i64) -> Self {
        Self {
            host: host.into(),
            port,
            db,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    /// Connection URL understood by the Redis client.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }

    /// Connect timeout as a std duration.
    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Where the token is persisted.
///
/// Exactly one destination configures a lifecycle manager. The serialized
/// form is the flat option set `{token_type, filename}` or
/// `{token_type, connection, key}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StorageOptions", into = "StorageOptions")]
pub enum StorageDestination {
    /// Single JSON file on the local filesystem.
    File {
        /// Path of the token file.
        path: PathBuf,
    },
    /// Single JSON value under one key in an external key-value store.
    KeyValue {
        /// Connection descriptor.
        connection: KeyValueConnectionConfig,
        /// Key holding the token.
        key: String,
    },
}

impl StorageDestination {
    /// Default token file under the user's configuration directory.
    pub fn default_token_file() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("sharegraph").join("token.json"))
            .unwrap_or_else(|| PathBuf::from("sharegraph-token.json"))
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            StorageDestination::File { path } => format!("file {}", path.display()),
            StorageDestination::KeyValue { connection, key } => format!(
                "key '{}' at {}:{}/{}",
                key, connection.host, connection.port, connection.db
            ),
        }
    }
}

/// Flat construction options as they appear in configuration files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageOptions {
    /// Backend tag: `text`/`file-backed` or `external-store`/`redis`.
    pub token_type: String,
    /// Token file path (file backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
    /// Connection descriptor (key-value backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<KeyValueConnectionConfig>,
    /// Key holding the token (key-value backend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl TryFrom<StorageOptions> for StorageDestination {
    type Error = Error;

    fn try_from(options: StorageOptions) -> Result<Self> {
        let has_file = options.filename.is_some();
        let has_kv = options.connection.is_some() || options.key.is_some();
        if has_file && has_kv {
            return Err(Error::InvalidConfig(
                "storage cannot define both filename and connection/key".to_string(),
            ));
        }

        match options.token_type.as_str() {
            "text" | "file-backed" => {
                if has_kv {
                    return Err(Error::InvalidConfig(format!(
                        "storage.token_type '{}' does not take connection/key",
                        options.token_type
                    )));
                }
                let path = options
                    .filename
                    .unwrap_or_else(StorageDestination::default_token_file);
                Ok(StorageDestination::File { path })
            }
            "external-store" | "redis" => {
                if has_file {
                    return Err(Error::InvalidConfig(format!(
                        "storage.token_type '{}' does not take filename",
                        options.token_type
                    )));
                }
                let connection = options.connection.ok_or_else(|| {
                    Error::InvalidConfig(
                        "storage.connection {host, port, db} is required for external-store"
                            .to_string(),
                    )
                })?;
                let key = options.key.filter(|k| !k.is_empty()).ok_or_else(|| {
                    Error::InvalidConfig(
                        "storage.key is required for external-store".to_string(),
                    )
                })?;
                Ok(StorageDestination::KeyValue { connection, key })
            }
            other => Err(Error::InvalidConfig(format!(
                "storage.token_type '{}' does not exist, options are file-backed or external-store",
                other
            ))),
        }
    }
}

impl From<StorageDestination> for StorageOptions {
    fn from(destination: StorageDestination) -> Self {
        match destination {
            StorageDestination::File { path } => StorageOptions {
                token_type: "file-backed".to_string(),
                filename: Some(path),
                ..Default::default()
            },
            StorageDestination::KeyValue { connection, key } => StorageOptions {
                token_type: "external-store".to_string(),
                connection: Some(connection),
                key: Some(key),
                ..Default::default()
            },
        }
    }
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

/// Process configuration: OAuth2 client, token storage and API root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// OAuth2 client options.
    pub oauth: OAuthConfig,
    /// Token storage destination.
    pub storage: StorageDestination,
    /// Remote API root.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Config {
    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    /// - `InvalidConfig` if the JSON is malformed, a key is missing or the
    ///   storage options are contradictory
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Load configuration from a JSON file, apply environment overrides and
    /// validate it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&raw).map_err(|e| match e {
            Error::InvalidConfig(reason) => {
                Error::InvalidConfig(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })?;
        config.oauth.apply_env_overrides();
        config.oauth.validate()?;
        Ok(config)
    }
}
