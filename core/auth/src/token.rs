//! OAuth2 token record as persisted by the token stores.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// OAuth2 access/refresh credential pair plus metadata.
///
/// The stores treat this as an opaque JSON object: fields this type does not
/// know about are kept in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Bearer credential attached to API requests.
    pub access_token: String,
    /// Credential used to obtain a new access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token type reported by the authorization server.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds as reported when the token was issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<f64>,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<f64>,
    /// Granted scopes.
    #[serde(default, deserialize_with = "deserialize_scope")]
    pub scope: Vec<String>,
    /// Any other fields returned by the authorization server.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Scopes are stored as a list but servers often send a space-delimited string.
fn deserialize_scope<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ScopeRepr {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Option::<ScopeRepr>::deserialize(deserializer)? {
        Some(ScopeRepr::List(list)) => list,
        Some(ScopeRepr::Joined(joined)) => joined.split_whitespace().map(String::from).collect(),
        None => Vec::new(),
    })
}

impl Token {
    /// Create a bearer token with no expiry information.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: default_token_type(),
            expires_in: None,
            expires_at: None,
            scope: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Set `expires_at` from `expires_in`, relative to `now`.
    ///
    /// Leaves an existing `expires_at` untouched.
    pub fn stamp_expiry(&mut self, now: DateTime<Utc>) {
        if self.expires_at.is_some() {
            return;
        }
        if let Some(expires_in) = self.expires_in {
            self.expires_at = Some(epoch_seconds(now) + expires_in);
        }
    }

    /// Expiry as a timestamp, if known.
    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        let expires_at = self.expires_at?;
        let millis = (expires_at * 1000.0).round() as i64;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Check whether the access token expires within `leeway` of now.
    ///
    /// Tokens without expiry information are never considered due.
    pub fn is_due_for_refresh(&self, leeway: Duration) -> bool {
        match self.expires_at_datetime() {
            // A leeway reaching past the representable range covers every expiry
            Some(expires_at) => Utc::now()
                .checked_add_signed(leeway)
                .map_or(true, |deadline| expires_at <= deadline),
            None => false,
        }
    }

    /// Check if the access token is already expired.
    pub fn is_expired(&self) -> bool {
        self.is_due_for_refresh(Duration::zero())
    }
}

fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
