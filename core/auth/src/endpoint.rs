//! OAuth2 token endpoint: authorization-code exchange and refresh.

use async_trait::async_trait;
use chrono::Utc;
use oauth2::basic::{BasicClient, BasicTokenResponse, BasicTokenType};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    RedirectUrl, RefreshToken, TokenResponse, TokenUrl,
};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use sharegraph_common::{Error, Result};

use crate::config::OAuthConfig;
use crate::token::Token;

/// OAuth2 client with authorization and token endpoints configured.
pub(crate) type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Build the OAuth2 client described by `config`.
pub(crate) fn build_client(config: &OAuthConfig) -> Result<ConfiguredClient> {
    let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
        .set_auth_uri(
            AuthUrl::new(config.authorization_url())
                .map_err(|e| Error::InvalidConfig(format!("Invalid auth URL: {}", e)))?,
        )
        .set_token_uri(
            TokenUrl::new(config.token_url())
                .map_err(|e| Error::InvalidConfig(format!("Invalid token URL: {}", e)))?,
        )
        .set_redirect_uri(
            RedirectUrl::new(config.redirect_uri.clone())
                .map_err(|e| Error::InvalidConfig(format!("Invalid redirect URL: {}", e)))?,
        )
        // Credentials travel in the form body, as the Microsoft endpoints expect
        .set_auth_type(AuthType::RequestBody);

    if !config.client_secret.is_empty() {
        client = client.set_client_secret(ClientSecret::new(config.client_secret.clone()));
    }

    Ok(client)
}

/// Network side of the OAuth2 protocol.
///
/// The lifecycle manager and the session depend on this trait rather than
/// on the HTTP client so tests can substitute a scripted endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code for a token.
    ///
    /// # Errors
    /// - `AuthorizationFailed` if the endpoint rejects the code or answers
    ///   with a malformed response
    async fn exchange_code(&self, code: &str) -> Result<Token>;

    /// Obtain a new access token using a refresh token.
    ///
    /// # Errors
    /// - `RefreshFailed` if the refresh token is expired or revoked
    async fn refresh(&self, refresh_token: &str) -> Result<Token>;
}

/// [`TokenEndpoint`] implementation backed by the `oauth2` crate.
pub struct OAuth2Endpoint {
    client: ConfiguredClient,
    http: oauth2::reqwest::Client,
    requested_scopes: Vec<String>,
    relax_token_scope: bool,
}

impl OAuth2Endpoint {
    /// Create an endpoint for `config`.
    ///
    /// # Errors
    /// - `InvalidConfig` if an endpoint URL is malformed, or uses plain http
    ///   while insecure transport is not allowed
    pub fn new(config: &OAuthConfig) -> Result<Self> {
        config.check_transport("oauth token endpoint", &config.token_url())?;
        let client = build_client(config)?;

        // Following redirects from a token endpoint invites SSRF
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            requested_scopes: config.scopes.clone(),
            relax_token_scope: config.relax_token_scope,
        })
    }

    fn to_token(&self, response: &BasicTokenResponse) -> Token {
        let mut token = Token::bearer(response.access_token().secret().clone());
        token.token_type = match response.token_type() {
            BasicTokenType::Bearer => "Bearer".to_string(),
            BasicTokenType::Mac => "MAC".to_string(),
            BasicTokenType::Extension(other) => other.clone(),
        };
        token.refresh_token = response.refresh_token().map(|t| t.secret().clone());
        token.expires_in = response.expires_in().map(|d| d.as_secs_f64());
        // Servers omit scope when it equals the requested set
        token.scope = match response.scopes() {
            Some(scopes) => scopes.iter().map(|s| s.as_str().to_owned()).collect(),
            None => self.requested_scopes.clone(),
        };
        token.stamp_expiry(Utc::now());
        token
    }

    /// Compare granted scopes to the requested ones.
    ///
    /// Identity providers commonly add scopes such as `openid` or drop
    /// `offline_access`, so a mismatch is only fatal when relaxation is off.
    fn check_scope(&self, token: &Token) -> std::result::Result<(), String> {
        let requested: BTreeSet<String> = self
            .requested_scopes
            .iter()
            .map(|s| s.to_lowercase())
            .collect();
        let granted: BTreeSet<String> = token.scope.iter().map(|s| s.to_lowercase()).collect();

        if requested == granted {
            return Ok(());
        }

        let message = format!(
            "granted scope [{}] differs from requested scope [{}]",
            token.scope.join(" "),
            self.requested_scopes.join(" ")
        );
        if self.relax_token_scope {
            warn!("{}", message);
            Ok(())
        } else {
            Err(message)
        }
    }
}

#[async_trait]
impl TokenEndpoint for OAuth2Endpoint {
    async fn exchange_code(&self, code: &str) -> Result<Token> {
        debug!("Exchanging authorization code");
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::AuthorizationFailed(format!("Token exchange failed: {}", e)))?;

        let token = self.to_token(&response);
        self.check_scope(&token).map_err(Error::AuthorizationFailed)?;
        Ok(token)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        debug!("Requesting token refresh");
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::RefreshFailed(format!("Token refresh failed: {}", e)))?;

        let mut token = self.to_token(&response);
        self.check_scope(&token).map_err(Error::RefreshFailed)?;

        // Refresh tokens may or may not be returned in refresh response
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }
}
