//! HTTP session that attaches the bearer token and keeps it fresh.

use chrono::Duration;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, RequestBuilder, Response};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use sharegraph_common::{Error, Result};

use crate::endpoint::TokenEndpoint;
use crate::store::TokenStore;
use crate::token::Token;

/// Callback invoked with every refreshed token.
///
/// The session waits for the returned future before using the new token,
/// so a callback that persists the token keeps storage in step with the
/// token actually in use.
pub type TokenUpdater = Arc<dyn Fn(Token) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Token updater that writes every refreshed token to `store`.
pub fn store_updater(store: Arc<dyn TokenStore>) -> TokenUpdater {
    Arc::new(move |token: Token| {
        let store = Arc::clone(&store);
        async move {
            store.save(&token).await?;
            info!(store = store.name(), "Persisted refreshed token");
            Ok::<(), Error>(())
        }
        .boxed()
    })
}

/// Authenticated HTTP session.
///
/// Every request carries `Authorization: Bearer <access_token>`. Before a
/// request goes out, a token that is expired or within the refresh leeway is
/// refreshed, handed to the [`TokenUpdater`], and only then used.
pub struct AuthenticatedSession {
    http: Client,
    token: Mutex<Token>,
    endpoint: Arc<dyn TokenEndpoint>,
    updater: TokenUpdater,
    refresh_leeway: Duration,
}

impl AuthenticatedSession {
    /// Create a session around `token`.
    ///
    /// # Errors
    /// - `Network` if the HTTP client cannot be built
    pub fn new(
        token: Token,
        endpoint: Arc<dyn TokenEndpoint>,
        updater: TokenUpdater,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("ShareGraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token: Mutex::new(token),
            endpoint,
            updater,
            refresh_leeway: Duration::minutes(5),
        })
    }

    /// Set how long before expiry the token is refreshed.
    pub fn with_refresh_leeway(mut self, leeway: Duration) -> Self {
        self.refresh_leeway = leeway;
        self
    }

    /// Get the token currently in use.
    pub async fn current_token(&self) -> Token {
        self.token.lock().await.clone()
    }

    /// Refresh the token now, regardless of its expiry.
    ///
    /// # Errors
    /// - `RefreshFailed` if the endpoint refuses or the new token cannot be
    ///   persisted; the previous token stays in use
    pub async fn refresh(&self) -> Result<Token> {
        let mut token = self.token.lock().await;
        self.refresh_locked(&mut token).await?;
        Ok(token.clone())
    }

    async fn refresh_locked(&self, token: &mut Token) -> Result<()> {
        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            Error::RefreshFailed("token is expiring and no refresh token is stored".to_string())
        })?;

        info!("Refreshing expiring access token");
        let mut fresh = self
            .endpoint
            .refresh(&refresh_token)
            .await
            .map_err(|e| match e {
                Error::RefreshFailed(_) => e,
                other => Error::RefreshFailed(other.to_string()),
            })?;

        if fresh.refresh_token.is_none() {
            fresh.refresh_token = Some(refresh_token);
        }

        (self.updater)(fresh.clone()).await.map_err(|e| {
            Error::RefreshFailed(format!("refreshed token could not be persisted: {}", e))
        })?;

        *token = fresh;
        Ok(())
    }

    /// Authorization header value, refreshing first if needed.
    async fn bearer(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if token.is_due_for_refresh(self.refresh_leeway) {
            self.refresh_locked(&mut token).await?;
        }
        Ok(format!("Bearer {}", token.access_token))
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        let auth = self.bearer().await?;
        let response = request
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request to {} failed: {}", url, e)))?;
        debug!(url, status = response.status().as_u16(), "Remote call completed");
        Ok(response)
    }

    /// Send an authenticated GET request.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.send(self.http.get(url), url).await
    }

    /// Send an authenticated GET request with extra headers.
    pub async fn get_with_headers(&self, url: &str, headers: HeaderMap) -> Result<Response> {
        self.send(self.http.get(url).headers(headers), url).await
    }

    /// Send an authenticated PUT request with a raw body.
    pub async fn put_bytes(&self, url: &str, body: Vec<u8>, headers: HeaderMap) -> Result<Response> {
        self.send(self.http.put(url).headers(headers).body(body), url).await
    }

    /// Send an authenticated POST request with a JSON body.
    pub async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<Response> {
        self.send(self.http.post(url).json(body), url).await
    }
}
