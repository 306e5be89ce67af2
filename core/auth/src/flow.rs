//! Interactive OAuth2 authorization-code flow.
//!
//! The flow needs a human: the operator opens the authorization URL,
//! signs in out-of-band, and pastes back the URL the browser was redirected
//! to. That exchange happens through [`AuthorizationPrompt`] so tests can
//! answer it without a terminal.

use oauth2::{CsrfToken, Scope};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::info;
use url::Url;

use sharegraph_common::{Error, Result};

use crate::config::OAuthConfig;
use crate::endpoint::{build_client, ConfiguredClient, TokenEndpoint};
use crate::token::Token;

/// Blocking request/response boundary with the operator.
pub trait AuthorizationPrompt: Send + Sync {
    /// Present `authorization_url` and return the redirect response the
    /// operator pastes back.
    fn ask(&self, authorization_url: &str) -> Result<String>;
}

/// Prompt that prints to stdout and reads one line from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioPrompt;

impl AuthorizationPrompt for StdioPrompt {
    fn ask(&self, authorization_url: &str) -> Result<String> {
        let mut stdout = std::io::stdout();
        writeln!(
            stdout,
            "You need to authorize the application, please go to this url and paste back the response"
        )?;
        writeln!(stdout, "{}", authorization_url)?;
        write!(stdout, "Response URL: ")?;
        stdout.flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let line = line.trim().to_string();
        if line.is_empty() {
            return Err(Error::AuthorizationFailed(
                "no redirect response was entered".to_string(),
            ));
        }
        Ok(line)
    }
}

/// Authorization started by [`AuthorizationFlow::build_authorization_url`].
#[derive(Debug, Clone)]
struct PendingAuthorization {
    state: String,
}

/// Authorization-code flow against the configured identity provider.
pub struct AuthorizationFlow {
    client: ConfiguredClient,
    config: OAuthConfig,
    endpoint: Arc<dyn TokenEndpoint>,
    pending: Option<PendingAuthorization>,
}

impl AuthorizationFlow {
    /// Create a flow for `config`, exchanging codes through `endpoint`.
    ///
    /// # Errors
    /// - `InvalidConfig` if the configuration does not validate
    pub fn new(config: &OAuthConfig, endpoint: Arc<dyn TokenEndpoint>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client: build_client(config)?,
            config: config.clone(),
            endpoint,
            pending: None,
        })
    }

    /// OAuth2 configuration of this flow.
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Endpoint used for exchange, shared with the session for refresh.
    pub fn endpoint(&self) -> Arc<dyn TokenEndpoint> {
        Arc::clone(&self.endpoint)
    }

    /// Whether an authorization URL was issued and not yet exchanged.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Generate the authorization URL for the user to visit.
    ///
    /// Returns the URL and the opaque state that the redirect response must
    /// echo. Issuing a new URL replaces any pending one.
    pub fn build_authorization_url(&mut self) -> (String, String) {
        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.config.scopes.iter().cloned().map(Scope::new))
            .url();

        let state = csrf_token.secret().clone();
        self.pending = Some(PendingAuthorization {
            state: state.clone(),
        });
        (auth_url.to_string(), state)
    }

    /// Exchange the pasted redirect response for a token.
    ///
    /// The pending authorization is consumed whether or not the exchange
    /// succeeds.
    ///
    /// # Errors
    /// - `AuthorizationFailed` if no authorization is pending, the response
    ///   is not a URL, carries an error, lacks a code, echoes the wrong
    ///   state, or the endpoint rejects the code
    pub async fn exchange(&mut self, authorization_response: &str) -> Result<Token> {
        let pending = self.pending.take().ok_or_else(|| {
            Error::AuthorizationFailed("no authorization is pending".to_string())
        })?;

        let code = self.extract_code(authorization_response.trim(), &pending)?;

        self.endpoint
            .exchange_code(&code)
            .await
            .map_err(|e| match e {
                Error::AuthorizationFailed(_) => e,
                other => Error::AuthorizationFailed(other.to_string()),
            })
    }

    fn extract_code(&self, response: &str, pending: &PendingAuthorization) -> Result<String> {
        let url = Url::parse(response).map_err(|e| {
            Error::AuthorizationFailed(format!("redirect response is not a URL: {}", e))
        })?;

        self.config
            .check_transport("redirect response", response)
            .map_err(|e| Error::AuthorizationFailed(e.to_string()))?;

        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut error_description = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => error_description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(Error::AuthorizationFailed(match error_description {
                Some(description) => format!("{}: {}", error, description),
                None => error,
            }));
        }

        if state.as_deref() != Some(pending.state.as_str()) {
            return Err(Error::AuthorizationFailed(
                "redirect response does not belong to the pending authorization (state mismatch)"
                    .to_string(),
            ));
        }

        code.filter(|c| !c.is_empty()).ok_or_else(|| {
            Error::AuthorizationFailed("redirect response carries no code".to_string())
        })
    }

    /// Run the whole interactive flow through `prompt`.
    pub async fn run(&mut self, prompt: &dyn AuthorizationPrompt) -> Result<Token> {
        let (authorization_url, _state) = self.build_authorization_url();
        info!("Waiting for the operator to authorize the application");
        let response = prompt.ask(&authorization_url)?;
        self.exchange(&response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, CannedPrompt, ScriptedEndpoint};

    fn flow_with(endpoint: Arc<ScriptedEndpoint>) -> AuthorizationFlow {
        AuthorizationFlow::new(&test_config(), endpoint).unwrap()
    }

    #[test]
    fn test_authorization_url_generation() {
        let mut flow = flow_with(Arc::new(ScriptedEndpoint::new()));
        let (url, state) = flow.build_authorization_url();

        let parsed = Url::parse(&url).unwrap();
        let query: std::collections::HashMap<String, String> =
            parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://login.example.com/tenant/oauth2/v2.0/authorize"));
        assert_eq!(query["client_id"], "client-1");
        assert_eq!(query["redirect_uri"], "https://localhost:8000/callback");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], "User.Read offline_access");
        assert_eq!(query["state"], state);
        assert!(flow.is_pending());
    }

    #[tokio::test]
    async fn test_exchange_with_matching_state() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let mut flow = flow_with(endpoint.clone());
        let (_, state) = flow.build_authorization_url();

        let response = format!("https://localhost:8000/callback?code=abc&state={}", state);
        let token = flow.exchange(&response).await.unwrap();

        assert_eq!(token.access_token, "issued-access");
        assert_eq!(endpoint.exchanged_codes(), vec!["abc".to_string()]);
        assert!(!flow.is_pending());
    }

    #[tokio::test]
    async fn test_exchange_without_pending_flow() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let mut flow = flow_with(endpoint.clone());

        let err = flow
            .exchange("https://localhost:8000/callback?code=abc&state=xyz")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AuthorizationFailed(_)));
        assert!(endpoint.exchanged_codes().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_state_mismatch() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let mut flow = flow_with(endpoint.clone());
        flow.build_authorization_url();

        let err = flow
            .exchange("https://localhost:8000/callback?code=abc&state=forged")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("state mismatch"));
        assert!(endpoint.exchanged_codes().is_empty());
        // The flow is single-use
        assert!(!flow.is_pending());
    }

    #[tokio::test]
    async fn test_exchange_error_response() {
        let mut flow = flow_with(Arc::new(ScriptedEndpoint::new()));
        let (_, state) = flow.build_authorization_url();

        let response = format!(
            "https://localhost:8000/callback?error=access_denied&error_description=user+declined&state={}",
            state
        );
        let err = flow.exchange(&response).await.unwrap_err();

        assert!(err.to_string().contains("access_denied: user declined"));
    }

    #[tokio::test]
    async fn test_exchange_rejects_non_url_and_plain_http() {
        let mut flow = flow_with(Arc::new(ScriptedEndpoint::new()));

        flow.build_authorization_url();
        assert!(flow.exchange("not a url").await.is_err());

        let (_, state) = flow.build_authorization_url();
        let response = format!("http://localhost:8000/callback?code=abc&state={}", state);
        let err = flow.exchange(&response).await.unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[tokio::test]
    async fn test_endpoint_rejection_is_authorization_failure() {
        let endpoint = Arc::new(ScriptedEndpoint::new().rejecting_codes());
        let mut flow = flow_with(endpoint);
        let (_, state) = flow.build_authorization_url();

        let response = format!("https://localhost:8000/callback?code=abc&state={}", state);
        let err = flow.exchange(&response).await.unwrap_err();

        assert!(matches!(err, Error::AuthorizationFailed(_)));
    }

    #[tokio::test]
    async fn test_run_through_prompt() {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let mut flow = flow_with(endpoint.clone());
        let prompt = CannedPrompt::with_code("from-prompt");

        let token = flow.run(&prompt).await.unwrap();

        assert_eq!(token.access_token, "issued-access");
        assert_eq!(prompt.asked(), 1);
        assert_eq!(endpoint.exchanged_codes(), vec!["from-prompt".to_string()]);
    }
}
