//! Scripted collaborators shared by the unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use sharegraph_common::{Error, Result};

use crate::config::OAuthConfig;
use crate::endpoint::TokenEndpoint;
use crate::flow::AuthorizationPrompt;
use crate::token::Token;

pub(crate) fn test_config() -> OAuthConfig {
    let mut config = OAuthConfig::new("client-1", "secret-1");
    config.authority_url = "https://login.example.com/tenant".to_string();
    config.redirect_uri = "https://localhost:8000/callback".to_string();
    config.scopes = vec!["User.Read".to_string(), "offline_access".to_string()];
    config
}

/// Token that expired an hour ago.
pub(crate) fn expired_token(access: &str) -> Token {
    let mut token = Token::bearer(access);
    token.refresh_token = Some("stored-refresh".to_string());
    token.expires_at = Some((Utc::now().timestamp() - 3600) as f64);
    token
}

/// Token valid for another hour.
pub(crate) fn fresh_token(access: &str) -> Token {
    let mut token = Token::bearer(access);
    token.refresh_token = Some("stored-refresh".to_string());
    token.expires_at = Some((Utc::now().timestamp() + 3600) as f64);
    token
}

/// Token endpoint that records calls and answers from a script.
pub(crate) struct ScriptedEndpoint {
    exchanged: Mutex<Vec<String>>,
    refreshed: AtomicUsize,
    reject_codes: bool,
    reject_refresh: bool,
}

impl ScriptedEndpoint {
    pub(crate) fn new() -> Self {
        Self {
            exchanged: Mutex::new(Vec::new()),
            refreshed: AtomicUsize::new(0),
            reject_codes: false,
            reject_refresh: false,
        }
    }

    pub(crate) fn rejecting_codes(mut self) -> Self {
        self.reject_codes = true;
        self
    }

    pub(crate) fn rejecting_refresh(mut self) -> Self {
        self.reject_refresh = true;
        self
    }

    pub(crate) fn exchanged_codes(&self) -> Vec<String> {
        self.exchanged.lock().unwrap().clone()
    }

    pub(crate) fn refresh_count(&self) -> usize {
        self.refreshed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for ScriptedEndpoint {
    async fn exchange_code(&self, code: &str) -> Result<Token> {
        self.exchanged.lock().unwrap().push(code.to_string());
        if self.reject_codes {
            return Err(Error::AuthorizationFailed("invalid_grant".to_string()));
        }
        let mut token = fresh_token("issued-access");
        token.refresh_token = Some("issued-refresh".to_string());
        Ok(token)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let count = self.refreshed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject_refresh {
            return Err(Error::RefreshFailed("refresh token revoked".to_string()));
        }
        let mut token = fresh_token(&format!("refreshed-access-{}", count));
        token.refresh_token = Some(format!("{}-rotated", refresh_token));
        Ok(token)
    }
}

/// Prompt that answers with a redirect URL echoing the issued state.
pub(crate) struct CannedPrompt {
    code: String,
    asked: AtomicUsize,
}

impl CannedPrompt {
    pub(crate) fn with_code(code: &str) -> Self {
        Self {
            code: code.to_string(),
            asked: AtomicUsize::new(0),
        }
    }

    pub(crate) fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl AuthorizationPrompt for CannedPrompt {
    fn ask(&self, authorization_url: &str) -> Result<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        let url = Url::parse(authorization_url).unwrap();
        let state = url
            .query_pairs()
            .find(|(name, _)| name == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        Ok(format!(
            "https://localhost:8000/callback?code={}&state={}",
            self.code, state
        ))
    }
}
