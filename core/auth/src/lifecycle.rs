//! Token lifecycle: find a usable token, bootstrap one if needed, and keep
//! the store in step with every refresh.
//!
//! # State machine
//! ```text
//! UNINITIALIZED --(stored token loads)-------------------------> READY
//! UNINITIALIZED --(absent / placeholder / corrupt)--> BOOTSTRAPPING --(authorized, saved)--> READY
//! READY --(session refreshes, updater persists)--> READY
//! ```
//!
//! Two managers pointed at the same file or key are not coordinated; the
//! last writer wins.

use std::sync::Arc;
use tracing::{debug, info, warn};

use sharegraph_common::{Error, Result};

use crate::config::{OAuthConfig, StorageDestination};
use crate::endpoint::{OAuth2Endpoint, TokenEndpoint};
use crate::flow::{AuthorizationFlow, AuthorizationPrompt};
use crate::session::{store_updater, AuthenticatedSession};
use crate::store::{open_store, TokenStore};
use crate::token::Token;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Store not probed yet.
    Uninitialized,
    /// Running the interactive authorization.
    Bootstrapping,
    /// Session is configured with a persisted token.
    Ready,
}

/// How the token in use was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    /// Loaded from the store.
    Stored,
    /// Obtained through a fresh authorization and then persisted.
    Authorized,
}

/// Orchestrates the token store and the authorization flow and hands out
/// an [`AuthenticatedSession`] whose refreshes are written back to the store.
pub struct TokenLifecycleManager {
    store: Arc<dyn TokenStore>,
    session: AuthenticatedSession,
    state: LifecycleState,
    origin: TokenOrigin,
}

impl TokenLifecycleManager {
    /// Build a ready manager from configuration.
    ///
    /// Opens the store for `destination`, and runs the interactive flow
    /// through `prompt` only if no usable token is stored.
    ///
    /// # Errors
    /// - `InvalidConfig` if the OAuth2 configuration is incomplete
    /// - `StoreUnreachable` if the key-value store cannot be reached
    /// - `TokenAcquisitionFailed` if a fresh token could not be obtained
    pub async fn from_config(
        config: &OAuthConfig,
        destination: &StorageDestination,
        prompt: &dyn AuthorizationPrompt,
    ) -> Result<Self> {
        config.validate()?;
        let endpoint: Arc<dyn TokenEndpoint> = Arc::new(OAuth2Endpoint::new(config)?);
        let flow = AuthorizationFlow::new(config, endpoint)?;

        info!("Using token store: {}", destination.describe());
        let store = open_store(destination).await?;

        Self::start(store, flow, prompt).await
    }

    /// Drive the state machine to `Ready`.
    ///
    /// # Errors
    /// - Store errors other than "no usable token" abort construction
    /// - `TokenAcquisitionFailed` if authorization or the first save fails;
    ///   there is no retry
    pub async fn start(
        store: Arc<dyn TokenStore>,
        mut flow: AuthorizationFlow,
        prompt: &dyn AuthorizationPrompt,
    ) -> Result<Self> {
        let mut state = LifecycleState::Uninitialized;

        let (token, origin) = match Self::stored_token(store.as_ref()).await? {
            Some(token) => (token, TokenOrigin::Stored),
            None => {
                advance(&mut state, LifecycleState::Bootstrapping);
                let token = Self::bootstrap(store.as_ref(), &mut flow, prompt).await?;
                (token, TokenOrigin::Authorized)
            }
        };

        let session = AuthenticatedSession::new(
            token,
            flow.endpoint(),
            store_updater(Arc::clone(&store)),
        )?
        .with_refresh_leeway(flow.config().refresh_leeway());

        advance(&mut state, LifecycleState::Ready);

        Ok(Self {
            store,
            session,
            state,
            origin,
        })
    }

    /// Probe the store. `None` means a fresh authorization is required.
    async fn stored_token(store: &dyn TokenStore) -> Result<Option<Token>> {
        if !store.exists().await? {
            info!(store = store.name(), "No token stored yet");
            store.initialize().await?;
            return Ok(None);
        }

        match store.load().await {
            Ok(token) => {
                debug!(store = store.name(), "Loaded stored token");
                Ok(Some(token))
            }
            Err(e) if e.is_recoverable_token_error() => {
                warn!(store = store.name(), "Stored token unusable, re-authorizing: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn bootstrap(
        store: &dyn TokenStore,
        flow: &mut AuthorizationFlow,
        prompt: &dyn AuthorizationPrompt,
    ) -> Result<Token> {
        let token = flow
            .run(prompt)
            .await
            .map_err(|e| Error::TokenAcquisitionFailed(e.to_string()))?;

        store.save(&token).await.map_err(|e| {
            Error::TokenAcquisitionFailed(format!("authorized token could not be saved: {}", e))
        })?;
        info!(store = store.name(), "Saved newly authorized token");

        Ok(token)
    }

    /// Current state; always `Ready` once construction succeeded.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// How the token in use was obtained.
    pub fn origin(&self) -> TokenOrigin {
        self.origin
    }

    /// Store that receives every refreshed token.
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Authenticated session.
    pub fn session(&self) -> &AuthenticatedSession {
        &self.session
    }

    /// Take ownership of the session.
    pub fn into_session(self) -> AuthenticatedSession {
        self.session
    }
}

fn advance(state: &mut LifecycleState, next: LifecycleState) {
    debug!("Token lifecycle {:?} -> {:?}", state, next);
    *state = next;
}
