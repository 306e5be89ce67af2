//! OAuth2 token lifecycle for ShareGraph.
//!
//! This crate obtains, persists and refreshes the delegated token used to
//! call the Graph API:
//! - [`store`]: token persistence (file, key-value)
//! - [`flow`]: interactive authorization-code flow
//! - [`session`]: HTTP session that refreshes and re-persists its token
//! - [`lifecycle`]: glue that picks a stored token or bootstraps a new one

pub mod config;
pub mod endpoint;
pub mod flow;
pub mod lifecycle;
pub mod session;
pub mod store;
pub mod token;

#[cfg(test)]
mod test_support;

pub use config::{Config, KeyValueConnectionConfig, OAuthConfig, StorageDestination};
pub use endpoint::{OAuth2Endpoint, TokenEndpoint};
pub use flow::{AuthorizationFlow, AuthorizationPrompt, StdioPrompt};
pub use lifecycle::{LifecycleState, TokenLifecycleManager, TokenOrigin};
pub use session::{store_updater, AuthenticatedSession, TokenUpdater};
pub use store::{open_store, FileTokenStore, KeyValueTokenStore, TokenStore};
pub use token::Token;
