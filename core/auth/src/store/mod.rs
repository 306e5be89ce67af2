//! Persistence for a single token record.
//!
//! A [`TokenStore`] answers four questions about one slot: does it exist,
//! what token does it hold, overwrite it, and create an empty slot. The
//! lifecycle manager only ever talks to this trait, so backends can be
//! swapped without touching the authorization or refresh logic.

use async_trait::async_trait;
use std::sync::Arc;

use sharegraph_common::Result;

use crate::config::StorageDestination;
use crate::token::Token;

pub mod file;
pub mod kv;
#[cfg(test)]
pub(crate) mod memory;

pub use file::FileTokenStore;
pub use kv::{KeyValueConnection, KeyValueTokenStore};
#[cfg(test)]
pub(crate) use memory::MemoryConnection;

/// Storage abstraction for a persisted OAuth2 token.
///
/// Backends never interpret the token beyond "parses" or "does not parse".
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Backend name for logs (e.g. "file", "key-value").
    fn name(&self) -> &str;

    /// Check whether the slot exists.
    ///
    /// An existing slot may still hold a placeholder rather than a token.
    async fn exists(&self) -> Result<bool>;

    /// Load the stored token.
    ///
    /// # Errors
    /// - `TokenUnavailable`, `CorruptToken` or `TokenNotFound` when the slot
    ///   holds no usable token; callers recover by re-authorizing
    async fn load(&self) -> Result<Token>;

    /// Overwrite the slot with `token`.
    async fn save(&self, token: &Token) -> Result<()>;

    /// Create a placeholder so the slot exists.
    ///
    /// A slot that already holds a parseable token is left untouched.
    async fn initialize(&self) -> Result<()>;
}

/// Open the token store selected by `destination`.
///
/// # Errors
/// - `StoreUnreachable` if the key-value store cannot be reached
/// - `InvalidConfig` if the destination is incomplete
pub async fn open_store(destination: &StorageDestination) -> Result<Arc<dyn TokenStore>> {
    match destination {
        StorageDestination::File { path } => Ok(Arc::new(FileTokenStore::new(path))),
        StorageDestination::KeyValue { connection, key } => {
            let store = KeyValueTokenStore::connect(connection, key.clone()).await?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyValueConnectionConfig;
    use sharegraph_common::Error;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_file_store() {
        let dir = TempDir::new().unwrap();
        let destination = StorageDestination::File {
            path: dir.path().join("token.json"),
        };

        let store = open_store(&destination).await.unwrap();
        assert_eq!(store.name(), "file");
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_open_unreachable_key_value_store() {
        // Port 1 is reserved and closed on test hosts
        let mut connection = KeyValueConnectionConfig::new("127.0.0.1", 1, 0);
        connection.connect_timeout_secs = 2;
        let destination = StorageDestination::KeyValue {
            connection,
            key: "token".to_string(),
        };

        let result = open_store(&destination).await;
        assert!(matches!(result, Err(Error::StoreUnreachable(_))));
    }
}
