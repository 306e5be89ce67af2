//! Token store backed by an external key-value service.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info};

use sharegraph_common::{Error, Result};

use super::TokenStore;
use crate::config::KeyValueConnectionConfig;
use crate::token::Token;

/// Value written by [`KeyValueTokenStore::initialize`].
pub const EMPTY_SLOT: &str = "{}";

/// Minimal command set the key-value token store needs.
#[async_trait]
pub trait KeyValueConnection: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Fetch the raw value at `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Upsert the raw value at `key`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
impl KeyValueConnection for MultiplexedConnection {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Network(format!("PING failed: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.clone();
        AsyncCommands::get(&mut conn, key)
            .await
            .map_err(|e| Error::Network(format!("GET {} failed: {}", key, e)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.clone();
        AsyncCommands::set::<_, _, ()>(&mut conn, key, value)
            .await
            .map_err(|e| Error::Network(format!("SET {} failed: {}", key, e)))
    }
}

/// Token store holding one JSON value under one key.
pub struct KeyValueTokenStore<C = MultiplexedConnection> {
    connection: C,
    key: String,
}

impl KeyValueTokenStore<MultiplexedConnection> {
    /// Connect to the Redis service described by `config` and probe it.
    ///
    /// # Errors
    /// - `InvalidConfig` if the host or key is empty
    /// - `StoreUnreachable` if connecting or the liveness probe fails or
    ///   exceeds the configured timeout
    pub async fn connect(config: &KeyValueConnectionConfig, key: impl Into<String>) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "storage.connection.host cannot be empty".to_string(),
            ));
        }
        let key = validate_key(key.into())?;

        info!(
            "Connecting to token store at {}:{} db {} (timeout={}s)",
            config.host, config.port, config.db, config.connect_timeout_secs
        );

        let unreachable = |reason: String| {
            Error::StoreUnreachable(format!(
                "{}:{} db {}: {}",
                config.host, config.port, config.db, reason
            ))
        };

        let client = redis::Client::open(config.url().as_str())
            .map_err(|e| unreachable(format!("invalid connection: {}", e)))?;

        let connection = tokio::time::timeout(
            config.connect_timeout(),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| unreachable("timed out connecting".to_string()))?
        .map_err(|e| unreachable(e.to_string()))?;

        tokio::time::timeout(
            config.connect_timeout(),
            KeyValueConnection::ping(&connection),
        )
        .await
        .map_err(|_| unreachable("timed out waiting for PING".to_string()))?
        .map_err(|e| unreachable(e.to_string()))?;

        Ok(Self { connection, key })
    }
}

impl<C: KeyValueConnection> KeyValueTokenStore<C> {
    /// Wrap an already opened connection, probing it first.
    ///
    /// # Errors
    /// - `InvalidConfig` if the key is empty
    /// - `StoreUnreachable` if the probe fails
    pub async fn with_connection(connection: C, key: impl Into<String>) -> Result<Self> {
        let key = validate_key(key.into())?;
        connection
            .ping()
            .await
            .map_err(|e| Error::StoreUnreachable(e.to_string()))?;
        Ok(Self { connection, key })
    }

    /// Key holding the token.
    pub fn key(&self) -> &str {
        &self.key
    }
}

fn validate_key(key: String) -> Result<String> {
    if key.is_empty() {
        return Err(Error::InvalidConfig(
            "storage.key cannot be empty".to_string(),
        ));
    }
    Ok(key)
}

#[async_trait]
impl<C: KeyValueConnection> TokenStore for KeyValueTokenStore<C> {
    fn name(&self) -> &str {
        "key-value"
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.connection.get(&self.key).await?.is_some())
    }

    async fn load(&self) -> Result<Token> {
        let raw = self
            .connection
            .get(&self.key)
            .await
            .map_err(|e| Error::TokenUnavailable(e.to_string()))?
            .ok_or_else(|| Error::TokenNotFound(format!("key '{}' is not set", self.key)))?;

        serde_json::from_str(&raw).map_err(|e| {
            Error::TokenNotFound(format!("key '{}' does not hold a token: {}", self.key, e))
        })
    }

    async fn save(&self, token: &Token) -> Result<()> {
        let json = serde_json::to_string(token)?;
        self.connection.set(&self.key, &json).await?;
        debug!(key = %self.key, "Token saved");
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        if self.load().await.is_ok() {
            debug!(key = %self.key, "Key already holds a token");
            return Ok(());
        }
        self.connection.set(&self.key, EMPTY_SLOT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConnection;

    fn sample_token() -> Token {
        let mut token = Token::bearer("access");
        token.refresh_token = Some("refresh".to_string());
        token.expires_at = Some(1_700_000_000.0);
        token.scope = vec!["User.Read".to_string()];
        token
    }

    #[tokio::test]
    async fn test_absent_key() {
        let store = KeyValueTokenStore::with_connection(MemoryConnection::new(), "token")
            .await
            .unwrap();

        assert!(!store.exists().await.unwrap());
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::TokenNotFound(_)));
    }

    #[tokio::test]
    async fn test_initialize_writes_empty_object() {
        let connection = MemoryConnection::new();
        let store = KeyValueTokenStore::with_connection(connection.clone(), "token")
            .await
            .unwrap();

        store.initialize().await.unwrap();

        assert!(store.exists().await.unwrap());
        assert_eq!(connection.raw("token").as_deref(), Some(EMPTY_SLOT));
        // "{}" is valid JSON but not a token
        assert!(store.load().await.unwrap_err().is_recoverable_token_error());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let connection = MemoryConnection::new();
        let store = KeyValueTokenStore::with_connection(connection.clone(), "token")
            .await
            .unwrap();
        let token = sample_token();

        store.save(&token).await.unwrap();

        assert_eq!(store.load().await.unwrap(), token);
        let raw = connection.raw("token").unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["access_token"], "access");
    }

    #[tokio::test]
    async fn test_initialize_keeps_real_token() {
        let store = KeyValueTokenStore::with_connection(MemoryConnection::new(), "token")
            .await
            .unwrap();
        let token = sample_token();

        store.save(&token).await.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.load().await.unwrap(), token);
    }

    #[tokio::test]
    async fn test_garbage_value_is_not_found() {
        let connection = MemoryConnection::new();
        connection.insert("token", "not json at all");
        let store = KeyValueTokenStore::with_connection(connection, "token")
            .await
            .unwrap();

        assert!(store.exists().await.unwrap());
        assert!(matches!(store.load().await, Err(Error::TokenNotFound(_))));
    }

    #[tokio::test]
    async fn test_unreachable_connection_rejected() {
        let result =
            KeyValueTokenStore::with_connection(MemoryConnection::unreachable(), "token").await;
        assert!(matches!(result, Err(Error::StoreUnreachable(_))));
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let result = KeyValueTokenStore::with_connection(MemoryConnection::new(), "").await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut config = KeyValueConnectionConfig::new("127.0.0.1", 1, 0);
        config.connect_timeout_secs = 2;

        let result = KeyValueTokenStore::connect(&config, "token").await;
        match result {
            Err(Error::StoreUnreachable(message)) => assert!(message.contains("127.0.0.1:1")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("connected to a closed port"),
        }
    }
}
