//! In-memory key-value connection for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use sharegraph_common::{Error, Result};

use super::kv::KeyValueConnection;

/// In-memory stand-in for the external key-value service.
///
/// Clones share the same map, so a test can keep one handle and inspect
/// what the store wrote through another.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    entries: Arc<RwLock<HashMap<String, String>>>,
    reachable: Arc<AtomicBool>,
}

impl MemoryConnection {
    /// Create a new empty, reachable connection.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a connection whose every command fails.
    pub fn unreachable() -> Self {
        let connection = Self::new();
        connection.set_reachable(false);
        connection
    }

    /// Toggle whether commands succeed.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Insert a raw value, bypassing reachability.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key.into(), value.into());
        }
    }

    /// Read a raw value, bypassing reachability.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Network("connection refused".to_string()))
        }
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueConnection for MemoryConnection {
    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_reachable()?;
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Network("memory store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_reachable()?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Network("memory store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_entries() {
        let connection = MemoryConnection::new();
        let other = connection.clone();

        connection.set("k", "v").await.unwrap();
        assert_eq!(other.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_unreachable_fails_commands() {
        let connection = MemoryConnection::new();
        connection.insert("k", "v");
        connection.set_reachable(false);

        assert!(connection.ping().await.is_err());
        assert!(connection.get("k").await.is_err());
        assert_eq!(connection.raw("k").as_deref(), Some("v"));
    }
}
