//! File-backed token store.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use sharegraph_common::{Error, Result};

use super::TokenStore;
use crate::token::Token;

/// Marker written by [`FileTokenStore::initialize`] until a real token is saved.
///
/// Deliberately not valid JSON.
pub const PLACEHOLDER: &str = "--TOKENFILE---";

/// Token store holding one JSON document on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Create a store for the given file path. Nothing is touched on disk.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Write `contents` to a sibling temp file and rename it over the target.
    async fn write_atomic(&self, contents: &[u8]) -> Result<()> {
        self.ensure_parent().await?;
        let temp = self.temp_path();

        // A leftover temp file would keep its old mode
        match fs::remove_file(&temp).await {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp).await?;
        let written = async {
            file.write_all(contents).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn exists(&self) -> Result<bool> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self) -> Result<Token> {
        let raw = fs::read_to_string(&self.path).await.map_err(|e| {
            Error::TokenUnavailable(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        if raw.trim() == PLACEHOLDER {
            return Err(Error::TokenUnavailable(format!(
                "{} holds no token yet",
                self.path.display()
            )));
        }

        serde_json::from_str(&raw).map_err(|e| {
            Error::CorruptToken(format!("{}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, token: &Token) -> Result<()> {
        let json = serde_json::to_vec_pretty(token)?;
        self.write_atomic(&json).await?;
        debug!(path = %self.path.display(), "Token saved");
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        if self.load().await.is_ok() {
            debug!(path = %self.path.display(), "Token file already holds a token");
            return Ok(());
        }
        self.write_atomic(PLACEHOLDER.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, FileTokenStore) {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        (dir, store)
    }

    fn sample_token() -> Token {
        let mut token = Token::bearer("access");
        token.refresh_token = Some("refresh".to_string());
        token.expires_in = Some(3600.0);
        token.expires_at = Some(1_700_000_000.0);
        token.scope = vec!["Sites.ReadWrite.All".to_string(), "offline_access".to_string()];
        token
    }

    #[tokio::test]
    async fn test_missing_file_placeholder_then_recoverable_load() {
        let (_dir, store) = temp_store();

        assert!(!store.exists().await.unwrap());

        store.initialize().await.unwrap();
        assert!(store.exists().await.unwrap());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, PLACEHOLDER);

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::TokenUnavailable(_)));
        assert!(err.is_recoverable_token_error());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_dir, store) = temp_store();
        let token = sample_token();

        store.save(&token).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded, token);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_initialize_keeps_real_token() {
        let (_dir, store) = temp_store();
        let token = sample_token();

        store.save(&token).await.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(store.load().await.unwrap(), token);
    }

    #[tokio::test]
    async fn test_initialize_twice_keeps_placeholder() {
        let (_dir, store) = temp_store();

        store.initialize().await.unwrap();
        store.initialize().await.unwrap();

        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "{\"access_token\": ").unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::CorruptToken(_)));
        assert!(err.is_recoverable_token_error());
    }

    #[tokio::test]
    async fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("deeper").join("t.json"));

        store.save(&sample_token()).await.unwrap();
        assert!(store.exists().await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_token_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = temp_store();
        store.save(&sample_token()).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_temp_file_does_not_leak_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, store) = temp_store();
        let temp = store.temp_path();
        std::fs::write(&temp, "stale").unwrap();
        std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o644)).unwrap();

        store.save(&sample_token()).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!temp.exists());
        assert_eq!(store.load().await.unwrap(), sample_token());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_token_file() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path());
        assert!(!store.exists().await.unwrap());
    }

    fn arb_token() -> impl Strategy<Value = Token> {
        (
            "[A-Za-z0-9._-]{1,64}",
            proptest::option::of("[A-Za-z0-9._-]{1,64}"),
            proptest::option::of(0u32..100_000),
            proptest::option::of(0u32..2_000_000_000),
            proptest::collection::vec("[A-Za-z.]{1,24}", 0..4),
        )
            .prop_map(|(access, refresh, expires_in, expires_at, scope)| {
                let mut token = Token::bearer(access);
                token.refresh_token = refresh;
                token.expires_in = expires_in.map(f64::from);
                token.expires_at = expires_at.map(f64::from);
                token.scope = scope;
                token
            })
    }

    proptest! {
        #[test]
        fn prop_save_then_load_round_trips(token in arb_token()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (_dir, store) = temp_store();

            let loaded = runtime.block_on(async {
                store.save(&token).await.unwrap();
                store.load().await.unwrap()
            });

            prop_assert_eq!(loaded, token);
        }
    }
}
