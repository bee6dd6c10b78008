use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{Token, TokenStore};
use crate::runtime::Runtime;

/// File name of the token cache inside the storage directory.
pub const TOKEN_CACHE_FILE: &str = "token_cache.json";

/// Token cache kept as a JSON file in the storage directory.
pub struct FileTokenStore<R: Runtime> {
    runtime: R,
    path: PathBuf,
}

impl<R: Runtime> FileTokenStore<R> {
    pub fn new(runtime: R, storage_dir: PathBuf) -> Self {
        Self {
            runtime,
            path: storage_dir.join(TOKEN_CACHE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: Runtime> TokenStore for FileTokenStore<R> {
    #[tracing::instrument(skip(self))]
    fn load(&self) -> Option<Token> {
        if !self.runtime.is_file(&self.path) {
            return None;
        }

        let content = match self.runtime.read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!("Ignoring unreadable token cache {:?}: {}", self.path, e);
                return None;
            }
        };

        match serde_json::from_str::<Token>(&content) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!("Ignoring corrupt token cache {:?}: {}", self.path, e);
                None
            }
        }
    }

    #[tracing::instrument(skip(self, token))]
    fn save(&self, token: &Token) -> Result<()> {
        let json = serde_json::to_vec_pretty(token).context("Failed to serialize token")?;
        self.runtime
            .write_atomic(&self.path, &json)
            .with_context(|| format!("Failed to write token cache {:?}", self.path))?;
        debug!("Token cached at {:?}", self.path);
        Ok(())
    }
}

/// In-process token cache, for tests and callers that don't want a file.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: Token) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<Token> {
        self.token.lock().ok()?.clone()
    }

    fn save(&self, token: &Token) -> Result<()> {
        let mut slot = self
            .token
            .lock()
            .map_err(|_| anyhow::anyhow!("Token store lock poisoned"))?;
        *slot = Some(token.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use tempfile::tempdir;

    fn sample_token() -> Token {
        Token::issued("abc.def.ghi", None, Some(3600), 1_700_000_000)
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(RealRuntime, dir.path().to_path_buf());

        assert!(store.load().is_none());

        store.save(&sample_token()).unwrap();
        assert!(dir.path().join(TOKEN_CACHE_FILE).exists());
        assert_eq!(store.load(), Some(sample_token()));
    }

    #[test]
    fn test_file_store_overwrites_previous_token() {
        let dir = tempdir().unwrap();
        let store = FileTokenStore::new(RealRuntime, dir.path().to_path_buf());

        store.save(&sample_token()).unwrap();
        let newer = Token::issued("newer", None, Some(3600), 1_700_010_000);
        store.save(&newer).unwrap();

        assert_eq!(store.load(), Some(newer));
    }

    #[test]
    fn test_file_store_reads_cache_with_extra_fields() {
        // Caches written by older clients kept the whole identity provider response
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(TOKEN_CACHE_FILE),
            r#"{
                "token_type": "Bearer",
                "expires_in": 3599,
                "ext_expires_in": 3599,
                "access_token": "legacy",
                "obtained_at": 1700000000,
                "expires_at": 1700003569
            }"#,
        )
        .unwrap();

        let store = FileTokenStore::new(RealRuntime, dir.path().to_path_buf());
        let token = store.load().unwrap();
        assert_eq!(token.access_token, "legacy");
        assert_eq!(token.expires_at, 1_700_003_569);
    }

    #[test]
    fn test_file_store_ignores_corrupt_cache() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/storage").join(TOKEN_CACHE_FILE);

        runtime
            .expect_is_file()
            .with(eq(path.clone()))
            .returning(|_| true);
        runtime
            .expect_read_to_string()
            .with(eq(path))
            .returning(|_| Ok("{not json".to_string()));

        let store = FileTokenStore::new(runtime, PathBuf::from("/storage"));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_file_store_ignores_unreadable_cache() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_file().returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(|_| Err(anyhow::anyhow!("permission denied")));

        let store = FileTokenStore::new(runtime, PathBuf::from("/storage"));
        assert!(store.load().is_none());
    }

    #[test]
    fn test_file_store_save_uses_atomic_write() {
        let mut runtime = MockRuntime::new();
        let path = PathBuf::from("/storage").join(TOKEN_CACHE_FILE);

        runtime
            .expect_write_atomic()
            .withf(move |p, contents| {
                p == path.as_path()
                    && String::from_utf8_lossy(contents).contains("\"access_token\": \"abc.def.ghi\"")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let store = FileTokenStore::new(runtime, PathBuf::from("/storage"));
        store.save(&sample_token()).unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        assert!(store.load().is_none());

        store.save(&sample_token()).unwrap();
        assert_eq!(store.load(), Some(sample_token()));
    }
}
