use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::persistence::StorageLayer;

/// Storage layer backed by a single JSON object file, the native stand-in for a
/// browser's embedded database.
#[derive(Clone)]
pub struct FileStorage {
    name: String,
    path: Arc<PathBuf>,
    // Serializes read-modify-write cycles within this process.
    guard: Arc<Mutex<()>>,
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_name("file", path)
    }

    pub fn with_name(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: Arc::new(path.as_ref().to_path_buf()),
            guard: Arc::new(Mutex::new(())),
        }
    }

    fn load(&self) -> AuthResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let mut file = File::open(&*self.path)
            .map_err(|err| AuthError::Storage(format!("Failed to open storage file: {err}")))?;
        let mut buffer = String::new();
        file.read_to_string(&mut buffer)
            .map_err(|err| AuthError::Storage(format!("Failed to read storage file: {err}")))?;

        if buffer.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&buffer)
            .map_err(|err| AuthError::Storage(format!("Failed to parse storage file: {err}")))
    }

    fn store(&self, entries: &BTreeMap<String, String>) -> AuthResult<()> {
        if entries.is_empty() {
            if self.path.exists() {
                fs::remove_file(&*self.path).map_err(|err| {
                    AuthError::Storage(format!("Failed to remove storage file: {err}"))
                })?;
            }
            return Ok(());
        }

        let serialized = serde_json::to_string(entries)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AuthError::Storage(format!("Failed to create storage directory: {err}"))
            })?;
        }
        let mut file = File::create(&*self.path)
            .map_err(|err| AuthError::Storage(format!("Failed to create storage file: {err}")))?;
        file.write_all(serialized.as_bytes())
            .map_err(|err| AuthError::Storage(format!("Failed to write storage file: {err}")))
    }
}

#[async_trait]
impl StorageLayer for FileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn keys(&self) -> AuthResult<Vec<String>> {
        let _lock = self.guard.lock().unwrap();
        Ok(self.load()?.into_keys().collect())
    }

    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let _lock = self.guard.lock().unwrap();
        Ok(self.load()?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        let _lock = self.guard.lock().unwrap();
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.store(&entries)
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        let _lock = self.guard.lock().unwrap();
        let mut entries = match self.load() {
            Ok(entries) => entries,
            // An unreadable file cannot hold a usable value; drop it entirely.
            Err(_) => return self.store(&BTreeMap::new()),
        };
        if entries.remove(key).is_some() {
            self.store(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "identity-link-storage-{}-{}.json",
            name,
            std::process::id()
        ));
        path
    }

    #[tokio::test(flavor = "current_thread")]
    async fn values_survive_new_handle() {
        let path = temp_path("survive");
        let storage = FileStorage::new(&path);
        storage.set("idlink.auth.session", "{}").await.unwrap();
        storage.set("theme", "dark").await.unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(
            reopened.get("idlink.auth.session").await.unwrap(),
            Some("{}".to_string())
        );
        assert_eq!(reopened.keys().await.unwrap().len(), 2);

        reopened.remove("idlink.auth.session").await.unwrap();
        reopened.remove("theme").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn remove_discards_corrupted_file() {
        let path = temp_path("corrupted");
        fs::write(&path, "{broken").unwrap();
        let storage = FileStorage::new(&path);

        assert!(storage.keys().await.is_err());
        storage.remove("idlink.auth.session").await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
    }
}
