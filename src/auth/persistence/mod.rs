use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::auth::error::{AuthError, AuthResult};

/// One client-side persistence layer (key-value store, cookie jar, embedded database).
///
/// Every auth artifact the crate writes goes through this trait, and the session
/// recovery purge walks all registered layers through it. Writes follow "last write
/// wins": implementations need no locking beyond what keeps a single call consistent.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait StorageLayer: Send + Sync {
    /// Human-readable layer name used in logs and purge reports.
    fn name(&self) -> &str;
    async fn keys(&self) -> AuthResult<Vec<String>>;
    async fn get(&self, key: &str) -> AuthResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> AuthResult<()>;
    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> AuthResult<()>;
}

pub type SharedStorage = Arc<dyn StorageLayer>;

/// Case-insensitive substring matcher deciding which keys count as auth artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthKeyMatcher {
    patterns: Vec<String>,
}

impl AuthKeyMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|pattern| pattern.as_ref().to_ascii_lowercase())
                .filter(|pattern| !pattern.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.patterns.iter().any(|pattern| key.contains(pattern))
    }
}

/// Process-local storage layer. Also the default layer on native targets.
pub struct InMemoryStorage {
    name: String,
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn shared(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Snapshot of every stored entry.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().unwrap().clone()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl StorageLayer for InMemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn keys(&self) -> AuthResult<Vec<String>> {
        Ok(self.entries.lock().unwrap().keys().cloned().collect())
    }

    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Reads a JSON value stored under `key`.
pub async fn get_json<T>(layer: &dyn StorageLayer, key: &str) -> AuthResult<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    match layer.get(key).await? {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw).map(Some).map_err(|err| {
            AuthError::Storage(format!(
                "Corrupted value under '{key}' in {}: {err}",
                layer.name()
            ))
        }),
        _ => Ok(None),
    }
}

/// Serializes `value` as JSON under `key`.
pub async fn set_json<T>(layer: &dyn StorageLayer, key: &str, value: &T) -> AuthResult<()>
where
    T: serde::Serialize,
{
    let serialized = serde_json::to_string(value)?;
    layer.set(key, &serialized).await
}

#[cfg(not(all(feature = "wasm-web", target_arch = "wasm32")))]
mod file;

#[cfg(not(all(feature = "wasm-web", target_arch = "wasm32")))]
pub use file::FileStorage;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub mod web;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use web::{CookieStorage, IndexedDbStorage, WebStorage, WebStorageDriver};
