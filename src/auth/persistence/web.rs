use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::oneshot;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{HtmlDocument, Storage, Window};

use crate::auth::error::{AuthError, AuthResult};
use crate::auth::persistence::StorageLayer;

const COOKIE_EXPIRED: &str = "expires=Thu, 01 Jan 1970 00:00:00 GMT";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WebStorageDriver {
    Local,
    Session,
}

fn window() -> AuthResult<Window> {
    web_sys::window()
        .ok_or_else(|| AuthError::Storage("window object is not available in this environment".into()))
}

fn map_js_error(value: JsValue) -> AuthError {
    AuthError::Storage(
        value
            .as_string()
            .unwrap_or_else(|| format!("{value:?}")),
    )
}

/// `localStorage` / `sessionStorage` layer.
#[derive(Debug, Clone)]
pub struct WebStorage {
    driver: WebStorageDriver,
}

impl WebStorage {
    pub fn new(driver: WebStorageDriver) -> Self {
        Self { driver }
    }

    fn storage(&self) -> AuthResult<Storage> {
        let window = window()?;
        match self.driver {
            WebStorageDriver::Local => window.local_storage().map_err(map_js_error)?,
            WebStorageDriver::Session => window.session_storage().map_err(map_js_error)?,
        }
        .ok_or_else(|| AuthError::Storage("Web storage API is unavailable".into()))
    }
}

#[async_trait(?Send)]
impl StorageLayer for WebStorage {
    fn name(&self) -> &str {
        match self.driver {
            WebStorageDriver::Local => "localStorage",
            WebStorageDriver::Session => "sessionStorage",
        }
    }

    async fn keys(&self) -> AuthResult<Vec<String>> {
        let storage = self.storage()?;
        let length = storage.length().map_err(map_js_error)?;
        let mut keys = Vec::with_capacity(length as usize);
        for index in 0..length {
            if let Some(key) = storage.key(index).map_err(map_js_error)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        self.storage()?.get_item(key).map_err(map_js_error)
    }

    async fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        self.storage()?.set_item(key, value).map_err(map_js_error)
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        self.storage()?.remove_item(key).map_err(map_js_error)
    }
}

/// `document.cookie` layer. Values are written for the whole site path.
#[derive(Debug, Clone, Default)]
pub struct CookieStorage {
    /// Extra domains to expire cookies on, e.g. the parent domain of the site.
    domains: Arc<Vec<String>>,
}

impl CookieStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domains(domains: Vec<String>) -> Self {
        Self {
            domains: Arc::new(domains),
        }
    }

    fn document() -> AuthResult<HtmlDocument> {
        window()?
            .document()
            .ok_or_else(|| AuthError::Storage("Document not available".into()))?
            .dyn_into::<HtmlDocument>()
            .map_err(|_| AuthError::Storage("Document is not an HTML document".into()))
    }

    fn entries() -> AuthResult<Vec<(String, String)>> {
        let raw = Self::document()?.cookie().map_err(map_js_error)?;
        Ok(raw
            .split(';')
            .filter_map(|pair| {
                let pair = pair.trim();
                if pair.is_empty() {
                    return None;
                }
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect())
    }
}

#[async_trait(?Send)]
impl StorageLayer for CookieStorage {
    fn name(&self) -> &str {
        "cookies"
    }

    async fn keys(&self) -> AuthResult<Vec<String>> {
        Ok(Self::entries()?.into_iter().map(|(name, _)| name).collect())
    }

    async fn get(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(Self::entries()?
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| {
                percent_encoding::percent_decode_str(&value)
                    .decode_utf8_lossy()
                    .into_owned()
            }))
    }

    async fn set(&self, key: &str, value: &str) -> AuthResult<()> {
        let encoded =
            percent_encoding::utf8_percent_encode(value, percent_encoding::NON_ALPHANUMERIC);
        Self::document()?
            .set_cookie(&format!("{key}={encoded}; path=/; SameSite=Lax"))
            .map_err(map_js_error)
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        let document = Self::document()?;
        document
            .set_cookie(&format!("{key}=; {COOKIE_EXPIRED}; path=/"))
            .map_err(map_js_error)?;
        for domain in self.domains.iter() {
            document
                .set_cookie(&format!("{key}=; {COOKIE_EXPIRED}; path=/; domain={domain}"))
                .map_err(map_js_error)?;
        }
        Ok(())
    }
}

/// Embedded-database layer. Each "key" is an IndexedDB database name known to hold auth
/// state; removing a key deletes that database.
#[derive(Debug, Clone)]
pub struct IndexedDbStorage {
    databases: Arc<Vec<String>>,
}

impl IndexedDbStorage {
    pub fn new(databases: Vec<String>) -> Self {
        Self {
            databases: Arc::new(databases),
        }
    }
}

#[async_trait(?Send)]
impl StorageLayer for IndexedDbStorage {
    fn name(&self) -> &str {
        "indexedDB"
    }

    async fn keys(&self) -> AuthResult<Vec<String>> {
        Ok(self.databases.as_ref().clone())
    }

    async fn get(&self, _key: &str) -> AuthResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, key: &str, _value: &str) -> AuthResult<()> {
        Err(AuthError::Storage(format!(
            "IndexedDB layer is purge-only; cannot write '{key}'"
        )))
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        let factory = window()?
            .indexed_db()
            .map_err(map_js_error)?
            .ok_or_else(|| AuthError::Storage("IndexedDB is unavailable".into()))?;
        let request = factory.delete_database(key).map_err(map_js_error)?;

        let (sender, receiver) = oneshot::channel::<AuthResult<()>>();
        let sender = Rc::new(RefCell::new(Some(sender)));

        let success_sender = sender.clone();
        let on_success = Closure::wrap(Box::new(move || {
            if let Some(tx) = success_sender.borrow_mut().take() {
                let _ = tx.send(Ok(()));
            }
        }) as Box<dyn FnMut()>);

        // Deletion proceeds once other connections close; nothing left to wait for here.
        let blocked_sender = sender.clone();
        let on_blocked = Closure::wrap(Box::new(move || {
            if let Some(tx) = blocked_sender.borrow_mut().take() {
                let _ = tx.send(Ok(()));
            }
        }) as Box<dyn FnMut()>);

        let error_sender = sender.clone();
        let name = key.to_string();
        let on_error = Closure::wrap(Box::new(move || {
            if let Some(tx) = error_sender.borrow_mut().take() {
                let _ = tx.send(Err(AuthError::Storage(format!(
                    "Failed to delete IndexedDB database '{name}'"
                ))));
            }
        }) as Box<dyn FnMut()>);

        request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        request.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));
        request.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        let result = receiver
            .await
            .map_err(|_| AuthError::Storage("IndexedDB delete callback dropped".into()))?;

        request.set_onsuccess(None);
        request.set_onblocked(None);
        request.set_onerror(None);
        drop((on_success, on_blocked, on_error));
        result
    }
}
