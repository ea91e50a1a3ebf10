use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::oneshot;
use js_sys::{Function, Object, Reflect};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Document, HtmlElement, HtmlScriptElement};

use crate::auth::config::ProviderConfig;
use crate::auth::error::{AuthError, AuthResult};
use crate::auth::oauth::AuthorizationGrant;
use crate::auth::sdk::{ProviderSdkClient, SdkHost, SdkUserInfo, SharedSdkClient};
use crate::platform::runtime;

const PROBE_CLASSES: &str = "adsbox ad-banner ad-placement pub_300x250 textads banner-ads";
const PROBE_SETTLE: Duration = Duration::from_millis(50);

fn document() -> AuthResult<Document> {
    web_sys::window()
        .and_then(|window| window.document())
        .ok_or_else(|| AuthError::SdkLoadFailure("Document not available".into()))
}

fn js_error(context: &str, value: JsValue) -> AuthError {
    AuthError::SdkLoadFailure(format!(
        "{context}: {}",
        value.as_string().unwrap_or_else(|| format!("{value:?}"))
    ))
}

fn global_object(name: &str) -> Option<Object> {
    let window = web_sys::window()?;
    Reflect::get(&window, &JsValue::from_str(name))
        .ok()
        .filter(|value| value.is_object())
        .map(Object::from)
}

fn method(target: &JsValue, name: &str) -> Option<Function> {
    Reflect::get(target, &JsValue::from_str(name))
        .ok()
        .and_then(|value| value.dyn_into::<Function>().ok())
}

/// [`SdkHost`] for the provider's browser SDK.
#[derive(Debug, Default, Clone)]
pub struct BrowserSdkHost;

impl BrowserSdkHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl SdkHost for BrowserSdkHost {
    fn sdk_present(&self, config: &ProviderConfig) -> bool {
        global_object(&config.sdk_global)
            .map(|global| {
                Reflect::get(&global, &JsValue::from_str(&config.sdk_entry_method))
                    .map(|entry| !entry.is_undefined() && !entry.is_null())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    async fn inject_script(&self, config: &ProviderConfig) -> AuthResult<()> {
        let document = document()?;
        if document
            .get_element_by_id(&config.sdk_script_marker_id)
            .is_some()
        {
            return Ok(());
        }

        let script = document
            .create_element("script")
            .map_err(|err| js_error("Failed to create script", err))?
            .dyn_into::<HtmlScriptElement>()
            .map_err(|_| AuthError::SdkLoadFailure("Script element has wrong type".into()))?;
        script.set_id(&config.sdk_script_marker_id);
        script.set_src(&config.sdk_script_url);
        script.set_async(true);

        let (sender, receiver) = oneshot::channel::<AuthResult<()>>();
        let sender = Rc::new(RefCell::new(Some(sender)));
        let success_sender = sender.clone();
        let onload = Closure::wrap(Box::new(move || {
            if let Some(tx) = success_sender.borrow_mut().take() {
                let _ = tx.send(Ok(()));
            }
        }) as Box<dyn FnMut()>);

        let error_sender = sender.clone();
        let url = config.sdk_script_url.clone();
        let onerror = Closure::wrap(Box::new(move || {
            if let Some(tx) = error_sender.borrow_mut().take() {
                let _ = tx.send(Err(AuthError::SdkLoadFailure(format!(
                    "Failed to load provider script: {url}"
                ))));
            }
        }) as Box<dyn FnMut()>);

        script.set_onload(Some(onload.as_ref().unchecked_ref()));
        script.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        onload.forget();
        onerror.forget();

        if let Some(head) = document.head() {
            head.append_child(&script)
                .map_err(|err| js_error("Failed to append script to <head>", err))?;
        } else if let Some(body) = document.body() {
            body.append_child(&script)
                .map_err(|err| js_error("Failed to append script to <body>", err))?;
        } else {
            return Err(AuthError::SdkLoadFailure("Document has no <head> or <body>".into()));
        }

        receiver
            .await
            .map_err(|_| AuthError::SdkLoadFailure("Script load callback dropped".into()))?
    }

    fn client(&self, config: &ProviderConfig) -> Option<SharedSdkClient> {
        let client: SharedSdkClient = Arc::new(BrowserSdkClient {
            global: config.sdk_global.clone(),
            entry_method: config.sdk_entry_method.clone(),
        });
        Some(client)
    }

    async fn ad_probe_collapsed(&self) -> bool {
        let Ok(document) = document() else {
            return false;
        };
        let Some(body) = document.body() else {
            return false;
        };
        let Some(probe) = document
            .create_element("div")
            .ok()
            .and_then(|element| element.dyn_into::<HtmlElement>().ok())
        else {
            return false;
        };

        probe.set_class_name(PROBE_CLASSES);
        probe.set_inner_html("&nbsp;");
        let style = probe.style();
        let _ = style.set_property("position", "absolute");
        let _ = style.set_property("left", "-10000px");
        let _ = style.set_property("height", "10px");
        let _ = style.set_property("width", "1px");
        if body.append_child(&probe).is_err() {
            return false;
        }

        runtime::sleep(PROBE_SETTLE).await;
        let collapsed = probe.offset_height() == 0;
        probe.remove();
        collapsed
    }
}

/// Thin wrapper over the SDK global (`QC` for the default provider).
struct BrowserSdkClient {
    global: String,
    entry_method: String,
}

impl BrowserSdkClient {
    fn global(&self) -> AuthResult<Object> {
        global_object(&self.global).ok_or_else(|| {
            AuthError::SdkLoadFailure(format!("global '{}' disappeared", self.global))
        })
    }

    /// `QC.Login.getMe(function (openId, accessToken) { ... })`
    async fn open_id(&self, global: &Object) -> AuthResult<String> {
        let login = Reflect::get(global, &JsValue::from_str(&self.entry_method))
            .map_err(|err| js_error("SDK login object missing", err))?;
        let get_me = method(&login, "getMe")
            .ok_or_else(|| AuthError::SdkLoadFailure("SDK has no getMe".into()))?;

        let (sender, receiver) = oneshot::channel::<String>();
        let sender = Rc::new(RefCell::new(Some(sender)));
        let callback = Closure::wrap(Box::new(move |open_id: JsValue, _token: JsValue| {
            if let Some(tx) = sender.borrow_mut().take() {
                let _ = tx.send(open_id.as_string().unwrap_or_default());
            }
        }) as Box<dyn FnMut(JsValue, JsValue)>);

        get_me
            .call1(&login, callback.as_ref().unchecked_ref())
            .map_err(|err| js_error("getMe failed", err))?;
        callback.forget();

        receiver
            .await
            .map_err(|_| AuthError::SdkLoadFailure("getMe callback dropped".into()))
    }

    /// `QC.api("get_user_info").success(cb).error(cb)`
    async fn user_info(&self, global: &Object) -> AuthResult<SdkUserInfo> {
        let api = method(global, "api")
            .ok_or_else(|| AuthError::SdkLoadFailure("SDK has no api()".into()))?;
        let request = api
            .call1(global, &JsValue::from_str("get_user_info"))
            .map_err(|err| js_error("get_user_info call failed", err))?;

        let (sender, receiver) = oneshot::channel::<AuthResult<SdkUserInfo>>();
        let sender = Rc::new(RefCell::new(Some(sender)));

        let success_sender = sender.clone();
        let on_success = Closure::wrap(Box::new(move |response: JsValue| {
            let result = parse_response(&response);
            if let Some(tx) = success_sender.borrow_mut().take() {
                let _ = tx.send(result);
            }
        }) as Box<dyn FnMut(JsValue)>);

        let error_sender = sender.clone();
        let on_error = Closure::wrap(Box::new(move |response: JsValue| {
            let message = parse_response(&response)
                .map(|info| format!("ret={}: {}", info.ret, info.msg))
                .unwrap_or_else(|err| err.to_string());
            if let Some(tx) = error_sender.borrow_mut().take() {
                let _ = tx.send(Err(AuthError::SdkLoadFailure(message)));
            }
        }) as Box<dyn FnMut(JsValue)>);

        let success = method(&request, "success")
            .ok_or_else(|| AuthError::SdkLoadFailure("SDK request has no success()".into()))?;
        let chained = success
            .call1(&request, on_success.as_ref().unchecked_ref())
            .map_err(|err| js_error("success() failed", err))?;
        if let Some(error) = method(&chained, "error") {
            error
                .call1(&chained, on_error.as_ref().unchecked_ref())
                .map_err(|err| js_error("error() failed", err))?;
        }
        on_success.forget();
        on_error.forget();

        receiver
            .await
            .map_err(|_| AuthError::SdkLoadFailure("get_user_info callback dropped".into()))?
    }
}

fn parse_response(response: &JsValue) -> AuthResult<SdkUserInfo> {
    let data = Reflect::get(response, &JsValue::from_str("data"))
        .ok()
        .filter(|data| data.is_object())
        .unwrap_or_else(|| response.clone());
    let json = js_sys::JSON::stringify(&data)
        .map_err(|err| js_error("Cannot serialize SDK response", err))?
        .as_string()
        .unwrap_or_default();
    serde_json::from_str(&json)
        .map_err(|err| AuthError::SdkLoadFailure(format!("Malformed SDK response: {err}")))
}

#[async_trait(?Send)]
impl ProviderSdkClient for BrowserSdkClient {
    fn is_ready(&self) -> bool {
        global_object(&self.global)
            .and_then(|global| Reflect::get(&global, &JsValue::from_str(&self.entry_method)).ok())
            .map(|entry| !entry.is_undefined())
            .unwrap_or(false)
    }

    async fn get_user_info(&self, _grant: &AuthorizationGrant) -> AuthResult<SdkUserInfo> {
        let global = self.global()?;
        let open_id = self.open_id(&global).await?;
        let mut info = self.user_info(&global).await?;
        if info.open_id.as_deref().map_or(true, str::is_empty) {
            info.open_id = Some(open_id);
        }
        Ok(info)
    }

    /// `QC.Login.showPopup({ appId, redirectURI })`
    async fn login(&self, authorize_url: &str) -> AuthResult<bool> {
        let global = self.global()?;
        let login = Reflect::get(&global, &JsValue::from_str(&self.entry_method))
            .map_err(|err| js_error("SDK login object missing", err))?;
        let Some(show_popup) = method(&login, "showPopup") else {
            return Ok(false);
        };

        let url = url::Url::parse(authorize_url)?;
        let param = |name: &str| {
            url.query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default()
        };
        let options = Object::new();
        Reflect::set(
            &options,
            &JsValue::from_str("appId"),
            &JsValue::from_str(&param("client_id")),
        )
        .map_err(|err| js_error("Cannot build popup options", err))?;
        Reflect::set(
            &options,
            &JsValue::from_str("redirectURI"),
            &JsValue::from_str(&param("redirect_uri")),
        )
        .map_err(|err| js_error("Cannot build popup options", err))?;

        show_popup
            .call1(&login, &options)
            .map_err(|err| js_error("showPopup failed", err))?;
        Ok(true)
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};

    wasm_bindgen_test_configure!(run_in_browser);

    const SDK_SOURCE: &str = "data:text/javascript,window.__idlinkSdkRuns=(window.__idlinkSdkRuns||0)+1;window.IdlinkTestSdk={Login:{}};";

    fn provider(marker: &str, script_url: &str) -> ProviderConfig {
        let mut config = ProviderConfig::new("qq", "101010", "https://site.example/auth/callback")
            .with_sdk(script_url, "IdlinkTestSdk", "Login");
        config.sdk_script_marker_id = marker.to_string();
        config
    }

    fn script_runs() -> f64 {
        web_sys::window()
            .and_then(|window| Reflect::get(&window, &JsValue::from_str("__idlinkSdkRuns")).ok())
            .and_then(|value| value.as_f64())
            .unwrap_or(0.0)
    }

    #[wasm_bindgen_test(async)]
    async fn script_is_injected_once() {
        let host = BrowserSdkHost::new();
        let config = provider("idlink-test-sdk", SDK_SOURCE);
        assert!(!host.sdk_present(&config));

        host.inject_script(&config).await.expect("first injection");
        host.inject_script(&config).await.expect("second injection");

        assert_eq!(script_runs(), 1.0);
        assert!(host.sdk_present(&config));
        assert!(host.client(&config).expect("client").is_ready());
        let document = document().expect("document");
        assert!(document.get_element_by_id("idlink-test-sdk").is_some());
    }

    #[wasm_bindgen_test(async)]
    async fn unreachable_script_reports_load_failure() {
        let host = BrowserSdkHost::new();
        let config = provider("idlink-missing-sdk", "http://127.0.0.1:9/missing-sdk.js");

        let err = host.inject_script(&config).await.unwrap_err();

        assert!(matches!(err, AuthError::SdkLoadFailure(message) if message.contains("missing-sdk.js")));
    }

    #[wasm_bindgen_test(async)]
    async fn ad_blocker_check_removes_its_element() {
        let collapsed = BrowserSdkHost::new().ad_probe_collapsed().await;

        assert!(!collapsed);
        let document = document().expect("document");
        assert!(document.query_selector(".adsbox").expect("selector").is_none());
    }
}
