//! `wasm-bindgen` exports: the worker-side interceptor and the page-side
//! activation entry point. Only compiled on `wasm32` targets.

use crate::bridge;
use crate::console::ConsoleLayer;
use coi_activation::Platform;
use coi_activation::Registration;
use coi_core::ShieldError;
use coi_core::ShieldResult;
use coi_interceptor::ForwardMode;
use coi_interceptor::Interception;
use coi_interceptor::LifecycleDirective;
use coi_interceptor::Rewritten;
use coi_interceptor::Upstream;
use coi_net::CacheMode;
use coi_net::HeaderSet;
use coi_net::HttpResponse;
use coi_net::InterceptedRequest;
use coi_net::RequestMode;
use coi_shield::Shield;
use coi_shield::activate_page;
use coi_shield::load_config;
use js_sys::Array;
use js_sys::Promise;
use js_sys::Reflect;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use std::time::Duration;
use tracing::Level;
use tracing::debug;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use url::Url;
use wasm_bindgen::JsCast;
use wasm_bindgen::convert::FromWasmAbi;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_futures::future_to_promise;
use web_sys::ExtendableEvent;
use web_sys::FetchEvent;
use web_sys::Headers;
use web_sys::RegistrationOptions;
use web_sys::Request;
use web_sys::RequestInit;
use web_sys::Response;
use web_sys::ResponseInit;
use web_sys::ServiceWorkerGlobalScope;
use web_sys::ServiceWorkerRegistration;
use web_sys::Window;
use web_sys::console;

fn install_panic_hook() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        std::panic::set_hook(Box::new(|info| {
            let msg = match info.location() {
                Some(loc) => format!(
                    "panic at {}:{}:{}: {info}",
                    loc.file(),
                    loc.line(),
                    loc.column()
                ),
                None => format!("panic: {info}"),
            };
            console::error_1(&JsValue::from_str(&msg));
        }));
    });
}

fn init_logging() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let subscriber =
            tracing_subscriber::registry().with(ConsoleLayer::new(Level::INFO, write_console));
        // A host page may already own the global subscriber.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn write_console(level: Level, line: &str) {
    let line = JsValue::from_str(line);
    if level == Level::ERROR {
        console::error_1(&line);
    } else if level == Level::WARN {
        console::warn_1(&line);
    } else if level == Level::INFO {
        console::info_1(&line);
    } else {
        console::debug_1(&line);
    }
}

fn js_error(code: &'static str, value: JsValue) -> ShieldError {
    let detail = value
        .as_string()
        .or_else(|| {
            value
                .dyn_ref::<js_sys::Error>()
                .map(|error| String::from(error.message()))
        })
        .unwrap_or_else(|| format!("{value:?}"));
    ShieldError::new(code, detail)
}

fn to_js(error: ShieldError) -> JsValue {
    js_sys::Error::new(&error.to_string()).into()
}

fn flag(target: &JsValue, name: &str) -> bool {
    Reflect::get(target, &JsValue::from_str(name))
        .ok()
        .and_then(|value| value.as_bool())
        .unwrap_or(false)
}

fn header_pairs(headers: &Headers) -> Vec<(String, String)> {
    let Ok(Some(entries)) = js_sys::try_iter(headers) else {
        return Vec::new();
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let pair = Array::from(&entry);
            Some((pair.get(0).as_string()?, pair.get(1).as_string()?))
        })
        .collect()
}

fn request_mode(mode: web_sys::RequestMode) -> RequestMode {
    match mode {
        web_sys::RequestMode::Navigate => RequestMode::Navigate,
        web_sys::RequestMode::SameOrigin => RequestMode::SameOrigin,
        web_sys::RequestMode::Cors => RequestMode::Cors,
        _ => RequestMode::NoCors,
    }
}

fn cache_mode(cache: web_sys::RequestCache) -> CacheMode {
    match cache {
        web_sys::RequestCache::NoStore => CacheMode::NoStore,
        web_sys::RequestCache::Reload => CacheMode::Reload,
        web_sys::RequestCache::NoCache => CacheMode::NoCache,
        web_sys::RequestCache::ForceCache => CacheMode::ForceCache,
        web_sys::RequestCache::OnlyIfCached => CacheMode::OnlyIfCached,
        _ => CacheMode::Default,
    }
}

fn to_model(request: &Request) -> ShieldResult<InterceptedRequest> {
    bridge::request_from_parts(
        &request.method(),
        &request.url(),
        request_mode(request.mode()),
        cache_mode(request.cache()),
    )
}

fn response_init(
    status: u16,
    status_text: &str,
    headers: &HeaderSet,
) -> Result<ResponseInit, JsValue> {
    let platform_headers = Headers::new()?;
    for header in headers.iter() {
        platform_headers.set(&header.name, &header.value)?;
    }

    let init = ResponseInit::new();
    init.set_status(status);
    init.set_status_text(status_text);
    init.set_headers(&platform_headers);
    Ok(init)
}

/// Forwards through the worker's own `fetch`, carrying the platform response
/// as the body so its stream is never read.
struct WorkerUpstream {
    scope: ServiceWorkerGlobalScope,
    original: Request,
}

impl WorkerUpstream {
    async fn send(&self, request: &Request) -> ShieldResult<Response> {
        let value = JsFuture::from(self.scope.fetch_with_request(request))
            .await
            .map_err(|error| js_error("web.fetch_failed", error))?;
        value
            .dyn_into::<Response>()
            .map_err(|error| js_error("web.fetch_failed", error))
    }

    async fn into_platform_response(
        &self,
        interception: Interception<Response>,
    ) -> Result<Response, JsValue> {
        match interception {
            Interception::Respond(Rewritten::Untouched(response)) => {
                response.body.ok_or_else(|| {
                    to_js(ShieldError::new(
                        "web.response_missing",
                        "opaque response lost its platform object",
                    ))
                })
            }
            Interception::Respond(Rewritten::Amended { response, .. }) => {
                let init = response_init(
                    response.status.as_u16(),
                    &response.status_text,
                    &response.headers,
                )?;
                let stream = response.body.and_then(|original| original.body());
                Response::new_with_opt_readable_stream_and_init(stream.as_ref(), &init)
            }
            Interception::Sentinel(response) => {
                let init = response_init(
                    response.status.as_u16(),
                    &response.status_text,
                    &response.headers,
                )?;
                Response::new_with_opt_str_and_init(response.body.as_deref(), &init)
            }
            Interception::Passthrough(_) => self.send(&self.original).await.map_err(to_js),
        }
    }
}

impl Upstream for WorkerUpstream {
    type Body = Response;

    async fn fetch(
        &self,
        _request: &InterceptedRequest,
        mode: ForwardMode,
    ) -> ShieldResult<HttpResponse<Response>> {
        let response = match mode {
            ForwardMode::Original => self.send(&self.original).await?,
            ForwardMode::Cors => {
                let init = RequestInit::new();
                init.set_mode(web_sys::RequestMode::Cors);
                let request = Request::new_with_request_and_init(&self.original, &init)
                    .map_err(|error| js_error("web.request_build_failed", error))?;
                self.send(&request).await?
            }
        };

        let head = bridge::response_head(
            response.status(),
            &response.status_text(),
            header_pairs(&response.headers()),
        )?;
        Ok(head.with_body(response))
    }
}

fn listen<E>(
    scope: &ServiceWorkerGlobalScope,
    kind: &str,
    handler: impl FnMut(E) + 'static,
) -> Result<(), JsValue>
where
    E: FromWasmAbi + 'static,
{
    let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(E)>);
    scope.add_event_listener_with_callback(kind, closure.as_ref().unchecked_ref())?;
    // Listeners live as long as the worker.
    closure.forget();
    Ok(())
}

fn follow(
    scope: &ServiceWorkerGlobalScope,
    event: &ExtendableEvent,
    directive: LifecycleDirective,
) {
    let promise = match directive {
        LifecycleDirective::SkipWaiting => scope.skip_waiting(),
        LifecycleDirective::ClaimClients => Ok(scope.clients().claim()),
    };

    if let Err(error) = promise.and_then(|promise| event.wait_until(&promise)) {
        let error = js_error("web.lifecycle_failed", error);
        warn!(code = error.code, %error, ?directive, "lifecycle directive failed");
    }
}

/// Wires the interceptor into the service worker's `install`, `activate` and
/// `fetch` events. Call once from the worker script.
#[wasm_bindgen(js_name = installInterceptor)]
pub fn install_interceptor(config_json: Option<String>) -> Result<(), JsValue> {
    install_panic_hook();
    init_logging();

    let scope = js_sys::global().dyn_into::<ServiceWorkerGlobalScope>()?;
    let registration_scope = bridge::scope_url(&scope.registration().scope()).map_err(to_js)?;
    let shield = Shield::from_json(&registration_scope, config_json.as_deref()).map_err(to_js)?;
    let shield = Rc::new(RefCell::new(shield));

    listen(&scope, "install", {
        let scope = scope.clone();
        let shield = Rc::clone(&shield);
        move |event: ExtendableEvent| match shield.borrow_mut().install() {
            Ok(directive) => follow(&scope, &event, directive),
            Err(error) => warn!(code = error.code, %error, "install event rejected"),
        }
    })?;

    listen(&scope, "activate", {
        let scope = scope.clone();
        let shield = Rc::clone(&shield);
        move |event: ExtendableEvent| match shield.borrow_mut().activate() {
            Ok(directive) => follow(&scope, &event, directive),
            Err(error) => warn!(code = error.code, %error, "activate event rejected"),
        }
    })?;

    listen(&scope, "fetch", {
        let scope = scope.clone();
        move |event: FetchEvent| {
            let original = event.request();
            let request = match to_model(&original) {
                Ok(request) => request,
                Err(error) => {
                    debug!(code = error.code, %error, "leaving request to the platform");
                    return;
                }
            };

            let shield = shield.borrow().clone();
            if !bridge::should_respond(shield.interceptor(), &request) {
                return;
            }

            let upstream = WorkerUpstream {
                scope: scope.clone(),
                original,
            };
            let promise = future_to_promise(async move {
                let interception = shield
                    .intercept(&upstream, &request)
                    .await
                    .map_err(to_js)?;
                upstream
                    .into_platform_response(interception)
                    .await
                    .map(JsValue::from)
            });

            if let Err(error) = event.respond_with(&promise) {
                let error = js_error("web.respond_failed", error);
                warn!(code = error.code, %error, "respondWith rejected");
            }
        }
    })?;

    Ok(())
}

/// Page-side view of the browser.
struct WindowPlatform {
    window: Window,
}

impl WindowPlatform {
    fn new() -> ShieldResult<Self> {
        let window = web_sys::window().ok_or_else(|| {
            ShieldError::new("web.window_missing", "activation must run in a window")
        })?;
        Ok(Self { window })
    }
}

impl Platform for WindowPlatform {
    fn supports_interception(&self) -> bool {
        flag(&self.window, "isSecureContext")
            && Reflect::has(&self.window.navigator(), &JsValue::from_str("serviceWorker"))
                .unwrap_or(false)
    }

    fn page_url(&self) -> ShieldResult<Url> {
        let href = self
            .window
            .location()
            .href()
            .map_err(|error| js_error("web.page_url_invalid", error))?;
        bridge::page_url(&href)
    }

    fn is_isolated(&self) -> bool {
        flag(&self.window, "crossOriginIsolated")
    }

    async fn register(&self, script: &Url, scope: &Url) -> ShieldResult<Registration> {
        let container = self.window.navigator().service_worker();
        let options = RegistrationOptions::new();
        options.set_scope(scope.as_str());

        let value = JsFuture::from(container.register_with_options(script.as_str(), &options))
            .await
            .map_err(|error| js_error("web.register_failed", error))?;
        let registration = value
            .dyn_into::<ServiceWorkerRegistration>()
            .map_err(|error| js_error("web.register_failed", error))?;

        let worker = bridge::worker_state(
            registration.installing().is_some(),
            registration.waiting().is_some(),
            registration.active().is_some(),
        )?;
        Ok(Registration { worker })
    }

    async fn wait_for_activation(&self) -> ShieldResult<()> {
        let ready = self
            .window
            .navigator()
            .service_worker()
            .ready()
            .map_err(|error| js_error("web.activation_failed", error))?;
        JsFuture::from(ready)
            .await
            .map(|_| ())
            .map_err(|error| js_error("web.activation_failed", error))
    }

    fn replace_url(&self, url: &Url) -> ShieldResult<()> {
        self.window
            .history()
            .and_then(|history| {
                history.replace_state_with_url(&JsValue::NULL, "", Some(url.as_str()))
            })
            .map_err(|error| js_error("web.history_failed", error))
    }

    fn reload(&self, url: &Url) -> ShieldResult<()> {
        self.window
            .location()
            .replace(url.as_str())
            .map_err(|error| js_error("web.reload_failed", error))
    }

    async fn probe(&self, url: &Url) -> ShieldResult<String> {
        let value = JsFuture::from(self.window.fetch_with_str(url.as_str()))
            .await
            .map_err(|error| js_error("web.probe_failed", error))?;
        let response = value
            .dyn_into::<Response>()
            .map_err(|error| js_error("web.probe_failed", error))?;
        let text = response
            .text()
            .map_err(|error| js_error("web.probe_failed", error))?;
        let body = JsFuture::from(text)
            .await
            .map_err(|error| js_error("web.probe_failed", error))?;
        Ok(body.as_string().unwrap_or_default())
    }

    async fn sleep(&self, duration: Duration) {
        let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);
        let window = self.window.clone();
        let promise = Promise::new(&mut |resolve, _reject| {
            let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, millis);
        });
        let _ = JsFuture::from(promise).await;
    }
}

/// Runs the activation protocol for this page load. Resolves to the outcome
/// label (`isolated`, `reload-triggered`, or a degraded reason); rejects only
/// on invalid configuration.
#[wasm_bindgen]
pub fn activate(config_json: Option<String>) -> Promise {
    install_panic_hook();
    init_logging();

    future_to_promise(async move {
        let config = load_config(config_json.as_deref()).map_err(to_js)?;
        let platform = WindowPlatform::new().map_err(to_js)?;
        let outcome = activate_page(&platform, &config).await.map_err(to_js)?;
        Ok(JsValue::from_str(outcome.as_str()))
    })
}
