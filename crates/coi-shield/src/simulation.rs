//! In-process browser and origin server used to exercise the shield end to
//! end. Isolation is derived from the headers on the navigation response.

use crate::activate_page;
use coi_activation::ActivationOutcome;
use coi_activation::Platform;
use coi_activation::Registration;
use coi_activation::WorkerState;
use coi_core::ShieldError;
use coi_core::ShieldResult;
use coi_interceptor::ForwardMode;
use coi_interceptor::Interception;
use coi_interceptor::Interceptor;
use coi_interceptor::Upstream;
use coi_net::HeaderSet;
use coi_net::HttpMethod;
use coi_net::HttpResponse;
use coi_net::HttpStatusCode;
use coi_net::InterceptedRequest;
use coi_net::Origin;
use coi_net::RequestMode;
use coi_net::RequestUrl;
use coi_policy::ShieldConfig;
use coi_policy::headers::CROSS_ORIGIN_EMBEDDER_POLICY;
use coi_policy::headers::CROSS_ORIGIN_OPENER_POLICY;
use coi_policy::headers::EMBEDDER_POLICY_REQUIRE_CORP;
use coi_policy::headers::OPENER_POLICY_SAME_ORIGIN;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Resource {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    cors: bool,
}

impl Resource {
    pub fn new(status: u16, content_type: &str, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_owned(), content_type.to_owned())],
            body: body.as_bytes().to_vec(),
            cors: true,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Served without CORS headers: CORS-mode fetches from another origin fail
    /// and no-cors fetches come back opaque.
    pub fn without_cors(mut self) -> Self {
        self.cors = false;
        self
    }
}

/// Static origin server keyed by `origin + path`.
#[derive(Debug)]
pub struct SimulatedServer {
    page_origin: Origin,
    resources: HashMap<String, Resource>,
    fetches: Cell<usize>,
}

impl SimulatedServer {
    pub fn new(page_origin: Origin) -> Self {
        Self {
            page_origin,
            resources: HashMap::new(),
            fetches: Cell::new(0),
        }
    }

    pub fn serve(&mut self, url: &str, resource: Resource) {
        let url = RequestUrl::parse(url).unwrap_or_else(|error| panic!("{error}"));
        self.resources.insert(key(&url), resource);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.get()
    }
}

fn key(url: &RequestUrl) -> String {
    format!("{}{}", url.origin(), url.path())
}

impl Upstream for SimulatedServer {
    type Body = Vec<u8>;

    async fn fetch(
        &self,
        request: &InterceptedRequest,
        mode: ForwardMode,
    ) -> ShieldResult<HttpResponse<Vec<u8>>> {
        self.fetches.set(self.fetches.get() + 1);
        let Some(resource) = self.resources.get(&key(&request.url)) else {
            let headers = HeaderSet::from_pairs([("Content-Type", "text/html")])?;
            return Ok(HttpResponse::new(HttpStatusCode::new(404)?, "Not Found", headers)
                .with_body(b"<h1>not found</h1>".to_vec()));
        };

        if !resource.cors && !request.url.is_same_origin(&self.page_origin) {
            return match mode {
                ForwardMode::Cors => Err(ShieldError::new(
                    "sim.cors_blocked",
                    format!("`{}` sent no CORS headers", request.url.as_str()),
                )),
                ForwardMode::Original => Ok(HttpResponse::new(
                    HttpStatusCode::OPAQUE,
                    "",
                    HeaderSet::new(),
                )),
            };
        }

        let headers = HeaderSet::from_pairs(resource.headers.iter().cloned())?;
        Ok(HttpResponse::new(HttpStatusCode::new(resource.status)?, "", headers)
            .with_body(resource.body.clone()))
    }
}

/// One page load as seen by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLoad {
    pub url: String,
    pub controlled: bool,
    pub isolated: bool,
    pub outcome: ActivationOutcome,
}

/// Single-tab browser with one worker registration per origin.
pub struct SimulatedBrowser {
    server: SimulatedServer,
    config: ShieldConfig,
    supports_interception: bool,
    honours_isolation: bool,
    scope: RefCell<Option<RequestUrl>>,
    interceptor: RefCell<Option<Interceptor>>,
    location: RefCell<Url>,
    controlled: Cell<bool>,
    isolated: Cell<bool>,
    pending_reload: RefCell<Option<Url>>,
    replacements: RefCell<Vec<String>>,
    probes: Cell<usize>,
}

impl SimulatedBrowser {
    pub fn new(server: SimulatedServer, config: ShieldConfig) -> Self {
        let blank = Url::parse("about:blank").unwrap_or_else(|error| panic!("{error}"));
        Self {
            server,
            config,
            supports_interception: true,
            honours_isolation: true,
            scope: RefCell::new(None),
            interceptor: RefCell::new(None),
            location: RefCell::new(blank),
            controlled: Cell::new(false),
            isolated: Cell::new(false),
            pending_reload: RefCell::new(None),
            replacements: RefCell::default(),
            probes: Cell::new(0),
        }
    }

    pub fn without_interception(mut self) -> Self {
        self.supports_interception = false;
        self
    }

    /// Stands in for anything that keeps the page un-isolated despite the
    /// headers, such as an insecure context.
    pub fn ignoring_isolation_headers(mut self) -> Self {
        self.honours_isolation = false;
        self
    }

    pub fn location(&self) -> String {
        self.location.borrow().to_string()
    }

    pub fn replacements(&self) -> Vec<String> {
        self.replacements.borrow().clone()
    }

    pub fn probes(&self) -> usize {
        self.probes.get()
    }

    /// Stops the idle worker and starts it again from its script. The new
    /// instance sees no install or activate event.
    pub fn restart_worker(&self) {
        let Some(scope) = self.scope.borrow().clone() else {
            return;
        };
        let restarted =
            Interceptor::new(&scope, &self.config).unwrap_or_else(|error| panic!("{error}"));
        *self.interceptor.borrow_mut() = Some(restarted);
    }

    /// Types `url` into the address bar and follows reloads until the page
    /// settles or `max_loads` is reached.
    pub fn visit(&self, url: &str, max_loads: usize) -> Vec<PageLoad> {
        let mut next = Some(Url::parse(url).unwrap_or_else(|error| panic!("{error}")));
        let mut loads = Vec::new();

        while let Some(url) = next.take() {
            if loads.len() == max_loads {
                break;
            }
            pollster::block_on(self.navigate(&url));
            let outcome = pollster::block_on(activate_page(self, &self.config))
                .unwrap_or_else(|error| panic!("{error}"));
            loads.push(PageLoad {
                url: url.to_string(),
                controlled: self.controlled.get(),
                isolated: self.isolated.get(),
                outcome,
            });
            next = self.pending_reload.borrow_mut().take();
        }

        loads
    }

    async fn navigate(&self, url: &Url) {
        let request = InterceptedRequest::navigation(
            RequestUrl::parse(url.as_str()).unwrap_or_else(|error| panic!("{error}")),
        );
        let in_scope = self.scope.borrow().as_ref().is_some_and(|scope| {
            request.url.is_same_origin(&scope.origin())
                && request.url.path().starts_with(scope.path())
        });
        let controller = self.interceptor.borrow().clone().filter(|_| in_scope);

        let headers = match &controller {
            Some(interceptor) => match interceptor.intercept(&self.server, &request).await {
                Ok(Interception::Respond(rewritten)) => rewritten.into_response().headers,
                Ok(_) => self.fetch_headers(&request).await,
                Err(error) => panic!("{error}"),
            },
            None => self.fetch_headers(&request).await,
        };

        *self.location.borrow_mut() = url.clone();
        self.controlled.set(controller.is_some());
        self.isolated.set(
            self.honours_isolation
                && headers.get(CROSS_ORIGIN_OPENER_POLICY) == Some(OPENER_POLICY_SAME_ORIGIN)
                && headers.get(CROSS_ORIGIN_EMBEDDER_POLICY) == Some(EMBEDDER_POLICY_REQUIRE_CORP),
        );
    }

    async fn fetch_headers(&self, request: &InterceptedRequest) -> HeaderSet {
        match self.server.fetch(request, ForwardMode::Original).await {
            Ok(response) => response.headers,
            Err(error) => panic!("{error}"),
        }
    }
}

impl Platform for SimulatedBrowser {
    fn supports_interception(&self) -> bool {
        self.supports_interception
    }

    fn page_url(&self) -> ShieldResult<Url> {
        Ok(self.location.borrow().clone())
    }

    fn is_isolated(&self) -> bool {
        self.isolated.get()
    }

    async fn register(&self, _script: &Url, scope: &Url) -> ShieldResult<Registration> {
        let mut slot = self.interceptor.borrow_mut();
        if slot.is_some() {
            return Ok(Registration {
                worker: WorkerState::Active,
            });
        }

        let scope = RequestUrl::parse(scope.as_str())?;
        let mut interceptor = Interceptor::new(&scope, &self.config)?;
        interceptor.install()?;
        interceptor.activate()?;
        *slot = Some(interceptor);
        *self.scope.borrow_mut() = Some(scope);
        Ok(Registration {
            worker: WorkerState::Installing,
        })
    }

    async fn wait_for_activation(&self) -> ShieldResult<()> {
        Ok(())
    }

    fn replace_url(&self, url: &Url) -> ShieldResult<()> {
        self.replacements.borrow_mut().push(url.to_string());
        *self.location.borrow_mut() = url.clone();
        Ok(())
    }

    fn reload(&self, url: &Url) -> ShieldResult<()> {
        *self.pending_reload.borrow_mut() = Some(url.clone());
        Ok(())
    }

    async fn probe(&self, url: &Url) -> ShieldResult<String> {
        self.probes.set(self.probes.get() + 1);
        let request = InterceptedRequest::new(
            HttpMethod::Get,
            RequestUrl::parse(url.as_str())?,
            RequestMode::Cors,
        );
        let interceptor = self.interceptor.borrow().clone();
        let body = match interceptor {
            Some(interceptor) => match interceptor.intercept(&self.server, &request).await? {
                Interception::Sentinel(response) => response.body.unwrap_or_default(),
                Interception::Respond(rewritten) => lossy(rewritten.into_response().body),
                Interception::Passthrough(_) => {
                    lossy(self.server.fetch(&request, ForwardMode::Original).await?.body)
                }
            },
            None => lossy(self.server.fetch(&request, ForwardMode::Original).await?.body),
        };
        Ok(body)
    }

    async fn sleep(&self, _duration: Duration) {}
}

fn lossy(body: Option<Vec<u8>>) -> String {
    String::from_utf8_lossy(&body.unwrap_or_default()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::PageLoad;
    use super::Resource;
    use super::SimulatedBrowser;
    use super::SimulatedServer;
    use coi_activation::ActivationOutcome;
    use coi_activation::DegradedReason;
    use coi_net::Origin;
    use coi_policy::ShieldConfig;
    use tracing_test::traced_test;

    const MAX_LOADS: usize = 5;

    fn server() -> SimulatedServer {
        let origin = Origin::parse("https://app.example").unwrap_or_else(|error| panic!("{error}"));
        let mut server = SimulatedServer::new(origin);
        server.serve(
            "https://app.example/",
            Resource::new(200, "text/html", "<!doctype html>"),
        );
        server.serve(
            "https://app.example/repl/",
            Resource::new(200, "text/html", "<!doctype html>"),
        );
        server
    }

    fn assert_no_consecutive_markers(loads: &[PageLoad]) {
        for pair in loads.windows(2) {
            let marked = |load: &PageLoad| load.url.contains("coi-reload=true");
            assert!(
                !(marked(&pair[0]) && marked(&pair[1])),
                "marker set on two consecutive loads: {loads:?}"
            );
        }
    }

    #[test]
    fn first_visit_reloads_once_then_strips_marker() {
        let browser = SimulatedBrowser::new(server(), ShieldConfig::default());
        let loads = browser.visit("https://app.example/", MAX_LOADS);

        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0].outcome, ActivationOutcome::ReloadTriggered);
        assert!(!loads[0].isolated);
        assert_eq!(loads[1].url, "https://app.example/?coi-reload=true");
        assert!(loads[1].controlled);
        assert!(loads[1].isolated);
        assert_eq!(
            loads[1].outcome,
            ActivationOutcome::Isolated {
                marker_cleared: true
            }
        );
        assert_eq!(browser.replacements(), ["https://app.example/"]);
        assert_eq!(browser.location(), "https://app.example/");
    }

    #[test]
    fn returning_visit_is_isolated_without_reload() {
        let browser = SimulatedBrowser::new(server(), ShieldConfig::default());
        let _ = browser.visit("https://app.example/", MAX_LOADS);
        let loads = browser.visit("https://app.example/", MAX_LOADS);

        assert_eq!(loads.len(), 1);
        assert_eq!(
            loads[0].outcome,
            ActivationOutcome::Isolated {
                marker_cleared: false
            }
        );
    }

    #[test]
    fn unattainable_isolation_stops_after_one_reload() {
        let browser =
            SimulatedBrowser::new(server(), ShieldConfig::default()).ignoring_isolation_headers();
        let loads = browser.visit("https://app.example/repl/", MAX_LOADS);

        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0].outcome, ActivationOutcome::ReloadTriggered);
        assert_eq!(
            loads[1].outcome,
            ActivationOutcome::Degraded(DegradedReason::IsolationUnattainable)
        );
        assert_no_consecutive_markers(&loads);

        let again = browser.visit(&loads[1].url, MAX_LOADS);
        assert_eq!(again.len(), 1);
        assert_no_consecutive_markers(&again);
    }

    #[test]
    fn reload_count_is_bounded_across_configurations() {
        for honours in [true, false] {
            for probe in [false, true] {
                let mut config = ShieldConfig::default();
                config.probe.enabled = probe;
                let mut browser = SimulatedBrowser::new(server(), config);
                if !honours {
                    browser = browser.ignoring_isolation_headers();
                }
                let loads = browser.visit("https://app.example/", MAX_LOADS);
                let reloads = loads
                    .iter()
                    .filter(|load| load.outcome == ActivationOutcome::ReloadTriggered)
                    .count();
                assert!(reloads <= 1, "{loads:?}");
                assert!(loads.len() <= 2, "{loads:?}");
                assert_no_consecutive_markers(&loads);
            }
        }
    }

    #[test]
    fn probe_reaches_the_interceptor_before_reloading() {
        let mut config = ShieldConfig::default();
        config.probe.enabled = true;
        let browser = SimulatedBrowser::new(server(), config);
        let loads = browser.visit("https://app.example/", MAX_LOADS);

        assert_eq!(browser.probes(), 1);
        assert_eq!(loads.len(), 2);
        assert!(loads[1].isolated);
    }

    #[test]
    fn subdirectory_page_reaches_the_interceptor_before_reloading() {
        let mut config = ShieldConfig::default();
        config.probe.enabled = true;
        let browser = SimulatedBrowser::new(server(), config);
        let loads = browser.visit("https://app.example/repl/", MAX_LOADS);

        assert_eq!(browser.probes(), 1);
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0].outcome, ActivationOutcome::ReloadTriggered);
        assert!(loads[1].isolated);
        assert_eq!(browser.location(), "https://app.example/repl/");
    }

    #[test]
    fn restarted_worker_keeps_pages_isolated() {
        let browser = SimulatedBrowser::new(server(), ShieldConfig::default());
        let _ = browser.visit("https://app.example/", MAX_LOADS);
        browser.restart_worker();
        let loads = browser.visit("https://app.example/", MAX_LOADS);

        assert_eq!(loads.len(), 1);
        assert!(loads[0].controlled);
        assert!(loads[0].isolated);
        assert_eq!(
            loads[0].outcome,
            ActivationOutcome::Isolated {
                marker_cleared: false
            }
        );
    }

    #[test]
    #[traced_test]
    fn unsupported_browser_keeps_running_unisolated() {
        let browser =
            SimulatedBrowser::new(server(), ShieldConfig::default()).without_interception();
        let loads = browser.visit("https://app.example/", MAX_LOADS);

        assert_eq!(loads.len(), 1);
        assert_eq!(
            loads[0].outcome,
            ActivationOutcome::Degraded(DegradedReason::Unsupported)
        );
        assert!(!loads[0].isolated);
        assert!(logs_contain("continuing without cross-origin isolation"));
    }
}
