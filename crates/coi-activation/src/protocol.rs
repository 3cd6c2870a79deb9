//! Page-load activation: register the interceptor, check isolation, and
//! reload at most once.

use crate::marker::ReloadMarker;
use coi_core::ShieldError;
use coi_core::ShieldResult;
use coi_policy::ProbeConfig;
use coi_policy::ShieldConfig;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

/// State of the newest worker in a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Waiting,
    Active,
}

/// What registration reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub worker: WorkerState,
}

/// Narrow view of the browser the protocol runs in. The protocol only
/// observes state and reloads; it never writes isolation or controller state.
pub trait Platform {
    fn supports_interception(&self) -> bool;

    fn page_url(&self) -> ShieldResult<Url>;

    fn is_isolated(&self) -> bool;

    fn register(
        &self,
        script: &Url,
        scope: &Url,
    ) -> impl Future<Output = ShieldResult<Registration>>;

    fn wait_for_activation(&self) -> impl Future<Output = ShieldResult<()>>;

    /// Replaces the visible URL without navigating.
    fn replace_url(&self, url: &Url) -> ShieldResult<()>;

    fn reload(&self, url: &Url) -> ShieldResult<()>;

    fn probe(&self, url: &Url) -> impl Future<Output = ShieldResult<String>>;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Unregistered,
    Registering,
    AlreadyIsolated,
    AwaitingActivation,
    Probing,
    Reloading,
    ReloadedChecking,
    Converged(ActivationOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    Isolated { marker_cleared: bool },
    ReloadTriggered,
    Degraded(DegradedReason),
}

impl ActivationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Isolated { .. } => "isolated",
            Self::ReloadTriggered => "reload-triggered",
            Self::Degraded(reason) => reason.as_str(),
        }
    }

    pub fn is_isolated(self) -> bool {
        matches!(self, Self::Isolated { .. })
    }
}

/// Why the page keeps running without isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    Unsupported,
    PageUrlUnavailable,
    ScopeExcludesPage,
    RegistrationFailed,
    ActivationFailed,
    InterceptorNotReady,
    IsolationUnattainable,
    ReloadFailed,
}

impl DegradedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsupported => "unsupported",
            Self::PageUrlUnavailable => "page-url-unavailable",
            Self::ScopeExcludesPage => "scope-excludes-page",
            Self::RegistrationFailed => "registration-failed",
            Self::ActivationFailed => "activation-failed",
            Self::InterceptorNotReady => "interceptor-not-ready",
            Self::IsolationUnattainable => "isolation-unattainable",
            Self::ReloadFailed => "reload-failed",
        }
    }
}

/// Runs once per page load.
pub struct ActivationProtocol<'a, P: Platform> {
    platform: &'a P,
    script_location: String,
    scope: String,
    sentinel_path: String,
    sentinel_body: String,
    probe: ProbeConfig,
    marker: ReloadMarker,
    transitions: Vec<ActivationState>,
}

impl<'a, P: Platform> ActivationProtocol<'a, P> {
    pub fn new(platform: &'a P, config: &ShieldConfig) -> ShieldResult<Self> {
        config.validate()?;
        Ok(Self {
            platform,
            script_location: config.script_location.clone(),
            scope: config.scope.clone(),
            sentinel_path: config.sentinel_path.clone(),
            sentinel_body: config.sentinel_body.clone(),
            probe: config.probe.clone(),
            marker: ReloadMarker::new(config.marker_param.clone()),
            transitions: vec![ActivationState::Unregistered],
        })
    }

    pub fn state(&self) -> ActivationState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(ActivationState::Unregistered)
    }

    /// Every state visited so far, starting with `Unregistered`.
    pub fn transitions(&self) -> &[ActivationState] {
        &self.transitions
    }

    /// Drives the protocol to convergence. Never fails: every error becomes a
    /// degraded outcome and the page keeps loading.
    pub async fn run(&mut self) -> ActivationOutcome {
        let outcome = self.drive().await;
        match outcome {
            ActivationOutcome::Degraded(reason) => {
                warn!(reason = reason.as_str(), "continuing without cross-origin isolation");
            }
            _ => info!(outcome = outcome.as_str(), "activation converged"),
        }
        self.enter(ActivationState::Converged(outcome));
        outcome
    }

    async fn drive(&mut self) -> ActivationOutcome {
        if !self.platform.supports_interception() {
            info!("request interception is unavailable on this platform");
            return ActivationOutcome::Degraded(DegradedReason::Unsupported);
        }

        let page = match self.platform.page_url() {
            Ok(page) => page,
            Err(error) => {
                warn!(code = error.code, %error, "cannot read page URL");
                return ActivationOutcome::Degraded(DegradedReason::PageUrlUnavailable);
            }
        };

        let (script, scope) = match self.resolve_registration(&page) {
            Ok(resolved) => resolved,
            Err(error) => {
                warn!(code = error.code, %error, "registration scope does not cover this page");
                return ActivationOutcome::Degraded(DegradedReason::ScopeExcludesPage);
            }
        };

        self.enter(ActivationState::Registering);
        let registration = match self.platform.register(&script, &scope).await {
            Ok(registration) => registration,
            Err(error) => {
                warn!(code = error.code, %error, "interceptor registration failed");
                return ActivationOutcome::Degraded(DegradedReason::RegistrationFailed);
            }
        };
        debug!(worker = ?registration.worker, "interceptor registered");

        let reloaded = self.marker.is_set(&page);
        if reloaded {
            self.enter(ActivationState::ReloadedChecking);
        }

        if self.platform.is_isolated() {
            self.enter(ActivationState::AlreadyIsolated);
            let marker_cleared = self.clear_marker(&page);
            return ActivationOutcome::Isolated { marker_cleared };
        }

        if reloaded {
            // This load is the reload; trying again could loop forever.
            return ActivationOutcome::Degraded(DegradedReason::IsolationUnattainable);
        }

        if registration.worker != WorkerState::Active {
            self.enter(ActivationState::AwaitingActivation);
            if let Err(error) = self.platform.wait_for_activation().await {
                warn!(code = error.code, %error, "interceptor never became active");
                return ActivationOutcome::Degraded(DegradedReason::ActivationFailed);
            }
        }

        if self.probe.enabled {
            self.enter(ActivationState::Probing);
            if !self.probe_until_ready(&scope).await {
                return ActivationOutcome::Degraded(DegradedReason::InterceptorNotReady);
            }
        }

        self.enter(ActivationState::Reloading);
        let target = self.marker.set(&page);
        info!(url = target.as_str(), "page is not isolated, reloading once");
        match self.platform.reload(&target) {
            Ok(()) => ActivationOutcome::ReloadTriggered,
            Err(error) => {
                warn!(code = error.code, %error, "reload failed");
                ActivationOutcome::Degraded(DegradedReason::ReloadFailed)
            }
        }
    }

    fn resolve_registration(&self, page: &Url) -> ShieldResult<(Url, Url)> {
        let script = join(page, &self.script_location)?;
        let scope = join(page, &self.scope)?;

        if scope.origin() != page.origin() || !page.path().starts_with(scope.path()) {
            return Err(ShieldError::new(
                "activation.scope_excludes_page",
                format!("scope `{scope}` does not cover page `{page}`"),
            ));
        }

        Ok((script, scope))
    }

    fn clear_marker(&self, page: &Url) -> bool {
        let Some(cleared) = self.marker.clear(page) else {
            return false;
        };

        match self.platform.replace_url(&cleared) {
            Ok(()) => true,
            Err(error) => {
                warn!(code = error.code, %error, "failed to strip reload marker");
                false
            }
        }
    }

    /// The sentinel is resolved against the scope so the request stays
    /// inside it.
    async fn probe_until_ready(&self, scope: &Url) -> bool {
        let url = match join(scope, &self.sentinel_path) {
            Ok(url) => url,
            Err(error) => {
                warn!(code = error.code, %error, "cannot build sentinel URL");
                return false;
            }
        };

        for attempt in 1..=self.probe.attempts {
            match self.platform.probe(&url).await {
                Ok(body) if body == self.sentinel_body => {
                    debug!(attempt, "sentinel answered by interceptor");
                    return true;
                }
                Ok(_) => debug!(attempt, "sentinel answered by something else"),
                Err(error) => debug!(attempt, code = error.code, "sentinel probe failed"),
            }

            if attempt < self.probe.attempts {
                self.platform.sleep(self.probe.backoff()).await;
            }
        }

        warn!(
            attempts = self.probe.attempts,
            "interceptor did not answer the sentinel probe"
        );
        false
    }

    fn enter(&mut self, state: ActivationState) {
        debug!(?state, "activation state");
        self.transitions.push(state);
    }
}

fn join(base: &Url, input: &str) -> ShieldResult<Url> {
    base.join(input).map_err(|error| {
        ShieldError::new(
            "activation.url_invalid",
            format!("cannot resolve `{input}` against `{base}`: {error}"),
        )
    })
}
