//! Header-injection interceptor: forwards every eligible request and returns a
//! copy of the response carrying the headers cross-origin isolation needs.

pub mod classify;
pub mod lifecycle;
pub mod rewrite;

use coi_core::ShieldResult;
use coi_net::CacheMode;
use coi_net::HeaderSet;
use coi_net::HttpMethod;
use coi_net::HttpResponse;
use coi_net::HttpStatusCode;
use coi_net::InterceptedRequest;
use coi_net::Origin;
use coi_net::RequestMode;
use coi_net::RequestUrl;
use coi_policy::ShieldConfig;
use coi_policy::headers::CACHE_CONTROL;
use coi_policy::headers::CONTENT_TYPE;
use coi_policy::headers::CROSS_ORIGIN_RESOURCE_POLICY;
use coi_policy::headers::RESOURCE_POLICY_CROSS_ORIGIN;
use coi_policy::headers::SENTINEL_CONTENT_TYPE;
use std::future::Future;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub use classify::RequestClass;
pub use classify::classify;
pub use lifecycle::Lifecycle;
pub use lifecycle::LifecycleDirective;
pub use lifecycle::LifecycleState;
pub use rewrite::Amendment;
pub use rewrite::Rewritten;
pub use rewrite::rewrite;

/// How the upstream fetch should be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// The page's request, unmodified.
    Original,
    /// A CORS-mode copy, so the response headers stay readable.
    Cors,
}

/// Network seam used to forward intercepted requests.
pub trait Upstream {
    type Body;

    fn fetch(
        &self,
        request: &InterceptedRequest,
        mode: ForwardMode,
    ) -> impl Future<Output = ShieldResult<HttpResponse<Self::Body>>>;
}

/// Why a request was left for the platform to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    NonGetMethod,
    OnlyIfCachedCrossMode,
}

impl PassthroughReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonGetMethod => "non-get-method",
            Self::OnlyIfCachedCrossMode => "only-if-cached-cross-mode",
        }
    }
}

/// Result of intercepting one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception<B> {
    Passthrough(PassthroughReason),
    /// Answered locally without touching the network.
    Sentinel(HttpResponse<String>),
    Respond(Rewritten<B>),
}

/// Interceptor bound to its registration scope.
///
/// The platform only dispatches requests to the active worker, and a worker
/// restarted after going idle receives no further lifecycle events, so the
/// lifecycle state drives the install and activate directives only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interceptor {
    origin: Origin,
    sentinel_path: String,
    sentinel_body: String,
    lifecycle: Lifecycle,
}

impl Interceptor {
    pub fn new(scope: &RequestUrl, config: &ShieldConfig) -> ShieldResult<Self> {
        config.validate()?;
        Ok(Self {
            origin: scope.origin(),
            sentinel_path: config.sentinel_path_under(scope.path()),
            sentinel_body: config.sentinel_body.clone(),
            lifecycle: Lifecycle::default(),
        })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Absolute path answered locally, under the scope directory.
    pub fn sentinel_path(&self) -> &str {
        &self.sentinel_path
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn install(&mut self) -> ShieldResult<LifecycleDirective> {
        let directive = self.lifecycle.install()?;
        info!(origin = %self.origin, "interceptor installed");
        Ok(directive)
    }

    pub fn activate(&mut self) -> ShieldResult<LifecycleDirective> {
        let directive = self.lifecycle.activate()?;
        info!(origin = %self.origin, "interceptor active, claiming clients");
        Ok(directive)
    }

    pub fn is_sentinel(&self, request: &InterceptedRequest) -> bool {
        request.method == HttpMethod::Get
            && request.url.is_same_origin(&self.origin)
            && request.url.path() == self.sentinel_path
    }

    pub fn sentinel_response(&self) -> ShieldResult<HttpResponse<String>> {
        let headers = HeaderSet::from_pairs([
            (CONTENT_TYPE, SENTINEL_CONTENT_TYPE),
            (CACHE_CONTROL, "no-store"),
            (CROSS_ORIGIN_RESOURCE_POLICY, RESOURCE_POLICY_CROSS_ORIGIN),
        ])?;
        Ok(HttpResponse::new(HttpStatusCode::OK, "OK", headers)
            .with_body(self.sentinel_body.clone()))
    }

    /// Handles one request. Interceptions share no mutable state, so any
    /// number may be in flight at once; dropping the future abandons the
    /// forward fetch.
    pub async fn intercept<U>(
        &self,
        upstream: &U,
        request: &InterceptedRequest,
    ) -> ShieldResult<Interception<U::Body>>
    where
        U: Upstream,
    {
        if let Some(reason) = self.passthrough_reason(request) {
            debug!(
                url = request.url.as_str(),
                method = request.method.as_str(),
                mode = request.mode.as_str(),
                cache = request.cache.as_str(),
                reason = reason.as_str(),
                "passing request through"
            );
            return Ok(Interception::Passthrough(reason));
        }

        if self.is_sentinel(request) {
            debug!(url = request.url.as_str(), "answering sentinel probe");
            return self.sentinel_response().map(Interception::Sentinel);
        }

        let class = classify(request, &self.origin);
        let mode = if class.same_origin {
            ForwardMode::Original
        } else {
            ForwardMode::Cors
        };

        let response = match upstream.fetch(request, mode).await {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    url = request.url.as_str(),
                    code = error.code,
                    "forward fetch failed, retrying the original request once"
                );
                upstream
                    .fetch(request, ForwardMode::Original)
                    .await
                    .map_err(|retry_error| {
                        warn!(
                            url = request.url.as_str(),
                            code = retry_error.code,
                            "retry failed, surfacing fetch failure"
                        );
                        retry_error
                    })?
            }
        };

        let rewritten = rewrite(class, response)?;
        match &rewritten {
            Rewritten::Untouched(_) => {
                debug!(url = request.url.as_str(), "opaque response passed through");
            }
            Rewritten::Amended { amendment, .. } => {
                debug!(
                    url = request.url.as_str(),
                    document = amendment.document_policies,
                    no_cache = amendment.no_cache,
                    body_dropped = amendment.body_dropped,
                    "response amended"
                );
            }
        }

        Ok(Interception::Respond(rewritten))
    }

    /// Synchronous part of [`Interceptor::intercept`]: hosts that must decide
    /// before awaiting use this to leave the request to the platform.
    pub fn passthrough_reason(&self, request: &InterceptedRequest) -> Option<PassthroughReason> {
        if request.method != HttpMethod::Get {
            return Some(PassthroughReason::NonGetMethod);
        }

        // The platform rejects re-issuing such requests outside same-origin mode.
        if request.cache == CacheMode::OnlyIfCached && request.mode != RequestMode::SameOrigin {
            return Some(PassthroughReason::OnlyIfCachedCrossMode);
        }

        None
    }
}
