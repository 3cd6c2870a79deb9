//! Conversions between browser-provided values and the shield model.
//!
//! Kept free of `web-sys` so the mapping rules are tested natively.

use coi_activation::WorkerState;
use coi_core::ShieldError;
use coi_core::ShieldResult;
use coi_interceptor::Interceptor;
use coi_net::CacheMode;
use coi_net::HeaderSet;
use coi_net::HttpMethod;
use coi_net::HttpResponse;
use coi_net::HttpStatusCode;
use coi_net::InterceptedRequest;
use coi_net::RequestMode;
use coi_net::RequestUrl;
use tracing::debug;
use url::Url;

/// Builds the model of a request the worker observed.
pub fn request_from_parts(
    method: &str,
    url: &str,
    mode: RequestMode,
    cache: CacheMode,
) -> ShieldResult<InterceptedRequest> {
    let url = RequestUrl::parse(url).map_err(|error| {
        ShieldError::new(
            "web.request_unsupported",
            format!("cannot intercept `{url}`: {error}"),
        )
    })?;

    let method = HttpMethod::parse(method)?;
    Ok(InterceptedRequest::new(method, url, mode).with_cache(cache))
}

/// Status line and headers of a platform response; the body is attached by
/// the caller.
pub fn response_head<B, I>(
    status: u16,
    status_text: &str,
    headers: I,
) -> ShieldResult<HttpResponse<B>>
where
    I: IntoIterator<Item = (String, String)>,
{
    Ok(HttpResponse::new(
        HttpStatusCode::from_platform(status)?,
        status_text,
        HeaderSet::from_pairs(headers)?,
    ))
}

/// Whether the worker should answer `request` itself. Requests it leaves
/// alone must not be claimed with `respondWith`.
pub fn should_respond(interceptor: &Interceptor, request: &InterceptedRequest) -> bool {
    match interceptor.passthrough_reason(request) {
        Some(reason) => {
            debug!(
                url = request.url.as_str(),
                mode = request.mode.as_str(),
                reason = reason.as_str(),
                "leaving request to the platform"
            );
            false
        }
        None => true,
    }
}

/// Registration scope URL such as `https://app.example/repl/`.
pub fn scope_url(scope: &str) -> ShieldResult<RequestUrl> {
    RequestUrl::parse(scope).map_err(|error| {
        ShieldError::new(
            "web.scope_invalid",
            format!("cannot use `{scope}` as a registration scope: {error}"),
        )
    })
}

pub fn page_url(href: &str) -> ShieldResult<Url> {
    Url::parse(href).map_err(|error| {
        ShieldError::new(
            "web.page_url_invalid",
            format!("cannot parse page URL `{href}`: {error}"),
        )
    })
}

/// Collapses a registration's worker slots into the newest worker's state.
pub fn worker_state(installing: bool, waiting: bool, active: bool) -> ShieldResult<WorkerState> {
    if installing {
        Ok(WorkerState::Installing)
    } else if waiting {
        Ok(WorkerState::Waiting)
    } else if active {
        Ok(WorkerState::Active)
    } else {
        Err(ShieldError::new(
            "web.registration_empty",
            "registration has no installing, waiting or active worker",
        ))
    }
}
