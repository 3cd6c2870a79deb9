//! Header amendment for intercepted responses.

use crate::classify::RequestClass;
use coi_core::ShieldResult;
use coi_net::HttpResponse;
use coi_policy::headers::CACHE_CONTROL;
use coi_policy::headers::CROSS_ORIGIN_EMBEDDER_POLICY;
use coi_policy::headers::CROSS_ORIGIN_OPENER_POLICY;
use coi_policy::headers::CROSS_ORIGIN_RESOURCE_POLICY;
use coi_policy::headers::EMBEDDER_POLICY_REQUIRE_CORP;
use coi_policy::headers::NAVIGATION_CACHE_CONTROL;
use coi_policy::headers::OPENER_POLICY_SAME_ORIGIN;
use coi_policy::headers::RESOURCE_POLICY_CROSS_ORIGIN;

/// Outcome of [`rewrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewritten<B> {
    /// Returned exactly as received (opaque responses).
    Untouched(HttpResponse<B>),
    /// Same status and body with an amended header set.
    Amended {
        response: HttpResponse<B>,
        amendment: Amendment,
    },
}

impl<B> Rewritten<B> {
    pub fn into_response(self) -> HttpResponse<B> {
        match self {
            Self::Untouched(response) => response,
            Self::Amended { response, .. } => response,
        }
    }
}

/// Which parts of the isolation header table were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Amendment {
    pub document_policies: bool,
    pub no_cache: bool,
    pub body_dropped: bool,
}

/// Amends `response` with the headers a cross-origin isolated page needs.
///
/// Opaque responses come back untouched. Every other response gets
/// `Cross-Origin-Resource-Policy: cross-origin`; same-origin documents also get
/// the embedder and opener policies, and same-origin navigations are marked
/// non-cacheable. Status and status text are kept; the body is moved through
/// unless the status forbids one.
pub fn rewrite<B>(class: RequestClass, response: HttpResponse<B>) -> ShieldResult<Rewritten<B>> {
    if response.status.is_opaque() {
        return Ok(Rewritten::Untouched(response));
    }

    let HttpResponse {
        status,
        status_text,
        mut headers,
        body,
    } = response;
    let mut amendment = Amendment::default();

    headers.set(CROSS_ORIGIN_RESOURCE_POLICY, RESOURCE_POLICY_CROSS_ORIGIN)?;

    if class.same_origin && class.is_document(&headers) {
        headers.set(CROSS_ORIGIN_EMBEDDER_POLICY, EMBEDDER_POLICY_REQUIRE_CORP)?;
        headers.set(CROSS_ORIGIN_OPENER_POLICY, OPENER_POLICY_SAME_ORIGIN)?;
        amendment.document_policies = true;
    }

    if class.same_origin && class.navigation {
        headers.set(CACHE_CONTROL, NAVIGATION_CACHE_CONTROL)?;
        amendment.no_cache = true;
    }

    let body = if status.forbids_body() {
        amendment.body_dropped = body.is_some();
        None
    } else {
        body
    };

    Ok(Rewritten::Amended {
        response: HttpResponse {
            status,
            status_text,
            headers,
            body,
        },
        amendment,
    })
}
