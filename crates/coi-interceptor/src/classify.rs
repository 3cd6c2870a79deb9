//! Request classification: origin relationship and document detection.

use coi_net::HeaderSet;
use coi_net::InterceptedRequest;
use coi_net::Origin;
use coi_policy::headers::HTML_MIME_PREFIX;

/// How an intercepted request relates to the controlling page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestClass {
    pub same_origin: bool,
    pub navigation: bool,
}

impl RequestClass {
    /// A document is a navigation or anything served as HTML.
    pub fn is_document(&self, response_headers: &HeaderSet) -> bool {
        self.navigation
            || response_headers
                .get("content-type")
                .is_some_and(is_html_content_type)
    }
}

pub fn classify(request: &InterceptedRequest, origin: &Origin) -> RequestClass {
    RequestClass {
        same_origin: request.url.is_same_origin(origin),
        navigation: request.is_navigation(),
    }
}

pub fn is_html_content_type(value: &str) -> bool {
    value
        .trim_start()
        .get(..HTML_MIME_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(HTML_MIME_PREFIX))
}
