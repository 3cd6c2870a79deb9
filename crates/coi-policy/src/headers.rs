//! Header names and values that make a document cross-origin isolated.

pub const CROSS_ORIGIN_RESOURCE_POLICY: &str = "Cross-Origin-Resource-Policy";
pub const CROSS_ORIGIN_EMBEDDER_POLICY: &str = "Cross-Origin-Embedder-Policy";
pub const CROSS_ORIGIN_OPENER_POLICY: &str = "Cross-Origin-Opener-Policy";
pub const CACHE_CONTROL: &str = "Cache-Control";
pub const CONTENT_TYPE: &str = "Content-Type";

/// Lets any isolated page embed the resource.
pub const RESOURCE_POLICY_CROSS_ORIGIN: &str = "cross-origin";
/// Embedded resources must opt in via CORP or CORS.
pub const EMBEDDER_POLICY_REQUIRE_CORP: &str = "require-corp";
/// Puts the document in its own browsing context group.
pub const OPENER_POLICY_SAME_ORIGIN: &str = "same-origin";
/// Keeps an unrewritten copy of the document from being replayed.
pub const NAVIGATION_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

pub const HTML_MIME_PREFIX: &str = "text/html";
pub const SENTINEL_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
