//! Protocol data model: request URLs, origins, headers, and HTTP messages
//! as an intercepting worker observes them.

pub mod http;
pub mod url;

pub use http::CacheMode;
pub use http::Header;
pub use http::HeaderSet;
pub use http::HttpMethod;
pub use http::HttpResponse;
pub use http::HttpStatusCode;
pub use http::InterceptedRequest;
pub use http::RequestMode;
pub use url::Origin;
pub use url::RequestUrl;
pub use url::Scheme;
