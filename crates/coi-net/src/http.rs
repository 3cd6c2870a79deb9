//! HTTP request/response contracts as seen by an intercepting worker.

use crate::url::RequestUrl;
use coi_core::ShieldError;
use coi_core::ShieldResult;

/// Request methods a page can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
        }
    }

    /// Parses a method token; the platform upper-cases the standard ones.
    pub fn parse(token: &str) -> ShieldResult<Self> {
        let method = match token.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            _ => {
                return Err(ShieldError::new(
                    "net.http.method_unsupported",
                    format!("unsupported HTTP method `{token}`"),
                ));
            }
        };

        Ok(method)
    }
}

/// Request mode reported by the platform for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    Cors,
}

impl RequestMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::SameOrigin => "same-origin",
            Self::NoCors => "no-cors",
            Self::Cors => "cors",
        }
    }
}

/// Cache directive carried by an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

impl CacheMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::NoStore => "no-store",
            Self::Reload => "reload",
            Self::NoCache => "no-cache",
            Self::ForceCache => "force-cache",
            Self::OnlyIfCached => "only-if-cached",
        }
    }
}

/// Single HTTP header with validated wire-safe name/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> ShieldResult<Self> {
        if !is_valid_header_name(name) {
            return Err(ShieldError::new(
                "net.http.header_name_invalid",
                format!("invalid HTTP header name `{name}`"),
            ));
        }

        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(ShieldError::new(
                "net.http.header_value_invalid",
                format!("invalid characters found in HTTP header `{name}`"),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// Ordered, case-insensitive header map with unique keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderSet {
    entries: Vec<Header>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from raw pairs. Repeated names are folded into one entry
    /// with values joined by `", "`, the way the platform combines them.
    pub fn from_pairs<I, N, V>(pairs: I) -> ShieldResult<Self>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            let (name, value) = (name.as_ref(), value.as_ref());
            match set.position(name) {
                Some(index) => {
                    let combined = format!("{}, {value}", set.entries[index].value);
                    set.entries[index] = Header::new(&set.entries[index].name, &combined)?;
                }
                None => set.entries.push(Header::new(name, value)?),
            }
        }
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name)
            .map(|index| self.entries[index].value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Overwrites an existing entry in place or appends a new one.
    pub fn set(&mut self, name: &str, value: &str) -> ShieldResult<()> {
        match self.position(name) {
            Some(index) => {
                let header = Header::new(&self.entries[index].name, value)?;
                self.entries[index] = header;
            }
            None => self.entries.push(Header::new(name, value)?),
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|header| header.name.eq_ignore_ascii_case(name))
    }
}

/// HTTP status code, including the `0` the platform reports for opaque responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpStatusCode(u16);

impl HttpStatusCode {
    pub const OPAQUE: Self = Self(0);
    pub const OK: Self = Self(200);
    pub const NO_CONTENT: Self = Self(204);
    pub const NOT_MODIFIED: Self = Self(304);

    pub fn new(code: u16) -> ShieldResult<Self> {
        if (100..=599).contains(&code) {
            return Ok(Self(code));
        }

        Err(ShieldError::new(
            "net.http.status_invalid",
            format!("status code must be 100-599, got `{code}`"),
        ))
    }

    /// Accepts what a platform response reports, where `0` marks an opaque response.
    pub fn from_platform(code: u16) -> ShieldResult<Self> {
        if code == 0 {
            return Ok(Self::OPAQUE);
        }
        Self::new(code)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_opaque(self) -> bool {
        self.0 == 0
    }

    /// Null-body statuses: a response with one of these must not carry a body.
    pub fn forbids_body(self) -> bool {
        matches!(self.0, 101 | 103 | 204 | 205 | 304)
    }
}

/// A request observed by the interceptor. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub method: HttpMethod,
    pub url: RequestUrl,
    pub mode: RequestMode,
    pub cache: CacheMode,
}

impl InterceptedRequest {
    pub fn new(method: HttpMethod, url: RequestUrl, mode: RequestMode) -> Self {
        Self {
            method,
            url,
            mode,
            cache: CacheMode::Default,
        }
    }

    /// Shorthand for a top-level document request.
    pub fn navigation(url: RequestUrl) -> Self {
        Self::new(HttpMethod::Get, url, RequestMode::Navigate)
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Response as produced by the network layer; the body type is left to the
/// host so streams are moved rather than buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse<B> {
    pub status: HttpStatusCode,
    pub status_text: String,
    pub headers: HeaderSet,
    pub body: Option<B>,
}

impl<B> HttpResponse<B> {
    pub fn new(status: HttpStatusCode, status_text: impl Into<String>, headers: HeaderSet) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: B) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }
}

fn is_valid_header_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    name.bytes().all(is_token_char)
}

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}
