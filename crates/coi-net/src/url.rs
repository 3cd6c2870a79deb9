//! Request URL and origin contracts.

use coi_core::ShieldError;
use coi_core::ShieldResult;
use core::fmt;
use url::Url;

/// URL schemes the interceptor is able to forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// A tuple origin: scheme, lowercase host and effective port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Origin {
    /// Parses an origin such as `https://example.com:8443`. Any path is ignored.
    pub fn parse(input: &str) -> ShieldResult<Self> {
        RequestUrl::parse(input).map(|url| url.origin())
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())
    }
}

/// Canonical URL of an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUrl {
    parsed: Url,
    origin: Origin,
}

impl RequestUrl {
    pub fn parse(input: &str) -> ShieldResult<Self> {
        let mut parsed = Url::parse(input).map_err(|error| {
            ShieldError::new(
                "net.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;

        if parsed.cannot_be_a_base() {
            return Err(ShieldError::new(
                "net.url.invalid_base",
                format!("URL `{input}` has no hierarchical path"),
            ));
        }

        let scheme = match parsed.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(ShieldError::new(
                    "net.url.scheme_unsupported",
                    format!("unsupported scheme `{other}`"),
                ));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| ShieldError::new("net.url.host_missing", "URL must include a host"))?
            .to_ascii_lowercase();

        let port = parsed.port_or_known_default().ok_or_else(|| {
            ShieldError::new(
                "net.url.port_missing",
                "unable to determine effective port for URL",
            )
        })?;

        // Fragments never reach the network.
        parsed.set_fragment(None);

        Ok(Self {
            parsed,
            origin: Origin { scheme, host, port },
        })
    }

    pub fn as_str(&self) -> &str {
        self.parsed.as_str()
    }

    pub fn origin(&self) -> Origin {
        self.origin.clone()
    }

    pub fn is_same_origin(&self, origin: &Origin) -> bool {
        self.origin == *origin
    }

    pub fn path(&self) -> &str {
        match self.parsed.path() {
            "" => "/",
            path => path,
        }
    }

    pub fn path_and_query(&self) -> String {
        match self.parsed.query() {
            Some(query) => format!("{}?{query}", self.path()),
            None => self.path().to_owned(),
        }
    }
}
