//! Isolation header policy and shield configuration defaults.

pub mod headers;

use coi_core::ShieldError;
use coi_core::ShieldResult;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_SCRIPT_LOCATION: &str = "./coi-shield-sw.js";
pub const DEFAULT_SCOPE: &str = "./";
pub const DEFAULT_MARKER_PARAM: &str = "coi-reload";
pub const DEFAULT_SENTINEL_PATH: &str = "__ping__";
pub const DEFAULT_SENTINEL_BODY: &str = "pong";

const MAX_PROBE_ATTEMPTS: u32 = 20;
const MAX_PROBE_BACKOFF_MS: u64 = 10_000;

/// Bounds for the optional readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub enabled: bool,
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            attempts: 5,
            backoff_ms: 200,
        }
    }
}

impl ProbeConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Configuration shared by the interceptor and the activation protocol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShieldConfig {
    /// Location of the worker script, relative to the page.
    pub script_location: String,
    /// Registration scope; must cover every path the page loads.
    pub scope: String,
    /// Query parameter marking a page load that is itself an activation reload.
    pub marker_param: String,
    /// Reserved path, relative to the registration scope, answered by the
    /// interceptor itself.
    pub sentinel_path: String,
    pub sentinel_body: String,
    pub probe: ProbeConfig,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            script_location: DEFAULT_SCRIPT_LOCATION.to_owned(),
            scope: DEFAULT_SCOPE.to_owned(),
            marker_param: DEFAULT_MARKER_PARAM.to_owned(),
            sentinel_path: DEFAULT_SENTINEL_PATH.to_owned(),
            sentinel_body: DEFAULT_SENTINEL_BODY.to_owned(),
            probe: ProbeConfig::default(),
        }
    }
}

impl ShieldConfig {
    /// Parses a partial JSON object; missing fields keep their defaults.
    pub fn from_json(input: &str) -> ShieldResult<Self> {
        let config: Self = serde_json::from_str(input).map_err(|error| {
            ShieldError::new(
                "policy.config_invalid",
                format!("failed to parse shield configuration: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ShieldResult<()> {
        if self.script_location.trim().is_empty() {
            return Err(ShieldError::new(
                "policy.script_location_empty",
                "worker script location must not be empty",
            ));
        }

        if self.scope.trim().is_empty() {
            return Err(ShieldError::new(
                "policy.scope_empty",
                "registration scope must not be empty",
            ));
        }

        if !self.scope.ends_with('/') {
            return Err(ShieldError::new(
                "policy.scope_not_directory",
                format!(
                    "registration scope `{}` must end with `/` to cover a path prefix",
                    self.scope
                ),
            ));
        }

        if self.marker_param.is_empty() || !self.marker_param.bytes().all(is_marker_byte) {
            return Err(ShieldError::new(
                "policy.marker_invalid",
                format!(
                    "reload marker `{}` must be a non-empty [A-Za-z0-9._-] token",
                    self.marker_param
                ),
            ));
        }

        if !is_scope_relative(&self.sentinel_path) {
            return Err(ShieldError::new(
                "policy.sentinel_path_invalid",
                format!(
                    "sentinel path `{}` must be relative to the scope, such as `__ping__`",
                    self.sentinel_path
                ),
            ));
        }

        if self.sentinel_body.is_empty() {
            return Err(ShieldError::new(
                "policy.sentinel_body_empty",
                "sentinel body must not be empty",
            ));
        }

        if !(1..=MAX_PROBE_ATTEMPTS).contains(&self.probe.attempts) {
            return Err(ShieldError::new(
                "policy.probe_attempts_invalid",
                format!(
                    "probe attempts must be 1-{MAX_PROBE_ATTEMPTS}, got `{}`",
                    self.probe.attempts
                ),
            ));
        }

        if self.probe.backoff_ms > MAX_PROBE_BACKOFF_MS {
            return Err(ShieldError::new(
                "policy.probe_backoff_invalid",
                format!(
                    "probe backoff must be at most {MAX_PROBE_BACKOFF_MS} ms, got `{}`",
                    self.probe.backoff_ms
                ),
            ));
        }

        Ok(())
    }

    /// Absolute sentinel path for a registration scope path such as
    /// `/pyodide-patterns/`.
    pub fn sentinel_path_under(&self, scope_path: &str) -> String {
        let directory = scope_path
            .rfind('/')
            .map_or("/", |end| &scope_path[..=end]);
        format!("{directory}{}", self.sentinel_path)
    }
}

fn is_scope_relative(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('/')
            .all(|segment| !matches!(segment, "" | "." | ".."))
        && path.bytes().all(|byte| is_marker_byte(byte) || byte == b'/')
}

fn is_marker_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.')
}
