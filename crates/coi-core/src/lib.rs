//! Shared primitives used across the isolation shield crates.

use core::fmt;

/// Result alias used across the workspace.
pub type ShieldResult<T> = Result<T, ShieldError>;

/// Workspace error carrying a dotted, stable code and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldError {
    pub code: &'static str,
    pub message: String,
}

impl ShieldError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns true when the code belongs to the given dotted namespace.
    pub fn is_in(&self, namespace: &str) -> bool {
        self.code
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
    }
}

impl fmt::Display for ShieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ShieldError {}
