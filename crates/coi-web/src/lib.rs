//! Browser bindings for the isolation shield.
//!
//! On `wasm32` this crate exports `installInterceptor`, called from the
//! service-worker script, and `activate`, called from the page. The
//! platform-independent mapping and logging pieces compile everywhere so they
//! can be tested natively.

pub mod bridge;
pub mod console;

#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(target_arch = "wasm32")]
pub use wasm::activate;
#[cfg(target_arch = "wasm32")]
pub use wasm::install_interceptor;
