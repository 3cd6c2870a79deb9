//! Activation protocol: gets a page into the cross-origin isolated state with
//! at most one reload.

pub mod marker;
pub mod protocol;

pub use marker::ReloadMarker;
pub use protocol::ActivationOutcome;
pub use protocol::ActivationProtocol;
pub use protocol::ActivationState;
pub use protocol::DegradedReason;
pub use protocol::Platform;
pub use protocol::Registration;
pub use protocol::WorkerState;
