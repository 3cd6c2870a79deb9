//! Worker lifecycle: `installing -> waiting-to-activate -> active`.

use coi_core::ShieldError;
use coi_core::ShieldResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    WaitingToActivate,
    Active,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::WaitingToActivate => "waiting-to-activate",
            Self::Active => "active",
        }
    }
}

/// What the host must ask the platform to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleDirective {
    /// Skip the wait for existing pages to close before activating.
    SkipWaiting,
    /// Take control of every page already open in scope.
    ClaimClients,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: LifecycleState::Installing,
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn install(&mut self) -> ShieldResult<LifecycleDirective> {
        self.advance(LifecycleState::Installing, LifecycleState::WaitingToActivate)?;
        Ok(LifecycleDirective::SkipWaiting)
    }

    pub fn activate(&mut self) -> ShieldResult<LifecycleDirective> {
        self.advance(LifecycleState::WaitingToActivate, LifecycleState::Active)?;
        Ok(LifecycleDirective::ClaimClients)
    }

    fn advance(&mut self, from: LifecycleState, to: LifecycleState) -> ShieldResult<()> {
        if self.state != from {
            return Err(ShieldError::new(
                "interceptor.lifecycle_invalid",
                format!(
                    "cannot move to `{}` from `{}` (expected `{}`)",
                    to.as_str(),
                    self.state.as_str(),
                    from.as_str()
                ),
            ));
        }

        self.state = to;
        Ok(())
    }
}
