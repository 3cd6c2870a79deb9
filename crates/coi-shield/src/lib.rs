//! Isolation shield coordinator.

#[cfg(test)]
mod simulation;

use coi_activation::ActivationOutcome;
use coi_activation::ActivationProtocol;
use coi_activation::Platform;
use coi_core::ShieldResult;
use coi_interceptor::Interception;
use coi_interceptor::Interceptor;
use coi_interceptor::LifecycleDirective;
use coi_interceptor::LifecycleState;
use coi_interceptor::Upstream;
use coi_net::InterceptedRequest;
use coi_net::RequestUrl;
use coi_policy::ShieldConfig;
use tracing::debug;

/// Loads the shield configuration, falling back to defaults for anything the
/// host leaves out.
pub fn load_config(json: Option<&str>) -> ShieldResult<ShieldConfig> {
    match json.map(str::trim) {
        None | Some("") => {
            let config = ShieldConfig::default();
            config.validate()?;
            Ok(config)
        }
        Some(json) => ShieldConfig::from_json(json),
    }
}

/// Runs the activation protocol for the current page load.
pub async fn activate_page<P: Platform>(
    platform: &P,
    config: &ShieldConfig,
) -> ShieldResult<ActivationOutcome> {
    let mut protocol = ActivationProtocol::new(platform, config)?;
    Ok(protocol.run().await)
}

/// Worker-side half of the shield: configuration plus the interceptor bound
/// to the registration scope.
#[derive(Debug, Clone)]
pub struct Shield {
    config: ShieldConfig,
    interceptor: Interceptor,
}

/// Snapshot used by hosts for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldSummary {
    pub origin: String,
    pub state: LifecycleState,
    pub sentinel_path: String,
    pub marker_param: String,
    pub probe_enabled: bool,
}

impl Shield {
    pub fn new(scope: &RequestUrl, config: ShieldConfig) -> ShieldResult<Self> {
        let interceptor = Interceptor::new(scope, &config)?;
        debug!(
            scope = scope.as_str(),
            sentinel = interceptor.sentinel_path(),
            "shield configured"
        );
        Ok(Self {
            config,
            interceptor,
        })
    }

    pub fn from_json(scope: &RequestUrl, json: Option<&str>) -> ShieldResult<Self> {
        Self::new(scope, load_config(json)?)
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    pub fn install(&mut self) -> ShieldResult<LifecycleDirective> {
        self.interceptor.install()
    }

    pub fn activate(&mut self) -> ShieldResult<LifecycleDirective> {
        self.interceptor.activate()
    }

    pub async fn intercept<U: Upstream>(
        &self,
        upstream: &U,
        request: &InterceptedRequest,
    ) -> ShieldResult<Interception<U::Body>> {
        self.interceptor.intercept(upstream, request).await
    }

    pub fn summary(&self) -> ShieldSummary {
        ShieldSummary {
            origin: self.interceptor.origin().to_string(),
            state: self.interceptor.state(),
            sentinel_path: self.interceptor.sentinel_path().to_owned(),
            marker_param: self.config.marker_param.clone(),
            probe_enabled: self.config.probe.enabled,
        }
    }
}
