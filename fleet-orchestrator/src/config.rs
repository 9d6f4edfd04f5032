//! Orchestrator settings. Defaults match production behaviour; the daemon
//! overrides them from its environment.

use crate::error::{OrchestratorError, Result};
use crate::sweep::SweepSchedule;
use fleet_provider::{DeploymentSpec, HealthCheck};
use std::time::Duration;

/// Tag keys used to mark instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagKeys {
    /// Carries the owning user's identity as its value.
    pub owner: String,
    /// Present on every instance this orchestrator created.
    pub managed: String,
    /// Present only on the unclaimed standby.
    pub hot: String,
}

impl Default for TagKeys {
    fn default() -> Self {
        Self {
            owner: "email".to_string(),
            managed: "orchestrator".to_string(),
            hot: "hot-instance".to_string(),
        }
    }
}

/// Poll period of each watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchIntervals {
    pub service_ready: Duration,
    pub deployment_running: Duration,
    pub auto_destroy: Duration,
    /// Retry period for replacing a claimed standby. The first attempt is immediate.
    pub standby_replacement: Duration,
}

impl WatchIntervals {
    /// Every period must be non-zero.
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("service_ready", self.service_ready),
            ("deployment_running", self.deployment_running),
            ("auto_destroy", self.auto_destroy),
            ("standby_replacement", self.standby_replacement),
        ];
        match periods.iter().find(|(_, period)| period.is_zero()) {
            Some((name, _)) => Err(OrchestratorError::InvalidInput(format!(
                "{name} interval must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

impl Default for WatchIntervals {
    fn default() -> Self {
        Self {
            service_ready: Duration::from_secs(20),
            deployment_running: Duration::from_secs(30),
            auto_destroy: Duration::from_secs(60),
            standby_replacement: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Every instance name is `{name_prefix}-{suffix}`.
    pub name_prefix: String,
    pub inactivity_threshold_minutes: i64,
    pub intervals: WatchIntervals,
    pub deployment: DeploymentSpec,
    /// Registry repository whose pull policy is managed.
    pub repository: String,
    /// Principals not starting with this prefix are dropped from the policy.
    pub principal_prefix: String,
    pub tags: TagKeys,
    pub sweep: SweepSchedule,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            name_prefix: "app".to_string(),
            inactivity_threshold_minutes: 30,
            intervals: WatchIntervals::default(),
            deployment: DeploymentSpec {
                image: "registry.local/app:web-demo".to_string(),
                port: 8000,
                health_check: HealthCheck::default(),
            },
            repository: "app".to_string(),
            principal_prefix: "arn:aws:iam".to_string(),
            tags: TagKeys::default(),
            sweep: SweepSchedule::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Name prefix shared by every standby instance.
    pub fn standby_prefix(&self) -> String {
        format!("{}-hot", self.name_prefix)
    }
}
