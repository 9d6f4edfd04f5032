use fleet_orchestrator::{
    OrchestratorConfig, Result as OrchestratorResult, SweepSchedule, TagKeys, WatchIntervals,
};
use fleet_provider::{DeploymentSpec, HealthCheck};
use serde::Deserialize;
use std::time::Duration;

/// Daemon settings. Every field falls back to a `FLEET_*` environment
/// variable, then to the built-in default.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    #[serde(default = "default_inactivity_minutes")]
    pub inactivity_threshold_minutes: i64,

    #[serde(default = "default_service_ready_interval")]
    pub service_ready_interval_secs: u64,

    #[serde(default = "default_deployment_running_interval")]
    pub deployment_running_interval_secs: u64,

    #[serde(default = "default_auto_destroy_interval")]
    pub auto_destroy_interval_secs: u64,

    #[serde(default = "default_standby_retry_interval")]
    pub standby_retry_interval_secs: u64,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_repository")]
    pub repository: String,

    #[serde(default = "default_principal_prefix")]
    pub principal_prefix: String,

    #[serde(default = "default_owner_tag")]
    pub owner_tag: String,

    #[serde(default = "default_managed_tag")]
    pub managed_tag: String,

    #[serde(default = "default_hot_tag")]
    pub hot_tag: String,

    #[serde(default = "default_sweep_at")]
    pub sweep_at: String,

    #[serde(default = "default_sweep_days")]
    pub sweep_days: String,
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback)
}

fn default_bind_addr() -> String {
    env_or("FLEET_BIND", "0.0.0.0:3000")
}

fn default_provider() -> String {
    env_or("FLEET_PROVIDER", "local")
}

fn default_name_prefix() -> String {
    env_or("FLEET_NAME_PREFIX", "app")
}

fn default_inactivity_minutes() -> i64 {
    env_parse("FLEET_INACTIVITY_MINUTES", 30)
}

fn default_service_ready_interval() -> u64 {
    env_parse("FLEET_SERVICE_READY_INTERVAL", 20)
}

fn default_deployment_running_interval() -> u64 {
    env_parse("FLEET_DEPLOYMENT_RUNNING_INTERVAL", 30)
}

fn default_auto_destroy_interval() -> u64 {
    env_parse("FLEET_AUTO_DESTROY_INTERVAL", 60)
}

fn default_standby_retry_interval() -> u64 {
    env_parse("FLEET_STANDBY_RETRY_INTERVAL", 60)
}

fn default_image() -> String {
    env_or("FLEET_IMAGE", "registry.local/app:web-demo")
}

fn default_port() -> u16 {
    env_parse("FLEET_PORT", 8000)
}

fn default_repository() -> String {
    env_or("FLEET_REPOSITORY", "app")
}

fn default_principal_prefix() -> String {
    env_or("FLEET_PRINCIPAL_PREFIX", "arn:aws:iam")
}

fn default_owner_tag() -> String {
    env_or("FLEET_TAG_OWNER", "email")
}

fn default_managed_tag() -> String {
    env_or("FLEET_TAG_MANAGED", "orchestrator")
}

fn default_hot_tag() -> String {
    env_or("FLEET_TAG_HOT", "hot-instance")
}

fn default_sweep_at() -> String {
    env_or("FLEET_SWEEP_AT", "00:00")
}

fn default_sweep_days() -> String {
    env_or("FLEET_SWEEP_DAYS", "mon-fri")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            provider: default_provider(),
            name_prefix: default_name_prefix(),
            inactivity_threshold_minutes: default_inactivity_minutes(),
            service_ready_interval_secs: default_service_ready_interval(),
            deployment_running_interval_secs: default_deployment_running_interval(),
            auto_destroy_interval_secs: default_auto_destroy_interval(),
            standby_retry_interval_secs: default_standby_retry_interval(),
            image: default_image(),
            port: default_port(),
            repository: default_repository(),
            principal_prefix: default_principal_prefix(),
            owner_tag: default_owner_tag(),
            managed_tag: default_managed_tag(),
            hot_tag: default_hot_tag(),
            sweep_at: default_sweep_at(),
            sweep_days: default_sweep_days(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Fails on a zero watcher interval or a malformed sweep schedule.
    pub fn to_orchestrator_config(&self) -> OrchestratorResult<OrchestratorConfig> {
        let intervals = WatchIntervals {
            service_ready: Duration::from_secs(self.service_ready_interval_secs),
            deployment_running: Duration::from_secs(self.deployment_running_interval_secs),
            auto_destroy: Duration::from_secs(self.auto_destroy_interval_secs),
            standby_replacement: Duration::from_secs(self.standby_retry_interval_secs),
        };
        intervals.validate()?;

        Ok(OrchestratorConfig {
            name_prefix: self.name_prefix.clone(),
            inactivity_threshold_minutes: self.inactivity_threshold_minutes,
            intervals,
            deployment: DeploymentSpec {
                image: self.image.clone(),
                port: self.port,
                health_check: HealthCheck::default(),
            },
            repository: self.repository.clone(),
            principal_prefix: self.principal_prefix.clone(),
            tags: TagKeys {
                owner: self.owner_tag.clone(),
                managed: self.managed_tag.clone(),
                hot: self.hot_tag.clone(),
            },
            sweep: SweepSchedule::parse(&self.sweep_at, &self.sweep_days)?,
        })
    }
}
