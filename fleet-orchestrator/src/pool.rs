//! Hot standby pool.
//!
//! At steady state exactly one unclaimed instance carries the hot tag. A user
//! asking for an instance gets their own if one exists; otherwise a running
//! standby is claimed for them by moving tags, and the claim triggers the
//! provisioning of a replacement.

use crate::error::{OrchestratorError, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::instances::InstanceService;
use fleet_provider::{Instance, Provisioner, Tag};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

pub struct HotPool {
    instances: Arc<InstanceService>,
    bus: EventBus,
    // Serializes check-then-create so overlapping triggers provision once.
    provisioning: Mutex<()>,
}

impl HotPool {
    pub fn new(instances: Arc<InstanceService>, bus: EventBus) -> Self {
        Self {
            instances,
            bus,
            provisioning: Mutex::new(()),
        }
    }

    fn hot_tag(&self) -> &str {
        &self.instances.config().tags.hot
    }

    fn owner_tag(&self) -> &str {
        &self.instances.config().tags.owner
    }

    /// `{prefix}-hot{n}` with `n` drawn from `[100, 100000)`. Collisions are
    /// not retried; the create call fails and the next trigger tries again.
    pub fn new_standby_name(&self) -> String {
        let suffix: u32 = rand::rng().random_range(100..100_000);
        format!("{}{}", self.instances.config().standby_prefix(), suffix)
    }

    pub async fn find_standby(&self) -> Result<Option<Instance>> {
        let hot = self.hot_tag();
        Ok(self
            .instances
            .provisioner()
            .get_instances(None)
            .await?
            .into_iter()
            .find(|instance| instance.has_tag(hot)))
    }

    /// Provision a standby unless one exists. Returns the new standby, or
    /// `None` when there already was one.
    pub async fn ensure_standby(&self) -> Result<Option<Instance>> {
        let _guard = self.provisioning.lock().await;

        if let Some(existing) = self.find_standby().await? {
            info!("Hot instance available: {}", existing.name);
            return Ok(None);
        }

        let name = self.new_standby_name();
        info!("Creating hot instance {}", name);
        let standby = self
            .instances
            .try_create(&name, vec![Tag::marker(self.hot_tag())])
            .await?;
        Ok(Some(standby))
    }

    /// Startup reconciliation. Failures are logged; the next claim retries.
    pub async fn reconcile(&self) -> Option<Instance> {
        match self.ensure_standby().await {
            Ok(created) => created,
            Err(e) => {
                error!("Hot pool reconciliation failed: {}", e);
                None
            }
        }
    }

    /// The instance tagged to `owner`, else the hot standby, else `None`.
    pub async fn lookup(&self, owner: &str) -> Result<Option<Instance>> {
        let all = self.instances.provisioner().get_instances(None).await?;
        let owner_tag = self.owner_tag();
        let hot = self.hot_tag();

        let owned = all
            .iter()
            .position(|instance| instance.tag_value(owner_tag) == Some(owner));
        let chosen = owned.or_else(|| all.iter().position(|instance| instance.has_tag(hot)));

        Ok(chosen.map(|index| all[index].clone()))
    }

    /// Hand a running standby to `owner`: drop the hot tag, then add the owner
    /// tag. The two mutations are not atomic; a failure in between leaves an
    /// instance with neither tag and is only logged.
    #[instrument(skip(self, standby), fields(instance = %standby.name))]
    pub async fn claim(&self, standby: &Instance, owner: &str) -> Result<Instance> {
        let url = match (&standby.url, standby.is_running()) {
            (Some(url), true) => url.clone(),
            _ => {
                return Err(OrchestratorError::InvalidInput(format!(
                    "{} is not running and cannot be claimed",
                    standby.name
                )))
            }
        };

        let provisioner = self.instances.provisioner();
        provisioner
            .untag_instance(&standby.name, &[self.hot_tag().to_string()])
            .await
            .map_err(|source| OrchestratorError::ClaimFailed {
                name: standby.name.clone(),
                stage: "remove the hot tag",
                source,
            })?;

        let owner_tag = Tag::new(self.owner_tag(), owner);
        if let Err(source) = provisioner
            .tag_instance(&standby.name, std::slice::from_ref(&owner_tag))
            .await
        {
            warn!(
                "{} lost its hot tag but was not tagged to {}; needs manual cleanup",
                standby.name, owner
            );
            return Err(OrchestratorError::ClaimFailed {
                name: standby.name.clone(),
                stage: "tag the owner",
                source,
            });
        }

        info!("Claimed hot instance {} for {}", standby.name, owner);

        let mut claimed = standby.clone();
        claimed.tags.retain(|t| t.key != self.hot_tag() && t.key != owner_tag.key);
        claimed.tags.push(owner_tag);

        self.bus.emit(LifecycleEvent::HotInstanceClaimed {
            name: claimed.name.clone(),
            url,
        });
        Ok(claimed)
    }

    /// Look up the caller's instance, claiming the standby when it is the
    /// only option and already running. A freshly claimed instance is
    /// announced with `DeploymentRunning` so inactivity tracking starts.
    pub async fn acquire(&self, owner: &str) -> Option<Instance> {
        let found = match self.lookup(owner).await {
            Ok(found) => found?,
            Err(e) => {
                warn!("Instance lookup for {} failed: {}", owner, e);
                return None;
            }
        };

        if !found.has_tag(self.hot_tag()) || !found.is_running() {
            return Some(found);
        }

        match self.claim(&found, owner).await {
            Ok(claimed) => {
                if let Some(url) = claimed.url.clone() {
                    self.bus.emit(LifecycleEvent::DeploymentRunning {
                        name: claimed.name.clone(),
                        url,
                    });
                }
                Some(claimed)
            }
            Err(e) => {
                error!("Claim of {} for {} failed: {}", found.name, owner, e);
                None
            }
        }
    }
}
