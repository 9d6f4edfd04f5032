//! One-shot instance operations.
//!
//! Every operation re-queries the provider and never raises past its own
//! boundary: failures are logged and reported as `None` / `false`.

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::registry::RegistryAccessManager;
use fleet_provider::{Instance, Provisioner, Tag};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub struct InstanceService {
    provisioner: Arc<dyn Provisioner>,
    registry: Arc<RegistryAccessManager>,
    bus: EventBus,
    config: OrchestratorConfig,
}

impl InstanceService {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        registry: Arc<RegistryAccessManager>,
        bus: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provisioner,
            registry,
            bus,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn provisioner(&self) -> &Arc<dyn Provisioner> {
        &self.provisioner
    }

    /// `{prefix}-{client_id}`. Only lowercase letters, digits and `-` are
    /// accepted so distinct clients can never map to the same name, and no
    /// client name may fall inside the standby namespace.
    pub fn instance_name(&self, client_id: &str) -> Result<String> {
        let valid = !client_id.is_empty()
            && client_id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !valid {
            return Err(OrchestratorError::InvalidInput(format!(
                "client id {client_id:?} must be non-empty and use only [a-z0-9-]"
            )));
        }

        let name = format!("{}-{}", self.config.name_prefix, client_id);
        if name.starts_with(&self.config.standby_prefix()) {
            return Err(OrchestratorError::InvalidInput(format!(
                "client id {client_id:?} collides with standby instance names"
            )));
        }
        Ok(name)
    }

    /// Create a managed instance and announce it with `ServiceCreated`.
    #[instrument(skip(self, tags))]
    pub async fn try_create(&self, name: &str, mut tags: Vec<Tag>) -> Result<Instance> {
        if !tags.iter().any(|t| t.key == self.config.tags.managed) {
            tags.push(Tag::marker(self.config.tags.managed.as_str()));
        }

        let instance = self.provisioner.create_instance(name, &tags).await?;
        info!("Created instance {}", instance.name);
        self.bus.emit(LifecycleEvent::ServiceCreated {
            name: instance.name.clone(),
        });
        Ok(instance)
    }

    pub async fn create(&self, name: &str, tags: Vec<Tag>) -> Option<Instance> {
        match self.try_create(name, tags).await {
            Ok(instance) => Some(instance),
            Err(e) => {
                error!("Failed to create instance {}: {}", name, e);
                None
            }
        }
    }

    /// Cold-create the instance for `client_id`, owned by `owner`.
    pub async fn create_for_client(&self, client_id: &str, owner: &str) -> Result<Option<Instance>> {
        let name = self.instance_name(client_id)?;
        let tags = vec![Tag::new(self.config.tags.owner.as_str(), owner)];
        Ok(self.create(&name, tags).await)
    }

    pub async fn find(&self, name: &str) -> Option<Instance> {
        match self.provisioner.get_instance(name).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Failed to query instance {}: {}", name, e);
                None
            }
        }
    }

    /// Every instance carrying the managed marker.
    pub async fn find_managed(&self) -> Result<Vec<Instance>> {
        let managed = &self.config.tags.managed;
        Ok(self
            .provisioner
            .get_instances(None)
            .await?
            .into_iter()
            .filter(|instance| instance.has_tag(managed))
            .collect())
    }

    /// Revoke registry access and delete. Emits nothing; callers decide
    /// whether the deletion is announced.
    #[instrument(skip(self))]
    pub async fn destroy(&self, name: &str) -> bool {
        if let Err(e) = self.registry.revoke(name).await {
            warn!("Failed to revoke registry access for {}: {}", name, e);
        }

        match self.provisioner.delete_instance(name).await {
            Ok(()) => {
                info!("Deleted instance {}", name);
                true
            }
            Err(e) => {
                error!("Failed to delete instance {}: {}", name, e);
                false
            }
        }
    }

    /// Destroy and announce with `ServiceDeleted` when the delete went through.
    pub async fn delete(&self, name: &str) -> bool {
        let deleted = self.destroy(name).await;
        if deleted {
            self.bus.emit(LifecycleEvent::ServiceDeleted {
                name: name.to_string(),
            });
        }
        deleted
    }

    /// Grant registry access, then deploy the configured image. Announces
    /// `DeploymentStarted` only if the deploy call succeeded.
    #[instrument(skip_all, fields(instance = %instance.name))]
    pub async fn deploy(&self, instance: &Instance) -> bool {
        if let Err(e) = self.registry.grant(instance).await {
            warn!(
                "Failed to grant registry access for {}, deploying anyway: {}",
                instance.name, e
            );
        }

        match self
            .provisioner
            .deploy(instance, &self.config.deployment)
            .await
        {
            Ok(()) => {
                info!(
                    "Deploying {} to {}",
                    self.config.deployment.image, instance.name
                );
                self.bus.emit(LifecycleEvent::DeploymentStarted {
                    instance: instance.clone(),
                });
                true
            }
            Err(e) => {
                error!("Failed to deploy to {}: {}", instance.name, e);
                false
            }
        }
    }
}
