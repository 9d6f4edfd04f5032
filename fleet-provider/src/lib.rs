//! Provider abstraction for hosted instances.
//!
//! The orchestrator never provisions anything itself. It drives instances hosted
//! by an external provider through the [`Provisioner`] trait, manages image-pull
//! permissions through [`RegistryAccess`], and asks running instances for their
//! last user activity through [`ActivityProbe`].

use async_trait::async_trait;
use std::sync::Arc;

pub mod error;
pub mod instance;
pub mod local;
pub mod probe;

pub use error::{ProviderError, Result};
pub use instance::{DeploymentSpec, HealthCheck, Instance, InstanceState, Tag};
pub use local::{LocalProvider, LocalRegistry, LocalSettings, ProviderCalls, ProviderOp};
pub use probe::{activity_url, ActivityProbe, ActivityReport, HttpActivityProbe};

/// The core trait for all provisioning backends.
///
/// Every method is a single provider round trip; implementations must not cache.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Backend name (e.g. "local").
    fn name(&self) -> &'static str;

    /// Create a new instance carrying the given tags. It starts out `Pending`.
    async fn create_instance(&self, name: &str, tags: &[Tag]) -> Result<Instance>;

    /// List instances, optionally only the one with the given name.
    /// A name that does not exist yields an empty list, not an error.
    async fn get_instances(&self, name: Option<&str>) -> Result<Vec<Instance>>;

    /// Fetch one instance by name.
    async fn get_instance(&self, name: &str) -> Result<Option<Instance>> {
        Ok(self
            .get_instances(Some(name))
            .await?
            .into_iter()
            .find(|instance| instance.name == name))
    }

    /// Delete an instance and everything deployed to it.
    async fn delete_instance(&self, name: &str) -> Result<()>;

    /// Add or overwrite tags.
    async fn tag_instance(&self, name: &str, tags: &[Tag]) -> Result<()>;

    /// Remove tags by key.
    async fn untag_instance(&self, name: &str, keys: &[String]) -> Result<()>;

    /// Start a deployment of `spec` on a ready (or already running) instance.
    async fn deploy(&self, instance: &Instance, spec: &DeploymentSpec) -> Result<()>;
}

/// Shared policy document as stored by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRecord {
    pub policy_text: String,
    pub registry_id: String,
}

/// Read/write access to the image registry's pull policy.
#[async_trait]
pub trait RegistryAccess: Send + Sync {
    async fn get_policy(&self, repository: &str) -> Result<PolicyRecord>;

    async fn set_policy(&self, repository: &str, registry_id: &str, policy_text: &str)
        -> Result<()>;
}

/// The clients one backend provides.
#[derive(Clone)]
pub struct Backend {
    pub provisioner: Arc<dyn Provisioner>,
    pub registry: Arc<dyn RegistryAccess>,
}

/// Creates a backend by name.
///
/// # Arguments
/// * `name` - backend name from configuration
/// * `settings` - behaviour of the in-process `local` backend
///
/// # Returns
/// The backend's clients or an error if the backend is unknown.
pub fn get_backend(name: &str, settings: LocalSettings) -> Result<Backend> {
    match name {
        "local" => Ok(Backend {
            provisioner: Arc::new(LocalProvider::new(settings)),
            registry: Arc::new(LocalRegistry::default()),
        }),
        _ => Err(ProviderError::UnknownProvider(name.to_string())),
    }
}
