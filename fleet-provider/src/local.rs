//! In-process provider backend.
//!
//! `LocalProvider` keeps instances in memory and walks them through the provider
//! lifecycle either on its own (after the configured delays) or under manual
//! control via [`LocalProvider::set_state`]. It also counts every call and can
//! be told to fail specific operations, which makes it the test double for the
//! orchestrator as well as the default backend for local runs.

use crate::error::{ProviderError, Result};
use crate::instance::{DeploymentSpec, Instance, InstanceState, Tag};
use crate::{PolicyRecord, Provisioner, RegistryAccess};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Provider operations that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    Create,
    Get,
    Delete,
    Tag,
    Untag,
    Deploy,
}

impl fmt::Display for ProviderOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCalls {
    pub create: usize,
    pub get: usize,
    pub delete: usize,
    pub tag: usize,
    pub untag: usize,
    pub deploy: usize,
}

impl ProviderCalls {
    pub fn total(&self) -> usize {
        self.create + self.get + self.delete + self.tag + self.untag + self.deploy
    }

    fn bump(&mut self, op: ProviderOp) {
        match op {
            ProviderOp::Create => self.create += 1,
            ProviderOp::Get => self.get += 1,
            ProviderOp::Delete => self.delete += 1,
            ProviderOp::Tag => self.tag += 1,
            ProviderOp::Untag => self.untag += 1,
            ProviderOp::Deploy => self.deploy += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    /// Pending → Ready after this long. `None` leaves the transition to `set_state`.
    pub ready_after: Option<Duration>,
    /// Deploying → Running after this long. `None` leaves the transition to `set_state`.
    pub running_after: Option<Duration>,
    /// Public url pattern; `{name}` is replaced with the instance name.
    pub url_template: String,
    /// Prefix of the pull identity assigned to new instances.
    pub principal_prefix: String,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            ready_after: Some(Duration::from_secs(30)),
            running_after: Some(Duration::from_secs(45)),
            url_template: "https://{name}.fleet.local/".to_string(),
            principal_prefix: "arn:aws:iam::000000000000:role/fleet-puller-".to_string(),
        }
    }
}

impl LocalSettings {
    /// No automatic transitions; tests drive every state change.
    pub fn manual() -> Self {
        Self {
            ready_after: None,
            running_after: None,
            ..Self::default()
        }
    }

    fn url_for(&self, name: &str) -> String {
        self.url_template.replace("{name}", name)
    }
}

#[derive(Debug, Clone)]
struct Hosted {
    instance: Instance,
    entered_state_at: Instant,
    deployments: Vec<DeploymentSpec>,
}

#[derive(Debug, Default)]
struct LocalState {
    // Insertion order is listing order.
    hosted: Vec<Hosted>,
    calls: ProviderCalls,
    failing: HashSet<ProviderOp>,
}

impl LocalState {
    fn find_mut(&mut self, name: &str) -> Result<&mut Hosted> {
        self.hosted
            .iter_mut()
            .find(|h| h.instance.name == name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct LocalProvider {
    settings: LocalSettings,
    state: Arc<Mutex<LocalState>>,
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new(LocalSettings::default())
    }
}

impl LocalProvider {
    pub fn new(settings: LocalSettings) -> Self {
        Self {
            settings,
            state: Arc::new(Mutex::new(LocalState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Counts the call, then fails it if the operation is switched off.
    fn enter(&self, op: ProviderOp) -> Result<MutexGuard<'_, LocalState>> {
        let mut state = self.lock();
        state.calls.bump(op);
        if state.failing.contains(&op) {
            return Err(ProviderError::Unavailable(format!(
                "local provider refused {op}"
            )));
        }
        Ok(state)
    }

    fn advance(&self, state: &mut LocalState) {
        let now = Instant::now();
        for hosted in state.hosted.iter_mut() {
            let waited = now.saturating_duration_since(hosted.entered_state_at);
            match hosted.instance.state {
                InstanceState::Pending
                    if self.settings.ready_after.is_some_and(|d| waited >= d) =>
                {
                    hosted.instance.state = InstanceState::Ready;
                    hosted.entered_state_at = now;
                }
                InstanceState::Deploying
                    if self.settings.running_after.is_some_and(|d| waited >= d) =>
                {
                    hosted.instance.state = InstanceState::Running;
                    hosted.instance.url = Some(self.settings.url_for(&hosted.instance.name));
                    hosted.entered_state_at = now;
                }
                _ => {}
            }
        }
    }

    /// Make an operation fail (or succeed again) until told otherwise.
    pub fn set_failing(&self, op: ProviderOp, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// Force an instance into a state. Entering `Running` assigns the templated
    /// url unless one is already set; leaving it clears the url.
    pub fn set_state(&self, name: &str, new_state: InstanceState) -> Result<()> {
        let mut state = self.lock();
        let url = self.settings.url_for(name);
        let hosted = state.find_mut(name)?;
        hosted.instance.state = new_state;
        hosted.entered_state_at = Instant::now();
        if new_state == InstanceState::Running {
            hosted.instance.url.get_or_insert(url);
        } else {
            hosted.instance.url = None;
        }
        Ok(())
    }

    pub fn set_url(&self, name: &str, url: &str) -> Result<()> {
        let mut state = self.lock();
        state.find_mut(name)?.instance.url = Some(url.to_string());
        Ok(())
    }

    /// Seed an instance as-is, bypassing `create_instance`.
    pub fn insert(&self, instance: Instance) {
        let mut state = self.lock();
        state.hosted.retain(|h| h.instance.name != instance.name);
        state.hosted.push(Hosted {
            instance,
            entered_state_at: Instant::now(),
            deployments: Vec::new(),
        });
    }

    /// Snapshot of every hosted instance without counting a call.
    pub fn instances(&self) -> Vec<Instance> {
        self.lock()
            .hosted
            .iter()
            .map(|h| h.instance.clone())
            .collect()
    }

    pub fn instance(&self, name: &str) -> Option<Instance> {
        self.instances().into_iter().find(|i| i.name == name)
    }

    /// Deployments issued to an instance, oldest first.
    pub fn deployments(&self, name: &str) -> Vec<DeploymentSpec> {
        self.lock()
            .hosted
            .iter()
            .find(|h| h.instance.name == name)
            .map(|h| h.deployments.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> ProviderCalls {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        self.lock().calls = ProviderCalls::default();
    }
}

#[async_trait]
impl Provisioner for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn create_instance(&self, name: &str, tags: &[Tag]) -> Result<Instance> {
        let mut state = self.enter(ProviderOp::Create)?;
        if state.hosted.iter().any(|h| h.instance.name == name) {
            return Err(ProviderError::AlreadyExists(name.to_string()));
        }

        let instance = Instance {
            name: name.to_string(),
            state: InstanceState::Pending,
            url: None,
            tags: tags.to_vec(),
            created_at: Utc::now(),
            pull_principal: Some(format!("{}{}", self.settings.principal_prefix, name)),
        };
        debug!("Local provider created {}", name);

        state.hosted.push(Hosted {
            instance: instance.clone(),
            entered_state_at: Instant::now(),
            deployments: Vec::new(),
        });
        Ok(instance)
    }

    async fn get_instances(&self, name: Option<&str>) -> Result<Vec<Instance>> {
        let mut state = self.enter(ProviderOp::Get)?;
        self.advance(&mut state);

        Ok(state
            .hosted
            .iter()
            .filter(|h| name.map_or(true, |n| h.instance.name == n))
            .map(|h| h.instance.clone())
            .collect())
    }

    async fn delete_instance(&self, name: &str) -> Result<()> {
        let mut state = self.enter(ProviderOp::Delete)?;
        let before = state.hosted.len();
        state.hosted.retain(|h| h.instance.name != name);
        if state.hosted.len() == before {
            return Err(ProviderError::NotFound(name.to_string()));
        }
        debug!("Local provider deleted {}", name);
        Ok(())
    }

    async fn tag_instance(&self, name: &str, tags: &[Tag]) -> Result<()> {
        let mut state = self.enter(ProviderOp::Tag)?;
        let hosted = state.find_mut(name)?;
        for tag in tags {
            hosted.instance.tags.retain(|t| t.key != tag.key);
            hosted.instance.tags.push(tag.clone());
        }
        Ok(())
    }

    async fn untag_instance(&self, name: &str, keys: &[String]) -> Result<()> {
        let mut state = self.enter(ProviderOp::Untag)?;
        let hosted = state.find_mut(name)?;
        hosted.instance.tags.retain(|t| !keys.contains(&t.key));
        Ok(())
    }

    async fn deploy(&self, instance: &Instance, spec: &DeploymentSpec) -> Result<()> {
        let mut state = self.enter(ProviderOp::Deploy)?;
        let hosted = state.find_mut(&instance.name)?;

        match hosted.instance.state {
            InstanceState::Ready | InstanceState::Running => {}
            other => {
                return Err(ProviderError::InvalidState {
                    name: instance.name.clone(),
                    action: "deploy",
                    state: other.to_string(),
                })
            }
        }

        hosted.instance.state = InstanceState::Deploying;
        hosted.instance.url = None;
        hosted.entered_state_at = Instant::now();
        hosted.deployments.push(spec.clone());
        debug!("Local provider deploying {} to {}", spec.image, instance.name);
        Ok(())
    }
}

#[derive(Debug)]
struct PolicyState {
    record: PolicyRecord,
    gets: usize,
    sets: usize,
    failing: bool,
}

/// In-memory registry holding a single policy document.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    state: Arc<Mutex<PolicyState>>,
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::with_policy(r#"{"Version":"2012-10-17","Statement":[]}"#)
    }
}

impl LocalRegistry {
    pub fn with_policy(policy_text: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(PolicyState {
                record: PolicyRecord {
                    policy_text: policy_text.to_string(),
                    registry_id: "000000000000".to_string(),
                },
                gets: 0,
                sets: 0,
                failing: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PolicyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn policy_text(&self) -> String {
        self.lock().record.policy_text.clone()
    }

    /// `(get_policy calls, set_policy calls)`
    pub fn call_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.gets, state.sets)
    }

    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }
}

#[async_trait]
impl RegistryAccess for LocalRegistry {
    async fn get_policy(&self, _repository: &str) -> Result<PolicyRecord> {
        let mut state = self.lock();
        state.gets += 1;
        if state.failing {
            return Err(ProviderError::Unavailable("local registry refused get".into()));
        }
        Ok(state.record.clone())
    }

    async fn set_policy(
        &self,
        _repository: &str,
        registry_id: &str,
        policy_text: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.sets += 1;
        if state.failing {
            return Err(ProviderError::Unavailable("local registry refused set".into()));
        }
        state.record = PolicyRecord {
            policy_text: policy_text.to_string(),
            registry_id: registry_id.to_string(),
        };
        Ok(())
    }
}
