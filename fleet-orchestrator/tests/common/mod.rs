//! Shared harness for the orchestrator integration tests
//!
//! Builds a coordinator over the in-process provider and registry with a
//! scripted activity probe, and records every event emitted on the bus.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_orchestrator::{
    Dependencies, EventBus, LifecycleCoordinator, LifecycleEvent, OrchestratorConfig,
    RuntimeClock,
};
use fleet_provider::{
    ActivityProbe, Instance, InstanceState, LocalProvider, LocalRegistry, LocalSettings,
    ProviderError, Tag,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const OWNER: &str = "u1@example.com";

/// Activity probe answering from a table; unknown urls report no activity.
#[derive(Default)]
pub struct ScriptedProbe {
    activity: Mutex<HashMap<String, DateTime<Utc>>>,
    failing: Mutex<bool>,
    calls: Mutex<usize>,
}

impl ScriptedProbe {
    pub fn set_activity(&self, url: &str, at: DateTime<Utc>) {
        self.activity.lock().unwrap().insert(url.to_string(), at);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ActivityProbe for ScriptedProbe {
    async fn last_user_activity(
        &self,
        base_url: &str,
    ) -> fleet_provider::Result<Option<DateTime<Utc>>> {
        *self.calls.lock().unwrap() += 1;
        if *self.failing.lock().unwrap() {
            return Err(ProviderError::Unavailable("probe unreachable".to_string()));
        }
        Ok(self.activity.lock().unwrap().get(base_url).copied())
    }
}

/// Every event seen on the bus, in emission order.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();
        let events = Arc::clone(&recorder.events);
        bus.subscribe_all(move |event| {
            events.lock().unwrap().push(event.clone());
            Ok(())
        });
        recorder
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&LifecycleEvent) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

pub struct Harness {
    pub provider: LocalProvider,
    pub registry: LocalRegistry,
    pub probe: Arc<ScriptedProbe>,
    pub clock: RuntimeClock,
    pub bus: EventBus,
    pub recorder: Recorder,
    pub coordinator: LifecycleCoordinator,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with(OrchestratorConfig::default(), LocalProvider::new(LocalSettings::manual()))
    }

    pub fn start_with(config: OrchestratorConfig, provider: LocalProvider) -> Self {
        let registry = LocalRegistry::default();
        let probe = Arc::new(ScriptedProbe::default());
        let clock = RuntimeClock::starting_at(
            DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let bus = EventBus::new();
        let recorder = Recorder::attach(&bus);

        let deps = Dependencies {
            provisioner: Arc::new(provider.clone()),
            registry: Arc::new(registry.clone()),
            probe: probe.clone(),
            clock: Arc::new(clock.clone()),
        };
        let coordinator = LifecycleCoordinator::start(config, deps, bus.clone());

        Self {
            provider,
            registry,
            probe,
            clock,
            bus,
            recorder,
            coordinator,
        }
    }

    /// Let spawned tasks run without moving the clock.
    pub async fn settle(&self) {
        settle().await;
    }

    /// Instances carrying the hot tag.
    pub fn standbys(&self) -> Vec<Instance> {
        let hot = &self.coordinator.config().tags.hot;
        self.provider
            .instances()
            .into_iter()
            .filter(|i| i.has_tag(hot))
            .collect()
    }
}

pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(by: Duration) {
    tokio::time::sleep(by).await;
    settle().await;
}

pub fn instance(name: &str, state: InstanceState, tags: Vec<Tag>) -> Instance {
    Instance {
        name: name.to_string(),
        state,
        url: None,
        tags,
        created_at: Utc::now(),
        pull_principal: Some(format!("arn:aws:iam::000000000000:role/fleet-puller-{name}")),
    }
}

pub fn managed() -> Tag {
    Tag::marker("orchestrator")
}

pub fn hot() -> Tag {
    Tag::marker("hot-instance")
}

pub fn owner(email: &str) -> Tag {
    Tag::new("email", email)
}
