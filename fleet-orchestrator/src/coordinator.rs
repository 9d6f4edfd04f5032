//! Composition root: builds the services, starts the watchers and connects
//! them through the bus.

use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::events::{EventBus, EventKind, LifecycleEvent, SubscriptionId};
use crate::instances::InstanceService;
use crate::pool::HotPool;
use crate::registry::RegistryAccessManager;
use crate::sweep::StandbySweep;
use crate::watcher::{
    ActivityEntry, AutoDestroyCheck, DeploymentRunningCheck, ServiceReadyCheck,
    StandbyReplacementCheck, WatcherHandle,
};
use fleet_provider::{ActivityProbe, InstanceState, Provisioner, RegistryAccess};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Dependencies {
    pub provisioner: Arc<dyn Provisioner>,
    pub registry: Arc<dyn RegistryAccess>,
    pub probe: Arc<dyn ActivityProbe>,
    pub clock: Arc<dyn Clock>,
}

pub struct LifecycleCoordinator {
    bus: EventBus,
    instances: Arc<InstanceService>,
    pool: Arc<HotPool>,
    clock: Arc<dyn Clock>,
    service_ready: WatcherHandle<String>,
    deployment_running: WatcherHandle<String>,
    auto_destroyer: WatcherHandle<ActivityEntry>,
    standby_replacement: WatcherHandle<String>,
    on_ready: SubscriptionId,
}

impl LifecycleCoordinator {
    /// Wire everything onto `bus`. Must be called from inside a tokio runtime;
    /// the watcher tasks are spawned on it.
    pub fn start(config: OrchestratorConfig, deps: Dependencies, bus: EventBus) -> Self {
        let intervals = config.intervals.clone();
        let registry = Arc::new(RegistryAccessManager::new(
            deps.registry,
            config.repository.clone(),
            config.principal_prefix.clone(),
        ));
        let instances = Arc::new(InstanceService::new(
            Arc::clone(&deps.provisioner),
            registry,
            bus.clone(),
            config,
        ));
        let pool = Arc::new(HotPool::new(Arc::clone(&instances), bus.clone()));

        // Ready instances get their deployment. The bus is synchronous, so the
        // provider work runs as its own task.
        let runtime = Handle::current();
        let deployer = Arc::clone(&instances);
        let on_ready = bus.subscribe(EventKind::ServiceIsReady, move |event| {
            if let LifecycleEvent::ServiceIsReady { instance } = event {
                let instances = Arc::clone(&deployer);
                let instance = instance.clone();
                runtime.spawn(async move {
                    instances.deploy(&instance).await;
                });
            }
            Ok(())
        });

        let service_ready = ServiceReadyCheck::new(Arc::clone(&deps.provisioner))
            .spawn(intervals.service_ready, &bus);
        let deployment_running = DeploymentRunningCheck::new(Arc::clone(&deps.provisioner))
            .spawn(intervals.deployment_running, &bus);
        let auto_destroyer = AutoDestroyCheck::new(
            Arc::clone(&deps.provisioner),
            deps.probe,
            Arc::clone(&instances),
            Arc::clone(&deps.clock),
        )
        .spawn(intervals.auto_destroy, &bus);
        let standby_replacement = StandbyReplacementCheck::new(Arc::clone(&pool))
            .spawn(intervals.standby_replacement, &bus);

        info!("Lifecycle coordinator started");

        Self {
            bus,
            instances,
            pool,
            clock: deps.clock,
            service_ready,
            deployment_running,
            auto_destroyer,
            standby_replacement,
            on_ready,
        }
    }

    /// Resume tracking of instances left by an earlier run, then make sure a
    /// standby exists.
    pub async fn reconcile(&self) {
        self.adopt_managed().await;
        if let Some(standby) = self.pool.reconcile().await {
            info!("Provisioned initial standby {}", standby.name);
        }
    }

    /// Re-enroll managed instances according to where they are in their
    /// lifecycle. Returns how many were enrolled.
    pub async fn adopt_managed(&self) -> usize {
        let managed = match self.instances.find_managed().await {
            Ok(managed) => managed,
            Err(e) => {
                warn!("Could not list managed instances: {}", e);
                return 0;
            }
        };
        info!("Instances found: {}", managed.len());

        let mut adopted = 0;
        for instance in managed {
            let event = match (instance.state, instance.url.clone()) {
                (InstanceState::Pending | InstanceState::Ready, _) => {
                    LifecycleEvent::ServiceCreated {
                        name: instance.name,
                    }
                }
                (InstanceState::Deploying, _) => LifecycleEvent::DeploymentStarted { instance },
                (InstanceState::Running, Some(url)) => LifecycleEvent::DeploymentRunning {
                    name: instance.name,
                    url,
                },
                (InstanceState::Running, None) => {
                    warn!("{} is running without a url, not adopting it", instance.name);
                    continue;
                }
            };
            info!("Adopting {} via {}", event.instance_name(), event.kind());
            self.bus.emit(event);
            adopted += 1;
        }
        adopted
    }

    /// The standby refresh job, on the configured schedule.
    pub fn sweep(&self) -> StandbySweep {
        StandbySweep::new(Arc::clone(&self.instances), Arc::clone(&self.clock))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn instances(&self) -> &Arc<InstanceService> {
        &self.instances
    }

    pub fn pool(&self) -> &Arc<HotPool> {
        &self.pool
    }

    pub fn config(&self) -> &OrchestratorConfig {
        self.instances.config()
    }

    pub fn service_ready(&self) -> &WatcherHandle<String> {
        &self.service_ready
    }

    pub fn deployment_running(&self) -> &WatcherHandle<String> {
        &self.deployment_running
    }

    pub fn auto_destroyer(&self) -> &WatcherHandle<ActivityEntry> {
        &self.auto_destroyer
    }

    pub fn standby_replacement(&self) -> &WatcherHandle<String> {
        &self.standby_replacement
    }

    /// Stop every watcher and detach all of its bus subscriptions.
    pub fn shutdown(&self) {
        self.bus.unsubscribe(self.on_ready);
        self.service_ready.detach(&self.bus);
        self.deployment_running.detach(&self.bus);
        self.auto_destroyer.detach(&self.bus);
        self.standby_replacement.detach(&self.bus);
        info!("Lifecycle coordinator stopped");
    }
}
