use super::{Progress, WatchCheck, WatcherHandle, WatcherSettings};
use crate::error::Result;
use crate::events::{EventBus, EventKind, LifecycleEvent};
use async_trait::async_trait;
use fleet_provider::{InstanceState, Provisioner};
use std::sync::Arc;
use std::time::Duration;

pub const NAME: &str = "ServiceReadyWatcher";

/// Waits for a freshly created instance to report `Ready`.
pub struct ServiceReadyCheck {
    provisioner: Arc<dyn Provisioner>,
}

impl ServiceReadyCheck {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }

    /// Start the watcher and enroll every `ServiceCreated` instance.
    pub fn spawn(self, interval: Duration, bus: &EventBus) -> WatcherHandle<String> {
        let handle = super::spawn(self, WatcherSettings::new(NAME, interval), bus.clone());
        let enroll = handle.clone();
        let enrollment = bus.subscribe(EventKind::ServiceCreated, move |event| {
            enroll.watch(event.instance_name().to_string())?;
            Ok(())
        });
        handle.enrolled_by(enrollment)
    }
}

#[async_trait]
impl WatchCheck for ServiceReadyCheck {
    type Entry = String;

    fn entry_name<'a>(&self, entry: &'a String) -> &'a str {
        entry
    }

    async fn check(&self, name: &String) -> Result<Progress> {
        // Not listed yet means not ready yet.
        let progress = match self.provisioner.get_instance(name).await? {
            Some(instance) if instance.state == InstanceState::Ready => {
                Progress::Complete(Some(LifecycleEvent::ServiceIsReady { instance }))
            }
            _ => Progress::Waiting,
        };
        Ok(progress)
    }
}
