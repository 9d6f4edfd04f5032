use super::{Progress, WatchCheck, WatcherHandle, WatcherSettings};
use crate::error::Result;
use crate::events::{EventBus, EventKind, LifecycleEvent};
use async_trait::async_trait;
use fleet_provider::Provisioner;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const NAME: &str = "DeploymentRunningWatcher";

/// Waits for a deployment to come up with a public url. A deployment that
/// never gets there stays enrolled.
pub struct DeploymentRunningCheck {
    provisioner: Arc<dyn Provisioner>,
}

impl DeploymentRunningCheck {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }

    pub fn spawn(self, interval: Duration, bus: &EventBus) -> WatcherHandle<String> {
        let handle = super::spawn(self, WatcherSettings::new(NAME, interval), bus.clone());
        let enroll = handle.clone();
        let enrollment = bus.subscribe(EventKind::DeploymentStarted, move |event| {
            enroll.watch(event.instance_name().to_string())?;
            Ok(())
        });
        handle.enrolled_by(enrollment)
    }
}

#[async_trait]
impl WatchCheck for DeploymentRunningCheck {
    type Entry = String;

    fn entry_name<'a>(&self, entry: &'a String) -> &'a str {
        entry
    }

    async fn check(&self, name: &String) -> Result<Progress> {
        let Some(instance) = self.provisioner.get_instance(name).await? else {
            return Ok(Progress::Waiting);
        };

        match (instance.is_running(), instance.url) {
            (true, Some(url)) => Ok(Progress::Complete(Some(
                LifecycleEvent::DeploymentRunning {
                    name: instance.name,
                    url,
                },
            ))),
            (true, None) => {
                debug!("{} is running without a url yet", name);
                Ok(Progress::Waiting)
            }
            _ => Ok(Progress::Waiting),
        }
    }
}
