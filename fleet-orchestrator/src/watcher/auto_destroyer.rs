use super::{Progress, WatchCheck, WatcherHandle, WatcherSettings};
use crate::clock::Clock;
use crate::error::Result;
use crate::events::{EventBus, EventKind, LifecycleEvent};
use crate::instances::InstanceService;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_provider::{ActivityProbe, Provisioner};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const NAME: &str = "AutoDestroyerWatcher";

/// A running instance under inactivity tracking.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub name: String,
    pub url: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Whole minutes since the later of the last reported activity and enrollment.
pub fn inactive_minutes(
    now: DateTime<Utc>,
    last_activity: Option<DateTime<Utc>>,
    enrolled_at: DateTime<Utc>,
) -> i64 {
    let since = last_activity.map_or(enrolled_at, |seen| seen.max(enrolled_at));
    (now - since).num_minutes()
}

/// Deletes instances nobody has used for `threshold_minutes`.
pub struct AutoDestroyCheck {
    provisioner: Arc<dyn Provisioner>,
    probe: Arc<dyn ActivityProbe>,
    instances: Arc<InstanceService>,
    clock: Arc<dyn Clock>,
    threshold_minutes: i64,
    standby_prefix: String,
    hot_tag: String,
}

impl AutoDestroyCheck {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        probe: Arc<dyn ActivityProbe>,
        instances: Arc<InstanceService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = instances.config();
        Self {
            threshold_minutes: config.inactivity_threshold_minutes,
            standby_prefix: config.standby_prefix(),
            hot_tag: config.tags.hot.clone(),
            provisioner,
            probe,
            instances,
            clock,
        }
    }

    /// Start the watcher and enroll every instance that reaches `DeploymentRunning`.
    pub fn spawn(self, interval: Duration, bus: &EventBus) -> WatcherHandle<ActivityEntry> {
        let clock = Arc::clone(&self.clock);
        let handle = super::spawn(self, WatcherSettings::new(NAME, interval), bus.clone());
        let enroll = handle.clone();
        let enrollment = bus.subscribe(EventKind::DeploymentRunning, move |event| {
            if let LifecycleEvent::DeploymentRunning { name, url } = event {
                enroll.watch(ActivityEntry {
                    name: name.clone(),
                    url: url.clone(),
                    enrolled_at: clock.now(),
                })?;
            }
            Ok(())
        });
        handle.enrolled_by(enrollment)
    }
}

#[async_trait]
impl WatchCheck for AutoDestroyCheck {
    type Entry = ActivityEntry;

    fn entry_name<'a>(&self, entry: &'a ActivityEntry) -> &'a str {
        &entry.name
    }

    /// Unclaimed standbys are never reclaimed for inactivity.
    async fn admit(&self, entry: &ActivityEntry) -> bool {
        if !entry.name.starts_with(&self.standby_prefix) {
            return true;
        }

        match self.provisioner.get_instance(&entry.name).await {
            Ok(Some(instance)) if instance.has_tag(&self.hot_tag) => false,
            Ok(_) => true,
            Err(e) => {
                warn!("Could not read tags of {}, tracking it anyway: {}", entry.name, e);
                true
            }
        }
    }

    async fn check(&self, entry: &ActivityEntry) -> Result<Progress> {
        let last_activity = match self.probe.last_user_activity(&entry.url).await {
            Ok(seen) => seen,
            Err(e) => {
                // Deleted elsewhere: nothing left to reclaim.
                if self.provisioner.get_instance(&entry.name).await?.is_none() {
                    info!("{} no longer exists, dropping it", entry.name);
                    return Ok(Progress::Complete(None));
                }
                return Err(e.into());
            }
        };
        let idle = inactive_minutes(self.clock.now(), last_activity, entry.enrolled_at);

        if idle < self.threshold_minutes {
            debug!("{} idle for {} min", entry.name, idle);
            return Ok(Progress::Waiting);
        }

        info!(
            "{} inactive for {} min (threshold {}), destroying",
            entry.name, idle, self.threshold_minutes
        );
        self.instances.destroy(&entry.name).await;

        Ok(Progress::Complete(Some(LifecycleEvent::ServiceDeleted {
            name: entry.name.clone(),
        })))
    }
}
