use super::{Progress, WatchCheck, WatcherHandle, WatcherSettings};
use crate::error::Result;
use crate::events::{EventBus, EventKind};
use crate::pool::HotPool;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "HotInstanceClaimedWatcher";

/// Replaces the standby after a claim. The first attempt runs as soon as the
/// claim is seen; a failed attempt is retried every `interval`.
pub struct StandbyReplacementCheck {
    pool: Arc<HotPool>,
}

impl StandbyReplacementCheck {
    pub fn new(pool: Arc<HotPool>) -> Self {
        Self { pool }
    }

    pub fn spawn(self, interval: Duration, bus: &EventBus) -> WatcherHandle<String> {
        let settings = WatcherSettings::new(NAME, interval).immediate();
        let handle = super::spawn(self, settings, bus.clone());
        let enroll = handle.clone();
        let enrollment = bus.subscribe(EventKind::HotInstanceClaimed, move |event| {
            enroll.watch(event.instance_name().to_string())?;
            Ok(())
        });
        handle.enrolled_by(enrollment)
    }
}

#[async_trait]
impl WatchCheck for StandbyReplacementCheck {
    type Entry = String;

    fn entry_name<'a>(&self, entry: &'a String) -> &'a str {
        entry
    }

    async fn check(&self, claimed: &String) -> Result<Progress> {
        if let Some(standby) = self.pool.ensure_standby().await? {
            info!("Provisioned standby {} to replace {}", standby.name, claimed);
        }
        Ok(Progress::Complete(None))
    }
}
