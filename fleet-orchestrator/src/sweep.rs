//! Calendar-triggered refresh of standby instances.
//!
//! On every scheduled fire the sweep re-deploys each managed standby so the
//! pre-warmed instance picks up the latest image.

use crate::clock::Clock;
use crate::error::{OrchestratorError, Result};
use crate::instances::InstanceService;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Time of day (UTC) plus the weekdays it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSchedule {
    pub at: NaiveTime,
    pub days: Vec<Weekday>,
}

impl Default for SweepSchedule {
    /// Midnight, Monday to Friday.
    fn default() -> Self {
        Self {
            at: NaiveTime::MIN,
            days: WEEK[..5].to_vec(),
        }
    }
}

impl SweepSchedule {
    /// `at` is `HH:MM`; `days` is a comma list of days or day ranges such as
    /// `mon-fri` or `mon,wed,sat-sun`.
    pub fn parse(at: &str, days: &str) -> Result<Self> {
        let at = NaiveTime::parse_from_str(at.trim(), "%H:%M")
            .map_err(|e| OrchestratorError::InvalidInput(format!("sweep time {at:?}: {e}")))?;
        let days = parse_days(days)?;
        Ok(Self { at, days })
    }

    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (0..=7)
            .map(|offset| now.date_naive() + ChronoDuration::days(offset))
            .filter(|date| self.days.contains(&date.weekday()))
            .map(|date| date.and_time(self.at).and_utc())
            .find(|candidate| *candidate > now)
    }
}

fn parse_day(raw: &str) -> Result<Weekday> {
    Weekday::from_str(raw.trim())
        .map_err(|_| OrchestratorError::InvalidInput(format!("unknown weekday {raw:?}")))
}

fn parse_days(raw: &str) -> Result<Vec<Weekday>> {
    let mut days = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let range = match part.split_once('-') {
            Some((from, to)) => (parse_day(from)?, parse_day(to)?),
            None => {
                let day = parse_day(part)?;
                (day, day)
            }
        };

        let mut day = range.0;
        loop {
            if !days.contains(&day) {
                days.push(day);
            }
            if day == range.1 {
                break;
            }
            day = day.succ();
        }
    }

    if days.is_empty() {
        return Err(OrchestratorError::InvalidInput(
            "sweep needs at least one weekday".to_string(),
        ));
    }
    days.sort_by_key(|d| d.num_days_from_monday());
    Ok(days)
}

pub struct StandbySweep {
    instances: Arc<InstanceService>,
    schedule: SweepSchedule,
    clock: Arc<dyn Clock>,
}

impl StandbySweep {
    pub fn new(instances: Arc<InstanceService>, clock: Arc<dyn Clock>) -> Self {
        let schedule = instances.config().sweep.clone();
        Self {
            instances,
            schedule,
            clock,
        }
    }

    /// Re-deploy every managed standby. Returns how many deploys were issued.
    pub async fn run(&self) -> usize {
        info!("Standby sweep running");
        let hot = &self.instances.config().tags.hot;

        let standbys = match self.instances.find_managed().await {
            Ok(managed) => managed
                .into_iter()
                .filter(|instance| instance.has_tag(hot))
                .collect::<Vec<_>>(),
            Err(e) => {
                error!("Standby sweep failed to list instances: {}", e);
                return 0;
            }
        };

        let mut deployed = 0;
        for standby in &standbys {
            if self.instances.deploy(standby).await {
                deployed += 1;
            }
        }
        info!("Standby sweep redeployed {}/{}", deployed, standbys.len());
        deployed
    }

    /// Run forever on the schedule.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let now = self.clock.now();
                let Some(next) = self.schedule.next_after(now) else {
                    warn!("Standby sweep has no next fire time, stopping");
                    return;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                info!("Next standby sweep at {}", next);

                tokio::time::sleep(wait).await;
                self.run().await;
            }
        })
    }
}
