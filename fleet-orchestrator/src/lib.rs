//! Lifecycle orchestration for per-user instances
//!
//! This crate drives instances hosted by a `fleet-provider` backend from
//! creation to deletion: an in-process event bus, a polling watcher engine
//! with one watcher per lifecycle segment, the hot standby pool, registry
//! pull permissions and the scheduled standby sweep. It is consumed by the
//! fleet-api daemon but has no HTTP knowledge of its own.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod instances;
pub mod pool;
pub mod registry;
pub mod sweep;
pub mod watcher;

pub use clock::{Clock, RuntimeClock, SystemClock};
pub use config::{OrchestratorConfig, TagKeys, WatchIntervals};
pub use coordinator::{Dependencies, LifecycleCoordinator};
pub use error::{OrchestratorError, Result};
pub use events::{EventBus, EventKind, LifecycleEvent, SubscriptionId};
pub use instances::InstanceService;
pub use pool::HotPool;
pub use registry::{PolicyDocument, PolicyStatement, RegistryAccessManager};
pub use sweep::{StandbySweep, SweepSchedule};
pub use watcher::{
    ActivityEntry, Progress, WatchCheck, WatcherHandle, WatcherSettings, WatcherStats,
};
