//! Self-starting, self-stopping polling engine shared by every watcher.
//!
//! A watcher is one tokio task that owns an ordered list of entries. The
//! [`WatcherHandle`] enqueues entries through a channel; the task admits them,
//! starts its ticker when the list stops being empty, and runs one sequential
//! pass over the list per tick. Entries that reach their target are removed at
//! the end of the pass and their completion events are emitted on the bus.
//! When a pass leaves the list empty the ticker is dropped, so an idle watcher
//! costs nothing until the next enrollment.

pub mod auto_destroyer;
pub mod deployment_running;
pub mod hot_instance_claimed;
pub mod service_ready;

pub use auto_destroyer::{inactive_minutes, ActivityEntry, AutoDestroyCheck};
pub use deployment_running::DeploymentRunningCheck;
pub use hot_instance_claimed::StandbyReplacementCheck;
pub use service_ready::ServiceReadyCheck;

use crate::error::{OrchestratorError, Result};
use crate::events::{EventBus, LifecycleEvent, SubscriptionId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of checking one entry during a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Target not reached; the entry stays enrolled.
    Waiting,
    /// Target reached; the entry is dropped and the event, if any, emitted.
    Complete(Option<LifecycleEvent>),
}

/// What a concrete watcher checks for.
#[async_trait]
pub trait WatchCheck: Send + Sync + 'static {
    type Entry: Send + Sync + 'static;

    /// Instance name used in log lines.
    fn entry_name<'a>(&self, entry: &'a Self::Entry) -> &'a str;

    /// Runs once when an entry is enrolled; `false` drops it.
    async fn admit(&self, _entry: &Self::Entry) -> bool {
        true
    }

    async fn check(&self, entry: &Self::Entry) -> Result<Progress>;
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub name: &'static str,
    pub interval: Duration,
    /// Fire the first tick right away instead of one interval after start.
    pub immediate: bool,
}

/// Shortest poll period a watcher runs with.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

impl WatcherSettings {
    /// A zero `interval` is raised to [`MIN_INTERVAL`].
    pub fn new(name: &'static str, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!("{} configured with a zero interval, using {:?}", name, MIN_INTERVAL);
            MIN_INTERVAL
        } else {
            interval
        };
        Self {
            name,
            interval,
            immediate: false,
        }
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// Counters published by a running watcher.
#[derive(Debug, Default)]
pub struct WatcherStats {
    timers_started: AtomicUsize,
    passes: AtomicUsize,
    checks: AtomicUsize,
    watching: AtomicUsize,
    ticking: AtomicBool,
}

impl WatcherStats {
    /// How many times the ticker went from stopped to running.
    pub fn timers_started(&self) -> usize {
        self.timers_started.load(Ordering::SeqCst)
    }

    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    /// Entry checks issued across all passes.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn watching(&self) -> usize {
        self.watching.load(Ordering::SeqCst)
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::SeqCst)
    }
}

enum Command<E> {
    Watch(E),
    Shutdown,
}

enum Wake<E> {
    Command(Option<Command<E>>),
    Tick,
}

/// Cheap, cloneable front of a watcher task.
pub struct WatcherHandle<E> {
    name: &'static str,
    commands: mpsc::UnboundedSender<Command<E>>,
    stats: Arc<WatcherStats>,
    /// Bus subscription that feeds this watcher, if any.
    enrollment: Option<SubscriptionId>,
}

impl<E> Clone for WatcherHandle<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            commands: self.commands.clone(),
            stats: Arc::clone(&self.stats),
            enrollment: self.enrollment,
        }
    }
}

impl<E> std::fmt::Debug for WatcherHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("name", &self.name)
            .field("watching", &self.stats.watching())
            .finish()
    }
}

impl<E: Send + 'static> WatcherHandle<E> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enroll an entry. Never blocks; the entry is applied by the watcher task
    /// after any pass that is currently running.
    pub fn watch(&self, entry: E) -> Result<()> {
        self.commands
            .send(Command::Watch(entry))
            .map_err(|_| OrchestratorError::WatcherStopped(self.name))
    }

    pub fn stats(&self) -> &WatcherStats {
        &self.stats
    }

    /// Stop the task. Entries still enrolled are dropped.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Record the bus subscription that enrolls entries into this watcher.
    pub fn enrolled_by(mut self, subscription: SubscriptionId) -> Self {
        self.enrollment = Some(subscription);
        self
    }

    pub fn enrollment(&self) -> Option<SubscriptionId> {
        self.enrollment
    }

    /// Unsubscribe the enrollment handler from `bus`, then stop the task.
    pub fn detach(&self, bus: &EventBus) {
        if let Some(subscription) = self.enrollment {
            bus.unsubscribe(subscription);
        }
        self.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Spawn a watcher task on the current runtime.
pub fn spawn<C: WatchCheck>(
    check: C,
    settings: WatcherSettings,
    bus: EventBus,
) -> WatcherHandle<C::Entry> {
    let (commands, inbox) = mpsc::unbounded_channel();
    let stats = Arc::new(WatcherStats::default());
    let handle = WatcherHandle {
        name: settings.name,
        commands,
        stats: Arc::clone(&stats),
        enrollment: None,
    };

    let watcher = Watcher {
        check,
        settings,
        bus,
        inbox,
        entries: Vec::new(),
        ticker: None,
        stats,
    };
    tokio::spawn(watcher.run());

    handle
}

struct Watcher<C: WatchCheck> {
    check: C,
    settings: WatcherSettings,
    bus: EventBus,
    inbox: mpsc::UnboundedReceiver<Command<C::Entry>>,
    entries: Vec<C::Entry>,
    ticker: Option<Interval>,
    stats: Arc<WatcherStats>,
}

impl<C: WatchCheck> Watcher<C> {
    async fn run(mut self) {
        debug!("{} started", self.settings.name);

        loop {
            let wake = match self.ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    command = self.inbox.recv() => Wake::Command(command),
                    _ = ticker.tick() => Wake::Tick,
                },
                None => Wake::Command(self.inbox.recv().await),
            };

            match wake {
                Wake::Command(Some(Command::Watch(entry))) => self.enroll(entry).await,
                Wake::Command(Some(Command::Shutdown)) | Wake::Command(None) => break,
                Wake::Tick => self.pass().await,
            }
        }

        self.stop_ticker();
        debug!(
            "{} stopped with {} entr(ies) enrolled",
            self.settings.name,
            self.entries.len()
        );
    }

    async fn enroll(&mut self, entry: C::Entry) {
        let name = self.check.entry_name(&entry).to_string();
        if !self.check.admit(&entry).await {
            debug!("{} skipped {}", self.settings.name, name);
            return;
        }

        self.entries.push(entry);
        self.stats.watching.store(self.entries.len(), Ordering::SeqCst);
        info!("{} watching {}", self.settings.name, name);

        if self.ticker.is_none() {
            self.start_ticker();
        }
    }

    fn start_ticker(&mut self) {
        let period = self.settings.interval;
        let start = if self.settings.immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.ticker = Some(ticker);
        self.stats.timers_started.fetch_add(1, Ordering::SeqCst);
        self.stats.ticking.store(true, Ordering::SeqCst);
        debug!("{} timer started ({:?})", self.settings.name, period);
    }

    fn stop_ticker(&mut self) {
        if self.ticker.take().is_some() {
            self.stats.ticking.store(false, Ordering::SeqCst);
            debug!("{} timer stopped", self.settings.name);
        }
    }

    async fn pass(&mut self) {
        self.stats.passes.fetch_add(1, Ordering::SeqCst);

        let mut done = Vec::new();
        let mut events = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            self.stats.checks.fetch_add(1, Ordering::SeqCst);
            match self.check.check(entry).await {
                Ok(Progress::Waiting) => {}
                Ok(Progress::Complete(event)) => {
                    done.push(index);
                    events.extend(event);
                }
                Err(e) => warn!(
                    "{} check of {} failed: {}",
                    self.settings.name,
                    self.check.entry_name(entry),
                    e
                ),
            }
        }

        for index in done.into_iter().rev() {
            self.entries.remove(index);
        }
        self.stats.watching.store(self.entries.len(), Ordering::SeqCst);

        for event in events {
            self.bus.emit(event);
        }

        if self.entries.is_empty() {
            self.stop_ticker();
        }
    }
}
