//! In-process lifecycle event bus.
//!
//! Delivery is synchronous: [`EventBus::emit`] calls every subscriber of the
//! event's kind, in registration order, before returning. A subscriber that
//! returns an error or panics is logged and skipped; the remaining subscribers
//! still see the event. Handlers must not block; anything that needs the
//! provider is spawned onto the runtime.
//!
//! One bus is built at start-up and cloned into every component that needs it.

use fleet_provider::Instance;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, warn};

/// Event names, the bus routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServiceCreated,
    ServiceIsReady,
    DeploymentStarted,
    DeploymentRunning,
    ServiceDeleted,
    HotInstanceClaimed,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ServiceCreated,
        EventKind::ServiceIsReady,
        EventKind::DeploymentStarted,
        EventKind::DeploymentRunning,
        EventKind::ServiceDeleted,
        EventKind::HotInstanceClaimed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceCreated => "ServiceCreated",
            Self::ServiceIsReady => "ServiceIsReady",
            Self::DeploymentStarted => "DeploymentStarted",
            Self::DeploymentRunning => "DeploymentRunning",
            Self::ServiceDeleted => "ServiceDeleted",
            Self::HotInstanceClaimed => "HotInstanceClaimed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    ServiceCreated { name: String },
    ServiceIsReady { instance: Instance },
    DeploymentStarted { instance: Instance },
    DeploymentRunning { name: String, url: String },
    ServiceDeleted { name: String },
    HotInstanceClaimed { name: String, url: String },
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ServiceCreated { .. } => EventKind::ServiceCreated,
            Self::ServiceIsReady { .. } => EventKind::ServiceIsReady,
            Self::DeploymentStarted { .. } => EventKind::DeploymentStarted,
            Self::DeploymentRunning { .. } => EventKind::DeploymentRunning,
            Self::ServiceDeleted { .. } => EventKind::ServiceDeleted,
            Self::HotInstanceClaimed { .. } => EventKind::HotInstanceClaimed,
        }
    }

    /// Name of the instance the event is about.
    pub fn instance_name(&self) -> &str {
        match self {
            Self::ServiceIsReady { instance } | Self::DeploymentStarted { instance } => {
                &instance.name
            }
            Self::ServiceCreated { name }
            | Self::DeploymentRunning { name, .. }
            | Self::ServiceDeleted { name }
            | Self::HotInstanceClaimed { name, .. } => name,
        }
    }
}

type Handler = Arc<dyn Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync>;

/// Returned by `subscribe*`; pass to [`EventBus::unsubscribe`] to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    by_kind: HashMap<EventKind, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<RwLock<Subscribers>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers: usize = self.read().by_kind.values().map(Vec::len).sum();
        f.debug_struct("EventBus")
            .field("subscribers", &subscribers)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Subscribers> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Subscribers> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `handler` for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(&[kind], Arc::new(handler))
    }

    /// Register `handler` for every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(&EventKind::ALL, Arc::new(handler))
    }

    fn register(&self, kinds: &[EventKind], handler: Handler) -> SubscriptionId {
        let mut subscribers = self.write();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        for kind in kinds {
            subscribers
                .by_kind
                .entry(*kind)
                .or_default()
                .push((id, Arc::clone(&handler)));
        }
        id
    }

    /// Detach a subscription from every kind it was registered for.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for handlers in self.write().by_kind.values_mut() {
            let before = handlers.len();
            handlers.retain(|(sid, _)| *sid != id);
            removed |= handlers.len() != before;
        }
        removed
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.read().by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every subscriber of its kind. Returns how many
    /// handlers completed without error.
    pub fn emit(&self, event: LifecycleEvent) -> usize {
        let kind = event.kind();
        // Snapshot so handlers can emit or subscribe without deadlocking.
        let handlers: Vec<Handler> = self
            .read()
            .by_kind
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        debug!(
            "Emitting {} for {} to {} subscriber(s)",
            kind,
            event.instance_name(),
            handlers.len()
        );

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("{} subscriber failed: {:#}", kind, e),
                Err(_) => error!("{} subscriber panicked", kind),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn created(name: &str) -> LifecycleEvent {
        LifecycleEvent::ServiceCreated {
            name: name.to_string(),
        }
    }

    #[test]
    fn test_delivery_follows_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::ServiceCreated, move |_| {
                seen.lock().unwrap().push(label);
                Ok(())
            });
        }

        assert_eq!(bus.emit(created("app-u1")), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(0));

        bus.subscribe(EventKind::ServiceDeleted, |_| anyhow::bail!("boom"));
        bus.subscribe(EventKind::ServiceDeleted, |_| panic!("handler bug"));
        {
            let reached = Arc::clone(&reached);
            bus.subscribe(EventKind::ServiceDeleted, move |_| {
                *reached.lock().unwrap() += 1;
                Ok(())
            });
        }

        let delivered = bus.emit(LifecycleEvent::ServiceDeleted {
            name: "app-u1".to_string(),
        });

        assert_eq!(delivered, 1);
        assert_eq!(*reached.lock().unwrap(), 1);
    }

    #[test]
    fn test_routing_by_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        {
            let hits = Arc::clone(&hits);
            bus.subscribe(EventKind::DeploymentRunning, move |event| {
                hits.lock().unwrap().push(event.instance_name().to_string());
                Ok(())
            });
        }

        assert_eq!(bus.emit(created("app-u1")), 0);
        bus.emit(LifecycleEvent::DeploymentRunning {
            name: "app-u2".to_string(),
            url: "https://u2.example/".to_string(),
        });

        assert_eq!(*hits.lock().unwrap(), vec!["app-u2".to_string()]);
    }

    #[test]
    fn test_subscribe_all_and_unsubscribe() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let id = {
            let count = Arc::clone(&count);
            bus.subscribe_all(move |_| {
                *count.lock().unwrap() += 1;
                Ok(())
            })
        };

        bus.emit(created("app-u1"));
        bus.emit(LifecycleEvent::ServiceDeleted {
            name: "app-u1".to_string(),
        });
        assert_eq!(*count.lock().unwrap(), 2);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(created("app-u1"));
        assert_eq!(*count.lock().unwrap(), 2);
        assert_eq!(bus.subscriber_count(EventKind::ServiceCreated), 0);
    }

    #[test]
    fn test_handler_may_emit_reentrantly() {
        let bus = EventBus::new();
        let deleted = Arc::new(Mutex::new(0));
        {
            let inner = bus.clone();
            bus.subscribe(EventKind::ServiceCreated, move |event| {
                inner.emit(LifecycleEvent::ServiceDeleted {
                    name: event.instance_name().to_string(),
                });
                Ok(())
            });
        }
        {
            let deleted = Arc::clone(&deleted);
            bus.subscribe(EventKind::ServiceDeleted, move |_| {
                *deleted.lock().unwrap() += 1;
                Ok(())
            });
        }

        bus.emit(created("app-u1"));
        assert_eq!(*deleted.lock().unwrap(), 1);
    }
}
