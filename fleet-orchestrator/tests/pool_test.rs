//! Hot pool: lookup preference, claim protocol and standby replacement.

mod common;

use common::{hot, instance, managed, owner, Harness, OWNER};
use fleet_orchestrator::{EventKind, LifecycleEvent, OrchestratorError};
use fleet_provider::{Instance, InstanceState, ProviderOp};

fn running_standby(h: &Harness, name: &str) -> Instance {
    let mut standby = instance(name, InstanceState::Running, vec![managed(), hot()]);
    standby.url = Some(format!("https://{name}.example/"));
    h.provider.insert(standby.clone());
    standby
}

#[tokio::test(start_paused = true)]
async fn test_claim_and_replace_leaves_one_standby() {
    let h = Harness::start();
    h.coordinator.reconcile().await;
    let first = h.standbys().pop().expect("initial standby");
    h.provider.set_state(&first.name, InstanceState::Running).unwrap();

    let claimed = h
        .coordinator
        .pool()
        .acquire(OWNER)
        .await
        .expect("standby handed out");
    h.settle().await;

    assert_eq!(claimed.name, first.name);
    assert_eq!(claimed.tag_value("email"), Some(OWNER));
    assert!(!claimed.has_tag("hot-instance"));

    let stored = h.provider.instance(&first.name).unwrap();
    assert_eq!(stored.tag_value("email"), Some(OWNER));
    assert!(!stored.has_tag("hot-instance"));

    let standbys = h.standbys();
    assert_eq!(standbys.len(), 1);
    assert_ne!(standbys[0].name, first.name);

    let url = format!("https://{}.fleet.local/", first.name);
    let claim_events: Vec<LifecycleEvent> = h
        .recorder
        .events()
        .into_iter()
        .filter(|e| {
            matches!(
                e.kind(),
                EventKind::HotInstanceClaimed | EventKind::DeploymentRunning
            )
        })
        .collect();
    assert_eq!(
        claim_events,
        vec![
            LifecycleEvent::HotInstanceClaimed {
                name: first.name.clone(),
                url: url.clone(),
            },
            LifecycleEvent::DeploymentRunning {
                name: first.name.clone(),
                url,
            },
        ]
    );

    // The claimed instance is now under inactivity tracking.
    assert_eq!(h.coordinator.auto_destroyer().stats().watching(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_owned_instance_wins_over_standby() {
    let h = Harness::start();
    running_standby(&h, "app-hot500");
    h.provider.insert(instance(
        "app-u1",
        InstanceState::Deploying,
        vec![managed(), owner(OWNER)],
    ));

    let found = h.coordinator.pool().acquire(OWNER).await.expect("found");

    assert_eq!(found.name, "app-u1");
    assert!(h.provider.instance("app-hot500").unwrap().has_tag("hot-instance"));
    assert_eq!(h.provider.calls().untag, 0);
}

#[tokio::test(start_paused = true)]
async fn test_lookup_ignores_other_owners() {
    let h = Harness::start();
    h.provider.insert(instance(
        "app-u2",
        InstanceState::Running,
        vec![managed(), owner("u2@example.com")],
    ));

    assert!(h.coordinator.pool().lookup(OWNER).await.unwrap().is_none());
    assert!(h.coordinator.pool().acquire(OWNER).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_standby_still_starting_is_returned_unclaimed() {
    let h = Harness::start();
    h.provider.insert(instance(
        "app-hot321",
        InstanceState::Deploying,
        vec![managed(), hot()],
    ));

    let found = h.coordinator.pool().acquire(OWNER).await.expect("standby");

    assert_eq!(found.name, "app-hot321");
    assert!(found.has_tag("hot-instance"));
    assert_eq!(h.provider.calls().untag, 0);
    assert_eq!(
        h.recorder
            .count(|e| e.kind() == EventKind::HotInstanceClaimed),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_between_tag_steps_is_left_inconsistent() {
    let h = Harness::start();
    running_standby(&h, "app-hot900");
    h.provider.set_failing(ProviderOp::Tag, true);

    assert!(h.coordinator.pool().acquire(OWNER).await.is_none());

    let stored = h.provider.instance("app-hot900").unwrap();
    assert!(!stored.has_tag("hot-instance"));
    assert!(!stored.has_tag("email"));
    assert_eq!(
        h.recorder
            .count(|e| e.kind() == EventKind::HotInstanceClaimed),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_untag_failure_reports_stage() {
    let h = Harness::start();
    let standby = running_standby(&h, "app-hot901");
    h.provider.set_failing(ProviderOp::Untag, true);

    let result = h.coordinator.pool().claim(&standby, OWNER).await;

    match result {
        Err(OrchestratorError::ClaimFailed { name, stage, .. }) => {
            assert_eq!(name, "app-hot901");
            assert_eq!(stage, "remove the hot tag");
        }
        other => panic!("expected ClaimFailed, got {other:?}"),
    }
    assert!(h.provider.instance("app-hot901").unwrap().has_tag("hot-instance"));
    assert_eq!(h.provider.calls().tag, 0);
}

#[tokio::test(start_paused = true)]
async fn test_replacement_retries_after_create_failure() {
    let h = Harness::start();
    running_standby(&h, "app-hot902");
    h.provider.set_failing(ProviderOp::Create, true);

    h.coordinator.pool().acquire(OWNER).await.expect("claimed");
    h.settle().await;

    assert!(h.standbys().is_empty());
    assert_eq!(h.coordinator.standby_replacement().stats().watching(), 1);

    h.provider.set_failing(ProviderOp::Create, false);
    common::advance(std::time::Duration::from_secs(61)).await;

    assert_eq!(h.standbys().len(), 1);
    assert_eq!(h.coordinator.standby_replacement().stats().watching(), 0);
}
