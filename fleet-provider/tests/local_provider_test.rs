//! Integration tests for the in-process provider backend
//!
//! Covers lifecycle transitions (timed and manual), tagging, deployment
//! bookkeeping, call counting and failure injection.

use fleet_provider::{
    DeploymentSpec, HealthCheck, InstanceState, LocalProvider, LocalRegistry, LocalSettings,
    ProviderError, ProviderOp, Provisioner, RegistryAccess, Tag,
};
use std::time::Duration;

fn spec() -> DeploymentSpec {
    DeploymentSpec {
        image: "registry.example/app:web-demo".to_string(),
        port: 8000,
        health_check: HealthCheck::default(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_timed_lifecycle_reaches_running() {
    let provider = LocalProvider::new(LocalSettings {
        ready_after: Some(Duration::from_secs(10)),
        running_after: Some(Duration::from_secs(20)),
        ..LocalSettings::default()
    });

    let created = provider
        .create_instance("app-u1", &[Tag::marker("orchestrator")])
        .await
        .expect("create");
    assert_eq!(created.state, InstanceState::Pending);
    assert!(created.pull_principal.is_some());

    tokio::time::sleep(Duration::from_secs(11)).await;
    let ready = provider.get_instance("app-u1").await.unwrap().unwrap();
    assert_eq!(ready.state, InstanceState::Ready);
    assert!(ready.url.is_none());

    provider.deploy(&ready, &spec()).await.expect("deploy");
    tokio::time::sleep(Duration::from_secs(21)).await;

    let running = provider.get_instance("app-u1").await.unwrap().unwrap();
    assert_eq!(running.state, InstanceState::Running);
    assert_eq!(running.url.as_deref(), Some("https://app-u1.fleet.local/"));
    assert_eq!(provider.deployments("app-u1"), vec![spec()]);
}

#[tokio::test]
async fn test_manual_settings_never_advance() {
    let provider = LocalProvider::new(LocalSettings::manual());
    provider.create_instance("app-u2", &[]).await.unwrap();

    for _ in 0..3 {
        let instance = provider.get_instance("app-u2").await.unwrap().unwrap();
        assert_eq!(instance.state, InstanceState::Pending);
    }

    provider.set_state("app-u2", InstanceState::Running).unwrap();
    let instance = provider.get_instance("app-u2").await.unwrap().unwrap();
    assert_eq!(instance.url.as_deref(), Some("https://app-u2.fleet.local/"));
}

#[tokio::test]
async fn test_missing_instance_is_empty_not_error() {
    let provider = LocalProvider::new(LocalSettings::manual());

    let listed = provider.get_instances(Some("nope")).await.unwrap();
    assert!(listed.is_empty());
    assert!(provider.get_instance("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_create_is_rejected() {
    let provider = LocalProvider::new(LocalSettings::manual());
    provider.create_instance("app-u3", &[]).await.unwrap();

    let err = provider.create_instance("app-u3", &[]).await.unwrap_err();
    assert!(matches!(err, ProviderError::AlreadyExists(name) if name == "app-u3"));
}

#[tokio::test]
async fn test_tag_and_untag() {
    let provider = LocalProvider::new(LocalSettings::manual());
    provider
        .create_instance("app-hot123", &[Tag::marker("orchestrator"), Tag::marker("hot-instance")])
        .await
        .unwrap();

    provider
        .untag_instance("app-hot123", &["hot-instance".to_string()])
        .await
        .unwrap();
    provider
        .tag_instance("app-hot123", &[Tag::new("email", "u1@example.com")])
        .await
        .unwrap();

    let instance = provider.instance("app-hot123").unwrap();
    assert!(!instance.has_tag("hot-instance"));
    assert!(instance.has_tag("orchestrator"));
    assert_eq!(instance.tag_value("email"), Some("u1@example.com"));
}

#[tokio::test]
async fn test_deploy_requires_ready_instance() {
    let provider = LocalProvider::new(LocalSettings::manual());
    let pending = provider.create_instance("app-u4", &[]).await.unwrap();

    let err = provider.deploy(&pending, &spec()).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidState { .. }));
    assert!(provider.deployments("app-u4").is_empty());
}

#[tokio::test]
async fn test_failure_injection_counts_calls() {
    let provider = LocalProvider::new(LocalSettings::manual());
    provider.set_failing(ProviderOp::Get, true);

    let err = provider.get_instances(None).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(provider.calls().get, 1);

    provider.set_failing(ProviderOp::Get, false);
    assert!(provider.get_instances(None).await.is_ok());
    assert_eq!(provider.calls().get, 2);
    assert_eq!(provider.calls().total(), 2);
}

#[tokio::test]
async fn test_delete_removes_instance() {
    let provider = LocalProvider::new(LocalSettings::manual());
    provider.create_instance("app-u5", &[]).await.unwrap();

    provider.delete_instance("app-u5").await.unwrap();
    assert!(provider.instances().is_empty());

    let err = provider.delete_instance("app-u5").await.unwrap_err();
    assert!(matches!(err, ProviderError::NotFound(_)));
}

#[tokio::test]
async fn test_local_registry_round_trip() {
    let registry = LocalRegistry::with_policy(r#"{"Statement":[]}"#);

    let record = registry.get_policy("app").await.unwrap();
    registry
        .set_policy("app", &record.registry_id, r#"{"Statement":[{"Sid":"x"}]}"#)
        .await
        .unwrap();

    assert_eq!(registry.policy_text(), r#"{"Statement":[{"Sid":"x"}]}"#);
    assert_eq!(registry.call_counts(), (1, 1));
}
