//! Common test utilities and helpers for fleet-api tests
//!
//! Each test gets a coordinator over the in-process provider with manual state
//! control, so instance states are set explicitly instead of waited for.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use fleet_orchestrator::{
    Dependencies, EventBus, LifecycleCoordinator, OrchestratorConfig, SystemClock,
};
use fleet_provider::{
    HttpActivityProbe, Instance, InstanceState, LocalProvider, LocalRegistry, LocalSettings, Tag,
};
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

pub struct TestApp {
    pub app: Router,
    pub provider: LocalProvider,
    pub registry: LocalRegistry,
    pub coordinator: Arc<LifecycleCoordinator>,
}

impl TestApp {
    pub fn new() -> Self {
        let provider = LocalProvider::new(LocalSettings::manual());
        let registry = LocalRegistry::default();
        let deps = Dependencies {
            provisioner: Arc::new(provider.clone()),
            registry: Arc::new(registry.clone()),
            probe: Arc::new(HttpActivityProbe::new()),
            clock: Arc::new(SystemClock),
        };
        let coordinator = Arc::new(LifecycleCoordinator::start(
            OrchestratorConfig::default(),
            deps,
            EventBus::new(),
        ));
        let app = fleet_api::create_app(Arc::clone(&coordinator));

        Self {
            app,
            provider,
            registry,
            coordinator,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Seed an instance owned by `email`.
    pub fn seed_owned(&self, name: &str, email: &str, state: InstanceState) -> Instance {
        let instance = instance(
            name,
            state,
            vec![Tag::marker("orchestrator"), Tag::new("email", email)],
        );
        self.provider.insert(instance.clone());
        instance
    }

    /// Seed a running standby.
    pub fn seed_standby(&self, name: &str) -> Instance {
        let mut standby = instance(
            name,
            InstanceState::Running,
            vec![Tag::marker("orchestrator"), Tag::marker("hot-instance")],
        );
        standby.url = Some(format!("https://{name}.example/"));
        self.provider.insert(standby.clone());
        standby
    }
}

pub fn instance(name: &str, state: InstanceState, tags: Vec<Tag>) -> Instance {
    Instance {
        name: name.to_string(),
        state,
        url: None,
        tags,
        created_at: Utc::now(),
        pull_principal: Some(format!("arn:aws:iam::000000000000:role/{name}")),
    }
}

pub fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user", user);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn delete(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header("x-user", user)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, user: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-user", user)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: axum::response::Response) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

pub fn assert_status(response: &axum::response::Response, expected: StatusCode) {
    assert_eq!(response.status(), expected);
}
