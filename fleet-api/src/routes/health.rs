use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use fleet_provider::Provisioner;
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "fleet-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let coordinator = &state.coordinator;
    let provider_ok = coordinator
        .instances()
        .provisioner()
        .get_instances(None)
        .await
        .is_ok();

    Json(json!({
        "status": if provider_ok { "ready" } else { "not_ready" },
        "service": "fleet-api",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": if provider_ok { "reachable" } else { "unreachable" },
        "watching": {
            "service_ready": coordinator.service_ready().stats().watching(),
            "deployment_running": coordinator.deployment_running().stats().watching(),
            "auto_destroy": coordinator.auto_destroyer().stats().watching(),
            "standby_replacement": coordinator.standby_replacement().stats().watching(),
        }
    }))
}
