pub mod health;
pub mod instances;

use crate::{auth::auth_middleware, state::AppState};
use axum::{middleware, Router};
use fleet_orchestrator::LifecycleCoordinator;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_app(coordinator: Arc<LifecycleCoordinator>) -> Router {
    let state = AppState::new(coordinator);

    // Allow CORS for local development (frontend on different port)
    let cors = CorsLayer::permissive();

    Router::new()
        .merge(health::routes()) // Health routes don't need auth
        .merge(instances::routes().layer(middleware::from_fn(auth_middleware)))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
