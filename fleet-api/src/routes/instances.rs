use crate::{
    auth::{check_instance_owner, AuthenticatedUser},
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use fleet_provider::Instance;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub client_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/instance", get(acquire_instance).post(create_instance))
        .route(
            "/api/instance/{id}",
            get(get_instance).delete(delete_instance),
        )
}

/// The caller's instance, claiming the hot standby if they have none.
async fn acquire_instance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> ApiResult<Json<Instance>> {
    state
        .coordinator
        .pool()
        .acquire(&user.identity)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No instance available for {}", user.identity)))
}

async fn create_instance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateInstanceRequest>,
) -> ApiResult<(StatusCode, Json<Instance>)> {
    let instances = state.coordinator.instances();
    let name = instances.instance_name(&req.client_id)?;

    if instances.find(&name).await.is_some() {
        return Err(ApiError::Conflict(format!("Instance {} already exists", name)));
    }

    let instance = instances
        .create_for_client(&req.client_id, &user.identity)
        .await?
        .ok_or_else(|| ApiError::Upstream(format!("Provider failed to create {}", name)))?;

    Ok((StatusCode::CREATED, Json(instance)))
}

async fn get_instance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(client_id): Path<String>,
) -> ApiResult<Json<Instance>> {
    let instances = state.coordinator.instances();
    let name = instances.instance_name(&client_id)?;

    let instance = instances
        .find(&name)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Instance not found: {}", name)))?;
    check_instance_owner(&instance, &instances.config().tags.owner, &user)?;

    Ok(Json(instance))
}

async fn delete_instance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let instances = state.coordinator.instances();

    let instance = instances
        .find(&name)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Instance not found: {}", name)))?;
    check_instance_owner(&instance, &instances.config().tags.owner, &user)?;

    if !instances.delete(&name).await {
        return Err(ApiError::Upstream(format!("Provider failed to delete {}", name)));
    }

    Ok(Json(json!({ "message": "Instance deleted", "name": name })))
}
