use crate::error::ApiError;
use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use fleet_provider::Instance;

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    /// Owner identity stored in the instance's owner tag (usually an email).
    pub identity: String,
}

/// Auth middleware - extracts the caller from auth proxy headers
///
/// The login flow lives in the proxy in front of fleet-api; it sets
/// `x-fleet-user` (or the oauth2-proxy `x-forwarded-email`) after verifying
/// the session. Local development can pass `x-user` directly.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let identity = req
        .headers()
        .get("x-fleet-user")
        .or_else(|| req.headers().get("x-forwarded-email"))
        .or_else(|| req.headers().get("x-user"))
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(AuthenticatedUser { identity });

    Ok(next.run(req).await)
}

/// Ok if `instance` carries `user` in its owner tag.
pub fn check_instance_owner(
    instance: &Instance,
    owner_tag: &str,
    user: &AuthenticatedUser,
) -> Result<(), ApiError> {
    match instance.tag_value(owner_tag) {
        Some(owner) if owner == user.identity => Ok(()),
        _ => Err(ApiError::Forbidden(format!(
            "Access denied: {} is not owned by {}",
            instance.name, user.identity
        ))),
    }
}
