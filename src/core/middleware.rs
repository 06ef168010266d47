use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::core::app_error::AppError;

/// Header set by the gateway once it has authenticated the caller.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Requires an authenticated user and exposes its id as `Extension<Uuid>`.
pub async fn users_authorization(mut req: Request, next: Next) -> Result<Response, AppError> {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or_else(|| AppError::Unauthorized("Missing or invalid user identity".into()))?;

    req.extensions_mut().insert(user_id);
    Ok(next.run(req).await)
}
