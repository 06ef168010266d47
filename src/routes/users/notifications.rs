use anyhow::Context;
use axum::{Extension, extract::State, response::IntoResponse};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::NotificationEntity,
    schema::notifications,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/users/notifications",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_notifications))
            .route_layer(axum::middleware::from_fn(middleware::users_authorization)),
    )
}

/// Fetch the authenticated user's notifications, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Notifications"],
    security(("userHeader" = [])),
    responses(
        (status = 200, description = "List my notifications", body = StdResponse<Vec<NotificationEntity>, String>)
    )
)]
async fn get_my_notifications(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let notifications: Vec<NotificationEntity> = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .order_by(notifications::created_at.desc())
        .select(NotificationEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get notifications")?;

    Ok(StdResponse {
        data: Some(notifications),
        message: Some("Get my notifications successfully"),
    })
}
