use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    assistant::{
        self, NOT_UNDERSTOOD, Turn,
        actions::{self, AssistantReply},
    },
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/assistant",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(converse))
            .route_layer(axum::middleware::from_fn(middleware::users_authorization)),
    )
}

#[derive(Deserialize, ToSchema)]
pub struct ConverseReq {
    pub text: String,
}

/// One assistant turn. Side effects that need a confirmation only run once
/// the user has answered the returned question affirmatively.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Assistant"],
    security(("userHeader" = [])),
    request_body = ConverseReq,
    responses(
        (status = 200, description = "Assistant replied", body = StdResponse<AssistantReply, String>),
        (status = 502, description = "Intent classifier is unreachable")
    )
)]
async fn converse(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
    Json(body): Json<ConverseReq>,
) -> Result<impl IntoResponse, AppError> {
    let turn = assistant::next_turn(
        &state.pending_intents,
        state.classifier.as_ref(),
        user_id,
        &body.text,
    )
    .await?;

    let reply = match turn {
        Turn::Confirm(prompt) => AssistantReply::Message(prompt),
        Turn::NotUnderstood => AssistantReply::Message(NOT_UNDERSTOOD.into()),
        Turn::Execute(command) => actions::execute(&state, user_id, command).await?,
    };

    Ok(StdResponse {
        data: Some(reply),
        message: Some("Assistant replied"),
    })
}
