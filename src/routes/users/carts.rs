use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    carts::{self, CartView},
    catalog,
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{CartEntity, CartItemEntity},
};

/// Defines the routes over the authenticated user's open cart.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/users/carts",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_open_cart, delete_open_cart))
            .routes(utoipa_axum::routes!(add_item))
            .routes(utoipa_axum::routes!(remove_item))
            .route_layer(axum::middleware::from_fn(middleware::users_authorization)),
    )
}

/// Fetch the open cart of the authenticated user with its lines.
#[utoipa::path(
    get,
    path = "/open",
    tags = ["Carts"],
    security(("userHeader" = [])),
    responses(
        (status = 200, description = "Get open cart successfully", body = StdResponse<CartView, String>),
        (status = 404, description = "The user has no open cart")
    )
)]
async fn get_open_cart(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = carts::view_open_cart(conn, user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Get open cart successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
pub struct AddItemReq {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Add a product to the open cart, opening one if the user has none.
#[utoipa::path(
    post,
    path = "/open/items",
    tags = ["Carts"],
    security(("userHeader" = [])),
    request_body = AddItemReq,
    responses(
        (status = 200, description = "Added item successfully", body = StdResponse<CartItemEntity, String>),
        (status = 404, description = "Product does not exist or is no longer listed")
    )
)]
async fn add_item(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
    Json(body): Json<AddItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let product = catalog::find_listed(conn, body.product_id).await?;
    let item = carts::add_product(conn, user_id, &product, body.quantity).await?;

    Ok(StdResponse {
        data: Some(item),
        message: Some("Added item successfully"),
    })
}

/// Remove a product line from the open cart.
#[utoipa::path(
    delete,
    path = "/open/items/{product_id}",
    tags = ["Carts"],
    security(("userHeader" = [])),
    params(
        ("product_id" = Uuid, Path, description = "Product whose line is removed")
    ),
    responses(
        (status = 200, description = "Removed item successfully", body = StdResponse<CartEntity, String>)
    )
)]
async fn remove_item(
    Path(product_id): Path<Uuid>,
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = carts::remove_product(conn, user_id, product_id).await?;

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Removed item successfully"),
    })
}

/// Soft-delete the open cart.
#[utoipa::path(
    delete,
    path = "/open",
    tags = ["Carts"],
    security(("userHeader" = [])),
    responses(
        (status = 200, description = "Deleted cart successfully", body = StdResponse<CartEntity, String>)
    )
)]
async fn delete_open_cart(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let cart = carts::delete_open_cart(conn, user_id).await?;
    tracing::info!("User {} discarded cart {}", user_id, cart.id);

    Ok(StdResponse {
        data: Some(cart),
        message: Some("Deleted cart successfully"),
    })
}
