use anyhow::Context;
use axum::{extract::State, response::IntoResponse};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    models::ShippingMethodEntity,
    schema::shipping_methods,
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/shipping-methods",
        OpenApiRouter::new().routes(utoipa_axum::routes!(get_shipping_methods)),
    )
}

/// List the shipping methods a checkout can pick from, cheapest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Shipping"],
    responses(
        (status = 200, description = "List shipping methods", body = StdResponse<Vec<ShippingMethodEntity>, String>)
    )
)]
async fn get_shipping_methods(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let methods: Vec<ShippingMethodEntity> = shipping_methods::table
        .order_by((shipping_methods::cost_cents.asc(), shipping_methods::name.asc()))
        .select(ShippingMethodEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get shipping methods")?;

    Ok(StdResponse {
        data: Some(methods),
        message: Some("Get shipping methods successfully"),
    })
}
