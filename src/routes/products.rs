use anyhow::Context;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    catalog::{self, ProductSummary},
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/products",
        OpenApiRouter::new().routes(utoipa_axum::routes!(search_products)),
    )
}

#[derive(Deserialize, IntoParams)]
pub struct SearchQuery {
    /// Matched case-insensitively against name, category and brand.
    pub q: Option<String>,
}

/// Search listed products. An empty term lists every listed product.
#[utoipa::path(
    get,
    path = "/search",
    tags = ["Products"],
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching products", body = StdResponse<Vec<ProductSummary>, String>)
    )
)]
async fn search_products(
    Query(query): Query<SearchQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let products = catalog::search(conn, query.q.as_deref().unwrap_or_default()).await?;

    Ok(StdResponse {
        data: Some(products),
        message: Some("Search products successfully"),
    })
}
