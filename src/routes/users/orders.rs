use std::collections::HashMap;

use anyhow::Context;
use axum::{Extension, Json, extract::State, response::IntoResponse};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;
use uuid::Uuid;

use crate::{
    checkout::{self, CheckoutReceipt, CheckoutRequest, PaymentMode},
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware,
    },
    models::{OrderEntity, OrderItemEntity, PaymentEntity},
    schema::{order_items, orders, payments},
};

/// Defines the authenticated user's order routes.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/users/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(checkout_open_cart))
            .routes(utoipa_axum::routes!(get_my_orders))
            .route_layer(axum::middleware::from_fn(middleware::users_authorization)),
    )
}

#[derive(Deserialize, ToSchema)]
pub struct CheckoutReq {
    pub shipping_method_id: Option<Uuid>,
}

/// Turn the open cart into an order and open a payment intent for it.
///
/// The returned `client_secret` is what the client needs to complete the
/// payment; the order stays PENDING until the payment is settled.
#[utoipa::path(
    post,
    path = "/checkout",
    tags = ["Orders"],
    security(("userHeader" = [])),
    request_body = CheckoutReq,
    responses(
        (status = 200, description = "Checked out successfully", body = StdResponse<CheckoutReceipt, String>),
        (status = 400, description = "The open cart has no items"),
        (status = 404, description = "No open cart or unknown shipping method"),
        (status = 409, description = "Not enough stock for one of the lines"),
        (status = 502, description = "Payment processor is unreachable")
    )
)]
async fn checkout_open_cart(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
    Json(body): Json<CheckoutReq>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = checkout::checkout(
        &state,
        CheckoutRequest {
            user_id,
            shipping_method_id: body.shipping_method_id,
            mode: PaymentMode::Deferred,
        },
    )
    .await?;

    Ok(StdResponse {
        data: Some(receipt),
        message: Some("Checked out successfully"),
    })
}

#[derive(Serialize, ToSchema)]
pub struct GetOrderRes {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
    pub payment: Option<PaymentEntity>,
}

/// Fetch all orders of the authenticated user, newest first.
#[utoipa::path(
    get,
    path = "/my-orders",
    tags = ["Orders"],
    security(("userHeader" = [])),
    responses(
        (status = 200, description = "List my orders", body = StdResponse<Vec<GetOrderRes>, String>)
    )
)]
async fn get_my_orders(
    State(state): State<AppState>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let orders: Vec<OrderEntity> = orders::table
        .filter(orders::user_id.eq(user_id))
        .order_by(orders::created_at.desc())
        .select(OrderEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get my orders")?;

    let order_ids: Vec<Uuid> = orders.iter().map(|order| order.id).collect();
    let items: Vec<OrderItemEntity> = order_items::table
        .filter(order_items::order_id.eq_any(&order_ids))
        .select(OrderItemEntity::as_select())
        .get_results(conn)
        .await
        .context("Failed to get order items")?;

    let payment_ids: Vec<Uuid> = orders.iter().map(|order| order.payment_id).collect();
    let mut payments: HashMap<Uuid, PaymentEntity> = payments::table
        .filter(payments::id.eq_any(&payment_ids))
        .select(PaymentEntity::as_select())
        .get_results::<PaymentEntity>(conn)
        .await
        .context("Failed to get payments")?
        .into_iter()
        .map(|payment| (payment.id, payment))
        .collect();

    let mut group: HashMap<Uuid, Vec<OrderItemEntity>> = HashMap::new();
    for item in items {
        group.entry(item.order_id).or_default().push(item);
    }

    let orders_with_items: Vec<GetOrderRes> = orders
        .into_iter()
        .map(|order| GetOrderRes {
            order_items: group.remove(&order.id).unwrap_or_default(),
            payment: payments.remove(&order.payment_id),
            order,
        })
        .collect();

    Ok(StdResponse {
        data: Some(orders_with_items),
        message: Some("Get my orders successfully"),
    })
}
