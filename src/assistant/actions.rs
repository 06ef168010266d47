use diesel_async::AsyncPgConnection;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    carts, catalog,
    catalog::ProductSummary,
    checkout::{self, CheckoutRequest, PaymentMode},
    core::{app_error::AppError, app_state::AppState, db},
};

use super::Command;

#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct CartLineSummary {
    pub product: String,
    pub quantity: i32,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum AssistantReply {
    Message(String),
    Products(Vec<ProductSummary>),
    CartLines(Vec<CartLineSummary>),
}

pub async fn execute(
    state: &AppState,
    user_id: Uuid,
    command: Command,
) -> Result<AssistantReply, AppError> {
    match command {
        Command::Search(term) => {
            let mut pooled = db::connection(&state.db_pool).await?;
            let found = catalog::search(&mut pooled, term.as_deref().unwrap_or_default()).await?;
            Ok(AssistantReply::Products(found))
        }
        Command::AddToCart(name) => {
            let mut pooled = db::connection(&state.db_pool).await?;
            add_to_cart(&mut pooled, user_id, name.as_deref().unwrap_or_default()).await
        }
        Command::ViewCart => {
            let mut pooled = db::connection(&state.db_pool).await?;
            let lines = match carts::view_open_cart(&mut pooled, user_id).await? {
                Some(view) => view
                    .lines
                    .into_iter()
                    .map(|line| CartLineSummary {
                        product: line.product_name,
                        quantity: line.quantity,
                    })
                    .collect(),
                None => Vec::new(),
            };
            Ok(AssistantReply::CartLines(lines))
        }
        Command::PlaceOrder => place_order(state, user_id).await,
    }
}

async fn add_to_cart(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
    name: &str,
) -> Result<AssistantReply, AppError> {
    let product = match catalog::find_by_name(conn, name).await {
        Ok(product) => product,
        Err(AppError::NotFound) => {
            return Ok(AssistantReply::Message(format!(
                "No encontré un producto con el nombre '{}'.",
                name
            )));
        }
        Err(err) => return Err(err),
    };

    carts::add_product(conn, user_id, &product, 1).await?;
    tracing::info!("Assistant added {} to the cart of user {}", product.id, user_id);

    Ok(AssistantReply::Message(format!(
        "Agregado {} al carrito.",
        product.name
    )))
}

async fn place_order(state: &AppState, user_id: Uuid) -> Result<AssistantReply, AppError> {
    let request = CheckoutRequest {
        user_id,
        shipping_method_id: None,
        mode: PaymentMode::Manual,
    };

    match checkout::checkout(state, request).await {
        Ok(receipt) => Ok(AssistantReply::Message(format!(
            "Pedido realizado por un total de ${}.",
            format_cents(receipt.order.total_price_cents)
        ))),
        Err(AppError::NotFound | AppError::EmptyCart) => Ok(AssistantReply::Message(
            "No hay carrito para procesar.".into(),
        )),
        Err(err) => Err(err),
    }
}

/// `12345` cents reads as `123.45`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}
