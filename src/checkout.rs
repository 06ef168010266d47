//! Turns the user's open cart into an order.
//!
//! The whole sequence runs in one transaction. The cart row and every stock
//! row of the cart's products are locked `FOR UPDATE` (stock rows in
//! `(product_id, id)` order) before availability is checked, so two checkouts
//! competing for the last units serialize and the loser sees the debited
//! quantity.
//!
//! A deferred payment intent is created before the transaction starts, so no
//! row lock is held while the processor answers. The transaction then refuses
//! a cart that no longer matches the charged amount. If anything fails after
//! the intent was created, the transaction rolls back and the intent is
//! cancelled with the processor.

use std::collections::HashMap;

use anyhow::Context;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    api::{
        payments::{PaymentIntent, PaymentProcessor},
        push::{PushMessage, send_best_effort},
    },
    carts::{self, CartLine},
    core::{app_error::AppError, app_state::AppState, db},
    models::{
        CreateInvoiceEntity, CreateNotificationEntity, CreateOrderEntity, CreatePaymentEntity,
        NOTIFICATION_LOW_STOCK, OrderEntity, OrderItemEntity, OrderStatus, PaymentEntity,
        PaymentState, Role, StockEntity,
    },
    schema::{
        invoices, notifications, order_items, orders, payments, shipping_methods, stocks, users,
    },
    settlement::{DEFAULT_BUSINESS_NAME, DEFAULT_TAX_ID},
};

/// Provider recorded for orders that are paid on the spot.
pub const MANUAL_PROVIDER: &str = "manual";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMode {
    /// A payment intent is created with the processor and settled later.
    Deferred,
    /// The payment is recorded as paid and the invoice issued immediately.
    Manual,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub shipping_method_id: Option<Uuid>,
    pub mode: PaymentMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowStockAlert {
    pub product_id: Uuid,
    pub product_name: String,
    pub remaining: i64,
}

impl LowStockAlert {
    pub fn message(&self) -> String {
        format!(
            "El stock del producto \"{}\" ha bajado a {} unidades.",
            self.product_name, self.remaining
        )
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CheckoutReceipt {
    pub order: OrderEntity,
    pub order_items: Vec<OrderItemEntity>,
    pub payment: PaymentEntity,
    /// Secret the client uses to complete a deferred payment.
    pub client_secret: Option<String>,
    #[serde(skip)]
    pub low_stock: Vec<LowStockAlert>,
}

/// New quantity for one locked stock row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockDebit {
    pub stock_id: Uuid,
    pub new_quantity: i32,
}

/// Total units per product across all of its stock rows.
pub fn availability(rows: &[StockEntity]) -> HashMap<Uuid, i64> {
    let mut available: HashMap<Uuid, i64> = HashMap::new();
    for row in rows {
        *available.entry(row.product_id).or_default() += i64::from(row.quantity);
    }
    available
}

/// Fails on the first line asking for more than is available. A product
/// without any stock row has nothing available.
pub fn ensure_stock(lines: &[CartLine], available: &HashMap<Uuid, i64>) -> Result<(), AppError> {
    for line in lines {
        let on_hand = available.get(&line.product_id).copied().unwrap_or(0);
        let requested = i64::from(line.quantity);
        if requested > on_hand {
            return Err(AppError::InsufficientStock {
                product: line.product_name.clone(),
                requested,
                available: on_hand,
            });
        }
    }
    Ok(())
}

pub fn order_total(lines: &[CartLine]) -> i64 {
    lines
        .iter()
        .map(|line| line.unit_price_cents * i64::from(line.quantity))
        .sum()
}

/// Drains `product_id`'s rows in the given order until `quantity` units are
/// taken. Rows left untouched are not returned.
pub fn plan_debits(rows: &[StockEntity], product_id: Uuid, quantity: i64) -> Vec<StockDebit> {
    let mut outstanding = quantity;
    let mut debits = Vec::new();
    for row in rows.iter().filter(|row| row.product_id == product_id) {
        if outstanding <= 0 {
            break;
        }
        let taken = outstanding.min(i64::from(row.quantity));
        if taken == 0 {
            continue;
        }
        outstanding -= taken;
        debits.push(StockDebit {
            stock_id: row.id,
            // taken <= row.quantity, so this fits back into i32
            new_quantity: row.quantity - taken as i32,
        });
    }
    debits
}

/// Products whose remaining stock after the order falls below `threshold`.
pub fn low_stock_alerts(
    lines: &[CartLine],
    available: &HashMap<Uuid, i64>,
    threshold: i64,
) -> Vec<LowStockAlert> {
    lines
        .iter()
        .filter_map(|line| {
            let remaining =
                available.get(&line.product_id).copied().unwrap_or(0) - i64::from(line.quantity);
            (remaining < threshold).then(|| LowStockAlert {
                product_id: line.product_id,
                product_name: line.product_name.clone(),
                remaining,
            })
        })
        .collect()
}

/// An intent opened for the cart as it was before any lock was taken.
struct Quote {
    cart_id: Uuid,
    total: i64,
    intent: PaymentIntent,
}

struct Sequenced {
    receipt: CheckoutReceipt,
    pushes: Vec<PushMessage>,
}

pub async fn checkout(state: &AppState, request: CheckoutRequest) -> Result<CheckoutReceipt, AppError> {
    let mut pooled = db::connection(&state.db_pool).await?;
    let conn: &mut AsyncPgConnection = &mut pooled;

    let user_id = request.user_id;
    let currency = state.config.payments.currency.clone();

    let quote = match request.mode {
        PaymentMode::Deferred => {
            Some(quote_intent(conn, &request, state.payments.as_ref(), &currency).await?)
        }
        PaymentMode::Manual => None,
    };
    let created_intent = quote.as_ref().map(|quote| quote.intent.id.clone());

    let result = {
        let processor = state.payments.clone();
        let threshold = state.config.checkout.low_stock_threshold;

        conn.transaction(move |conn| {
            Box::pin(async move {
                run_sequence(
                    conn,
                    &request,
                    quote,
                    processor.as_ref(),
                    &currency,
                    threshold,
                )
                .await
            })
        })
        .await
    };

    let sequenced = match result {
        Ok(sequenced) => sequenced,
        Err(err) => {
            if let Some(intent_id) = created_intent {
                cancel_intent(state.payments.as_ref(), &intent_id).await;
            }
            tracing::warn!("Checkout for user {} failed: {}", user_id, err);
            return Err(err);
        }
    };

    let receipt = sequenced.receipt;
    tracing::info!(
        "Order {} placed by user {} for {} cents",
        receipt.order.id,
        user_id,
        receipt.order.total_price_cents
    );

    if !sequenced.pushes.is_empty() {
        tokio::spawn(send_best_effort(state.push.clone(), sequenced.pushes));
    }

    Ok(receipt)
}

async fn cancel_intent(processor: &dyn PaymentProcessor, intent_id: &str) {
    match processor.cancel_intent(intent_id).await {
        Ok(()) => tracing::info!("Cancelled payment intent {} after failed checkout", intent_id),
        Err(err) => tracing::error!(
            "Failed to cancel payment intent {} after failed checkout: {}",
            intent_id,
            err
        ),
    }
}

/// Opens the processor intent for the open cart's current total without
/// locking anything.
async fn quote_intent(
    conn: &mut AsyncPgConnection,
    request: &CheckoutRequest,
    processor: &dyn PaymentProcessor,
    currency: &str,
) -> Result<Quote, AppError> {
    let cart = carts::find_open_cart(conn, request.user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let lines = carts::cart_lines(conn, cart.id).await?;
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }
    let total = order_total(&lines);

    let intent = processor
        .create_intent(
            total,
            currency,
            vec![
                ("user_id".to_string(), request.user_id.to_string()),
                ("cart_id".to_string(), cart.id.to_string()),
            ],
        )
        .await?;

    Ok(Quote {
        cart_id: cart.id,
        total,
        intent,
    })
}

async fn run_sequence(
    conn: &mut AsyncPgConnection,
    request: &CheckoutRequest,
    quote: Option<Quote>,
    processor: &dyn PaymentProcessor,
    currency: &str,
    threshold: i64,
) -> Result<Sequenced, AppError> {
    let cart = carts::lock_open_cart(conn, request.user_id).await?;
    let lines = carts::cart_lines(conn, cart.id).await?;
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }
    if let Some(name) = carts::delisted_products(conn, cart.id).await?.as_slice().first() {
        return Err(AppError::Conflict(format!(
            "Product \"{}\" is no longer available",
            name
        )));
    }

    let product_ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
    let stock_rows: Vec<StockEntity> = stocks::table
        .filter(stocks::product_id.eq_any(&product_ids))
        .order_by((stocks::product_id.asc(), stocks::id.asc()))
        .select(StockEntity::as_select())
        .for_update()
        .load(conn)
        .await
        .context("Failed to lock stock rows")?;

    let available = availability(&stock_rows);
    ensure_stock(&lines, &available)?;
    let total = order_total(&lines);

    let shipping_method_id = resolve_shipping_method(conn, request.shipping_method_id).await?;

    let (new_payment, order_status, client_secret) = match quote {
        Some(Quote {
            cart_id,
            total: charged,
            intent,
        }) => {
            if cart_id != cart.id || charged != total {
                return Err(AppError::Conflict(
                    "The cart changed while checking out, please try again".into(),
                ));
            }

            (
                CreatePaymentEntity {
                    state: PaymentState::Pending.as_str().into(),
                    provider: processor.provider().into(),
                    provider_ref: Some(intent.id),
                    amount_cents: total,
                    currency: currency.into(),
                },
                OrderStatus::Pending,
                intent.client_secret,
            )
        }
        None => (
            CreatePaymentEntity {
                state: PaymentState::Paid.as_str().into(),
                provider: MANUAL_PROVIDER.into(),
                provider_ref: None,
                amount_cents: total,
                currency: currency.into(),
            },
            OrderStatus::Paid,
            None,
        ),
    };

    let payment: PaymentEntity = diesel::insert_into(payments::table)
        .values(new_payment)
        .returning(PaymentEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create payment")?;

    let order: OrderEntity = diesel::insert_into(orders::table)
        .values(CreateOrderEntity {
            user_id: request.user_id,
            cart_id: cart.id,
            payment_id: payment.id,
            shipping_method_id,
            status: order_status.as_str().into(),
            total_price_cents: total,
        })
        .returning(OrderEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create order")?;

    let items: Vec<OrderItemEntity> = lines
        .iter()
        .map(|line| OrderItemEntity {
            order_id: order.id,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price_cents: line.unit_price_cents,
        })
        .collect();

    diesel::insert_into(order_items::table)
        .values(&items)
        .execute(conn)
        .await
        .context("Failed to create order items")?;

    for line in &lines {
        for debit in plan_debits(&stock_rows, line.product_id, i64::from(line.quantity)) {
            diesel::update(stocks::table.find(debit.stock_id))
                .set((
                    stocks::quantity.eq(debit.new_quantity),
                    stocks::updated_at.eq(diesel::dsl::now),
                ))
                .execute(conn)
                .await
                .context("Failed to debit stock")?;
        }
    }

    let low_stock = low_stock_alerts(&lines, &available, threshold);
    let pushes = notify_admins(conn, &low_stock).await?;

    carts::soft_delete(conn, cart.id).await?;

    if request.mode == PaymentMode::Manual {
        diesel::insert_into(invoices::table)
            .values(CreateInvoiceEntity {
                order_id: order.id,
                tax_id: DEFAULT_TAX_ID.into(),
                business_name: DEFAULT_BUSINESS_NAME.into(),
                total_amount_cents: total,
            })
            .execute(conn)
            .await
            .context("Failed to create invoice")?;
    }

    Ok(Sequenced {
        receipt: CheckoutReceipt {
            order,
            order_items: items,
            payment,
            client_secret,
            low_stock,
        },
        pushes,
    })
}

/// The requested method must exist. Without one, the first method by name is
/// used, if any is configured.
async fn resolve_shipping_method(
    conn: &mut AsyncPgConnection,
    requested: Option<Uuid>,
) -> Result<Option<Uuid>, AppError> {
    match requested {
        Some(id) => {
            let id = shipping_methods::table
                .find(id)
                .select(shipping_methods::id)
                .first(conn)
                .await?;
            Ok(Some(id))
        }
        None => {
            let id = shipping_methods::table
                .order_by(shipping_methods::name.asc())
                .select(shipping_methods::id)
                .first(conn)
                .await
                .optional()?;
            Ok(id)
        }
    }
}

/// Records one notification per active admin and alert, and returns the push
/// messages for admins with a registered device.
async fn notify_admins(
    conn: &mut AsyncPgConnection,
    alerts: &[LowStockAlert],
) -> Result<Vec<PushMessage>, AppError> {
    if alerts.is_empty() {
        return Ok(Vec::new());
    }

    let admins: Vec<(Uuid, Option<String>)> = users::table
        .filter(users::role.eq(Role::Admin.as_str()))
        .filter(users::is_active.eq(true))
        .select((users::id, users::device_token))
        .load(conn)
        .await
        .context("Failed to get admins")?;

    let mut rows = Vec::with_capacity(admins.len() * alerts.len());
    let mut pushes = Vec::new();
    for alert in alerts {
        tracing::warn!(
            "Low stock for product {}: {} units left",
            alert.product_id,
            alert.remaining
        );
        for (admin_id, device_token) in &admins {
            rows.push(CreateNotificationEntity {
                user_id: *admin_id,
                kind: NOTIFICATION_LOW_STOCK.into(),
                message: alert.message(),
            });
            if let Some(device_token) = device_token {
                pushes.push(PushMessage {
                    device_token: device_token.clone(),
                    title: "Stock bajo".into(),
                    body: alert.message(),
                });
            }
        }
    }

    if !rows.is_empty() {
        diesel::insert_into(notifications::table)
            .values(&rows)
            .execute(conn)
            .await
            .context("Failed to create low stock notifications")?;
    }

    Ok(pushes)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn line(product_id: Uuid, name: &str, quantity: i32, unit_price_cents: i64) -> CartLine {
        CartLine {
            product_id,
            product_name: name.into(),
            quantity,
            unit_price_cents,
        }
    }

    fn stock(product_id: Uuid, quantity: i32) -> StockEntity {
        StockEntity {
            id: Uuid::new_v4(),
            product_id,
            branch_id: Uuid::new_v4(),
            quantity,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn availability_sums_rows_per_product() {
        let headphones = Uuid::new_v4();
        let laptop = Uuid::new_v4();
        let rows = vec![stock(headphones, 3), stock(laptop, 1), stock(headphones, 4)];

        let available = availability(&rows);

        assert_eq!(available[&headphones], 7);
        assert_eq!(available[&laptop], 1);
    }

    #[test]
    fn ensure_stock_reports_first_shortfall() {
        let headphones = Uuid::new_v4();
        let laptop = Uuid::new_v4();
        let available = availability(&[stock(headphones, 10), stock(laptop, 1)]);
        let lines = vec![
            line(headphones, "Auriculares", 2, 1500),
            line(laptop, "Laptop", 3, 90000),
        ];

        let err = ensure_stock(&lines, &available).unwrap_err();

        match err {
            AppError::InsufficientStock {
                product,
                requested,
                available,
            } => {
                assert_eq!(product, "Laptop");
                assert_eq!(requested, 3);
                assert_eq!(available, 1);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
    }

    #[test]
    fn ensure_stock_fails_without_stock_record() {
        let mouse = Uuid::new_v4();
        let lines = vec![line(mouse, "Mouse", 1, 2000)];

        let err = ensure_stock(&lines, &HashMap::new()).unwrap_err();

        assert!(matches!(
            err,
            AppError::InsufficientStock { available: 0, requested: 1, .. }
        ));
    }

    #[test]
    fn ensure_stock_accepts_exact_quantity() {
        let mouse = Uuid::new_v4();
        let available = availability(&[stock(mouse, 2)]);
        assert!(ensure_stock(&[line(mouse, "Mouse", 2, 2000)], &available).is_ok());
    }

    #[test]
    fn total_uses_current_prices() {
        let lines = vec![
            line(Uuid::new_v4(), "Auriculares", 2, 1599),
            line(Uuid::new_v4(), "Cable", 3, 250),
        ];
        assert_eq!(order_total(&lines), 2 * 1599 + 3 * 250);
        assert_eq!(order_total(&[]), 0);
    }

    #[test]
    fn debits_drain_rows_in_lock_order() {
        let headphones = Uuid::new_v4();
        let other = Uuid::new_v4();
        let rows = vec![
            stock(headphones, 2),
            stock(other, 9),
            stock(headphones, 0),
            stock(headphones, 5),
            stock(headphones, 4),
        ];

        let debits = plan_debits(&rows, headphones, 6);

        assert_eq!(
            debits,
            vec![
                StockDebit {
                    stock_id: rows[0].id,
                    new_quantity: 0
                },
                StockDebit {
                    stock_id: rows[3].id,
                    new_quantity: 1
                },
            ]
        );
    }

    #[test]
    fn debits_leave_aggregate_correct() {
        let product = Uuid::new_v4();
        let rows = vec![stock(product, 3), stock(product, 3)];
        let before: i64 = availability(&rows)[&product];

        let debits = plan_debits(&rows, product, 4);
        let after: i64 = rows
            .iter()
            .map(|row| {
                debits
                    .iter()
                    .find(|debit| debit.stock_id == row.id)
                    .map(|debit| i64::from(debit.new_quantity))
                    .unwrap_or(i64::from(row.quantity))
            })
            .sum();

        assert_eq!(before - after, 4);
    }

    #[test]
    fn alerts_fire_strictly_below_threshold() {
        let at_threshold = Uuid::new_v4();
        let below = Uuid::new_v4();
        let plenty = Uuid::new_v4();
        let available = availability(&[
            stock(at_threshold, 6),
            stock(below, 5),
            stock(plenty, 50),
        ]);
        let lines = vec![
            line(at_threshold, "Teclado", 1, 100),
            line(below, "Mouse", 1, 100),
            line(plenty, "Cable", 1, 100),
        ];

        let alerts = low_stock_alerts(&lines, &available, 5);

        assert_eq!(
            alerts,
            vec![LowStockAlert {
                product_id: below,
                product_name: "Mouse".into(),
                remaining: 4,
            }]
        );
        assert_eq!(
            alerts[0].message(),
            "El stock del producto \"Mouse\" ha bajado a 4 unidades."
        );
    }
}
