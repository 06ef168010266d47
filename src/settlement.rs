//! Marks deferred payments as paid and issues their invoice.
//!
//! Both the client confirmation and the processor webhook end up in
//! [`settle`]. Settling is idempotent: the payment row is locked, a payment
//! already PAID is left alone, and `invoices.order_id` is unique so a repeated
//! call finds the existing invoice instead of issuing another.

use anyhow::Context;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    api::payments::INTENT_SUCCEEDED,
    core::{app_error::AppError, app_state::AppState, db},
    models::{
        CreateInvoiceEntity, InvoiceEntity, OrderEntity, OrderStatus, PaymentEntity, PaymentState,
    },
    schema::{invoices, orders, payments},
};

pub const DEFAULT_TAX_ID: &str = "0";
pub const DEFAULT_BUSINESS_NAME: &str = "Consumidor final";

#[derive(Debug, Clone)]
pub struct Billing {
    pub tax_id: String,
    pub business_name: String,
}

impl Default for Billing {
    fn default() -> Self {
        Self {
            tax_id: DEFAULT_TAX_ID.into(),
            business_name: DEFAULT_BUSINESS_NAME.into(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SettlementOutcome {
    pub payment: PaymentEntity,
    pub order: OrderEntity,
    pub invoice: InvoiceEntity,
    /// True when an earlier call had already settled this payment.
    pub already_settled: bool,
}

/// Checks with the processor that the intent succeeded, then records it.
///
/// Only references of locally recorded payments are sent to the processor.
pub async fn settle(
    state: &AppState,
    provider_ref: &str,
    billing: Billing,
) -> Result<SettlementOutcome, AppError> {
    let mut pooled = db::connection(&state.db_pool).await?;
    let conn: &mut AsyncPgConnection = &mut pooled;

    let known = payments::table
        .filter(payments::provider_ref.eq(provider_ref))
        .select(payments::id)
        .first::<Uuid>(conn)
        .await
        .optional()
        .context("Failed to look up payment")?;
    if known.is_none() {
        tracing::debug!("No payment recorded for reference {}", provider_ref);
        return Err(AppError::NotFound);
    }

    let intent = state.payments.retrieve_intent(provider_ref).await?;
    if intent.status != INTENT_SUCCEEDED {
        return Err(AppError::BadRequest(format!(
            "Payment has not been completed yet (status: {})",
            intent.status
        )));
    }

    let provider_ref = provider_ref.to_string();

    let outcome = conn
        .transaction(move |conn| {
            Box::pin(async move { record_settlement(conn, &provider_ref, billing).await })
        })
        .await?;

    if outcome.already_settled {
        tracing::info!("Payment {} was already settled", outcome.payment.id);
    } else {
        tracing::info!(
            "Payment {} settled, invoice {} issued for order {}",
            outcome.payment.id,
            outcome.invoice.id,
            outcome.order.id
        );
    }
    Ok(outcome)
}

pub async fn record_settlement(
    conn: &mut AsyncPgConnection,
    provider_ref: &str,
    billing: Billing,
) -> Result<SettlementOutcome, AppError> {
    let payment: PaymentEntity = payments::table
        .filter(payments::provider_ref.eq(provider_ref))
        .select(PaymentEntity::as_select())
        .for_update()
        .first(conn)
        .await?;

    let already_settled = payment.state == PaymentState::Paid.as_str();

    let (payment, order) = if already_settled {
        let order: OrderEntity = orders::table
            .filter(orders::payment_id.eq(payment.id))
            .select(OrderEntity::as_select())
            .first(conn)
            .await
            .context("Failed to get order for payment")?;
        (payment, order)
    } else {
        let payment = diesel::update(payments::table.find(payment.id))
            .set((
                payments::state.eq(PaymentState::Paid.as_str()),
                payments::updated_at.eq(diesel::dsl::now),
            ))
            .returning(PaymentEntity::as_returning())
            .get_result(conn)
            .await
            .context("Failed to update payment state")?;

        let order = diesel::update(orders::table.filter(orders::payment_id.eq(payment.id)))
            .set((
                orders::status.eq(OrderStatus::Paid.as_str()),
                orders::updated_at.eq(diesel::dsl::now),
            ))
            .returning(OrderEntity::as_returning())
            .get_result(conn)
            .await
            .context("Failed to update order status")?;
        (payment, order)
    };

    diesel::insert_into(invoices::table)
        .values(CreateInvoiceEntity {
            order_id: order.id,
            tax_id: billing.tax_id,
            business_name: billing.business_name,
            total_amount_cents: order.total_price_cents,
        })
        .on_conflict(invoices::order_id)
        .do_nothing()
        .execute(conn)
        .await
        .context("Failed to create invoice")?;

    let invoice = invoices::table
        .filter(invoices::order_id.eq(order.id))
        .select(InvoiceEntity::as_select())
        .first(conn)
        .await
        .context("Failed to get invoice")?;

    Ok(SettlementOutcome {
        payment,
        order,
        invoice,
        already_settled,
    })
}
