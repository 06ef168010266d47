use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    settlement::{self, Billing, SettlementOutcome},
};

/// The only processor event that settles a payment.
pub const INTENT_SUCCEEDED_EVENT: &str = "payment_intent.succeeded";

/// Defines the payment settlement routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    utoipa_axum::router::OpenApiRouter::new().nest(
        "/payments",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(confirm_payment))
            .routes(utoipa_axum::routes!(payment_webhook)),
    )
}

#[derive(Deserialize, ToSchema, Default)]
pub struct ConfirmPaymentReq {
    pub tax_id: Option<String>,
    pub business_name: Option<String>,
}

impl ConfirmPaymentReq {
    fn billing(self) -> Billing {
        let defaults = Billing::default();
        Billing {
            tax_id: non_blank(self.tax_id).unwrap_or(defaults.tax_id),
            business_name: non_blank(self.business_name).unwrap_or(defaults.business_name),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Settle a payment once the client has completed it with the processor.
#[utoipa::path(
    post,
    path = "/{provider_ref}/confirm",
    tags = ["Payments"],
    params(
        ("provider_ref" = String, Path, description = "Processor reference of the payment intent")
    ),
    request_body = ConfirmPaymentReq,
    responses(
        (status = 200, description = "Payment settled", body = StdResponse<SettlementOutcome, String>),
        (status = 400, description = "The processor has not marked the intent as succeeded"),
        (status = 404, description = "No payment with this reference")
    )
)]
async fn confirm_payment(
    Path(provider_ref): Path<String>,
    State(state): State<AppState>,
    body: Option<Json<ConfirmPaymentReq>>,
) -> Result<impl IntoResponse, AppError> {
    let Json(body) = body.unwrap_or_default();
    let outcome = settlement::settle(&state, &provider_ref, body.billing()).await?;

    Ok(StdResponse {
        data: Some(outcome),
        message: Some("Payment settled successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookEventData,
}

#[derive(Deserialize, ToSchema)]
pub struct WebhookEventData {
    pub object: WebhookEventObject,
}

#[derive(Deserialize, ToSchema)]
pub struct WebhookEventObject {
    pub id: String,
}

/// Processor notification endpoint.
///
/// The event body is not trusted: settling re-reads the intent from the
/// processor and only proceeds when it reports success.
#[utoipa::path(
    post,
    path = "/webhook",
    tags = ["Payments"],
    request_body = WebhookEvent,
    responses(
        (status = 200, description = "Event processed or ignored", body = StdResponse<SettlementOutcome, String>),
        (status = 404, description = "No payment with this reference")
    )
)]
async fn payment_webhook(
    State(state): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> Result<impl IntoResponse, AppError> {
    if event.kind != INTENT_SUCCEEDED_EVENT {
        tracing::debug!("Ignoring processor event {}", event.kind);
        return Ok(StdResponse::<SettlementOutcome, &str> {
            data: None,
            message: Some("Event ignored"),
        });
    }

    let outcome = settlement::settle(&state, &event.data.object.id, Billing::default()).await?;

    Ok(StdResponse {
        data: Some(outcome),
        message: Some("Payment settled successfully"),
    })
}
