use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;

use crate::core::{app_error::AppError, config::PaymentsConfig};

/// Intent status reported by the processor once the customer has paid.
pub const INTENT_SUCCEEDED: &str = "succeeded";

/// Processor intent ids are opaque tokens such as `pi_3Nx...`.
pub fn is_valid_intent_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 255
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn checked_intent_id(id: &str) -> Result<&str, AppError> {
    if is_valid_intent_id(id) {
        Ok(id)
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid payment reference \"{}\"",
            id
        )))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
    pub status: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Name persisted as the payment's provider.
    fn provider(&self) -> &'static str;

    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        metadata: Vec<(String, String)>,
    ) -> Result<PaymentIntent, AppError>;

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, AppError>;

    async fn cancel_intent(&self, id: &str) -> Result<(), AppError>;
}

pub struct StripePaymentProcessor {
    client: Client,
    config: PaymentsConfig,
}

impl StripePaymentProcessor {
    pub fn new(client: Client, config: PaymentsConfig) -> Self {
        Self { client, config }
    }

    /// Resolves `v1/payment_intents/<segments>` under the configured base URL.
    ///
    /// Segments are percent-encoded, so an id can never reach another path.
    fn intents_url(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.config.url).context("Invalid payments URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Payments URL cannot be a base"))?
            .pop_if_empty()
            .extend(["v1", "payment_intents"])
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<PaymentIntent, AppError> {
        let intent = request
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|err| {
                tracing::warn!("Payment processor request failed: {}", err);
                AppError::ServiceUnreachable("PaymentProcessor".into())
            })?
            .json()
            .await
            .context("Failed to parse payment intent JSON")?;
        Ok(intent)
    }
}

#[async_trait]
impl PaymentProcessor for StripePaymentProcessor {
    fn provider(&self) -> &'static str {
        "stripe"
    }

    async fn create_intent(
        &self,
        amount_cents: i64,
        currency: &str,
        metadata: Vec<(String, String)>,
    ) -> Result<PaymentIntent, AppError> {
        let mut form = vec![
            ("amount".to_string(), amount_cents.to_string()),
            ("currency".to_string(), currency.to_string()),
        ];
        form.extend(
            metadata
                .into_iter()
                .map(|(key, value)| (format!("metadata[{}]", key), value)),
        );

        let request = self.client.post(self.intents_url(&[])?).form(&form);
        self.send(request).await
    }

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, AppError> {
        let id = checked_intent_id(id)?;
        let request = self.client.get(self.intents_url(&[id])?);
        self.send(request).await
    }

    async fn cancel_intent(&self, id: &str) -> Result<(), AppError> {
        let id = checked_intent_id(id)?;
        let request = self.client.post(self.intents_url(&[id, "cancel"])?);
        self.send(request).await?;
        Ok(())
    }
}
