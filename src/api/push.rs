use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde_json::json;

use crate::core::{app_error::AppError, config::PushConfig};

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), AppError>;
}

pub struct FcmPushGateway {
    client: Client,
    config: PushConfig,
}

impl FcmPushGateway {
    pub fn new(client: Client, config: PushConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl PushGateway for FcmPushGateway {
    async fn send(&self, device_token: &str, title: &str, body: &str) -> Result<(), AppError> {
        self.client
            .post(&self.config.url)
            .header("Authorization", format!("key={}", self.config.server_key))
            .json(&json!({
                "to": device_token,
                "notification": { "title": title, "body": body },
            }))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|err| {
                tracing::warn!("Push gateway request failed: {}", err);
                AppError::ServiceUnreachable("PushGateway".into())
            })?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub device_token: String,
    pub title: String,
    pub body: String,
}

/// Sends every message concurrently. Failures are logged per token and never
/// returned; the count of delivered messages is.
pub async fn send_best_effort(gateway: Arc<dyn PushGateway>, messages: Vec<PushMessage>) -> usize {
    let sends = messages.iter().map(|message| {
        let gateway = gateway.clone();
        async move {
            match gateway
                .send(&message.device_token, &message.title, &message.body)
                .await
            {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(
                        "Failed to push \"{}\" to a device: {}",
                        message.title,
                        err
                    );
                    false
                }
            }
        }
    });

    let delivered = join_all(sends).await.into_iter().filter(|ok| *ok).count();
    tracing::info!("Delivered {}/{} push notifications", delivered, messages.len());
    delivered
}
