use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::{app_error::AppError, config::ClassifierConfig};

const SYSTEM_PROMPT: &str = "Sos un asistente de compras, devolvé solo la intención y parámetro en formato: buscar:auriculares o agregar:laptop o ver_carrito o realizar_pedido";

/// Turns a raw utterance into the classifier's free-text `intent[:parameter]` reply.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, utterance: &str) -> Result<String, AppError>;
}

pub struct ChatCompletionClassifier {
    client: Client,
    config: ClassifierConfig,
}

impl ChatCompletionClassifier {
    pub fn new(client: Client, config: ClassifierConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

#[async_trait]
impl IntentClassifier for ChatCompletionClassifier {
    async fn classify(&self, utterance: &str) -> Result<String, AppError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: utterance,
                },
            ],
        };

        let response: ChatResponse = self
            .client
            .post(format!("{}/chat/completions", self.config.url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|err| {
                tracing::warn!("Classifier request failed: {}", err);
                AppError::ServiceUnreachable("IntentClassifier".into())
            })?
            .json()
            .await
            .context("Failed to parse classifier JSON")?;

        // An empty choice list reads as an unrecognized intent downstream.
        let content = response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        tracing::debug!("Classifier replied {:?}", content);
        Ok(content)
    }
}
