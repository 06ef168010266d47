//! In-memory upstream doubles and a state whose pool never connects, for
//! exercising routes and the assistant without external services.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    api::{
        Upstreams,
        classifier::IntentClassifier,
        payments::{INTENT_SUCCEEDED, PaymentIntent, PaymentProcessor},
        push::PushGateway,
    },
    core::{
        app_error::AppError,
        app_state::AppState,
        config::{
            AppConfig, AssistantConfig, CheckoutConfig, ClassifierConfig, DatabaseConfig,
            PaymentsConfig, PushConfig, ServerConfig,
        },
        db,
    },
};

/// Echoes the utterance back, as if the model had answered in the
/// `intent:parameter` format, and records every call.
#[derive(Default)]
pub struct EchoClassifier {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl IntentClassifier for EchoClassifier {
    async fn classify(&self, utterance: &str) -> Result<String, AppError> {
        self.calls.lock().push(utterance.to_string());
        Ok(utterance.to_string())
    }
}

/// Reports every intent as succeeded except the ones listed in `pending`.
#[derive(Default)]
pub struct StubPayments {
    pub pending: Mutex<Vec<String>>,
    pub retrieved: Mutex<Vec<String>>,
}

#[async_trait]
impl PaymentProcessor for StubPayments {
    fn provider(&self) -> &'static str {
        "stub"
    }

    async fn create_intent(
        &self,
        amount_cents: i64,
        _currency: &str,
        _metadata: Vec<(String, String)>,
    ) -> Result<PaymentIntent, AppError> {
        Ok(PaymentIntent {
            id: format!("pi_{}", amount_cents),
            client_secret: Some("secret".into()),
            status: "requires_payment_method".into(),
        })
    }

    async fn retrieve_intent(&self, id: &str) -> Result<PaymentIntent, AppError> {
        self.retrieved.lock().push(id.to_string());
        let status = if self.pending.lock().iter().any(|pending| pending == id) {
            "processing"
        } else {
            INTENT_SUCCEEDED
        };
        Ok(PaymentIntent {
            id: id.to_string(),
            client_secret: None,
            status: status.into(),
        })
    }

    async fn cancel_intent(&self, _id: &str) -> Result<(), AppError> {
        Ok(())
    }
}

pub struct SilentPush;

#[async_trait]
impl PushGateway for SilentPush {
    async fn send(&self, _device_token: &str, _title: &str, _body: &str) -> Result<(), AppError> {
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        database: DatabaseConfig {
            url: "postgres://localhost/storefront_unused".into(),
            max_connections: 1,
        },
        classifier: ClassifierConfig {
            url: "http://localhost".into(),
            api_key: String::new(),
            model: "test".into(),
            timeout: Duration::from_secs(1),
        },
        payments: PaymentsConfig {
            url: "http://localhost".into(),
            secret_key: String::new(),
            currency: "usd".into(),
            timeout: Duration::from_secs(1),
        },
        push: PushConfig {
            url: "http://localhost".into(),
            server_key: String::new(),
            timeout: Duration::from_secs(1),
        },
        assistant: AssistantConfig {
            pending_intent_ttl: Duration::from_secs(60),
        },
        checkout: CheckoutConfig {
            low_stock_threshold: 5,
        },
    }
}

/// State backed by doubles. Must be built inside a Tokio runtime.
pub fn test_state(classifier: Arc<EchoClassifier>, payments: Arc<StubPayments>) -> AppState {
    let config = test_config();
    let pool = db::connect_lazy(&config.database.url, config.database.max_connections);
    AppState::new(
        pool,
        Upstreams {
            classifier,
            payments,
            push: Arc::new(SilentPush),
        },
        config,
    )
}
