use std::sync::Arc;

use crate::{
    api::{
        Upstreams, classifier::IntentClassifier, payments::PaymentProcessor, push::PushGateway,
    },
    assistant::session::PendingIntentStore,
    core::{config::AppConfig, db::DbPool},
};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub classifier: Arc<dyn IntentClassifier>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub push: Arc<dyn PushGateway>,
    pub pending_intents: Arc<PendingIntentStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(db_pool: DbPool, upstreams: Upstreams, config: AppConfig) -> Self {
        Self {
            db_pool,
            classifier: upstreams.classifier,
            payments: upstreams.payments,
            push: upstreams.push,
            pending_intents: Arc::new(PendingIntentStore::new(config.assistant.pending_intent_ttl)),
            config: Arc::new(config),
        }
    }
}
