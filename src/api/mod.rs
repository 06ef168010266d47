//! Clients for the third-party providers this service talks to.
//!
//! Each provider sits behind a trait so that routes only see
//! `Arc<dyn Trait>` and tests can swap in in-memory doubles.

pub mod classifier;
pub mod payments;
pub mod push;

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::Client;

use crate::core::config::AppConfig;

use self::{
    classifier::{ChatCompletionClassifier, IntentClassifier},
    payments::{PaymentProcessor, StripePaymentProcessor},
    push::{FcmPushGateway, PushGateway},
};

pub struct Upstreams {
    pub classifier: Arc<dyn IntentClassifier>,
    pub payments: Arc<dyn PaymentProcessor>,
    pub push: Arc<dyn PushGateway>,
}

impl Upstreams {
    pub fn init(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            classifier: Arc::new(ChatCompletionClassifier::new(
                http_client(config.classifier.timeout)?,
                config.classifier.clone(),
            )),
            payments: Arc::new(StripePaymentProcessor::new(
                http_client(config.payments.timeout)?,
                config.payments.clone(),
            )),
            push: Arc::new(FcmPushGateway::new(
                http_client(config.push.timeout)?,
                config.push.clone(),
            )),
        })
    }
}

/// Every upstream call is bounded by the provider's configured timeout.
fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}
