use std::{env, time::Duration};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// OpenAI-compatible chat completion endpoint used to classify utterances.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub url: String,
    pub secret_key: String,
    pub currency: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub server_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub pending_intent_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub low_stock_threshold: i64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub classifier: ClassifierConfig,
    pub payments: PaymentsConfig,
    pub push: PushConfig,
    pub assistant: AssistantConfig,
    pub checkout: CheckoutConfig,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn secs_or(name: &str, default: u64) -> Result<Duration> {
    parsed_or(name, default).map(Duration::from_secs)
}

/// Loads the configuration from the process environment (after `.env`, see `bootstrap::init_env`).
/// Only `DATABASE_URL` is mandatory.
pub fn load() -> Result<AppConfig> {
    let database_url = env::var("DATABASE_URL").context("Missing environment variable DATABASE_URL")?;

    Ok(AppConfig {
        server: ServerConfig {
            host: var_or("SERVER_HOST", "0.0.0.0"),
            port: parsed_or("SERVER_PORT", 3000)?,
        },
        database: DatabaseConfig {
            url: database_url,
            max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10)?,
        },
        classifier: ClassifierConfig {
            url: var_or("CLASSIFIER_URL", "https://api.groq.com/openai/v1"),
            api_key: var_or("CLASSIFIER_API_KEY", ""),
            model: var_or("CLASSIFIER_MODEL", "llama3-8b-8192"),
            timeout: secs_or("CLASSIFIER_TIMEOUT_SECS", 10)?,
        },
        payments: PaymentsConfig {
            url: var_or("PAYMENTS_URL", "https://api.stripe.com"),
            secret_key: var_or("PAYMENTS_SECRET_KEY", ""),
            currency: var_or("PAYMENTS_CURRENCY", "usd"),
            timeout: secs_or("PAYMENTS_TIMEOUT_SECS", 10)?,
        },
        push: PushConfig {
            url: var_or("PUSH_URL", "https://fcm.googleapis.com/fcm/send"),
            server_key: var_or("PUSH_SERVER_KEY", ""),
            timeout: secs_or("PUSH_TIMEOUT_SECS", 5)?,
        },
        assistant: AssistantConfig {
            pending_intent_ttl: secs_or("ASSISTANT_PENDING_INTENT_TTL_SECS", 300)?,
        },
        checkout: CheckoutConfig {
            low_stock_threshold: parsed_or("LOW_STOCK_THRESHOLD", 5)?,
        },
    })
}
