use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{self as core_config, env_opt, env_or};
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientBillingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreConfig,
    pub smtp: SmtpConfig,
    pub gateway: GatewayConfig,
    pub webhook: WebhookConfig,
    pub reminders: ReminderConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub api_base_url: String,
    pub api_token: Secret<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret. `None` accepts unsigned deliveries.
    pub secret: Option<Secret<String>>,
    /// Operator token for the cross-tenant log listing. `None` disables it.
    pub logs_token: Option<Secret<String>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReminderConfig {
    pub max_attempts: u32,
    pub retry_backoff_hours: i64,
    /// How long one run may hold an invoice before another run can take it.
    pub claim_lease_secs: i64,
}

impl ClientBillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let backend = parse_backend(&env::var("STORE_BACKEND").unwrap_or_else(|_| "postgres".to_string()))?;
        let database_url = env_opt("DATABASE_URL").map(Secret::new);
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_URL is required when STORE_BACKEND=postgres"
            )));
        }

        Ok(ClientBillingConfig {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "client-billing-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env_opt("OTLP_ENDPOINT"),
            store: StoreConfig {
                backend,
                database_url,
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_or("DATABASE_MIN_CONNECTIONS", 2),
            },
            smtp: SmtpConfig {
                enabled: env_or("SMTP_ENABLED", false),
                host: env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: env_or("SMTP_PORT", 587),
                user: env::var("SMTP_USER").unwrap_or_default(),
                password: Secret::new(env::var("SMTP_PASSWORD").unwrap_or_default()),
                from_email: env::var("SMTP_FROM_EMAIL")
                    .unwrap_or_else(|_| "facturation@example.com".to_string()),
                from_name: env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "Facturation".to_string()),
            },
            gateway: GatewayConfig {
                api_base_url: env::var("GATEWAY_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.helcim.com/v2".to_string()),
                api_token: Secret::new(env::var("GATEWAY_API_TOKEN").unwrap_or_default()),
                timeout_secs: env_or("GATEWAY_TIMEOUT_SECS", 10),
            },
            webhook: WebhookConfig {
                secret: env_opt("WEBHOOK_SECRET").map(Secret::new),
                logs_token: env_opt("WEBHOOK_LOGS_TOKEN").map(Secret::new),
            },
            reminders: ReminderConfig {
                max_attempts: env_or("REMINDER_MAX_ATTEMPTS", 3),
                retry_backoff_hours: env_or("REMINDER_RETRY_BACKOFF_HOURS", 24),
                claim_lease_secs: env_or("REMINDER_CLAIM_LEASE_SECS", 300),
            },
        })
    }
}

fn parse_backend(value: &str) -> Result<StoreBackend, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
        "memory" => Ok(StoreBackend::Memory),
        other => Err(AppError::ConfigError(anyhow::anyhow!(
            "Unknown STORE_BACKEND '{}', expected postgres or memory",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        assert_eq!(parse_backend("postgres").unwrap(), StoreBackend::Postgres);
        assert_eq!(parse_backend(" Memory ").unwrap(), StoreBackend::Memory);
        assert!(matches!(
            parse_backend("sqlite"),
            Err(AppError::ConfigError(_))
        ));
    }
}
