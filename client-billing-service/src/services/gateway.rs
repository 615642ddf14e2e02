//! Payment gateway REST client.

use crate::config::GatewayConfig;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Failed to reach payment gateway: {0}")]
    Connection(String),

    #[error("Payment gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse payment gateway response: {0}")]
    Decode(String),
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        AppError::BadGateway(e.to_string())
    }
}

/// Transaction identifier as sent by the gateway, either a JSON string or number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionRef {
    Number(u64),
    Text(String),
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionRef::Number(n) => write!(f, "{}", n),
            TransactionRef::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardTransaction {
    pub transaction_id: TransactionRef,
    pub amount: Decimal,
    pub status: String,
    #[serde(default)]
    pub customer_code: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
}

impl CardTransaction {
    pub fn is_approved(&self) -> bool {
        self.status.eq_ignore_ascii_case("APPROVED")
    }
}

#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
    api_token: Secret<String>,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to build gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    #[instrument(skip(self), fields(transaction_id = %id))]
    pub async fn fetch_card_transaction(
        &self,
        id: &TransactionRef,
    ) -> Result<CardTransaction, GatewayError> {
        let url = format!("{}/card-transactions/{}", self.base_url, id);

        let response = self
            .client
            .get(&url)
            .header("api-token", self.api_token.expose_secret())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| GatewayError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status, body });
        }

        response
            .json::<CardTransaction>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ref_accepts_string_or_number() {
        let n: TransactionRef = serde_json::from_str("25764674").unwrap();
        let s: TransactionRef = serde_json::from_str("\"txn-42\"").unwrap();

        assert_eq!(n.to_string(), "25764674");
        assert_eq!(s.to_string(), "txn-42");
    }

    #[test]
    fn test_card_transaction_parses_camel_case() {
        let tx: CardTransaction = serde_json::from_str(
            r#"{"transactionId": 991, "amount": 19.99, "status": "APPROVED", "customerCode": "CST1001"}"#,
        )
        .unwrap();

        assert!(tx.is_approved());
        assert_eq!(tx.customer_code.as_deref(), Some("CST1001"));
        assert_eq!(tx.invoice_number, None);
    }
}
