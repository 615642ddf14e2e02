//! Inbound webhook audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookLog {
    pub webhook_log_id: Uuid,
    pub endpoint: String,
    pub method: String,
    pub headers: serde_json::Value,
    pub body: String,
    pub signature: Option<String>,
    /// HTTP status returned to the gateway; 202 while processing is in flight.
    pub status: i32,
    pub error: Option<String>,
    pub debug_info: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookLog {
    pub endpoint: String,
    pub method: String,
    pub headers: serde_json::Value,
    pub body: String,
    pub signature: Option<String>,
    pub status: i32,
    pub error: Option<String>,
    /// Set when the row is final on insert (rejected requests).
    pub processed_at: Option<DateTime<Utc>>,
}

/// Final state written back onto a log row after dispatch.
#[derive(Debug, Clone)]
pub struct WebhookLogOutcome {
    pub status: i32,
    pub error: Option<String>,
    pub debug_info: Option<String>,
    pub processed_at: DateTime<Utc>,
}
