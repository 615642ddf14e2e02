//! Account owner (tenant) model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status of an account, driven by payment gateway events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }
}

/// An account owner. Every client, invoice and ledger entry belongs to one.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    /// Whether invoices issued by this user carry TPS/TVQ.
    pub charges_taxes: bool,
    pub tps_number: Option<String>,
    pub tvq_number: Option<String>,
    pub plan: String,
    pub subscription_status: Option<String>,
    /// Customer code assigned by the payment gateway.
    pub gateway_customer_id: Option<String>,
    pub grace_period_end: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, name: &str, charges_taxes: bool) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            charges_taxes,
            tps_number: None,
            tvq_number: None,
            plan: "free".to_string(),
            subscription_status: None,
            gateway_customer_id: None,
            grace_period_end: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn subscription(&self) -> Option<SubscriptionStatus> {
        self.subscription_status
            .as_deref()
            .and_then(SubscriptionStatus::from_string)
    }
}

/// Fields a gateway event may change on an account. `None` leaves a field as is,
/// except `grace_period_end`, which is always written.
#[derive(Debug, Clone)]
pub struct SubscriptionUpdate {
    pub status: SubscriptionStatus,
    pub plan: Option<String>,
    pub grace_period_end: Option<DateTime<Utc>>,
}
