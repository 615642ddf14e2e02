//! Unpaid-amount ledger entry model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnpaidAmountStatus {
    Unpaid,
    Paid,
}

impl UnpaidAmountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnpaidAmountStatus::Unpaid => "unpaid",
            UnpaidAmountStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "paid" => UnpaidAmountStatus::Paid,
            _ => UnpaidAmountStatus::Unpaid,
        }
    }
}

/// A billable amount owed by a client, invoiced or not.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UnpaidAmount {
    pub unpaid_amount_id: Uuid,
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub entry_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: String,
    pub invoice_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl UnpaidAmount {
    pub fn status(&self) -> UnpaidAmountStatus {
        UnpaidAmountStatus::from_string(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct CreateUnpaidAmount {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub entry_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
}

/// Partial edit of a ledger entry.
#[derive(Debug, Clone, Default)]
pub struct UnpaidAmountChanges {
    pub amount: Option<Decimal>,
    pub description: Option<String>,
    pub entry_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

/// Draft invoice whose mirrored lines follow an edited entry. The store
/// recomputes that invoice's totals from the lines it holds at write time.
#[derive(Debug, Clone, Copy)]
pub struct LinkedItemRevision {
    pub invoice_id: Uuid,
}
