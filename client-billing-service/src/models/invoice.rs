//! Invoice model for client-billing-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice status. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Archived,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Archived => "archived",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => InvoiceStatus::Sent,
            "paid" => InvoiceStatus::Paid,
            "archived" => InvoiceStatus::Archived,
            _ => InvoiceStatus::Draft,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(InvoiceStatus::Draft),
            "sent" => Some(InvoiceStatus::Sent),
            "paid" => Some(InvoiceStatus::Paid),
            "archived" => Some(InvoiceStatus::Archived),
            _ => None,
        }
    }
}

/// Invoice header row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub invoice_number: i64,
    pub status: String,
    /// Tax decision taken at creation, reused on every recomputation.
    pub charges_taxes: bool,
    pub subtotal: Decimal,
    pub tps: Decimal,
    pub tvq: Decimal,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub due_date: Option<NaiveDate>,
    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    pub fn status(&self) -> InvoiceStatus {
        InvoiceStatus::from_string(&self.status)
    }

    pub fn totals(&self) -> InvoiceTotals {
        InvoiceTotals {
            subtotal: self.subtotal,
            tps: self.tps,
            tvq: self.tvq,
            total: self.total,
        }
    }
}

/// Line item on an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub item_date: Option<NaiveDate>,
    /// Ledger entry this line mirrors, when generated from one.
    pub unpaid_amount_id: Option<Uuid>,
    pub position: i32,
}

/// An invoice together with its ordered line items.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

impl InvoiceDetail {
    /// Ids of the ledger entries mirrored by this invoice's lines.
    pub fn linked_unpaid_amount_ids(&self) -> Vec<Uuid> {
        self.items
            .iter()
            .filter_map(|item| item.unpaid_amount_id)
            .collect()
    }
}

/// Derived monetary fields. `total == subtotal + tps + tvq` by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tps: Decimal,
    pub tvq: Decimal,
    pub total: Decimal,
}

/// Line item to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoiceItem {
    pub description: String,
    pub amount: Decimal,
    pub item_date: Option<NaiveDate>,
    pub unpaid_amount_id: Option<Uuid>,
}

/// Fully validated draft invoice, ready to persist.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub charges_taxes: bool,
    pub totals: InvoiceTotals,
    pub created_at: DateTime<Utc>,
    pub due_date: Option<NaiveDate>,
    pub items: Vec<NewInvoiceItem>,
    /// Ledger entries to link; each must still be unlinked when the row is written.
    pub unpaid_amount_ids: Vec<Uuid>,
}

/// Replacement of an invoice's items and/or dates.
#[derive(Debug, Clone)]
pub struct ItemReplacement {
    /// Status observed when the change was planned; the write is skipped otherwise.
    pub expected_status: InvoiceStatus,
    /// Totals are recomputed from the resulting lines inside the write.
    pub items: Option<Vec<NewInvoiceItem>>,
    pub created_at: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
    /// Linked ledger entries no longer mirrored by any line; they are unlinked.
    pub released_unpaid_amount_ids: Vec<Uuid>,
}

/// A planned status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    /// `paid_at` after the change given its current value.
    pub fn paid_at(&self, current: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self.to {
            InvoiceStatus::Paid => Some(self.at),
            InvoiceStatus::Draft => None,
            InvoiceStatus::Sent | InvoiceStatus::Archived => current,
        }
    }

    /// `sent_at` after the change given its current value.
    pub fn sent_at(&self, current: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self.to {
            InvoiceStatus::Sent => Some(self.at),
            InvoiceStatus::Draft => None,
            InvoiceStatus::Paid | InvoiceStatus::Archived => current,
        }
    }
}

/// Filter parameters for listing invoices.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<Uuid>,
}
