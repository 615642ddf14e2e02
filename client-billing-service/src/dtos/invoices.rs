use crate::models::{Invoice, InvoiceDetail, InvoiceItem, InvoiceStatus, NewInvoiceItem};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InvoiceItemRequest {
    #[validate(length(min = 1, max = 1000))]
    pub description: String,
    pub amount: Decimal,
    pub item_date: Option<NaiveDate>,
    pub unpaid_amount_id: Option<Uuid>,
}

impl From<InvoiceItemRequest> for NewInvoiceItem {
    fn from(item: InvoiceItemRequest) -> Self {
        NewInvoiceItem {
            description: item.description,
            amount: item.amount,
            item_date: item.item_date,
            unpaid_amount_id: item.unpaid_amount_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<InvoiceItemRequest>,
    #[serde(default)]
    pub unpaid_amount_ids: Vec<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInvoiceRequest {
    pub items: Option<Vec<InvoiceItemRequest>>,
    pub created_at: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<InvoiceStatus>,
    pub client_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub unpaid_amount_ids: Vec<Uuid>,
}

impl From<InvoiceDetail> for InvoiceResponse {
    fn from(detail: InvoiceDetail) -> Self {
        let unpaid_amount_ids = detail.linked_unpaid_amount_ids();
        Self {
            invoice: detail.invoice,
            items: detail.items,
            unpaid_amount_ids,
        }
    }
}
