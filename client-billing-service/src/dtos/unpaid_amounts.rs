use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUnpaidAmountRequest {
    pub client_id: Uuid,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 1000))]
    pub description: String,
    #[serde(alias = "date")]
    pub entry_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUnpaidAmountRequest {
    pub amount: Option<Decimal>,
    #[validate(length(min = 1, max = 1000))]
    pub description: Option<String>,
    #[serde(alias = "date")]
    pub entry_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct InvoiceUnpaidAmountsRequest {
    #[validate(length(min = 1))]
    pub unpaid_amount_ids: Vec<Uuid>,
    pub project_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct ListUnpaidAmountsQuery {
    pub client_id: Option<Uuid>,
}
