//! Unpaid-amount ledger: billable amounts per client, invoiced or not.

use crate::models::{
    CreateUnpaidAmount, InvoiceDetail, InvoiceStatus, LinkedItemRevision, UnpaidAmount,
    UnpaidAmountChanges,
};
use crate::services::invoices::{ensure_cents, CreateInvoiceInput, InvoiceService};
use crate::services::metrics::LEDGER_OPERATIONS_TOTAL;
use crate::services::store::BillingStore;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AddEntryInput {
    pub client_id: Uuid,
    pub amount: Decimal,
    pub description: String,
    pub entry_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceEntriesInput {
    pub unpaid_amount_ids: Vec<Uuid>,
    pub project_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
}

fn validate_amount(amount: Decimal) -> Result<(), AppError> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidInput(anyhow::anyhow!(
            "Amount must be greater than zero, got {}",
            amount
        )));
    }
    ensure_cents(amount)
}

fn validate_description(description: &str) -> Result<(), AppError> {
    if description.trim().is_empty() {
        return Err(AppError::InvalidInput(anyhow::anyhow!(
            "Description must not be empty"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn BillingStore>,
    invoices: InvoiceService,
}

impl LedgerService {
    pub fn new(store: Arc<dyn BillingStore>, invoices: InvoiceService) -> Self {
        Self { store, invoices }
    }

    #[instrument(skip(self, input), fields(client_id = %input.client_id))]
    pub async fn add(&self, user_id: Uuid, input: AddEntryInput) -> Result<UnpaidAmount, AppError> {
        validate_amount(input.amount)?;
        validate_description(&input.description)?;

        self.store
            .get_client(user_id, input.client_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Client {} not found", input.client_id))
            })?;

        let entry = self
            .store
            .create_unpaid_amount(&CreateUnpaidAmount {
                user_id,
                client_id: input.client_id,
                amount: input.amount,
                description: input.description.trim().to_string(),
                entry_date: input.entry_date,
                due_date: input.due_date,
            })
            .await?;

        LEDGER_OPERATIONS_TOTAL.with_label_values(&["add"]).inc();
        info!(unpaid_amount_id = %entry.unpaid_amount_id, amount = %entry.amount, "Unpaid amount added");

        Ok(entry)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, user_id: Uuid, unpaid_amount_id: Uuid) -> Result<UnpaidAmount, AppError> {
        self.store
            .get_unpaid_amount(user_id, unpaid_amount_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Unpaid amount {} not found", unpaid_amount_id))
            })
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        user_id: Uuid,
        client_id: Option<Uuid>,
    ) -> Result<Vec<UnpaidAmount>, AppError> {
        self.store.list_unpaid_amounts(user_id, client_id).await
    }

    /// Edit an entry that is unlinked or linked to a draft invoice. In the
    /// latter case the mirrored line item and the invoice totals follow.
    #[instrument(skip(self, changes))]
    pub async fn edit(
        &self,
        user_id: Uuid,
        unpaid_amount_id: Uuid,
        mut changes: UnpaidAmountChanges,
    ) -> Result<UnpaidAmount, AppError> {
        if let Some(amount) = changes.amount {
            validate_amount(amount)?;
        }
        if let Some(description) = changes.description.as_mut() {
            validate_description(description)?;
            *description = description.trim().to_string();
        }

        let entry = self.get(user_id, unpaid_amount_id).await?;

        let revision = match entry.invoice_id {
            None => None,
            Some(invoice_id) => {
                let detail = self.invoices.get(user_id, invoice_id).await?;
                let status = detail.invoice.status();
                if status != InvoiceStatus::Draft {
                    return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                        "Unpaid amount {} is on invoice {} which is already {}",
                        unpaid_amount_id,
                        detail.invoice.invoice_number,
                        status.as_str()
                    )));
                }
                Some(LinkedItemRevision { invoice_id })
            }
        };

        let updated = self
            .store
            .update_unpaid_amount(user_id, unpaid_amount_id, &changes, revision.as_ref())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Unpaid amount {} not found", unpaid_amount_id))
            })?;

        LEDGER_OPERATIONS_TOTAL.with_label_values(&["edit"]).inc();
        info!(
            unpaid_amount_id = %unpaid_amount_id,
            invoice_id = ?updated.invoice_id,
            "Unpaid amount edited"
        );

        Ok(updated)
    }

    /// Generate a draft invoice whose lines mirror the selected entries.
    #[instrument(skip(self, input), fields(count = input.unpaid_amount_ids.len()))]
    pub async fn invoice_entries(
        &self,
        user_id: Uuid,
        input: InvoiceEntriesInput,
    ) -> Result<InvoiceDetail, AppError> {
        if input.unpaid_amount_ids.is_empty() {
            return Err(AppError::InvalidInput(anyhow::anyhow!(
                "Select at least one unpaid amount to invoice"
            )));
        }

        let entries = self
            .store
            .get_unpaid_amounts(user_id, &input.unpaid_amount_ids)
            .await?;
        let found: HashSet<Uuid> = entries.iter().map(|e| e.unpaid_amount_id).collect();
        if let Some(missing) = input.unpaid_amount_ids.iter().find(|id| !found.contains(id)) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Unpaid amount {} not found",
                missing
            )));
        }

        let clients: HashSet<Uuid> = entries.iter().map(|e| e.client_id).collect();
        let client_id = match clients.len() {
            1 => entries[0].client_id,
            _ => {
                return Err(AppError::InvalidInput(anyhow::anyhow!(
                    "Selected unpaid amounts span multiple clients"
                )))
            }
        };

        let detail = self
            .invoices
            .create(
                user_id,
                CreateInvoiceInput {
                    client_id,
                    project_id: input.project_id,
                    items: Vec::new(),
                    unpaid_amount_ids: input.unpaid_amount_ids,
                    created_at: None,
                    due_date: input.due_date,
                },
            )
            .await?;

        LEDGER_OPERATIONS_TOTAL.with_label_values(&["invoice"]).inc();
        Ok(detail)
    }
}
