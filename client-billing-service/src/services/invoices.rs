//! Invoice lifecycle: creation, item edits and status transitions.

use crate::models::{
    Client, InvoiceDetail, InvoiceStatus, ItemReplacement, ListInvoicesFilter, NewInvoice,
    NewInvoiceItem, StatusChange, UnpaidAmount, Invoice,
};
use crate::services::email::EmailProvider;
use crate::services::lifecycle::{ensure_editable, plan_transition, Plan, Transition};
use crate::services::metrics::INVOICE_TRANSITIONS_TOTAL;
use crate::services::store::BillingStore;
use crate::services::tax::compute_totals;
use crate::services::templates;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct CreateInvoiceInput {
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub items: Vec<NewInvoiceItem>,
    /// Ledger entries whose description, amount and date become line items.
    pub unpaid_amount_ids: Vec<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateInvoiceInput {
    pub items: Option<Vec<NewInvoiceItem>>,
    pub created_at: Option<DateTime<Utc>>,
    pub due_date: Option<NaiveDate>,
}

fn not_found(invoice_id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice_id))
}

fn validate_item(item: &NewInvoiceItem) -> Result<(), AppError> {
    if item.description.trim().is_empty() {
        return Err(AppError::InvalidInput(anyhow::anyhow!(
            "Line item description must not be empty"
        )));
    }
    if item.amount < Decimal::ZERO {
        return Err(AppError::InvalidInput(anyhow::anyhow!(
            "Line item amount must not be negative, got {}",
            item.amount
        )));
    }
    ensure_cents(item.amount)
}

/// Amounts must be whole cents; money columns are `NUMERIC(14,2)`.
pub(crate) fn ensure_cents(amount: Decimal) -> Result<(), AppError> {
    if amount.normalize().scale() > 2 {
        return Err(AppError::InvalidInput(anyhow::anyhow!(
            "Amount {} has more than two decimal places",
            amount
        )));
    }
    Ok(())
}

fn mirror_item(entry: &UnpaidAmount) -> NewInvoiceItem {
    NewInvoiceItem {
        description: entry.description.clone(),
        amount: entry.amount,
        item_date: Some(entry.entry_date),
        unpaid_amount_id: Some(entry.unpaid_amount_id),
    }
}

fn dedup(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn BillingStore>,
    email: Arc<dyn EmailProvider>,
}

impl InvoiceService {
    pub fn new(store: Arc<dyn BillingStore>, email: Arc<dyn EmailProvider>) -> Self {
        Self { store, email }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, user_id: Uuid, invoice_id: Uuid) -> Result<InvoiceDetail, AppError> {
        self.store
            .get_invoice(user_id, invoice_id)
            .await?
            .ok_or_else(|| not_found(invoice_id))
    }

    #[instrument(skip(self, filter))]
    pub async fn list(
        &self,
        user_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        self.store.list_invoices(user_id, filter).await
    }

    #[instrument(skip(self, input), fields(client_id = %input.client_id))]
    pub async fn create(
        &self,
        user_id: Uuid,
        input: CreateInvoiceInput,
    ) -> Result<InvoiceDetail, AppError> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)))?;
        let client = self.require_client(user_id, input.client_id).await?;

        if let Some(project_id) = input.project_id {
            let project = self
                .store
                .get_project(user_id, project_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!("Project {} not found", project_id))
                })?;
            if project.client_id != client.client_id {
                return Err(AppError::InvalidInput(anyhow::anyhow!(
                    "Project {} belongs to another client",
                    project_id
                )));
            }
        }

        for item in &input.items {
            validate_item(item)?;
            if item.unpaid_amount_id.is_some() {
                return Err(AppError::InvalidInput(anyhow::anyhow!(
                    "Ledger entries are linked through unpaid_amount_ids, not on items"
                )));
            }
        }

        let unpaid_amount_ids = dedup(&input.unpaid_amount_ids);
        let entries = self.store.get_unpaid_amounts(user_id, &unpaid_amount_ids).await?;
        if entries.len() != unpaid_amount_ids.len() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "One or more unpaid amounts were not found"
            )));
        }
        for entry in &entries {
            if entry.client_id != client.client_id {
                return Err(AppError::InvalidInput(anyhow::anyhow!(
                    "Unpaid amount {} belongs to another client",
                    entry.unpaid_amount_id
                )));
            }
            if entry.invoice_id.is_some() {
                return Err(AppError::PreconditionFailed(anyhow::anyhow!(
                    "Unpaid amount {} is already linked to an invoice",
                    entry.unpaid_amount_id
                )));
            }
        }

        let mut items = input.items;
        items.extend(entries.iter().map(mirror_item));
        if items.is_empty() {
            return Err(AppError::InvalidInput(anyhow::anyhow!(
                "An invoice needs at least one line item"
            )));
        }

        let totals = compute_totals(items.iter().map(|i| i.amount), user.charges_taxes);
        let detail = self
            .store
            .create_invoice(&NewInvoice {
                user_id,
                client_id: client.client_id,
                project_id: input.project_id,
                charges_taxes: user.charges_taxes,
                totals,
                created_at: input.created_at.unwrap_or_else(Utc::now),
                due_date: input.due_date,
                items,
                unpaid_amount_ids,
            })
            .await?;

        INVOICE_TRANSITIONS_TOTAL
            .with_label_values(&["none", InvoiceStatus::Draft.as_str()])
            .inc();
        info!(
            invoice_id = %detail.invoice.invoice_id,
            invoice_number = detail.invoice.invoice_number,
            total = %detail.invoice.total,
            "Draft invoice created"
        );

        Ok(detail)
    }

    /// Replace items and/or dates. The store recomputes totals from the lines
    /// it ends up holding, with the tax decision recorded at creation.
    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        input: UpdateInvoiceInput,
    ) -> Result<InvoiceDetail, AppError> {
        let detail = self.get(user_id, invoice_id).await?;
        let status = detail.invoice.status();
        ensure_editable(status)?;

        let linked: HashSet<Uuid> = detail.linked_unpaid_amount_ids().into_iter().collect();

        let (items, released) = match input.items {
            Some(items) => {
                if items.is_empty() {
                    return Err(AppError::InvalidInput(anyhow::anyhow!(
                        "An invoice needs at least one line item"
                    )));
                }
                let items = self.resolve_items(user_id, items, &linked).await?;
                let referenced: HashSet<Uuid> =
                    items.iter().filter_map(|i| i.unpaid_amount_id).collect();
                let released: Vec<Uuid> = linked.difference(&referenced).copied().collect();
                (Some(items), released)
            }
            None => (None, Vec::new()),
        };

        let change = ItemReplacement {
            expected_status: status,
            items,
            created_at: input.created_at,
            due_date: input.due_date,
            released_unpaid_amount_ids: released,
        };

        match self
            .store
            .replace_invoice_items(user_id, invoice_id, &change)
            .await?
        {
            Some(updated) => {
                info!(
                    invoice_id = %invoice_id,
                    total = %updated.invoice.total,
                    released = change.released_unpaid_amount_ids.len(),
                    "Invoice updated"
                );
                Ok(updated)
            }
            None => {
                let current = self.get(user_id, invoice_id).await?;
                ensure_editable(current.invoice.status())?;
                Err(AppError::PreconditionFailed(anyhow::anyhow!(
                    "Invoice {} changed while it was being edited",
                    invoice_id
                )))
            }
        }
    }

    /// Items that reference a ledger entry must reference one already linked
    /// to this invoice; their content is taken from the entry.
    async fn resolve_items(
        &self,
        user_id: Uuid,
        items: Vec<NewInvoiceItem>,
        linked: &HashSet<Uuid>,
    ) -> Result<Vec<NewInvoiceItem>, AppError> {
        let referenced: Vec<Uuid> = dedup(
            &items
                .iter()
                .filter_map(|i| i.unpaid_amount_id)
                .collect::<Vec<_>>(),
        );
        if let Some(id) = referenced.iter().find(|id| !linked.contains(id)) {
            return Err(AppError::InvalidInput(anyhow::anyhow!(
                "Unpaid amount {} is not linked to this invoice",
                id
            )));
        }
        let entries = self.store.get_unpaid_amounts(user_id, &referenced).await?;

        items
            .into_iter()
            .map(|item| match item.unpaid_amount_id {
                Some(id) => entries
                    .iter()
                    .find(|e| e.unpaid_amount_id == id)
                    .map(mirror_item)
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!("Unpaid amount {} not found", id))
                    }),
                None => validate_item(&item).map(|_| item),
            })
            .collect()
    }

    pub async fn send(&self, user_id: Uuid, invoice_id: Uuid) -> Result<InvoiceDetail, AppError> {
        self.transition(user_id, invoice_id, Transition::Send).await
    }

    pub async fn mark_paid(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<InvoiceDetail, AppError> {
        self.transition(user_id, invoice_id, Transition::MarkPaid)
            .await
    }

    pub async fn archive(&self, user_id: Uuid, invoice_id: Uuid) -> Result<InvoiceDetail, AppError> {
        self.transition(user_id, invoice_id, Transition::Archive)
            .await
    }

    pub async fn unarchive(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<InvoiceDetail, AppError> {
        self.transition(user_id, invoice_id, Transition::Unarchive)
            .await
    }

    #[instrument(skip(self), fields(transition = transition.as_str()))]
    async fn transition(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        transition: Transition,
    ) -> Result<InvoiceDetail, AppError> {
        let detail = self.get(user_id, invoice_id).await?;
        let from = detail.invoice.status();

        let to = match plan_transition(from, transition)? {
            Plan::Unchanged => return Ok(detail),
            Plan::Apply(to) => to,
        };

        if transition == Transition::Send {
            self.deliver(user_id, &detail.invoice).await?;
        }

        let change = StatusChange {
            from,
            to,
            at: Utc::now(),
        };

        if let Some(updated) = self
            .store
            .apply_status_change(user_id, invoice_id, &change)
            .await?
        {
            INVOICE_TRANSITIONS_TOTAL
                .with_label_values(&[from.as_str(), to.as_str()])
                .inc();
            info!(
                invoice_id = %invoice_id,
                from = from.as_str(),
                to = to.as_str(),
                "Invoice status changed"
            );
            return Ok(updated);
        }

        // Status moved underneath us; settle on the fresh state.
        let current = self.get(user_id, invoice_id).await?;
        match plan_transition(current.invoice.status(), transition)? {
            Plan::Unchanged => Ok(current),
            Plan::Apply(_) => {
                warn!(invoice_id = %invoice_id, "Concurrent status change detected");
                Err(AppError::PreconditionFailed(anyhow::anyhow!(
                    "Invoice {} changed while it was being updated",
                    invoice_id
                )))
            }
        }
    }

    async fn deliver(&self, user_id: Uuid, invoice: &Invoice) -> Result<(), AppError> {
        let client: Client = self.require_client(user_id, invoice.client_id).await?;
        let to = client.billing_email().ok_or_else(|| {
            AppError::PreconditionFailed(anyhow::anyhow!(
                "Client {} has no email address on file",
                client.client_id
            ))
        })?;
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", user_id)))?;

        let message = templates::invoice_email(to, &user, &client, invoice);
        self.email.send(&message).await.map_err(|e| {
            warn!(invoice_id = %invoice.invoice_id, error = %e, "Invoice email failed");
            AppError::BadGateway(format!("Failed to send invoice email: {}", e))
        })
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, invoice_id: Uuid) -> Result<(), AppError> {
        if !self.store.delete_invoice(user_id, invoice_id).await? {
            return Err(not_found(invoice_id));
        }
        info!(invoice_id = %invoice_id, "Invoice deleted");
        Ok(())
    }

    async fn require_client(&self, user_id: Uuid, client_id: Uuid) -> Result<Client, AppError> {
        self.store
            .get_client(user_id, client_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client {} not found", client_id)))
    }
}
