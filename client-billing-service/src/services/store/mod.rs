//! Persistence seam for the billing engine.
//!
//! Every method that touches more than one row is a single call so that each
//! backend can make it atomic: `PgStore` wraps it in one transaction,
//! `MemoryStore` holds one lock for its whole duration.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{
    Client, CreateClient, CreateProject, CreateUnpaidAmount, Invoice, InvoiceDetail, InvoiceItem,
    InvoiceTotals, ItemReplacement, LinkedItemRevision, ListInvoicesFilter, NewInvoice, NewReminderLog,
    NewWebhookLog, Project, ReminderLog, StatusChange, SubscriptionUpdate, UnpaidAmount,
    UnpaidAmountChanges, User, WebhookLog, WebhookLogOutcome,
};
use crate::services::tax::compute_totals;
use async_trait::async_trait;
use chrono::Duration;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    async fn insert_user(&self, user: &User) -> Result<User, AppError>;

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError>;

    async fn find_user_by_gateway_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, AppError>;

    async fn update_subscription(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
    ) -> Result<Option<User>, AppError>;

    // -------------------------------------------------------------------------
    // Clients and projects
    // -------------------------------------------------------------------------

    async fn create_client(&self, input: &CreateClient) -> Result<Client, AppError>;

    async fn get_client(&self, user_id: Uuid, client_id: Uuid)
        -> Result<Option<Client>, AppError>;

    async fn create_project(&self, input: &CreateProject) -> Result<Project, AppError>;

    async fn get_project(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Project>, AppError>;

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    /// Allocate the next invoice number, insert the draft with its items and
    /// link the listed ledger entries. Fails with `PreconditionFailed` when an
    /// entry is already linked to another invoice.
    async fn create_invoice(&self, input: &NewInvoice) -> Result<InvoiceDetail, AppError>;

    async fn get_invoice(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceDetail>, AppError>;

    async fn list_invoices(
        &self,
        user_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError>;

    /// Returns `None` when the invoice is missing or no longer in
    /// `change.expected_status`.
    async fn replace_invoice_items(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        change: &ItemReplacement,
    ) -> Result<Option<InvoiceDetail>, AppError>;

    /// Move the invoice from `change.from` to `change.to` and set every linked
    /// ledger entry to `paid` iff the target is `paid`. Returns `None` when the
    /// invoice is missing or no longer in `change.from`.
    async fn apply_status_change(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        change: &StatusChange,
    ) -> Result<Option<InvoiceDetail>, AppError>;

    /// Delete the invoice, its items and reminder logs; linked ledger entries
    /// are unlinked and reset to `unpaid`.
    async fn delete_invoice(&self, user_id: Uuid, invoice_id: Uuid) -> Result<bool, AppError>;

    /// Invoices of every tenant that are `sent` and have a due date.
    async fn list_dunning_candidates(&self) -> Result<Vec<Invoice>, AppError>;

    // -------------------------------------------------------------------------
    // Unpaid-amount ledger
    // -------------------------------------------------------------------------

    async fn create_unpaid_amount(
        &self,
        input: &CreateUnpaidAmount,
    ) -> Result<UnpaidAmount, AppError>;

    async fn get_unpaid_amount(
        &self,
        user_id: Uuid,
        unpaid_amount_id: Uuid,
    ) -> Result<Option<UnpaidAmount>, AppError>;

    async fn get_unpaid_amounts(
        &self,
        user_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<UnpaidAmount>, AppError>;

    async fn list_unpaid_amounts(
        &self,
        user_id: Uuid,
        client_id: Option<Uuid>,
    ) -> Result<Vec<UnpaidAmount>, AppError>;

    /// Apply `changes` to an entry. With `linked`, the entry must still be
    /// linked to that invoice and the invoice must still be `draft`; the
    /// mirrored line items are rewritten and the invoice totals recomputed
    /// from the lines read in the same unit.
    /// Without it the entry must still be unlinked.
    async fn update_unpaid_amount(
        &self,
        user_id: Uuid,
        unpaid_amount_id: Uuid,
        changes: &UnpaidAmountChanges,
        linked: Option<&LinkedItemRevision>,
    ) -> Result<Option<UnpaidAmount>, AppError>;

    // -------------------------------------------------------------------------
    // Reminder and webhook logs
    // -------------------------------------------------------------------------

    /// Take the reminder lease on an invoice for `lease`. Returns the claim
    /// id, or `None` while an unexpired claim from another run holds it.
    async fn claim_reminders(
        &self,
        invoice_id: Uuid,
        lease: Duration,
    ) -> Result<Option<Uuid>, AppError>;

    /// Drop a claim. A claim that expired and was taken over is left alone.
    async fn release_reminders(&self, invoice_id: Uuid, claim_id: Uuid) -> Result<(), AppError>;

    async fn append_reminder_log(&self, input: &NewReminderLog) -> Result<ReminderLog, AppError>;

    /// Logs for one invoice, oldest first.
    async fn list_reminder_logs(&self, invoice_id: Uuid) -> Result<Vec<ReminderLog>, AppError>;

    async fn insert_webhook_log(&self, input: &NewWebhookLog) -> Result<WebhookLog, AppError>;

    async fn finalize_webhook_log(
        &self,
        webhook_log_id: Uuid,
        outcome: &WebhookLogOutcome,
    ) -> Result<(), AppError>;

    /// Most recent first.
    async fn list_webhook_logs(&self, limit: i64) -> Result<Vec<WebhookLog>, AppError>;
}

pub(crate) fn already_linked(unpaid_amount_id: Uuid) -> AppError {
    AppError::PreconditionFailed(anyhow::anyhow!(
        "Unpaid amount {} is already linked to an invoice",
        unpaid_amount_id
    ))
}

pub(crate) fn changed_concurrently(unpaid_amount_id: Uuid) -> AppError {
    AppError::PreconditionFailed(anyhow::anyhow!(
        "Unpaid amount {} changed while it was being edited",
        unpaid_amount_id
    ))
}

/// Totals over the lines an invoice holds right now.
pub(crate) fn totals_of(items: &[InvoiceItem], charges_taxes: bool) -> InvoiceTotals {
    compute_totals(items.iter().map(|item| item.amount), charges_taxes)
}
