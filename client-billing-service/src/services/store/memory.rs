//! In-process backend for tests and single-node development.

use super::{already_linked, changed_concurrently, totals_of, BillingStore};
use crate::models::{
    Client, CreateClient, CreateProject, CreateUnpaidAmount, Invoice, InvoiceDetail, InvoiceItem,
    InvoiceStatus, ItemReplacement, LinkedItemRevision, ListInvoicesFilter, NewInvoice,
    NewInvoiceItem, NewReminderLog, NewWebhookLog, Project, ReminderLog, StatusChange,
    SubscriptionUpdate, UnpaidAmount, UnpaidAmountChanges, UnpaidAmountStatus, User, WebhookLog,
    WebhookLogOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    invoice_counters: HashMap<Uuid, i64>,
    clients: HashMap<Uuid, Client>,
    projects: HashMap<Uuid, Project>,
    invoices: HashMap<Uuid, Invoice>,
    /// Line items keyed by invoice, kept in position order.
    items: HashMap<Uuid, Vec<InvoiceItem>>,
    unpaid_amounts: HashMap<Uuid, UnpaidAmount>,
    reminder_logs: Vec<ReminderLog>,
    /// Reminder leases: claim id and expiry per invoice.
    reminder_claims: HashMap<Uuid, (Uuid, DateTime<Utc>)>,
    webhook_logs: Vec<WebhookLog>,
}

impl State {
    fn owned_invoice(&self, user_id: Uuid, invoice_id: Uuid) -> Option<&Invoice> {
        self.invoices
            .get(&invoice_id)
            .filter(|invoice| invoice.user_id == user_id)
    }

    fn detail(&self, invoice_id: Uuid) -> Option<InvoiceDetail> {
        let invoice = self.invoices.get(&invoice_id)?.clone();
        let items = self.items.get(&invoice_id).cloned().unwrap_or_default();
        Some(InvoiceDetail { invoice, items })
    }

    /// Recompute an invoice's totals from the lines it currently holds.
    fn refresh_totals(&mut self, invoice_id: Uuid, now: DateTime<Utc>) {
        let Some(invoice) = self.invoices.get_mut(&invoice_id) else {
            return;
        };
        let items = self.items.get(&invoice_id).map(Vec::as_slice).unwrap_or_default();
        let totals = totals_of(items, invoice.charges_taxes);
        invoice.subtotal = totals.subtotal;
        invoice.tps = totals.tps;
        invoice.tvq = totals.tvq;
        invoice.total = totals.total;
        invoice.updated_utc = now;
    }

    fn set_ledger_status(&mut self, invoice_id: Uuid, status: UnpaidAmountStatus, now: DateTime<Utc>) {
        for entry in self
            .unpaid_amounts
            .values_mut()
            .filter(|entry| entry.invoice_id == Some(invoice_id))
        {
            entry.status = status.as_str().to_string();
            entry.updated_utc = now;
        }
    }

    fn release(&mut self, unpaid_amount_id: Uuid, now: DateTime<Utc>) {
        if let Some(entry) = self.unpaid_amounts.get_mut(&unpaid_amount_id) {
            entry.invoice_id = None;
            entry.status = UnpaidAmountStatus::Unpaid.as_str().to_string();
            entry.updated_utc = now;
        }
    }
}

fn build_items(invoice_id: Uuid, items: &[NewInvoiceItem]) -> Vec<InvoiceItem> {
    items
        .iter()
        .enumerate()
        .map(|(position, item)| InvoiceItem {
            item_id: Uuid::new_v4(),
            invoice_id,
            description: item.description.clone(),
            amount: item.amount,
            item_date: item.item_date,
            unpaid_amount_id: item.unpaid_amount_id,
            position: position as i32,
        })
        .collect()
}

/// Billing store held entirely in memory behind one async lock.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<User, AppError> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(&user.user_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "User {} already exists",
                user.user_id
            )));
        }
        if let Some(customer) = &user.gateway_customer_id {
            if state
                .users
                .values()
                .any(|u| u.gateway_customer_id.as_ref() == Some(customer))
            {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Gateway customer {} is already assigned",
                    customer
                )));
            }
        }
        state.users.insert(user.user_id, user.clone());
        state.invoice_counters.insert(user.user_id, 0);
        Ok(user.clone())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_gateway_customer(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.gateway_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn update_subscription(
        &self,
        user_id: Uuid,
        update: &SubscriptionUpdate,
    ) -> Result<Option<User>, AppError> {
        let mut state = self.state.lock().await;
        let Some(user) = state.users.get_mut(&user_id) else {
            return Ok(None);
        };
        user.subscription_status = Some(update.status.as_str().to_string());
        if let Some(plan) = &update.plan {
            user.plan = plan.clone();
        }
        user.grace_period_end = update.grace_period_end;
        user.updated_utc = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn create_client(&self, input: &CreateClient) -> Result<Client, AppError> {
        let client = Client {
            client_id: Uuid::new_v4(),
            user_id: input.user_id,
            name: input.name.clone(),
            email: input.email.clone(),
            created_utc: Utc::now(),
        };
        let mut state = self.state.lock().await;
        state.clients.insert(client.client_id, client.clone());
        Ok(client)
    }

    async fn get_client(
        &self,
        user_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Client>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .clients
            .get(&client_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn create_project(&self, input: &CreateProject) -> Result<Project, AppError> {
        let project = Project {
            project_id: Uuid::new_v4(),
            user_id: input.user_id,
            client_id: input.client_id,
            name: input.name.clone(),
            created_utc: Utc::now(),
        };
        let mut state = self.state.lock().await;
        state.projects.insert(project.project_id, project.clone());
        Ok(project)
    }

    async fn get_project(
        &self,
        user_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Project>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .projects
            .get(&project_id)
            .filter(|p| p.user_id == user_id)
            .cloned())
    }

    async fn create_invoice(&self, input: &NewInvoice) -> Result<InvoiceDetail, AppError> {
        let mut state = self.state.lock().await;

        for id in &input.unpaid_amount_ids {
            match state.unpaid_amounts.get(id) {
                Some(entry) if entry.user_id == input.user_id => {
                    if entry.invoice_id.is_some() {
                        return Err(already_linked(*id));
                    }
                }
                _ => {
                    return Err(AppError::NotFound(anyhow::anyhow!(
                        "Unpaid amount {} not found",
                        id
                    )))
                }
            }
        }

        let counter = state.invoice_counters.entry(input.user_id).or_insert(0);
        *counter += 1;
        let invoice_number = *counter;

        let now = Utc::now();
        let invoice = Invoice {
            invoice_id: Uuid::new_v4(),
            user_id: input.user_id,
            client_id: input.client_id,
            project_id: input.project_id,
            invoice_number,
            status: InvoiceStatus::Draft.as_str().to_string(),
            charges_taxes: input.charges_taxes,
            subtotal: input.totals.subtotal,
            tps: input.totals.tps,
            tvq: input.totals.tvq,
            total: input.totals.total,
            created_at: input.created_at,
            due_date: input.due_date,
            sent_at: None,
            paid_at: None,
            updated_utc: now,
        };
        let invoice_id = invoice.invoice_id;

        for id in &input.unpaid_amount_ids {
            if let Some(entry) = state.unpaid_amounts.get_mut(id) {
                entry.invoice_id = Some(invoice_id);
                entry.updated_utc = now;
            }
        }
        state.items.insert(invoice_id, build_items(invoice_id, &input.items));
        state.invoices.insert(invoice_id, invoice);

        state
            .detail(invoice_id)
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Invoice vanished after insert")))
    }

    async fn get_invoice(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let state = self.state.lock().await;
        if state.owned_invoice(user_id, invoice_id).is_none() {
            return Ok(None);
        }
        Ok(state.detail(invoice_id))
    }

    async fn list_invoices(
        &self,
        user_id: Uuid,
        filter: &ListInvoicesFilter,
    ) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.user_id == user_id)
            .filter(|i| filter.status.map_or(true, |s| i.status() == s))
            .filter(|i| filter.client_id.map_or(true, |c| i.client_id == c))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.invoice_number.cmp(&a.invoice_number));
        Ok(invoices)
    }

    async fn replace_invoice_items(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        change: &ItemReplacement,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let mut state = self.state.lock().await;
        match state.owned_invoice(user_id, invoice_id) {
            Some(invoice) if invoice.status() == change.expected_status => {}
            _ => return Ok(None),
        }

        let now = Utc::now();
        if let Some(items) = &change.items {
            state.items.insert(invoice_id, build_items(invoice_id, items));
        }
        for id in &change.released_unpaid_amount_ids {
            state.release(*id, now);
        }
        if let Some(invoice) = state.invoices.get_mut(&invoice_id) {
            if let Some(created_at) = change.created_at {
                invoice.created_at = created_at;
            }
            if let Some(due_date) = change.due_date {
                invoice.due_date = Some(due_date);
            }
        }
        state.refresh_totals(invoice_id, now);
        Ok(state.detail(invoice_id))
    }

    async fn apply_status_change(
        &self,
        user_id: Uuid,
        invoice_id: Uuid,
        change: &StatusChange,
    ) -> Result<Option<InvoiceDetail>, AppError> {
        let mut state = self.state.lock().await;
        let Some(invoice) = state
            .invoices
            .get_mut(&invoice_id)
            .filter(|i| i.user_id == user_id && i.status() == change.from)
        else {
            return Ok(None);
        };

        invoice.status = change.to.as_str().to_string();
        invoice.paid_at = change.paid_at(invoice.paid_at);
        invoice.sent_at = change.sent_at(invoice.sent_at);
        invoice.updated_utc = change.at;

        let ledger_status = if change.to == InvoiceStatus::Paid {
            UnpaidAmountStatus::Paid
        } else {
            UnpaidAmountStatus::Unpaid
        };
        state.set_ledger_status(invoice_id, ledger_status, change.at);
        Ok(state.detail(invoice_id))
    }

    async fn delete_invoice(&self, user_id: Uuid, invoice_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        if state.owned_invoice(user_id, invoice_id).is_none() {
            return Ok(false);
        }

        let now = Utc::now();
        let linked: Vec<Uuid> = state
            .unpaid_amounts
            .values()
            .filter(|entry| entry.invoice_id == Some(invoice_id))
            .map(|entry| entry.unpaid_amount_id)
            .collect();
        for id in linked {
            state.release(id, now);
        }
        state.items.remove(&invoice_id);
        state.reminder_logs.retain(|log| log.invoice_id != invoice_id);
        state.reminder_claims.remove(&invoice_id);
        state.invoices.remove(&invoice_id);
        Ok(true)
    }

    async fn list_dunning_candidates(&self) -> Result<Vec<Invoice>, AppError> {
        let state = self.state.lock().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.status() == InvoiceStatus::Sent && i.due_date.is_some())
            .cloned()
            .collect();
        invoices.sort_by_key(|i| (i.due_date, i.invoice_number));
        Ok(invoices)
    }

    async fn create_unpaid_amount(
        &self,
        input: &CreateUnpaidAmount,
    ) -> Result<UnpaidAmount, AppError> {
        let now = Utc::now();
        let entry = UnpaidAmount {
            unpaid_amount_id: Uuid::new_v4(),
            user_id: input.user_id,
            client_id: input.client_id,
            amount: input.amount,
            description: input.description.clone(),
            entry_date: input.entry_date,
            due_date: input.due_date,
            status: UnpaidAmountStatus::Unpaid.as_str().to_string(),
            invoice_id: None,
            created_utc: now,
            updated_utc: now,
        };
        let mut state = self.state.lock().await;
        state
            .unpaid_amounts
            .insert(entry.unpaid_amount_id, entry.clone());
        Ok(entry)
    }

    async fn get_unpaid_amount(
        &self,
        user_id: Uuid,
        unpaid_amount_id: Uuid,
    ) -> Result<Option<UnpaidAmount>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .unpaid_amounts
            .get(&unpaid_amount_id)
            .filter(|e| e.user_id == user_id)
            .cloned())
    }

    async fn get_unpaid_amounts(
        &self,
        user_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<UnpaidAmount>, AppError> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.unpaid_amounts.get(id))
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_unpaid_amounts(
        &self,
        user_id: Uuid,
        client_id: Option<Uuid>,
    ) -> Result<Vec<UnpaidAmount>, AppError> {
        let state = self.state.lock().await;
        let mut entries: Vec<UnpaidAmount> = state
            .unpaid_amounts
            .values()
            .filter(|e| e.user_id == user_id)
            .filter(|e| client_id.map_or(true, |c| e.client_id == c))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.entry_date, e.created_utc));
        Ok(entries)
    }

    async fn update_unpaid_amount(
        &self,
        user_id: Uuid,
        unpaid_amount_id: Uuid,
        changes: &UnpaidAmountChanges,
        linked: Option<&LinkedItemRevision>,
    ) -> Result<Option<UnpaidAmount>, AppError> {
        let mut state = self.state.lock().await;
        let Some(current) = state
            .unpaid_amounts
            .get(&unpaid_amount_id)
            .filter(|e| e.user_id == user_id)
        else {
            return Ok(None);
        };
        if current.invoice_id != linked.map(|l| l.invoice_id) {
            return Err(changed_concurrently(unpaid_amount_id));
        }
        if let Some(revision) = linked {
            let still_draft = state
                .invoices
                .get(&revision.invoice_id)
                .is_some_and(|i| i.status() == InvoiceStatus::Draft);
            if !still_draft {
                return Err(changed_concurrently(unpaid_amount_id));
            }
        }

        let now = Utc::now();
        let Some(entry) = state.unpaid_amounts.get_mut(&unpaid_amount_id) else {
            return Ok(None);
        };
        if let Some(amount) = changes.amount {
            entry.amount = amount;
        }
        if let Some(description) = &changes.description {
            entry.description = description.clone();
        }
        if let Some(entry_date) = changes.entry_date {
            entry.entry_date = entry_date;
        }
        if let Some(due_date) = changes.due_date {
            entry.due_date = Some(due_date);
        }
        entry.updated_utc = now;
        let updated = entry.clone();

        if let Some(revision) = linked {
            if let Some(items) = state.items.get_mut(&revision.invoice_id) {
                for item in items
                    .iter_mut()
                    .filter(|item| item.unpaid_amount_id == Some(unpaid_amount_id))
                {
                    item.description = updated.description.clone();
                    item.amount = updated.amount;
                    item.item_date = Some(updated.entry_date);
                }
            }
            state.refresh_totals(revision.invoice_id, now);
        }
        Ok(Some(updated))
    }

    async fn claim_reminders(
        &self,
        invoice_id: Uuid,
        lease: Duration,
    ) -> Result<Option<Uuid>, AppError> {
        let mut state = self.state.lock().await;
        if !state.invoices.contains_key(&invoice_id) {
            return Ok(None);
        }
        let now = Utc::now();
        if let Some((_, until)) = state.reminder_claims.get(&invoice_id) {
            if *until > now {
                return Ok(None);
            }
        }
        let claim_id = Uuid::new_v4();
        state.reminder_claims.insert(invoice_id, (claim_id, now + lease));
        Ok(Some(claim_id))
    }

    async fn release_reminders(&self, invoice_id: Uuid, claim_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if state
            .reminder_claims
            .get(&invoice_id)
            .is_some_and(|(held, _)| *held == claim_id)
        {
            state.reminder_claims.remove(&invoice_id);
        }
        Ok(())
    }

    async fn append_reminder_log(&self, input: &NewReminderLog) -> Result<ReminderLog, AppError> {
        let log = ReminderLog {
            reminder_log_id: Uuid::new_v4(),
            invoice_id: input.invoice_id,
            reminder_type: input.reminder_type.as_str().to_string(),
            sent_at: input.sent_at,
            sent_to: input.sent_to.clone(),
            status: input.status.as_str().to_string(),
            error_message: input.error_message.clone(),
        };
        let mut state = self.state.lock().await;
        if !state.invoices.contains_key(&input.invoice_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                input.invoice_id
            )));
        }
        state.reminder_logs.push(log.clone());
        Ok(log)
    }

    async fn list_reminder_logs(&self, invoice_id: Uuid) -> Result<Vec<ReminderLog>, AppError> {
        let state = self.state.lock().await;
        let mut logs: Vec<ReminderLog> = state
            .reminder_logs
            .iter()
            .filter(|log| log.invoice_id == invoice_id)
            .cloned()
            .collect();
        logs.sort_by_key(|log| log.sent_at);
        Ok(logs)
    }

    async fn insert_webhook_log(&self, input: &NewWebhookLog) -> Result<WebhookLog, AppError> {
        let log = WebhookLog {
            webhook_log_id: Uuid::new_v4(),
            endpoint: input.endpoint.clone(),
            method: input.method.clone(),
            headers: input.headers.clone(),
            body: input.body.clone(),
            signature: input.signature.clone(),
            status: input.status,
            error: input.error.clone(),
            debug_info: None,
            received_at: Utc::now(),
            processed_at: input.processed_at,
        };
        self.state.lock().await.webhook_logs.push(log.clone());
        Ok(log)
    }

    async fn finalize_webhook_log(
        &self,
        webhook_log_id: Uuid,
        outcome: &WebhookLogOutcome,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let log = state
            .webhook_logs
            .iter_mut()
            .find(|log| log.webhook_log_id == webhook_log_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Webhook log {} not found", webhook_log_id))
            })?;
        log.status = outcome.status;
        log.error = outcome.error.clone();
        log.debug_info = outcome.debug_info.clone();
        log.processed_at = Some(outcome.processed_at);
        Ok(())
    }

    async fn list_webhook_logs(&self, limit: i64) -> Result<Vec<WebhookLog>, AppError> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .webhook_logs
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InvoiceTotals;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn totals(subtotal: Decimal) -> InvoiceTotals {
        InvoiceTotals {
            subtotal,
            tps: Decimal::ZERO,
            tvq: Decimal::ZERO,
            total: subtotal,
        }
    }

    async fn seed(store: &MemoryStore) -> (User, Client) {
        let user = store
            .insert_user(&User::new("owner@example.com", "Owner", false))
            .await
            .unwrap();
        let client = store
            .create_client(&CreateClient {
                user_id: user.user_id,
                name: "Acme".to_string(),
                email: Some("billing@acme.test".to_string()),
            })
            .await
            .unwrap();
        (user, client)
    }

    fn draft(user: &User, client: &Client, links: Vec<Uuid>) -> NewInvoice {
        NewInvoice {
            user_id: user.user_id,
            client_id: client.client_id,
            project_id: None,
            charges_taxes: false,
            totals: totals(Decimal::new(100, 0)),
            created_at: Utc::now(),
            due_date: None,
            items: vec![NewInvoiceItem {
                description: "Work".to_string(),
                amount: Decimal::new(100, 0),
                item_date: None,
                unpaid_amount_id: links.first().copied(),
            }],
            unpaid_amount_ids: links,
        }
    }

    #[tokio::test]
    async fn test_invoice_numbers_are_sequential_per_user() {
        let store = MemoryStore::new();
        let (user, client) = seed(&store).await;
        let (other, other_client) = {
            let other = store
                .insert_user(&User::new("other@example.com", "Other", false))
                .await
                .unwrap();
            let c = store
                .create_client(&CreateClient {
                    user_id: other.user_id,
                    name: "Other client".to_string(),
                    email: None,
                })
                .await
                .unwrap();
            (other, c)
        };

        let first = store.create_invoice(&draft(&user, &client, vec![])).await.unwrap();
        let second = store.create_invoice(&draft(&user, &client, vec![])).await.unwrap();
        let foreign = store
            .create_invoice(&draft(&other, &other_client, vec![]))
            .await
            .unwrap();

        assert_eq!(first.invoice.invoice_number, 1);
        assert_eq!(second.invoice.invoice_number, 2);
        assert_eq!(foreign.invoice.invoice_number, 1);
    }

    #[tokio::test]
    async fn test_linking_an_already_linked_entry_fails_without_side_effects() {
        let store = MemoryStore::new();
        let (user, client) = seed(&store).await;
        let entry = store
            .create_unpaid_amount(&CreateUnpaidAmount {
                user_id: user.user_id,
                client_id: client.client_id,
                amount: Decimal::new(100, 0),
                description: "Work".to_string(),
                entry_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                due_date: None,
            })
            .await
            .unwrap();

        store
            .create_invoice(&draft(&user, &client, vec![entry.unpaid_amount_id]))
            .await
            .unwrap();
        let err = store
            .create_invoice(&draft(&user, &client, vec![entry.unpaid_amount_id]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::PreconditionFailed(_)));
        let invoices = store
            .list_invoices(user.user_id, &ListInvoicesFilter::default())
            .await
            .unwrap();
        assert_eq!(invoices.len(), 1);
    }

    #[tokio::test]
    async fn test_entry_edit_totals_follow_lines_replaced_in_between() {
        let store = MemoryStore::new();
        let (user, client) = seed(&store).await;
        let entry = store
            .create_unpaid_amount(&CreateUnpaidAmount {
                user_id: user.user_id,
                client_id: client.client_id,
                amount: Decimal::new(100, 0),
                description: "Work".to_string(),
                entry_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
                due_date: None,
            })
            .await
            .unwrap();
        let detail = store
            .create_invoice(&draft(&user, &client, vec![entry.unpaid_amount_id]))
            .await
            .unwrap();
        let invoice_id = detail.invoice.invoice_id;

        // The edit is planned against one line, then a manual line lands first.
        let revision = LinkedItemRevision { invoice_id };
        let mut items: Vec<NewInvoiceItem> = detail
            .items
            .iter()
            .map(|item| NewInvoiceItem {
                description: item.description.clone(),
                amount: item.amount,
                item_date: item.item_date,
                unpaid_amount_id: item.unpaid_amount_id,
            })
            .collect();
        items.push(NewInvoiceItem {
            description: "Expenses".to_string(),
            amount: Decimal::new(50, 0),
            item_date: None,
            unpaid_amount_id: None,
        });
        store
            .replace_invoice_items(
                user.user_id,
                invoice_id,
                &ItemReplacement {
                    expected_status: InvoiceStatus::Draft,
                    items: Some(items),
                    created_at: None,
                    due_date: None,
                    released_unpaid_amount_ids: Vec::new(),
                },
            )
            .await
            .unwrap()
            .unwrap();

        store
            .update_unpaid_amount(
                user.user_id,
                entry.unpaid_amount_id,
                &UnpaidAmountChanges {
                    amount: Some(Decimal::new(200, 0)),
                    ..Default::default()
                },
                Some(&revision),
            )
            .await
            .unwrap()
            .unwrap();

        let stored = store
            .get_invoice(user.user_id, invoice_id)
            .await
            .unwrap()
            .unwrap();
        let items_sum: Decimal = stored.items.iter().map(|item| item.amount).sum();
        assert_eq!(items_sum, Decimal::new(250, 0));
        assert_eq!(stored.invoice.subtotal, items_sum);
        assert_eq!(stored.invoice.total, items_sum);
    }

    #[tokio::test]
    async fn test_dates_only_update_keeps_totals_of_current_lines() {
        let store = MemoryStore::new();
        let (user, client) = seed(&store).await;
        let detail = store.create_invoice(&draft(&user, &client, vec![])).await.unwrap();

        let updated = store
            .replace_invoice_items(
                user.user_id,
                detail.invoice.invoice_id,
                &ItemReplacement {
                    expected_status: InvoiceStatus::Draft,
                    items: None,
                    created_at: None,
                    due_date: NaiveDate::from_ymd_opt(2025, 3, 1),
                    released_unpaid_amount_ids: Vec::new(),
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.invoice.subtotal, Decimal::new(100, 0));
        assert_eq!(updated.invoice.due_date, NaiveDate::from_ymd_opt(2025, 3, 1));
    }

    #[tokio::test]
    async fn test_reminder_claim_is_exclusive_until_released_or_expired() {
        let store = MemoryStore::new();
        let (user, client) = seed(&store).await;
        let detail = store.create_invoice(&draft(&user, &client, vec![])).await.unwrap();
        let invoice_id = detail.invoice.invoice_id;

        let first = store
            .claim_reminders(invoice_id, Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .claim_reminders(invoice_id, Duration::minutes(5))
            .await
            .unwrap()
            .is_none());

        // Releasing someone else's claim does nothing.
        store.release_reminders(invoice_id, Uuid::new_v4()).await.unwrap();
        assert!(store
            .claim_reminders(invoice_id, Duration::minutes(5))
            .await
            .unwrap()
            .is_none());

        store.release_reminders(invoice_id, first).await.unwrap();
        let expiring = store
            .claim_reminders(invoice_id, Duration::zero())
            .await
            .unwrap();
        assert!(expiring.is_some());
        assert!(store
            .claim_reminders(invoice_id, Duration::minutes(5))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_status_change_is_skipped_when_status_moved() {
        let store = MemoryStore::new();
        let (user, client) = seed(&store).await;
        let detail = store.create_invoice(&draft(&user, &client, vec![])).await.unwrap();

        let change = StatusChange {
            from: InvoiceStatus::Sent,
            to: InvoiceStatus::Paid,
            at: Utc::now(),
        };
        let result = store
            .apply_status_change(user.user_id, detail.invoice.invoice_id, &change)
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_webhook_logs_are_listed_newest_first() {
        let store = MemoryStore::new();
        for body in ["first", "second"] {
            store
                .insert_webhook_log(&NewWebhookLog {
                    endpoint: "/webhooks/payments".to_string(),
                    method: "POST".to_string(),
                    headers: serde_json::json!({}),
                    body: body.to_string(),
                    signature: None,
                    status: 202,
                    error: None,
                    processed_at: None,
                })
                .await
                .unwrap();
        }

        let logs = store.list_webhook_logs(1).await.unwrap();

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].body, "second");
    }
}
