//! Domain models for client-billing-service.

mod client;
mod invoice;
mod reminder_log;
mod unpaid_amount;
mod user;
mod webhook_log;

pub use client::{Client, CreateClient, CreateProject, Project};
pub use invoice::{
    Invoice, InvoiceDetail, InvoiceItem, InvoiceStatus, InvoiceTotals, ItemReplacement,
    ListInvoicesFilter, NewInvoice, NewInvoiceItem, StatusChange,
};
pub use reminder_log::{NewReminderLog, ReminderLog, ReminderLogStatus, ReminderType};
pub use unpaid_amount::{
    CreateUnpaidAmount, LinkedItemRevision, UnpaidAmount, UnpaidAmountChanges,
    UnpaidAmountStatus,
};
pub use user::{SubscriptionStatus, SubscriptionUpdate, User};
pub use webhook_log::{NewWebhookLog, WebhookLog, WebhookLogOutcome};
