pub mod email;
pub mod gateway;
pub mod invoices;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod reminders;
pub mod store;
pub mod tax;
pub mod templates;
pub mod webhooks;

pub use email::{EmailMessage, EmailProvider, MockEmailProvider, ProviderError, SmtpProvider};
pub use gateway::GatewayClient;
pub use invoices::{CreateInvoiceInput, InvoiceService, UpdateInvoiceInput};
pub use ledger::{AddEntryInput, InvoiceEntriesInput, LedgerService};
pub use metrics::init_metrics;
pub use reminders::{ReminderPolicy, ReminderService};
pub use store::{BillingStore, MemoryStore, PgStore};
pub use webhooks::WebhookReconciler;
